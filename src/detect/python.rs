// src/detect/python.rs
// Python detection from pyproject.toml / requirements.txt

use std::path::Path;

use super::RepoFacts;

const FRAMEWORKS: &[(&str, &str)] = &[
    ("django", "django"),
    ("fastapi", "fastapi"),
    ("flask", "flask"),
    ("tornado", "tornado"),
];

pub fn detect(repo: &Path) -> Option<RepoFacts> {
    let pyproject = repo.join("pyproject.toml");
    let requirements = repo.join("requirements.txt");

    let (dependencies, app_name, build_system) = if pyproject.exists() {
        let doc: toml::Value = toml::from_str(&std::fs::read_to_string(&pyproject).ok()?).ok()?;
        let deps = doc
            .get("project")
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(dependency_name)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let name = doc
            .get("project")
            .and_then(|p| p.get("name"))
            .and_then(|v| v.as_str())
            .map(String::from);
        let uses_poetry = doc
            .get("tool")
            .map(|t| t.get("poetry").is_some())
            .unwrap_or(false);
        (
            deps,
            name,
            Some(if uses_poetry { "poetry" } else { "pip" }.to_string()),
        )
    } else if requirements.exists() {
        let deps = std::fs::read_to_string(&requirements)
            .ok()?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(dependency_name)
            .collect();
        (deps, None, Some("pip".to_string()))
    } else {
        return None;
    };

    let framework = FRAMEWORKS
        .iter()
        .find(|(dep, _)| dependencies.iter().any(|d| d.eq_ignore_ascii_case(dep)))
        .map(|(_, name)| name.to_string());

    let entrypoint = match framework.as_deref() {
        Some("django") => Some("gunicorn config.wsgi:application".to_string()),
        Some("fastapi") => Some("uvicorn main:app --host 0.0.0.0".to_string()),
        Some("flask") => Some("gunicorn app:app".to_string()),
        _ => repo
            .join("main.py")
            .exists()
            .then(|| "python main.py".to_string()),
    };

    let default_port = match framework.as_deref() {
        Some("django") => 8000,
        Some("fastapi") => 8000,
        Some("flask") => 5000,
        _ => 8000,
    };

    Some(RepoFacts {
        language: "python".to_string(),
        framework,
        build_system,
        package_manager: None,
        entrypoint,
        runtime_version: None,
        exposed_ports: super::scan_for_ports(repo, &["py"], default_port),
        databases: super::database_hints(&dependencies),
        app_name,
    })
}

/// "flask>=3.0" / "psycopg[binary]==3.1" -> "flask" / "psycopg"
fn dependency_name(spec: &str) -> String {
    spec.split(['=', '>', '<', '~', '[', ' ', ';'])
        .next()
        .unwrap_or(spec)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_txt_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("requirements.txt"),
            "flask>=3.0\npsycopg[binary]==3.1\n# comment\n",
        )
        .expect("write");

        let facts = detect(dir.path()).expect("detect");
        assert_eq!(facts.language, "python");
        assert_eq!(facts.framework.as_deref(), Some("flask"));
        assert_eq!(facts.databases, vec!["postgres"]);
        assert_eq!(facts.exposed_ports, vec![5000]);
    }

    #[test]
    fn dependency_name_strips_version_specs() {
        assert_eq!(dependency_name("fastapi>=0.110"), "fastapi");
        assert_eq!(dependency_name("psycopg[binary]==3.1"), "psycopg");
        assert_eq!(dependency_name("redis"), "redis");
    }
}
