// src/detect/node.rs
// Node.js/TypeScript detection from package.json

use std::path::Path;

use super::RepoFacts;

const FRAMEWORKS: &[(&str, &str)] = &[
    ("next", "nextjs"),
    ("@nestjs/core", "nestjs"),
    ("express", "express"),
    ("fastify", "fastify"),
    ("koa", "koa"),
    ("hapi", "hapi"),
];

pub fn detect(repo: &Path) -> Option<RepoFacts> {
    let manifest_path = repo.join("package.json");
    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(manifest_path).ok()?).ok()?;

    let dependencies: Vec<String> = ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|key| manifest.get(*key))
        .filter_map(|v| v.as_object())
        .flat_map(|m| m.keys().cloned())
        .collect();

    let framework = FRAMEWORKS
        .iter()
        .find(|(dep, _)| dependencies.iter().any(|d| d == dep))
        .map(|(_, name)| name.to_string());

    let scripts = manifest.get("scripts").and_then(|v| v.as_object());
    let entrypoint = scripts
        .and_then(|s| s.get("start"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| {
            manifest
                .get("main")
                .and_then(|v| v.as_str())
                .map(|main| format!("node {main}"))
        });

    let package_manager = if repo.join("pnpm-lock.yaml").exists() {
        "pnpm"
    } else if repo.join("yarn.lock").exists() {
        "yarn"
    } else {
        "npm"
    };

    let runtime_version = manifest
        .get("engines")
        .and_then(|e| e.get("node"))
        .and_then(|v| v.as_str())
        .map(|spec| spec.trim_start_matches(['>', '=', '^', '~', ' ']).to_string());

    let default_port = match framework.as_deref() {
        Some("nextjs") => 3000,
        Some("nestjs") => 3000,
        _ => 3000,
    };

    Some(RepoFacts {
        language: "node".to_string(),
        framework,
        build_system: scripts
            .map(|s| s.contains_key("build"))
            .unwrap_or(false)
            .then(|| format!("{package_manager} run build")),
        package_manager: Some(package_manager.to_string()),
        entrypoint,
        runtime_version,
        exposed_ports: super::scan_for_ports(repo, &["js", "ts", "mjs", "cjs"], default_port),
        databases: super::database_hints(&dependencies),
        app_name: manifest
            .get("name")
            .and_then(|v| v.as_str())
            .map(|n| n.rsplit('/').next().unwrap_or(n).to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_manifest_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(detect(dir.path()).is_none());
    }

    #[test]
    fn scoped_package_name_is_unscoped() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name": "@acme/checkout", "dependencies": {"fastify": "^4"}}"#,
        )
        .expect("write");

        let facts = detect(dir.path()).expect("detect");
        assert_eq!(facts.app_name.as_deref(), Some("checkout"));
        assert_eq!(facts.framework.as_deref(), Some("fastify"));
        assert_eq!(facts.package_manager.as_deref(), Some("npm"));
    }
}
