// src/detect/go.rs
// Go detection from go.mod

use std::path::Path;

use super::RepoFacts;

const FRAMEWORKS: &[(&str, &str)] = &[
    ("github.com/gin-gonic/gin", "gin"),
    ("github.com/labstack/echo", "echo"),
    ("github.com/gofiber/fiber", "fiber"),
    ("github.com/go-chi/chi", "chi"),
];

pub fn detect(repo: &Path) -> Option<RepoFacts> {
    let gomod = std::fs::read_to_string(repo.join("go.mod")).ok()?;

    let module = gomod
        .lines()
        .find_map(|line| line.trim().strip_prefix("module "))
        .map(str::trim);

    let framework = FRAMEWORKS
        .iter()
        .find(|(dep, _)| gomod.contains(dep))
        .map(|(_, name)| name.to_string());

    let runtime_version = gomod
        .lines()
        .find_map(|line| line.trim().strip_prefix("go "))
        .map(|v| v.trim().to_string());

    Some(RepoFacts {
        language: "go".to_string(),
        framework,
        build_system: Some("go build".to_string()),
        package_manager: None,
        entrypoint: Some("/app/server".to_string()),
        runtime_version,
        exposed_ports: super::scan_for_ports(repo, &["go"], 8080),
        databases: super::database_hints(
            &gomod
                .lines()
                .filter_map(|l| l.trim().split_whitespace().next())
                .filter(|t| t.contains('/'))
                .filter_map(|t| t.rsplit('/').next())
                .map(String::from)
                .collect::<Vec<_>>(),
        ),
        app_name: module.and_then(|m| m.rsplit('/').next()).map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gomod_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("go.mod"),
            "module github.com/acme/ledger\n\ngo 1.22\n\nrequire (\n\tgithub.com/gin-gonic/gin v1.10.0\n)\n",
        )
        .expect("write");
        std::fs::write(dir.path().join("main.go"), "r.Run(\":8081\")\n").expect("write");

        let facts = detect(dir.path()).expect("detect");
        assert_eq!(facts.language, "go");
        assert_eq!(facts.framework.as_deref(), Some("gin"));
        assert_eq!(facts.app_name.as_deref(), Some("ledger"));
        assert_eq!(facts.runtime_version.as_deref(), Some("1.22"));
        assert_eq!(facts.exposed_ports, vec![8081]);
    }
}
