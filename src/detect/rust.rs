// src/detect/rust.rs
// Rust detection from Cargo.toml

use std::path::Path;

use super::RepoFacts;

const FRAMEWORKS: &[(&str, &str)] = &[
    ("axum", "axum"),
    ("actix-web", "actix-web"),
    ("rocket", "rocket"),
    ("warp", "warp"),
];

pub fn detect(repo: &Path) -> Option<RepoFacts> {
    let manifest: toml::Value =
        toml::from_str(&std::fs::read_to_string(repo.join("Cargo.toml")).ok()?).ok()?;

    let package = manifest.get("package");
    let app_name = package
        .and_then(|p| p.get("name"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let dependencies: Vec<String> = manifest
        .get("dependencies")
        .and_then(|d| d.as_table())
        .map(|t| t.keys().cloned().collect())
        .unwrap_or_default();

    let framework = FRAMEWORKS
        .iter()
        .find(|(dep, _)| dependencies.iter().any(|d| d == dep))
        .map(|(_, name)| name.to_string());

    Some(RepoFacts {
        language: "rust".to_string(),
        framework,
        build_system: Some("cargo build --release".to_string()),
        package_manager: Some("cargo".to_string()),
        entrypoint: app_name.as_ref().map(|name| format!("/app/{name}")),
        runtime_version: package
            .and_then(|p| p.get("rust-version"))
            .and_then(|v| v.as_str())
            .map(String::from),
        exposed_ports: super::scan_for_ports(repo, &["rs"], 8080),
        databases: super::database_hints(&dependencies),
        app_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cargo_toml_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"metrics-api\"\nrust-version = \"1.80\"\n\n[dependencies]\naxum = \"0.8\"\nsqlx = \"0.8\"\n",
        )
        .expect("write");

        let facts = detect(dir.path()).expect("detect");
        assert_eq!(facts.language, "rust");
        assert_eq!(facts.framework.as_deref(), Some("axum"));
        assert_eq!(facts.entrypoint.as_deref(), Some("/app/metrics-api"));
        assert_eq!(facts.databases, vec!["postgres"]);
    }
}
