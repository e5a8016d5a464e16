// src/detect/mod.rs
// Repository analysis: language, framework, build system, entry points,
// exposed ports, database hints. Detection is manifest-driven per language
// with a few file-content heuristics; the first language whose manifest is
// present wins.

mod go;
mod node;
mod python;
mod rust;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, KitError, Result, Severity, codes};

/// Facts the analyze tool extracts from a repository. Everything downstream
/// (Dockerfile generation, manifests) keys off this.
#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RepoFacts {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

/// Detect facts about the repository at `repo`.
pub fn detect(repo: &Path) -> Result<RepoFacts> {
    if !repo.is_dir() {
        return Err(KitError::validation(format!(
            "repository path '{}' is not a directory",
            repo.display()
        )));
    }

    let detectors: [fn(&Path) -> Option<RepoFacts>; 4] =
        [node::detect, python::detect, go::detect, rust::detect];
    for detector in detectors {
        if let Some(facts) = detector(repo) {
            tracing::debug!(language = %facts.language, "repository detected");
            return Ok(facts);
        }
    }

    Err(KitError::new(
        codes::ANALYZE_FAILED,
        ErrorCategory::Build,
        Severity::Medium,
        format!(
            "could not detect a supported language in '{}'",
            repo.display()
        ),
    )
    .with_suggestion("supported manifests: package.json, pyproject.toml/requirements.txt, go.mod, Cargo.toml"))
}

/// Scan source files near the repo root for `:<port>`-style listen hints.
/// Cheap fallback used when the manifest carries no port information.
pub(crate) fn scan_for_ports(repo: &Path, extensions: &[&str], default: u16) -> Vec<u16> {
    use once_cell::sync::Lazy;
    use regex::Regex;

    #[allow(clippy::expect_used)]
    static LISTEN_PORT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?::|\bPORT\b\D{0,10})(\d{4,5})\b").expect("valid regex"));

    let mut ports = Vec::new();
    for entry in walkdir::WalkDir::new(repo)
        .max_depth(3)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !matches!(
                name.as_ref(),
                "node_modules" | "target" | "vendor" | ".git" | "dist" | "__pycache__"
            )
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let matches_ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| extensions.contains(&ext))
            .unwrap_or(false);
        if !matches_ext {
            continue;
        }
        if let Ok(content) = std::fs::read_to_string(entry.path()) {
            for captures in LISTEN_PORT.captures_iter(&content) {
                if let Ok(port) = captures[1].parse::<u16>() {
                    if (1024..=65535).contains(&port) && !ports.contains(&port) {
                        ports.push(port);
                    }
                }
            }
        }
        if ports.len() >= 4 {
            break;
        }
    }

    if ports.is_empty() {
        ports.push(default);
    }
    ports.truncate(4);
    ports
}

/// Map dependency names to database/service hints shared across languages.
pub(crate) fn database_hints(dependencies: &[String]) -> Vec<String> {
    const HINTS: &[(&str, &str)] = &[
        ("pg", "postgres"),
        ("postgres", "postgres"),
        ("psycopg", "postgres"),
        ("sqlx", "postgres"),
        ("mysql", "mysql"),
        ("mysql2", "mysql"),
        ("mongoose", "mongodb"),
        ("mongodb", "mongodb"),
        ("pymongo", "mongodb"),
        ("redis", "redis"),
        ("ioredis", "redis"),
        ("sqlite", "sqlite"),
        ("rusqlite", "sqlite"),
    ];

    let mut found = Vec::new();
    for dep in dependencies {
        let dep = dep.to_lowercase();
        for (needle, db) in HINTS {
            if dep == *needle || dep.starts_with(&format!("{needle}-")) {
                if !found.contains(&db.to_string()) {
                    found.push(db.to_string());
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_rejects_missing_directory() {
        let err = detect(Path::new("/no/such/repo")).expect_err("must fail");
        assert_eq!(err.category, ErrorCategory::Validation);
    }

    #[test]
    fn detect_fails_on_empty_repo() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = detect(dir.path()).expect_err("must fail");
        assert_eq!(err.code, codes::ANALYZE_FAILED);
    }

    #[test]
    fn database_hints_dedupe() {
        let deps = vec!["pg".to_string(), "postgres".to_string(), "redis".to_string()];
        assert_eq!(database_hints(&deps), vec!["postgres", "redis"]);
    }

    #[test]
    fn node_repo_detection_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("package.json"),
            r#"{
                "name": "shop-api",
                "scripts": {"start": "node server.js"},
                "dependencies": {"express": "^4.19.0", "pg": "^8.0.0"},
                "engines": {"node": ">=20"}
            }"#,
        )
        .expect("write");
        std::fs::write(dir.path().join("server.js"), "app.listen(3000);\n").expect("write");

        let facts = detect(dir.path()).expect("detect");
        assert_eq!(facts.language, "node");
        assert_eq!(facts.framework.as_deref(), Some("express"));
        assert_eq!(facts.entrypoint.as_deref(), Some("node server.js"));
        assert_eq!(facts.exposed_ports, vec![3000]);
        assert_eq!(facts.databases, vec!["postgres"]);
        assert_eq!(facts.app_name.as_deref(), Some("shop-api"));
    }
}
