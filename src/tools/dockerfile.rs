// src/tools/dockerfile.rs
// Step 2: Dockerfile generation from the analyze result.
//
// Templates are multi-stage per language. The generated content is policy-
// checked before anything is written: a blocking rule means no Dockerfile
// lands in the workspace and no result is recorded.

use serde::{Deserialize, Serialize};

use crate::detect::RepoFacts;
use crate::error::{KitError, Result, codes};
use crate::policy::PolicyNote;
use crate::session::Session;

use super::{ToolContext, require_result, workspace_for};

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DockerfileResult {
    pub path: String,
    pub content: String,
    pub base_image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PolicyNote>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<PolicyNote>,
}

#[derive(Default)]
pub struct DockerfileParams {
    /// Override the generated base image (mostly for tests and pinning).
    pub base_image: Option<String>,
}

pub async fn execute(
    ctx: &impl ToolContext,
    session: &Session,
    params: &DockerfileParams,
) -> Result<DockerfileResult> {
    let facts: RepoFacts = require_result(session, "dockerfile", "analyze")?;

    let (content, base_image) = generate(&facts, params.base_image.as_deref())?;

    // Policy runs against the generated content before it is written.
    let mut context = crate::policy::flatten_input(
        "dockerfile",
        &serde_json::json!({ "session_id": session.id }),
    );
    context.insert("dockerfile_content".to_string(), content.clone());
    let verdict = ctx.policy().evaluate(&context);
    let warnings = verdict.warnings.clone();
    let suggestions = verdict.suggestions.clone();
    if let Some(err) = verdict.into_block_error() {
        return Err(err);
    }

    let workspace = workspace_for(ctx, session)?;
    let path = workspace.write_atomic("Dockerfile", &content)?;

    Ok(DockerfileResult {
        path: path.to_string_lossy().to_string(),
        content,
        base_image,
        warnings,
        suggestions,
    })
}

/// Render the Dockerfile for the detected stack. Returns (content, base image).
fn generate(facts: &RepoFacts, base_override: Option<&str>) -> Result<(String, String)> {
    let content = match facts.language.as_str() {
        "node" => node_dockerfile(facts, base_override),
        "python" => python_dockerfile(facts, base_override),
        "go" => go_dockerfile(facts, base_override),
        "rust" => rust_dockerfile(facts, base_override),
        other => {
            return Err(KitError::build(
                codes::DOCKERFILE_GENERATION_FAILED,
                format!("no Dockerfile template for language '{other}'"),
            ));
        }
    };
    let base = content
        .lines()
        .find_map(|l| l.trim().strip_prefix("FROM "))
        .map(|l| l.split_whitespace().next().unwrap_or("").to_string())
        .unwrap_or_default();
    Ok((content, base))
}

fn port_lines(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| format!("EXPOSE {p}\n"))
        .collect::<String>()
}

fn node_dockerfile(facts: &RepoFacts, base_override: Option<&str>) -> String {
    let version = facts
        .runtime_version
        .as_deref()
        .and_then(|v| v.split('.').next())
        .unwrap_or("20");
    let base = base_override
        .map(String::from)
        .unwrap_or_else(|| format!("node:{version}-alpine"));
    let manager = facts.package_manager.as_deref().unwrap_or("npm");
    let install = match manager {
        "pnpm" => "RUN corepack enable && pnpm install --frozen-lockfile",
        "yarn" => "RUN corepack enable && yarn install --frozen-lockfile",
        _ => "RUN npm ci",
    };
    let build = facts
        .build_system
        .as_deref()
        .map(|cmd| format!("RUN {cmd}\n"))
        .unwrap_or_default();
    let command = facts
        .entrypoint
        .as_deref()
        .unwrap_or("node index.js")
        .split_whitespace()
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "FROM {base} AS build\n\
         WORKDIR /app\n\
         COPY package*.json ./\n\
         {install}\n\
         COPY . .\n\
         {build}\
         \n\
         FROM {base}\n\
         ENV NODE_ENV=production\n\
         WORKDIR /app\n\
         COPY --from=build /app /app\n\
         USER node\n\
         {ports}CMD [{command}]\n",
        ports = port_lines(&facts.exposed_ports),
    )
}

fn python_dockerfile(facts: &RepoFacts, base_override: Option<&str>) -> String {
    let base = base_override.unwrap_or("python:3.12-slim").to_string();
    let command = facts
        .entrypoint
        .as_deref()
        .unwrap_or("python main.py")
        .split_whitespace()
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "FROM {base}\n\
         ENV PYTHONDONTWRITEBYTECODE=1 PYTHONUNBUFFERED=1\n\
         WORKDIR /app\n\
         COPY requirements*.txt pyproject.toml* ./\n\
         RUN pip install --no-cache-dir -r requirements.txt || pip install --no-cache-dir .\n\
         COPY . .\n\
         RUN useradd --create-home appuser\n\
         USER appuser\n\
         {ports}CMD [{command}]\n",
        ports = port_lines(&facts.exposed_ports),
    )
}

fn go_dockerfile(facts: &RepoFacts, base_override: Option<&str>) -> String {
    let version = facts.runtime_version.as_deref().unwrap_or("1.22");
    let build_base = base_override
        .map(String::from)
        .unwrap_or_else(|| format!("golang:{version}-alpine"));

    format!(
        "FROM {build_base} AS build\n\
         WORKDIR /src\n\
         COPY go.mod go.sum* ./\n\
         RUN go mod download\n\
         COPY . .\n\
         RUN CGO_ENABLED=0 go build -o /app/server .\n\
         \n\
         FROM gcr.io/distroless/static-debian12\n\
         COPY --from=build /app/server /app/server\n\
         {ports}ENTRYPOINT [\"/app/server\"]\n",
        ports = port_lines(&facts.exposed_ports),
    )
}

fn rust_dockerfile(facts: &RepoFacts, base_override: Option<&str>) -> String {
    let base = base_override.unwrap_or("rust:1.80-slim").to_string();
    let binary = facts.app_name.as_deref().unwrap_or("app");

    format!(
        "FROM {base} AS build\n\
         WORKDIR /src\n\
         COPY . .\n\
         RUN cargo build --release\n\
         \n\
         FROM debian:bookworm-slim\n\
         COPY --from=build /src/target/release/{binary} /app/{binary}\n\
         {ports}ENTRYPOINT [\"/app/{binary}\"]\n",
        ports = port_lines(&facts.exposed_ports),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_facts() -> RepoFacts {
        RepoFacts {
            language: "node".into(),
            framework: Some("express".into()),
            package_manager: Some("npm".into()),
            entrypoint: Some("node server.js".into()),
            exposed_ports: vec![3000],
            app_name: Some("shop-api".into()),
            ..Default::default()
        }
    }

    #[test]
    fn node_template_is_multi_stage_and_non_root() {
        let (content, base) = generate(&node_facts(), None).expect("generate");
        assert_eq!(base, "node:20-alpine");
        assert_eq!(content.matches("FROM").count(), 2);
        assert!(content.contains("USER node"));
        assert!(content.contains("EXPOSE 3000"));
        assert!(content.contains("CMD [\"node\", \"server.js\"]"));
    }

    #[test]
    fn base_override_is_respected() {
        let (content, base) = generate(&node_facts(), Some("node:latest")).expect("generate");
        assert_eq!(base, "node:latest");
        assert!(content.starts_with("FROM node:latest"));
    }

    #[test]
    fn go_template_uses_distroless_runtime() {
        let facts = RepoFacts {
            language: "go".into(),
            runtime_version: Some("1.22".into()),
            exposed_ports: vec![8080],
            ..Default::default()
        };
        let (content, _) = generate(&facts, None).expect("generate");
        assert!(content.contains("distroless"));
        assert!(content.contains("CGO_ENABLED=0"));
    }

    #[test]
    fn unsupported_language_fails() {
        let facts = RepoFacts {
            language: "cobol".into(),
            ..Default::default()
        };
        let err = generate(&facts, None).expect_err("unsupported");
        assert_eq!(err.code, codes::DOCKERFILE_GENERATION_FAILED);
    }
}
