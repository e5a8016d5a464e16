// src/tools/manifest.rs
// Step 7: Kubernetes manifest generation from the analyze facts and the
// pushed image reference. Generated YAML is policy-checked before writing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::RepoFacts;
use crate::error::{KitError, Result, codes};
use crate::policy::PolicyNote;
use crate::session::Session;

use super::{ToolContext, require_result, workspace_for};

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ManifestResult {
    pub app_name: String,
    pub image: String,
    pub namespace: String,
    pub files: Vec<String>,
    /// Label selector shared by every generated resource.
    pub selector: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PolicyNote>,
}

#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub cpu: String,
    pub memory: String,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu: "500m".to_string(),
            memory: "256Mi".to_string(),
        }
    }
}

pub struct ManifestParams {
    pub namespace: String,
    pub app_name: Option<String>,
    pub replicas: u32,
    pub env: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    pub ingress_host: Option<String>,
}

impl Default for ManifestParams {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            app_name: None,
            replicas: 1,
            env: BTreeMap::new(),
            resources: ResourceLimits::default(),
            ingress_host: None,
        }
    }
}

pub async fn execute(
    ctx: &impl ToolContext,
    session: &Session,
    params: &ManifestParams,
) -> Result<ManifestResult> {
    crate::validate::dns_label("namespace", &params.namespace)?;
    crate::validate::replicas(params.replicas)?;

    let facts: RepoFacts = require_result(session, "manifest", "analyze")?;
    let push: super::push::PushResult = require_result(session, "manifest", "push")?;

    let app_name = params
        .app_name
        .clone()
        .or_else(|| facts.app_name.clone())
        .unwrap_or_else(|| "app".to_string());
    crate::validate::dns_label("app name", &app_name)?;

    let ports = if facts.exposed_ports.is_empty() {
        vec![8080]
    } else {
        facts.exposed_ports.clone()
    };

    // Pin the deployment to the pushed digest when the registry gave us one.
    let image = if push.digest.starts_with("sha256:") {
        let repo = push
            .reference
            .rsplit_once(':')
            .map(|(repo, _)| repo)
            .unwrap_or(&push.reference);
        format!("{repo}@{}", push.digest)
    } else {
        push.reference.clone()
    };

    let mut files: Vec<(String, String)> = vec![
        (
            "manifests/deployment.yaml".to_string(),
            deployment_yaml(&app_name, &image, params, &ports)?,
        ),
        (
            "manifests/service.yaml".to_string(),
            service_yaml(&app_name, &ports)?,
        ),
    ];
    if let Some(host) = &params.ingress_host {
        files.push((
            "manifests/ingress.yaml".to_string(),
            ingress_yaml(&app_name, host, ports[0])?,
        ));
    }

    // One policy pass over the concatenated documents.
    let combined: String = files
        .iter()
        .map(|(_, content)| content.as_str())
        .collect::<Vec<_>>()
        .join("---\n");
    let mut context = crate::policy::flatten_input(
        "manifest",
        &serde_json::json!({ "session_id": session.id, "namespace": params.namespace }),
    );
    context.insert("manifest_content".to_string(), combined);
    let verdict = ctx.policy().evaluate(&context);
    let warnings = verdict.warnings.clone();
    if let Some(err) = verdict.into_block_error() {
        return Err(err);
    }

    let workspace = workspace_for(ctx, session)?;
    let mut written = Vec::with_capacity(files.len());
    for (name, content) in &files {
        written.push(
            workspace
                .write_atomic(name, content)?
                .to_string_lossy()
                .to_string(),
        );
    }

    Ok(ManifestResult {
        selector: format!("app={app_name}"),
        app_name,
        image,
        namespace: params.namespace.clone(),
        files: written,
        warnings,
    })
}

fn to_yaml(value: &serde_json::Value) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        KitError::build(codes::MANIFEST_GENERATION_FAILED, format!("YAML render failed: {e}"))
            .caused_by(e)
    })
}

fn deployment_yaml(
    app_name: &str,
    image: &str,
    params: &ManifestParams,
    ports: &[u16],
) -> Result<String> {
    let env: Vec<serde_json::Value> = params
        .env
        .iter()
        .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
        .collect();
    let container_ports: Vec<serde_json::Value> = ports
        .iter()
        .map(|p| serde_json::json!({ "containerPort": p }))
        .collect();

    to_yaml(&serde_json::json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": app_name,
            "namespace": params.namespace,
            "labels": { "app": app_name },
        },
        "spec": {
            "replicas": params.replicas,
            "selector": { "matchLabels": { "app": app_name } },
            "template": {
                "metadata": { "labels": { "app": app_name } },
                "spec": {
                    "containers": [{
                        "name": app_name,
                        "image": image,
                        "ports": container_ports,
                        "env": env,
                        "resources": {
                            "limits": {
                                "cpu": params.resources.cpu,
                                "memory": params.resources.memory,
                            },
                            "requests": {
                                "cpu": "100m",
                                "memory": "128Mi",
                            },
                        },
                        "readinessProbe": {
                            "tcpSocket": { "port": ports[0] },
                            "initialDelaySeconds": 5,
                            "periodSeconds": 5,
                        },
                    }],
                },
            },
        },
    }))
}

fn service_yaml(app_name: &str, ports: &[u16]) -> Result<String> {
    let service_ports: Vec<serde_json::Value> = ports
        .iter()
        .map(|p| serde_json::json!({ "name": format!("port-{p}"), "port": p, "targetPort": p }))
        .collect();

    to_yaml(&serde_json::json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": app_name, "labels": { "app": app_name } },
        "spec": {
            "selector": { "app": app_name },
            "ports": service_ports,
        },
    }))
}

fn ingress_yaml(app_name: &str, host: &str, port: u16) -> Result<String> {
    to_yaml(&serde_json::json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": { "name": app_name },
        "spec": {
            "rules": [{
                "host": host,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {
                            "service": { "name": app_name, "port": { "number": port } },
                        },
                    }],
                },
            }],
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_renders_digest_image_and_probe() {
        let params = ManifestParams {
            namespace: "prod".into(),
            replicas: 3,
            ..Default::default()
        };
        let yaml = deployment_yaml("shop-api", "ghcr.io/acme/shop-api@sha256:abc", &params, &[3000])
            .expect("render");
        assert!(yaml.contains("kind: Deployment"));
        assert!(yaml.contains("replicas: 3"));
        assert!(yaml.contains("ghcr.io/acme/shop-api@sha256:abc"));
        assert!(yaml.contains("readinessProbe"));

        // Must parse back as YAML
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("parse");
        assert_eq!(
            parsed["spec"]["template"]["spec"]["containers"][0]["name"],
            serde_yaml::Value::String("shop-api".into())
        );
    }

    #[test]
    fn service_lists_every_port() {
        let yaml = service_yaml("web", &[80, 9090]).expect("render");
        assert!(yaml.contains("port: 80"));
        assert!(yaml.contains("port: 9090"));
    }

    #[test]
    fn ingress_points_at_service() {
        let yaml = ingress_yaml("web", "web.example.com", 80).expect("render");
        assert!(yaml.contains("host: web.example.com"));
        assert!(yaml.contains("number: 80"));
    }
}
