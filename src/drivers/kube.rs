// src/drivers/kube.rs
// Kubernetes adapter over the kubectl binary.
//
// A subprocess adapter keeps the dependency surface identical to what
// operators already run; everything structured comes back as `-o json`.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCategory, KitError, Result, Severity, codes};
use crate::utils::{short_id, truncate};

use super::{AppliedResources, ClusterDriver, ClusterInfo, ClusterTarget, PodStatus};

pub struct KubectlDriver {
    kubectl: String,
}

struct CmdOutput {
    status_ok: bool,
    stdout: String,
    stderr: String,
}

impl KubectlDriver {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cancel: Option<&CancellationToken>,
    ) -> Result<CmdOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output_future = cmd.output();
        let output = match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(KitError::cancelled()),
                    out = output_future => out,
                }
            }
            None => output_future.await,
        }
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KitError::new(
                    codes::DRIVER_UNAVAILABLE,
                    ErrorCategory::System,
                    Severity::High,
                    format!("'{program}' binary not found"),
                )
                .with_suggestion(format!("install {program} or set the binary path in config"))
            } else {
                KitError::system(format!("failed to spawn {program}: {e}")).caused_by(e)
            }
        })?;

        Ok(CmdOutput {
            status_ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn kubectl_cmd(
        &self,
        args: &[&str],
        context: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<CmdOutput> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 2);
        if let Some(ctx) = context {
            full.push("--context");
            full.push(ctx);
        }
        full.extend_from_slice(args);
        self.run(&self.kubectl, &full, cancel).await
    }

    async fn server_version(&self, context: Option<&str>) -> Option<String> {
        let out = self
            .kubectl_cmd(&["version", "-o", "json"], context, None)
            .await
            .ok()?;
        let value: serde_json::Value = serde_json::from_str(&out.stdout).ok()?;
        value
            .get("serverVersion")
            .and_then(|v| v.get("gitVersion"))
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let out = self
            .kubectl_cmd(&["create", "namespace", namespace], None, None)
            .await?;
        if out.status_ok || out.stderr.contains("AlreadyExists") {
            Ok(())
        } else {
            Err(KitError::deploy(
                codes::DEPLOY_FAILED,
                format!("failed to create namespace '{namespace}': {}", truncate(&out.stderr, 500)),
            ))
        }
    }
}

#[async_trait]
impl ClusterDriver for KubectlDriver {
    async fn ensure_cluster(&self, target: &ClusterTarget) -> Result<ClusterInfo> {
        let context = target.context.as_deref();
        let reachable = self
            .kubectl_cmd(&["cluster-info"], context, None)
            .await
            .map(|out| out.status_ok)
            .unwrap_or(false);

        if reachable {
            return Ok(ClusterInfo {
                context: context.unwrap_or("current").to_string(),
                server_version: self.server_version(context).await,
                provisioned: false,
            });
        }

        if !target.provision_local {
            return Err(KitError::new(
                codes::CLUSTER_UNREACHABLE,
                ErrorCategory::Deploy,
                Severity::High,
                match context {
                    Some(ctx) => format!("cluster context '{ctx}' is not reachable"),
                    None => "no reachable cluster in the current kubeconfig".to_string(),
                },
            )
            .with_suggestion("pass provision_local=true to create a local dev cluster"));
        }

        // Provision a local dev cluster with kind, then re-check.
        let name = target
            .name
            .clone()
            .unwrap_or_else(|| format!("containerkit-{}", short_id()));
        let created = self
            .run("kind", &["create", "cluster", "--name", &name], None)
            .await?;
        if !created.status_ok {
            return Err(KitError::new(
                codes::CLUSTER_UNREACHABLE,
                ErrorCategory::Deploy,
                Severity::High,
                format!("kind cluster creation failed: {}", truncate(&created.stderr, 500)),
            ));
        }

        let kind_context = format!("kind-{name}");
        let verify = self
            .kubectl_cmd(&["cluster-info"], Some(&kind_context), None)
            .await?;
        if !verify.status_ok {
            return Err(KitError::new(
                codes::CLUSTER_UNREACHABLE,
                ErrorCategory::Deploy,
                Severity::High,
                format!("provisioned cluster '{kind_context}' did not become reachable"),
            ));
        }

        Ok(ClusterInfo {
            server_version: self.server_version(Some(&kind_context)).await,
            context: kind_context,
            provisioned: true,
        })
    }

    async fn apply_manifests(
        &self,
        dir: &Path,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<AppliedResources> {
        self.ensure_namespace(namespace).await?;

        let dir_str = dir.to_string_lossy();
        let out = self
            .kubectl_cmd(
                &["apply", "-f", &dir_str, "-n", namespace, "-o", "json"],
                None,
                Some(cancel),
            )
            .await?;
        if !out.status_ok {
            return Err(KitError::deploy(
                codes::DEPLOY_FAILED,
                format!("kubectl apply failed: {}", truncate(&out.stderr, 1000)),
            )
            .with_context("namespace", namespace)
            .with_context("manifest_dir", dir_str.as_ref()));
        }

        // apply -o json returns either a single object or a List.
        let mut resources = Vec::new();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&out.stdout) {
            let items: Vec<&serde_json::Value> = match value.get("items") {
                Some(items) => items.as_array().map(|a| a.iter().collect()).unwrap_or_default(),
                None => vec![&value],
            };
            for item in items {
                let kind = item.get("kind").and_then(|v| v.as_str()).unwrap_or("?");
                let name = item
                    .pointer("/metadata/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                resources.push(format!("{kind}/{name}"));
            }
        }
        Ok(AppliedResources { resources })
    }

    async fn delete_manifests(&self, dir: &Path, namespace: &str) -> Result<()> {
        let dir_str = dir.to_string_lossy();
        let out = self
            .kubectl_cmd(
                &[
                    "delete",
                    "-f",
                    &dir_str,
                    "-n",
                    namespace,
                    "--ignore-not-found",
                ],
                None,
                None,
            )
            .await?;
        if !out.status_ok {
            return Err(KitError::deploy(
                codes::DEPLOY_FAILED,
                format!("kubectl delete failed: {}", truncate(&out.stderr, 500)),
            ));
        }
        Ok(())
    }

    async fn pod_status(&self, namespace: &str, selector: &str) -> Result<PodStatus> {
        let out = self
            .kubectl_cmd(
                &["get", "pods", "-n", namespace, "-l", selector, "-o", "json"],
                None,
                None,
            )
            .await?;
        if !out.status_ok {
            return Err(KitError::deploy(
                codes::DEPLOY_FAILED,
                format!("kubectl get pods failed: {}", truncate(&out.stderr, 500)),
            ));
        }

        let value: serde_json::Value = serde_json::from_str(&out.stdout)?;
        let items = value
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let total = items.len() as u32;
        let ready = items
            .iter()
            .filter(|pod| {
                pod.pointer("/status/containerStatuses")
                    .and_then(|v| v.as_array())
                    .map(|containers| {
                        !containers.is_empty()
                            && containers
                                .iter()
                                .all(|c| c.get("ready").and_then(|r| r.as_bool()).unwrap_or(false))
                    })
                    .unwrap_or(false)
            })
            .count() as u32;

        Ok(PodStatus {
            ready,
            total,
            endpoint: items.first().and_then(|pod| {
                pod.pointer("/status/podIP")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            }),
        })
    }
}
