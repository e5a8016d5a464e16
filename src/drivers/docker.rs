// src/drivers/docker.rs
// Docker daemon adapter over bollard.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions, RemoveImageOptions, TagImageOptions};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::RegistryAuth;
use crate::error::{KitError, Result, Severity, codes};
use crate::utils::{now_rfc3339, truncate};

use super::{ImageBuilt, ImageDriver, ImageInfo, PushedImage};

/// Push attempts on network-class failures before surfacing.
const PUSH_RETRY_BUDGET: u32 = 3;

pub struct BollardDriver {
    docker: Docker,
    registry: RegistryAuth,
}

impl BollardDriver {
    /// Connect to the daemon at a custom socket, or auto-detect.
    pub fn connect(socket: Option<&str>, registry: RegistryAuth) -> Result<Self> {
        let docker = match socket {
            Some(path) => Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| {
            KitError::new(
                codes::DRIVER_UNAVAILABLE,
                crate::error::ErrorCategory::System,
                Severity::High,
                format!("cannot connect to the docker daemon: {e}"),
            )
            .with_suggestion("check that docker is running: docker ps")
            .with_suggestion("on Linux, confirm the current user can access /var/run/docker.sock")
        })?;
        Ok(Self { docker, registry })
    }

    fn credentials(&self, reference: &str) -> Option<DockerCredentials> {
        if !self.registry.is_configured() {
            return None;
        }
        let serveraddress = reference
            .split_once('/')
            .map(|(host, _)| host)
            .filter(|host| host.contains('.') || host.contains(':'))
            .map(String::from);
        Some(DockerCredentials {
            username: self.registry.username.clone(),
            password: self.registry.password.clone(),
            serveraddress,
            ..Default::default()
        })
    }

    /// Split "repo:tag" for the tag/push APIs; missing tag means "latest".
    fn split_reference(reference: &str) -> (String, String) {
        match reference.rsplit_once(':') {
            // A colon inside a registry host:port is not a tag separator.
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
            _ => (reference.to_string(), "latest".to_string()),
        }
    }
}

/// Tar the build context in a blocking task.
async fn tar_context(dir: &Path) -> Result<Vec<u8>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(".", &dir)?;
        Ok(builder.into_inner()?)
    })
    .await?
}

#[async_trait]
impl ImageDriver for BollardDriver {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| KitError::network(format!("docker ping failed: {e}")).caused_by(e))?;
        Ok(())
    }

    async fn build(
        &self,
        context_dir: &Path,
        dockerfile: &str,
        reference: &str,
        build_args: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ImageBuilt> {
        let start = Instant::now();
        let context = tar_context(context_dir).await?;

        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: reference.to_string(),
            rm: true,
            buildargs: build_args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        };

        let mut stream =
            self.docker
                .build_image(options, None, Some(bytes::Bytes::from(context)));

        // Keep the output tail for error context.
        let mut tail: Vec<String> = Vec::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(KitError::cancelled()),
                item = stream.next() => {
                    match item {
                        None => break,
                        Some(Ok(info)) => {
                            if let Some(line) = info.stream.as_deref() {
                                let line = line.trim_end();
                                if !line.is_empty() {
                                    tail.push(line.to_string());
                                    if tail.len() > 40 {
                                        tail.remove(0);
                                    }
                                }
                            }
                            if let Some(detail) = info.error_detail {
                                let message = detail
                                    .message
                                    .or(info.error)
                                    .unwrap_or_else(|| "build failed".to_string());
                                return Err(KitError::build(
                                    codes::BUILD_EXECUTION_FAILED,
                                    message,
                                )
                                .with_context("image", reference)
                                .with_context("output_tail", truncate(&tail.join("\n"), 2000)));
                            }
                        }
                        Some(Err(e)) => {
                            return Err(KitError::build(
                                codes::BUILD_EXECUTION_FAILED,
                                format!("build stream failed: {e}"),
                            )
                            .with_context("image", reference)
                            .caused_by(e));
                        }
                    }
                }
            }
        }

        let info = self.inspect(reference).await?;
        Ok(ImageBuilt {
            image_id: info.id,
            reference: reference.to_string(),
            size_bytes: info.size_bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        let (repo, tag) = Self::split_reference(target);
        self.docker
            .tag_image(source, Some(TagImageOptions { repo, tag }))
            .await
            .map_err(|e| {
                KitError::build(codes::TAG_FAILED, format!("tagging '{source}' as '{target}' failed: {e}"))
                    .with_context("source", source)
                    .with_context("target", target)
                    .caused_by(e)
            })
    }

    async fn push(&self, reference: &str, cancel: &CancellationToken) -> Result<PushedImage> {
        let (repo, tag) = Self::split_reference(reference);
        let credentials = self.credentials(reference);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.push_once(&repo, &tag, credentials.clone(), cancel).await {
                Ok(()) => break,
                Err(e) if e.retryable() && attempt < PUSH_RETRY_BUDGET => {
                    let delay = e.retry_delay(attempt);
                    tracing::warn!(
                        "push attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        PUSH_RETRY_BUDGET,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        let info = self.inspect(reference).await?;
        let digest = info
            .digests
            .first()
            .and_then(|d| d.rsplit('@').next())
            .unwrap_or(&info.id)
            .to_string();
        Ok(PushedImage {
            reference: reference.to_string(),
            digest,
            pushed_at: now_rfc3339(),
        })
    }

    async fn inspect(&self, reference: &str) -> Result<ImageInfo> {
        let inspect = self.docker.inspect_image(reference).await.map_err(|e| {
            KitError::build(codes::BUILD_EXECUTION_FAILED, format!("inspect of '{reference}' failed: {e}"))
                .with_context("image", reference)
                .caused_by(e)
        })?;
        Ok(ImageInfo {
            id: inspect.id.unwrap_or_default(),
            size_bytes: inspect.size.unwrap_or(0).max(0) as u64,
            tags: inspect.repo_tags.unwrap_or_default(),
            digests: inspect.repo_digests.unwrap_or_default(),
        })
    }

    async fn remove_tag(&self, reference: &str) -> Result<()> {
        self.docker
            .remove_image(
                reference,
                Some(RemoveImageOptions {
                    force: false,
                    noprune: false,
                }),
                None,
            )
            .await
            .map_err(|e| {
                KitError::build(codes::BUILD_EXECUTION_FAILED, format!("removing '{reference}' failed: {e}"))
                    .caused_by(e)
            })?;
        Ok(())
    }
}

impl BollardDriver {
    async fn push_once(
        &self,
        repo: &str,
        tag: &str,
        credentials: Option<DockerCredentials>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut stream = self.docker.push_image(
            repo,
            Some(PushImageOptions { tag: tag.to_string() }),
            credentials,
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(KitError::cancelled()),
                item = stream.next() => {
                    match item {
                        None => return Ok(()),
                        Some(Ok(info)) => {
                            if let Some(error) = info.error {
                                let err = if error.contains("unauthorized")
                                    || error.contains("authentication")
                                {
                                    KitError::auth(format!("registry rejected push: {error}"))
                                } else {
                                    KitError::network(format!("push failed: {error}"))
                                        .with_severity(Severity::Medium)
                                };
                                return Err(err
                                    .with_context("repository", repo)
                                    .with_context("tag", tag));
                            }
                        }
                        Some(Err(e)) => {
                            return Err(KitError::network(format!("push stream failed: {e}"))
                                .with_context("repository", repo)
                                .caused_by(e));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reference_handles_tags_and_registries() {
        assert_eq!(
            BollardDriver::split_reference("web:1.0"),
            ("web".to_string(), "1.0".to_string())
        );
        assert_eq!(
            BollardDriver::split_reference("web"),
            ("web".to_string(), "latest".to_string())
        );
        assert_eq!(
            BollardDriver::split_reference("localhost:5000/web"),
            ("localhost:5000/web".to_string(), "latest".to_string())
        );
        assert_eq!(
            BollardDriver::split_reference("localhost:5000/web:dev"),
            ("localhost:5000/web".to_string(), "dev".to_string())
        );
    }
}
