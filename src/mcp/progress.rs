// src/mcp/progress.rs
// Progress notifications correlated to the originating request.

use rmcp::model::{ProgressNotificationParam, ProgressToken};
use rmcp::service::{Peer, RoleServer};

/// Emits `notifications/progress` for one request. When the client did not
/// send a progress token, emission is a no-op; workflow progress is still
/// recorded in the session's workflow state either way.
#[derive(Clone)]
pub struct ProgressEmitter {
    peer: Option<Peer<RoleServer>>,
    token: Option<ProgressToken>,
}

impl ProgressEmitter {
    pub fn new(peer: Peer<RoleServer>, token: Option<ProgressToken>) -> Self {
        Self {
            peer: Some(peer),
            token,
        }
    }

    /// Emitter that never sends anything (CLI and tests).
    pub fn disabled() -> Self {
        Self {
            peer: None,
            token: None,
        }
    }

    /// Send one progress notification. `progress` is the "i/N" label the
    /// orchestrator tracks; it is parsed into numeric progress/total for
    /// the wire format.
    pub async fn emit(&self, step: &str, progress: &str, message: &str) {
        let (Some(peer), Some(token)) = (&self.peer, &self.token) else {
            return;
        };

        let (current, total) = parse_progress(progress);
        let param = ProgressNotificationParam {
            progress_token: token.clone(),
            progress: current,
            total,
            message: Some(format!("{step}: {message}")),
        };
        if let Err(e) = peer.notify_progress(param).await {
            tracing::debug!("progress notification failed: {}", e);
        }
    }
}

/// "3/10" -> (3.0, Some(10.0)); anything else -> (0.0, None).
fn parse_progress(progress: &str) -> (f64, Option<f64>) {
    match progress.split_once('/') {
        Some((current, total)) => (
            current.parse().unwrap_or(0.0),
            total.parse().ok(),
        ),
        None => (progress.parse().unwrap_or(0.0), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_progress_fraction() {
        assert_eq!(parse_progress("3/10"), (3.0, Some(10.0)));
        assert_eq!(parse_progress("10/10"), (10.0, Some(10.0)));
        assert_eq!(parse_progress("weird"), (0.0, None));
    }

    #[tokio::test]
    async fn disabled_emitter_is_a_noop() {
        ProgressEmitter::disabled().emit("build", "3/10", "running").await;
    }
}
