// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;

use tracing::{debug, warn};

/// Analyzer endpoint configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    /// API key (CONTAINERKIT_ANALYZER_API_KEY). None falls back to the
    /// heuristic rule analyzer.
    pub api_key: Option<String>,
    /// Base URL (CONTAINERKIT_ANALYZER_URL)
    pub base_url: Option<String>,
    /// Model name (CONTAINERKIT_ANALYZER_MODEL)
    pub model: Option<String>,
}

impl AnalyzerConfig {
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Registry credentials for push (CONTAINERKIT_REGISTRY_USER / _PASSWORD).
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RegistryAuth {
    pub fn is_configured(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Per-step fix-loop attempt budgets.
#[derive(Debug, Clone, Copy)]
pub struct FixBudgets {
    pub build: u32,
    pub deploy: u32,
    pub manifest: u32,
}

impl Default for FixBudgets {
    fn default() -> Self {
        Self {
            build: 3,
            deploy: 2,
            manifest: 3,
        }
    }
}

impl FixBudgets {
    /// Attempt budget for a step name. Steps without a budget get no fix loop.
    pub fn for_step(&self, step: &str) -> u32 {
        match step {
            "build" => self.build,
            "deploy" => self.deploy,
            "manifest" => self.manifest,
            _ => 0,
        }
    }
}

/// All environment-derived configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Base data directory (CONTAINERKIT_DATA_DIR, default ~/.containerkit)
    pub data_dir: PathBuf,
    /// Workspace root for per-session directories
    /// (CONTAINERKIT_WORKSPACE_ROOT, default <data_dir>/workspaces)
    pub workspace_root: PathBuf,
    /// Policy pack directory (CONTAINERKIT_POLICY_DIR, default <data_dir>/policies)
    pub policy_dir: PathBuf,
    pub analyzer: AnalyzerConfig,
    pub registry: RegistryAuth,
    pub fix_budgets: FixBudgets,
    /// Saga compensation on workflow failure (CONTAINERKIT_SAGA, default true)
    pub saga_enabled: bool,
    /// Per-tool deadline in seconds (CONTAINERKIT_TOOL_TIMEOUT_SECS, default 600)
    pub tool_timeout_secs: u64,
    /// Log ring buffer capacity (CONTAINERKIT_LOG_CAPACITY, default 10000)
    pub log_capacity: usize,
    /// Default session TTL in seconds (CONTAINERKIT_SESSION_TTL_SECS, unset = no expiry)
    pub session_ttl_secs: Option<u64>,
    /// kubectl binary override (CONTAINERKIT_KUBECTL_BIN, default "kubectl")
    pub kubectl_bin: String,
    /// trivy binary override (CONTAINERKIT_TRIVY_BIN, default "trivy")
    pub trivy_bin: String,
    /// Docker socket override (CONTAINERKIT_DOCKER_SOCKET, default auto-detect)
    pub docker_socket: Option<String>,
}

/// Result of validating the loaded configuration.
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables (single source of truth).
    pub fn load() -> Self {
        let data_dir = read_var("CONTAINERKIT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".containerkit")
            });

        let workspace_root = read_var("CONTAINERKIT_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("workspaces"));

        let policy_dir = read_var("CONTAINERKIT_POLICY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("policies"));

        let analyzer = if parse_bool("CONTAINERKIT_DISABLE_ANALYZER").unwrap_or(false) {
            debug!("CONTAINERKIT_DISABLE_ANALYZER is set - using heuristic fixes only");
            AnalyzerConfig::default()
        } else {
            AnalyzerConfig {
                api_key: read_var("CONTAINERKIT_ANALYZER_API_KEY"),
                base_url: read_var("CONTAINERKIT_ANALYZER_URL"),
                model: read_var("CONTAINERKIT_ANALYZER_MODEL"),
            }
        };

        let fix_budgets = FixBudgets {
            build: parse_u32("CONTAINERKIT_FIX_ATTEMPTS_BUILD").unwrap_or(3),
            deploy: parse_u32("CONTAINERKIT_FIX_ATTEMPTS_DEPLOY").unwrap_or(2),
            manifest: parse_u32("CONTAINERKIT_FIX_ATTEMPTS_MANIFEST").unwrap_or(3),
        };

        Self {
            data_dir,
            workspace_root,
            policy_dir,
            analyzer,
            registry: RegistryAuth {
                username: read_var("CONTAINERKIT_REGISTRY_USER"),
                password: read_var("CONTAINERKIT_REGISTRY_PASSWORD"),
            },
            fix_budgets,
            saga_enabled: parse_bool("CONTAINERKIT_SAGA").unwrap_or(true),
            tool_timeout_secs: parse_u64("CONTAINERKIT_TOOL_TIMEOUT_SECS").unwrap_or(600),
            log_capacity: parse_u64("CONTAINERKIT_LOG_CAPACITY").unwrap_or(10_000) as usize,
            session_ttl_secs: parse_u64("CONTAINERKIT_SESSION_TTL_SECS"),
            kubectl_bin: read_var("CONTAINERKIT_KUBECTL_BIN")
                .unwrap_or_else(|| "kubectl".to_string()),
            trivy_bin: read_var("CONTAINERKIT_TRIVY_BIN").unwrap_or_else(|| "trivy".to_string()),
            docker_socket: read_var("CONTAINERKIT_DOCKER_SOCKET"),
        }
    }

    /// Path of the embedded session store database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("containerkit.db")
    }

    /// Validate the configuration and collect non-fatal warnings.
    pub fn validate(&self) -> ConfigValidation {
        let mut v = ConfigValidation::default();

        if !self.analyzer.enabled() {
            v.warnings.push(
                "no analyzer API key configured - the fix loop will use heuristic rules only"
                    .to_string(),
            );
        }
        if self.analyzer.enabled() && self.analyzer.base_url.is_none() {
            v.warnings.push(
                "CONTAINERKIT_ANALYZER_API_KEY set without CONTAINERKIT_ANALYZER_URL - using the default endpoint"
                    .to_string(),
            );
        }
        if !self.registry.is_configured() {
            v.warnings.push(
                "no registry credentials configured - push will rely on ambient docker credentials"
                    .to_string(),
            );
        }
        if self.tool_timeout_secs < 30 {
            v.warnings.push(format!(
                "tool timeout of {}s is very low; builds will likely hit the deadline",
                self.tool_timeout_secs
            ));
        }
        if !self.policy_dir.exists() {
            v.warnings.push(format!(
                "policy directory {} does not exist - no policy rules will be enforced",
                self.policy_dir.display()
            ));
        }
        v
    }

    /// Log which optional integrations are available (without exposing values).
    pub fn log_status(&self) {
        if self.analyzer.enabled() {
            debug!("analyzer endpoint configured");
        } else {
            warn!("analyzer not configured - fix loop uses heuristics");
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str) -> Option<bool> {
    read_var(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn parse_u32(name: &str) -> Option<u32> {
    read_var(name).and_then(|v| v.parse().ok())
}

fn parse_u64(name: &str) -> Option<u64> {
    read_var(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_budget_defaults() {
        let budgets = FixBudgets::default();
        assert_eq!(budgets.for_step("build"), 3);
        assert_eq!(budgets.for_step("deploy"), 2);
        assert_eq!(budgets.for_step("manifest"), 3);
        assert_eq!(budgets.for_step("scan"), 0);
    }

    #[test]
    fn analyzer_disabled_without_key() {
        let cfg = AnalyzerConfig::default();
        assert!(!cfg.enabled());
    }
}
