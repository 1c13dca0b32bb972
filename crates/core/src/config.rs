//! Delegation settings loaded from JSON and the environment.

use crate::error::{CrossloadError, Result};
use crate::record::{ContextPolicy, MatchRules, Membership};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const ENV_TIMEOUT_MS: &str = "CROSSLOAD_TIMEOUT_MS";
pub const ENV_CONTEXT_POLICY: &str = "CROSSLOAD_CONTEXT_POLICY";
pub const ENV_MAX_PARALLEL_SCANS: &str = "CROSSLOAD_MAX_PARALLEL_SCANS";
pub const ENV_LOG_DIR: &str = "CROSSLOAD_LOG_DIR";

/// Where component log files go and how much they record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Defaults to `$HOME/.crossload/logs`.
    pub dir: Option<PathBuf>,
    /// Filter directives used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: None,
            level: "info".to_string(),
        }
    }
}

impl LogSettings {
    pub fn log_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".crossload")
                .join("logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    /// Wait budget of a load that names no timeout.
    pub default_timeout_ms: u64,
    pub context_policy: ContextPolicy,
    pub membership: Membership,
    /// Upper bound on modules scanned concurrently by the coordinator.
    pub max_parallel_scans: usize,
    /// Read `META-INF/crossload.json` during marker discovery.
    pub sidecar_descriptors: bool,
    pub logging: LogSettings,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            context_policy: ContextPolicy::default(),
            membership: Membership::default(),
            max_parallel_scans: 8,
            sidecar_descriptors: true,
            logging: LogSettings::default(),
        }
    }
}

impl DelegationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DelegationConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CROSSLOAD_*` environment variables on top of the current values.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            self.default_timeout_ms = value.trim().parse().map_err(|_| {
                CrossloadError::Config(format!("{ENV_TIMEOUT_MS} must be milliseconds, got `{value}`"))
            })?;
        }
        if let Some(value) = lookup(ENV_CONTEXT_POLICY) {
            self.context_policy = value.parse().map_err(CrossloadError::Config)?;
        }
        if let Some(value) = lookup(ENV_MAX_PARALLEL_SCANS) {
            self.max_parallel_scans = value.trim().parse().map_err(|_| {
                CrossloadError::Config(format!(
                    "{ENV_MAX_PARALLEL_SCANS} must be a positive integer, got `{value}`"
                ))
            })?;
        }
        if let Some(value) = lookup(ENV_LOG_DIR) {
            self.logging.dir = Some(PathBuf::from(value));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_scans == 0 {
            return Err(CrossloadError::Config(
                "max_parallel_scans must be at least 1".to_string(),
            ));
        }
        EnvFilter::try_new(&self.logging.level).map_err(|err| {
            CrossloadError::Config(format!("invalid log level `{}`: {err}", self.logging.level))
        })?;
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn match_rules(&self) -> MatchRules {
        MatchRules {
            context: self.context_policy,
            membership: self.membership,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DelegationConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.match_rules(), MatchRules::default());
        assert!(config.sidecar_descriptors);
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crossload.json");
        std::fs::write(&path, r#"{"default_timeout_ms": 250, "context_policy": "any"}"#).unwrap();

        let config = DelegationConfig::load(&path).unwrap();
        assert_eq!(config.default_timeout_ms, 250);
        assert_eq!(config.context_policy, ContextPolicy::Any);
        assert_eq!(config.max_parallel_scans, 8);
    }

    #[test]
    fn test_load_rejects_zero_parallelism() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crossload.json");
        std::fs::write(&path, r#"{"max_parallel_scans": 0}"#).unwrap();
        assert!(matches!(
            DelegationConfig::load(&path),
            Err(CrossloadError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_TIMEOUT_MS, "100"),
            (ENV_CONTEXT_POLICY, "any"),
            (ENV_MAX_PARALLEL_SCANS, "2"),
        ]
        .into_iter()
        .collect();
        let config = DelegationConfig::default()
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.default_timeout(), Duration::from_millis(100));
        assert_eq!(config.context_policy, ContextPolicy::Any);
        assert_eq!(config.max_parallel_scans, 2);
    }

    #[test]
    fn test_invalid_override() {
        let err = DelegationConfig::default()
            .apply_overrides_from(|key| (key == ENV_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, CrossloadError::Config(_)));
    }

    #[test]
    fn test_log_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crossload.json");
        std::fs::write(
            &path,
            r#"{"logging": {"dir": "/var/log/crossload", "level": "crossload_core=debug"}}"#,
        )
        .unwrap();

        let config = DelegationConfig::load(&path).unwrap();
        assert_eq!(config.logging.log_dir(), PathBuf::from("/var/log/crossload"));
        assert_eq!(config.logging.level, "crossload_core=debug");

        let config = config
            .apply_overrides_from(|key| (key == ENV_LOG_DIR).then(|| "/tmp/cl".to_string()))
            .unwrap();
        assert_eq!(config.logging.log_dir(), PathBuf::from("/tmp/cl"));
        assert!(LogSettings::default().log_dir().ends_with(".crossload/logs"));
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let config = DelegationConfig {
            logging: LogSettings {
                level: "crossload=loud".to_string(),
                ..LogSettings::default()
            },
            ..DelegationConfig::default()
        };
        assert!(matches!(config.validate(), Err(CrossloadError::Config(_))));
    }
}
