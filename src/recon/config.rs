//! Recompute Run Configuration
//!
//! Serde-defaulted knobs for a recompute run, loadable from a TOML file.
//! Everything has a sensible default so a bare `ReconConfig::default()` is a
//! valid production configuration.

use crate::recon::model::BreakdownType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconConfig {
    /// Attempts per partition before it is marked failed (>= 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between partition retries, milliseconds. Attempt `n`
    /// waits `n * retry_backoff_ms`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Process partitions on the rayon pool. Off means strictly sequential,
    /// which is occasionally useful for debugging.
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Breakdown dimensions to materialize. Empty disables breakdown rows.
    #[serde(default = "default_breakdowns")]
    pub breakdown_types: Vec<BreakdownType>,

    /// Skip emitting rows where both sources observed nothing.
    #[serde(default = "default_true")]
    pub skip_zero_activity_rows: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

fn default_breakdowns() -> Vec<BreakdownType> {
    BreakdownType::all().to_vec()
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            parallel: true,
            breakdown_types: default_breakdowns(),
            skip_zero_activity_rows: true,
        }
    }
}

impl ReconConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.as_ref().display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReconConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.breakdown_types.len(), 3);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: ReconConfig = toml::from_str(
            r#"
            max_attempts = 5
            breakdown_types = ["country"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.breakdown_types, vec![BreakdownType::Country]);
        // Unspecified keys keep defaults.
        assert_eq!(config.retry_backoff_ms, 250);
        assert!(config.parallel);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = ReconConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
