//! Agent configuration, loaded from YAML.

use crate::sanitizer::SanitizeOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// IANA timezone applied when a plan request carries none.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Missed-dose threshold carried by the default escalation action.
    #[serde(default = "default_miss_threshold")]
    pub escalation_miss_threshold: u32,

    /// Optional override for the storage root (defaults to ~/.medplan-agent).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_miss_threshold() -> u32 {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        const DEFAULT_YAML: &str = include_str!("../medplan.yaml");

        serde_yaml::from_str(DEFAULT_YAML)
            .expect("Failed to parse embedded medplan.yaml - this is a bug in the medplan.yaml file")
    }

    fn validate(&self) -> Result<()> {
        if self.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            anyhow::bail!(
                "default_timezone '{}' is not a known IANA timezone",
                self.default_timezone
            );
        }
        if self.escalation_miss_threshold == 0 {
            anyhow::bail!("escalation_miss_threshold must be at least 1");
        }
        Ok(())
    }

    pub fn sanitize_options(&self) -> SanitizeOptions {
        SanitizeOptions {
            escalation_miss_threshold: self.escalation_miss_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_default_config_parses() {
        let config = AgentConfig::default_config();
        assert_eq!(config.default_timezone, "Asia/Kolkata");
        assert_eq!(config.escalation_miss_threshold, 2);
        assert!(config.data_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AgentConfig = serde_yaml::from_str("default_timezone: UTC").unwrap();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.escalation_miss_threshold, 2);
    }

    #[test]
    fn test_unknown_timezone_fails_validation() {
        let config: AgentConfig =
            serde_yaml::from_str("default_timezone: Mars/Olympus_Mons").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_miss_threshold_fails_validation() {
        let config: AgentConfig =
            serde_yaml::from_str("escalation_miss_threshold: 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medplan.yaml");
        std::fs::write(&path, "default_timezone: UTC\nescalation_miss_threshold: 3\n").unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.escalation_miss_threshold, 3);
        assert_eq!(config.sanitize_options().escalation_miss_threshold, 3);
    }
}
