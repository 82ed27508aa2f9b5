//! Supervisor configuration.
//!
//! Loaded from YAML with a fallback chain: explicit path, then
//! `~/.config/warden/warden.yml`, then `./warden.yml`, then built-in
//! defaults. Every section is `#[serde(default)]` so partial files work.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::instance::InstanceSpec;
use crate::policy::RestartPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    /// Worker CLI command name
    pub command: String,
    /// Commands the validator will accept
    pub allowed_commands: Vec<String>,
    /// Base directory for settings discovery; defaults to the cwd
    pub base_dir: Option<PathBuf>,
    /// The fixed set of supervised instances
    pub instances: Vec<InstanceSpec>,
    pub policy: PolicyConfig,
    pub limits: LimitsConfig,
    /// Delay between spawns in `start_all`
    pub stagger_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub cooldown_ms: u64,
    pub max_attempts: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = RestartPolicy::default();
        Self {
            base_delay_ms: policy.base_delay_ms,
            cap_delay_ms: policy.cap_delay_ms,
            cooldown_ms: policy.cooldown_ms,
            max_attempts: policy.max_attempts,
        }
    }
}

impl From<&PolicyConfig> for RestartPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            cap_delay_ms: config.cap_delay_ms,
            cooldown_ms: config.cooldown_ms,
            max_attempts: config.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_message_len: usize,
    pub max_path_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_len: 100_000,
            max_path_len: 4096,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            command: "claude".to_string(),
            allowed_commands: vec!["claude".to_string()],
            base_dir: None,
            instances: vec![
                InstanceSpec::new("main", "claude-sonnet-4"),
                InstanceSpec::new("builder", "claude-sonnet-4"),
                InstanceSpec::new("reviewer", "claude-sonnet-4"),
                InstanceSpec::new("scout", "claude-haiku-3"),
            ],
            policy: PolicyConfig::default(),
            limits: LimitsConfig::default(),
            stagger_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.command, "claude");
        assert_eq!(config.allowed_commands, vec!["claude"]);
        assert_eq!(config.instances.len(), 4);
        assert_eq!(config.instances[0].key, "main");
        assert_eq!(config.stagger_ms, 500);
    }

    #[test]
    fn test_default_policy_config_matches_policy() {
        let config = PolicyConfig::default();
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.cap_delay_ms, 10_000);
        assert_eq!(config.cooldown_ms, 10_000);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_policy_config_conversion() {
        let config = PolicyConfig {
            base_delay_ms: 10,
            cap_delay_ms: 40,
            cooldown_ms: 99,
            max_attempts: 2,
        };
        let policy: RestartPolicy = (&config).into();
        assert_eq!(policy.base_delay_ms, 10);
        assert_eq!(policy.max_attempts, 2);
    }

    #[test]
    fn test_default_limits() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.max_message_len, 100_000);
        assert_eq!(limits.max_path_len, 4096);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "command: cat").unwrap();
        writeln!(file, "stagger_ms: 10").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.command, "cat");
        assert_eq!(config.stagger_ms, 10);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.instances.len(), 4);
        assert_eq!(config.policy.max_attempts, 3);
    }

    #[test]
    fn test_load_explicit_missing_path_errors() {
        let path = PathBuf::from("/nonexistent/warden.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_instances_from_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "instances:").unwrap();
        writeln!(file, "  - key: solo").unwrap();
        writeln!(file, "    model: claude-opus-4").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.instances.len(), 1);
        assert_eq!(config.instances[0].key, "solo");
        assert_eq!(config.instances[0].model, "claude-opus-4");
    }
}
