//! Instance data model.
//!
//! An instance is one named, supervised worker slot. The set of instances
//! is fixed at supervisor construction; records transition between statuses
//! for the supervisor's lifetime and are never removed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle states of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// No process; nothing pending
    Idle,
    /// Spawn in flight
    Restarting,
    /// Live process with wired stdio
    Running,
    /// Process exited unexpectedly; restart may be scheduled
    Crashed,
    /// Restart budget exhausted; only an explicit spawn revives it
    Failed,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Idle => "idle",
            InstanceStatus::Restarting => "restarting",
            InstanceStatus::Running => "running",
            InstanceStatus::Crashed => "crashed",
            InstanceStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Configured identity of an instance before discovery runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Stable identifier, `^[A-Za-z][A-Za-z0-9]*$`
    pub key: String,
    /// Model identifier passed to the worker CLI
    pub model: String,
    /// Base system prompt (may be extended by discovered settings)
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl InstanceSpec {
    /// Create a spec with a key and model and no base prompt.
    pub fn new(key: &str, model: &str) -> Self {
        Self {
            key: key.to_string(),
            model: model.to_string(),
            system_prompt: None,
        }
    }
}

/// Fully resolved invocation parameters for one instance.
///
/// Immutable once computed at supervisor initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceConfig {
    /// Stable identifier
    pub key: String,
    /// Model identifier
    pub model: String,
    /// System prompt written to the child on startup, if any
    pub system_prompt: Option<String>,
    /// Working directories: base first, then discovered siblings
    pub working_dirs: Vec<PathBuf>,
}

impl InstanceConfig {
    /// Resolve a spec against discovered settings and working directories.
    ///
    /// Settings overrides: top-level `systemPrompt` is appended to the base
    /// prompt; `instances.<key>.model` and `instances.<key>.systemPrompt`
    /// replace the spec's values.
    pub fn resolve(
        spec: &InstanceSpec,
        settings: &serde_json::Value,
        working_dirs: &[PathBuf],
    ) -> Self {
        let overrides = settings.get("instances").and_then(|v| v.get(&spec.key));

        let model = overrides
            .and_then(|o| o.get("model"))
            .and_then(|v| v.as_str())
            .unwrap_or(&spec.model)
            .to_string();

        let mut system_prompt = overrides
            .and_then(|o| o.get("systemPrompt"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| spec.system_prompt.clone());

        if let Some(shared) = settings.get("systemPrompt").and_then(|v| v.as_str()) {
            system_prompt = Some(match system_prompt {
                Some(base) => format!("{}\n\n{}", base, shared),
                None => shared.to_string(),
            });
        }

        Self {
            key: spec.key.clone(),
            model,
            system_prompt,
            working_dirs: working_dirs.to_vec(),
        }
    }

    /// Build the argument vector for the worker CLI invocation.
    ///
    /// The first working directory is the child's cwd; the rest are passed
    /// as `--add-dir` flags.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["--model".to_string(), self.model.clone()];
        for dir in self.working_dirs.iter().skip(1) {
            args.push("--add-dir".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
        args
    }

    /// The child's working directory, when one was discovered.
    pub fn cwd(&self) -> Option<&PathBuf> {
        self.working_dirs.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(InstanceStatus::Idle.to_string(), "idle");
        assert_eq!(InstanceStatus::Restarting.to_string(), "restarting");
        assert_eq!(InstanceStatus::Running.to_string(), "running");
        assert_eq!(InstanceStatus::Crashed.to_string(), "crashed");
        assert_eq!(InstanceStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_status_serde_roundtrip() {
        let json = serde_json::to_string(&InstanceStatus::Crashed).unwrap();
        assert_eq!(json, "\"crashed\"");
        let status: InstanceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, InstanceStatus::Crashed);
    }

    #[test]
    fn test_spec_new() {
        let spec = InstanceSpec::new("main", "claude-sonnet-4");
        assert_eq!(spec.key, "main");
        assert_eq!(spec.model, "claude-sonnet-4");
        assert!(spec.system_prompt.is_none());
    }

    #[test]
    fn test_resolve_without_settings() {
        let spec = InstanceSpec::new("main", "claude-sonnet-4");
        let config = InstanceConfig::resolve(&spec, &serde_json::json!({}), &[]);
        assert_eq!(config.key, "main");
        assert_eq!(config.model, "claude-sonnet-4");
        assert!(config.system_prompt.is_none());
        assert!(config.working_dirs.is_empty());
    }

    #[test]
    fn test_resolve_applies_instance_overrides() {
        let spec = InstanceSpec::new("main", "claude-sonnet-4");
        let settings = serde_json::json!({
            "instances": {
                "main": { "model": "claude-opus-4", "systemPrompt": "You are main." }
            }
        });
        let config = InstanceConfig::resolve(&spec, &settings, &[]);
        assert_eq!(config.model, "claude-opus-4");
        assert_eq!(config.system_prompt.as_deref(), Some("You are main."));
    }

    #[test]
    fn test_resolve_appends_shared_prompt() {
        let mut spec = InstanceSpec::new("main", "claude-sonnet-4");
        spec.system_prompt = Some("Base prompt.".to_string());
        let settings = serde_json::json!({ "systemPrompt": "Shared rules." });
        let config = InstanceConfig::resolve(&spec, &settings, &[]);
        assert_eq!(
            config.system_prompt.as_deref(),
            Some("Base prompt.\n\nShared rules.")
        );
    }

    #[test]
    fn test_resolve_shared_prompt_alone() {
        let spec = InstanceSpec::new("main", "claude-sonnet-4");
        let settings = serde_json::json!({ "systemPrompt": "Shared rules." });
        let config = InstanceConfig::resolve(&spec, &settings, &[]);
        assert_eq!(config.system_prompt.as_deref(), Some("Shared rules."));
    }

    #[test]
    fn test_resolve_ignores_other_instances() {
        let spec = InstanceSpec::new("main", "claude-sonnet-4");
        let settings = serde_json::json!({
            "instances": { "scout": { "model": "claude-haiku-3" } }
        });
        let config = InstanceConfig::resolve(&spec, &settings, &[]);
        assert_eq!(config.model, "claude-sonnet-4");
    }

    #[test]
    fn test_args_with_extra_dirs() {
        let spec = InstanceSpec::new("main", "claude-sonnet-4");
        let dirs = vec![PathBuf::from("/work/base"), PathBuf::from("/work/sibling")];
        let config = InstanceConfig::resolve(&spec, &serde_json::json!({}), &dirs);

        assert_eq!(
            config.args(),
            vec!["--model", "claude-sonnet-4", "--add-dir", "/work/sibling"]
        );
        assert_eq!(config.cwd(), Some(&PathBuf::from("/work/base")));
    }

    #[test]
    fn test_args_without_dirs() {
        let spec = InstanceSpec::new("main", "claude-sonnet-4");
        let config = InstanceConfig::resolve(&spec, &serde_json::json!({}), &[]);
        assert_eq!(config.args(), vec!["--model", "claude-sonnet-4"]);
        assert!(config.cwd().is_none());
    }
}
