//! Controller configuration
//!
//! Loaded from a YAML file, then adjusted from the environment. Environment
//! access goes through [`EnvSource`] so tests never touch process state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::runtime::{ExtensionRegistration, ExtensionRegistry};
use crate::telemetry::LoggingConfig;
use crate::{Error, Result, DEFAULT_FIELD_MANAGER};

/// Environment variable overriding [`ControllerConfig::field_manager`]
pub const FIELD_MANAGER_ENV: &str = "LATTICE_TOPOLOGY_FIELD_MANAGER";

/// Trait for reading controller settings from the environment
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Field manager override, if set
    fn field_manager(&self) -> Option<String>;
}

/// Default implementation that reads from environment variables
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn field_manager(&self) -> Option<String> {
        std::env::var(FIELD_MANAGER_ENV).ok().filter(|v| !v.is_empty())
    }
}

/// Topology controller settings
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Field manager recorded on every write
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
    /// Requeue delay after a failed pass
    #[serde(default = "default_error_requeue_seconds")]
    pub error_requeue_seconds: u64,
    /// Requeue delay after a failure that needs a spec change to clear
    #[serde(default = "default_permanent_error_requeue_seconds")]
    pub permanent_error_requeue_seconds: u64,
    /// Requeue delay after a write conflict
    #[serde(default = "default_conflict_requeue_seconds")]
    pub conflict_requeue_seconds: u64,
    /// Requeue delay while waiting on objects the controller does not watch
    #[serde(default = "default_poll_requeue_seconds")]
    pub poll_requeue_seconds: u64,
    /// Logging setup
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Runtime extensions, in call order
    #[serde(default)]
    pub extensions: Vec<ExtensionRegistration>,
}

fn default_field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

fn default_error_requeue_seconds() -> u64 {
    30
}

fn default_permanent_error_requeue_seconds() -> u64 {
    300
}

fn default_conflict_requeue_seconds() -> u64 {
    1
}

fn default_poll_requeue_seconds() -> u64 {
    15
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            field_manager: default_field_manager(),
            error_requeue_seconds: default_error_requeue_seconds(),
            permanent_error_requeue_seconds: default_permanent_error_requeue_seconds(),
            conflict_requeue_seconds: default_conflict_requeue_seconds(),
            poll_requeue_seconds: default_poll_requeue_seconds(),
            logging: LoggingConfig::default(),
            extensions: Vec::new(),
        }
    }
}

impl ControllerConfig {
    /// Parse a YAML document and validate the extension registrations
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid controller config: {e}")))?;
        config.registry()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&yaml)
    }

    /// Apply environment overrides
    pub fn apply_env(mut self, env: &dyn EnvSource) -> Self {
        if let Some(manager) = env.field_manager() {
            self.field_manager = manager;
        }
        self
    }

    /// Build the extension registry
    pub fn registry(&self) -> Result<ExtensionRegistry> {
        ExtensionRegistry::new(self.extensions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FailurePolicy, Hook};
    use std::io::Write;

    /// Story: An empty file yields a working controller with no extensions
    #[test]
    fn story_empty_config_uses_defaults() {
        let config = ControllerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.field_manager, DEFAULT_FIELD_MANAGER);
        assert!(config.registry().unwrap().is_empty());
    }

    /// Story: Operators register extensions in the order they should run
    #[test]
    fn story_extensions_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
errorRequeueSeconds: 60
extensions:
  - name: patcher
    endpoint: https://patcher.extensions.svc/hooks
    hooks: [GeneratePatches, ValidateTopology]
  - name: gate
    endpoint: https://gate.extensions.svc/hooks
    timeoutSeconds: 3
    failurePolicy: Ignore
    hooks: [BeforeClusterCreate]
"#
        )
        .unwrap();

        let config = ControllerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.error_requeue_seconds, 60);
        assert_eq!(config.conflict_requeue_seconds, 1);
        assert_eq!(config.extensions.len(), 2);
        assert_eq!(config.extensions[1].failure_policy, FailurePolicy::Ignore);

        let registry = config.registry().unwrap();
        let gates: Vec<&str> = registry
            .for_hook(Hook::BeforeClusterCreate)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(gates, vec!["gate"]);
    }

    #[test]
    fn duplicate_extension_names_are_rejected_on_load() {
        let yaml = r#"
extensions:
  - name: patcher
    endpoint: https://a
    hooks: [GeneratePatches]
  - name: patcher
    endpoint: https://b
    hooks: [GeneratePatches]
"#;
        let err = ControllerConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = ControllerConfig::from_file("/nonexistent/topology.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn environment_overrides_the_field_manager() {
        let mut env = MockEnvSource::new();
        env.expect_field_manager()
            .returning(|| Some("topology-canary".to_string()));

        let config = ControllerConfig::default().apply_env(&env);
        assert_eq!(config.field_manager, "topology-canary");
    }

    #[test]
    fn unset_environment_keeps_the_file_value() {
        let mut env = MockEnvSource::new();
        env.expect_field_manager().returning(|| None);

        let config = ControllerConfig::from_yaml("fieldManager: custom\n")
            .unwrap()
            .apply_env(&env);
        assert_eq!(config.field_manager, "custom");
    }
}
