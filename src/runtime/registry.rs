//! Extension registrations

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::hooks::Hook;
use crate::{Error, Result};

/// Seconds an extension call may take when the registration does not say
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

/// What a failed extension call does to the reconcile pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum FailurePolicy {
    /// Abort the pass
    #[default]
    Fail,
    /// Log and continue as if the extension succeeded with no output
    Ignore,
}

/// A registered runtime extension
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRegistration {
    /// Unique name
    pub name: String,
    /// Where to send requests
    pub endpoint: String,
    /// Upper bound on each call
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Failure handling
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Hooks this extension serves
    pub hooks: Vec<Hook>,
}

impl ExtensionRegistration {
    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Whether the extension serves a hook
    pub fn serves(&self, hook: Hook) -> bool {
        self.hooks.contains(&hook)
    }
}

/// Ordered set of registered extensions
///
/// Order matters: patches from earlier registrations are applied first and
/// later extensions see their result.
#[derive(Clone, Debug, Default)]
pub struct ExtensionRegistry {
    registrations: Vec<ExtensionRegistration>,
}

impl ExtensionRegistry {
    /// Build a registry, rejecting registrations that cannot be called
    pub fn new(registrations: Vec<ExtensionRegistration>) -> Result<Self> {
        let mut names = HashSet::new();
        for reg in &registrations {
            if reg.name.is_empty() {
                return Err(Error::config("extension registration has an empty name"));
            }
            if !names.insert(reg.name.as_str()) {
                return Err(Error::config(format!("extension {} is registered twice", reg.name)));
            }
            if reg.endpoint.is_empty() {
                return Err(Error::config(format!("extension {} has no endpoint", reg.name)));
            }
            if reg.timeout_seconds == 0 {
                return Err(Error::config(format!("extension {} has a zero timeout", reg.name)));
            }
        }
        Ok(Self { registrations })
    }

    /// Registrations serving a hook, in registration order
    pub fn for_hook(&self, hook: Hook) -> impl Iterator<Item = &ExtensionRegistration> {
        self.registrations.iter().filter(move |r| r.serves(hook))
    }

    /// Whether no extension is registered
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(name: &str, hooks: Vec<Hook>) -> ExtensionRegistration {
        ExtensionRegistration {
            name: name.to_string(),
            endpoint: format!("https://{name}.extensions.svc"),
            timeout_seconds: 5,
            failure_policy: FailurePolicy::Fail,
            hooks,
        }
    }

    #[test]
    fn registrations_deserialize_with_defaults() {
        let reg: ExtensionRegistration = serde_yaml::from_str(
            "name: patcher\nendpoint: https://patcher\nhooks: [GeneratePatches]\n",
        )
        .unwrap();
        assert_eq!(reg.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(reg.failure_policy, FailurePolicy::Fail);
        assert!(reg.serves(Hook::GeneratePatches));
    }

    #[test]
    fn lookup_keeps_registration_order() {
        let registry = ExtensionRegistry::new(vec![
            registration("b", vec![Hook::GeneratePatches]),
            registration("gate", vec![Hook::BeforeClusterCreate]),
            registration("a", vec![Hook::GeneratePatches, Hook::ValidateTopology]),
        ])
        .unwrap();
        let names: Vec<&str> = registry
            .for_hook(Hook::GeneratePatches)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn uncallable_registrations_are_rejected() {
        let dup = ExtensionRegistry::new(vec![
            registration("a", vec![]),
            registration("a", vec![]),
        ]);
        assert!(dup.is_err());

        let mut no_endpoint = registration("a", vec![]);
        no_endpoint.endpoint.clear();
        assert!(ExtensionRegistry::new(vec![no_endpoint]).is_err());

        let mut zero_timeout = registration("a", vec![]);
        zero_timeout.timeout_seconds = 0;
        assert!(ExtensionRegistry::new(vec![zero_timeout]).is_err());
    }
}
