//! Stack configuration values.
//!
//! A [`Config`] is the fully merged set of values for one stack. Loading it
//! (files, environment) is the composition root's job; this module only
//! defines lookup semantics. Values marked secret are held as [`Secret`] from
//! the moment they are loaded and can only be retrieved through
//! [`Config::require_secret`] / [`Config::get_secret`].

use std::collections::BTreeMap;

use crate::{Secret, StackError, StackName};

/// A single configuration value.
#[derive(Debug, Clone)]
pub enum ConfigValue {
    Plain(String),
    Secret(Secret),
}

/// Merged configuration for one stack.
#[derive(Debug, Clone)]
pub struct Config {
    stack: StackName,
    values: BTreeMap<String, ConfigValue>,
}

impl Config {
    /// Creates an empty configuration for `stack`.
    pub fn new(stack: StackName) -> Self {
        Self {
            stack,
            values: BTreeMap::new(),
        }
    }

    /// Name of the stack this configuration belongs to.
    pub fn stack(&self) -> &StackName {
        &self.stack
    }

    /// Sets a plain value, replacing any previous value for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), ConfigValue::Plain(value.into()));
    }

    /// Sets a secret value, replacing any previous value for `key`.
    pub fn set_secret(&mut self, key: impl Into<String>, value: impl Into<Secret>) {
        self.values.insert(key.into(), ConfigValue::Secret(value.into()));
    }

    /// Builder form of [`Config::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Builder form of [`Config::set_secret`].
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<Secret>) -> Self {
        self.set_secret(key, value);
        self
    }

    /// Returns a plain value.
    ///
    /// Secret values are not returned here; use [`Config::get_secret`].
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.values.get(key)? {
            ConfigValue::Plain(value) => Some(value),
            ConfigValue::Secret(_) => None,
        }
    }

    /// Returns a plain value or `default` when it is unset.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Returns a plain value, failing when it is unset or empty.
    pub fn require(&self, key: &str) -> Result<&str, StackError> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(missing(key)),
        }
    }

    /// Returns a value as a [`Secret`], whether it was stored plain or secret.
    pub fn get_secret(&self, key: &str) -> Option<Secret> {
        match self.values.get(key)? {
            ConfigValue::Plain(value) => Some(Secret::new(value.clone())),
            ConfigValue::Secret(secret) => Some(secret.clone()),
        }
    }

    /// Returns a value as a [`Secret`], failing when it is unset or empty.
    ///
    /// Called while a graph is being declared, so an absent secret stops the
    /// run before any state or provider access.
    pub fn require_secret(&self, key: &str) -> Result<Secret, StackError> {
        match self.get_secret(key) {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(missing(key)),
        }
    }

    /// Returns `true` if `key` is set and stored as a secret.
    pub fn is_secret(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(ConfigValue::Secret(_)))
    }

    /// Iterates over the configured keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn missing(key: &str) -> StackError {
    StackError::MissingConfiguration {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new(StackName::new("dev").unwrap())
    }

    #[test]
    fn require_secret_fails_when_absent() {
        let err = config().require_secret("github-token").unwrap_err();
        assert!(
            matches!(err, StackError::MissingConfiguration { ref key } if key == "github-token"),
            "got: {err:?}"
        );
    }

    #[test]
    fn require_secret_fails_when_empty() {
        let cfg = config().with_secret("github-token", "");
        assert!(cfg.require_secret("github-token").is_err());
    }

    #[test]
    fn plain_values_can_be_required_as_secret() {
        let cfg = config().with("pulumi-access-token", "pul-123");
        assert_eq!(cfg.require_secret("pulumi-access-token").unwrap().expose(), "pul-123");
    }

    #[test]
    fn get_hides_secret_values() {
        let cfg = config().with_secret("github-token", "ghp_abc");
        assert_eq!(cfg.get("github-token"), None);
        assert!(cfg.is_secret("github-token"));
        assert_eq!(cfg.get_secret("github-token").unwrap().expose(), "ghp_abc");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let cfg = config().with_secret("github-token", "ghp_abc");
        assert!(!format!("{cfg:?}").contains("ghp_abc"));
    }

    #[test]
    fn get_or_falls_back() {
        let cfg = config().with("head-branch", "feature");
        assert_eq!(cfg.get_or("head-branch", "main"), "feature");
        assert_eq!(cfg.get_or("base-branch", "master"), "master");
    }
}
