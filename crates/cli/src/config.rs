//! Stack configuration loading.
//!
//! Values come from two layers, later layers overriding earlier ones:
//!
//! 1. The stack's TOML file, with plain values under `[config]` and secret
//!    values under `[secrets]`.
//! 2. Environment variables `CODEBUILD_STACK_CONFIG_<KEY>` (plain) and
//!    `CODEBUILD_STACK_SECRET_<KEY>` (secret), where `<KEY>` is the key
//!    upper-cased with `-` written as `_`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use stack::{Config, StackName};

pub const ENV_CONFIG_PREFIX: &str = "CODEBUILD_STACK_CONFIG_";
pub const ENV_SECRET_PREFIX: &str = "CODEBUILD_STACK_SECRET_";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    config: BTreeMap<String, String>,
    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

/// `GITHUB_TOKEN` → `github-token`.
fn key_from_env(suffix: &str) -> String {
    suffix.to_ascii_lowercase().replace('_', "-")
}

/// Builds the stack configuration from an optional file and `vars`.
///
/// A missing file at an explicitly given path is an error; `None` means
/// environment only.
pub fn load<I>(stack: StackName, path: Option<&Path>, vars: I) -> Result<Config>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut config = Config::new(stack);

    if let Some(path) = path {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        for (key, value) in file.config {
            config.set(key, value);
        }
        for (key, value) in file.secrets {
            config.set_secret(key, value);
        }
    }

    let mut overrides = 0usize;
    for (name, value) in vars {
        if let Some(suffix) = name.strip_prefix(ENV_SECRET_PREFIX) {
            config.set_secret(key_from_env(suffix), value);
            overrides += 1;
        } else if let Some(suffix) = name.strip_prefix(ENV_CONFIG_PREFIX) {
            config.set(key_from_env(suffix), value);
            overrides += 1;
        }
    }

    tracing::debug!(
        stack = %config.stack(),
        keys = config.keys().count(),
        overrides,
        "loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn stack() -> StackName {
        StackName::new("dev").unwrap()
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn file_sections_become_plain_and_secret_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[config]\nhead-branch = \"feature\"\n\n[secrets]\ngithub-token = \"ghp_x\"\n"
        )
        .unwrap();

        let config = load(stack(), Some(file.path()), Vec::new()).unwrap();
        assert_eq!(config.get("head-branch"), Some("feature"));
        assert!(config.is_secret("github-token"));
        assert_eq!(config.get("github-token"), None);
        assert_eq!(config.require_secret("github-token").unwrap().expose(), "ghp_x");
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[config]\nbase-branch = \"master\"\n").unwrap();

        let config = load(
            stack(),
            Some(file.path()),
            vars(&[
                ("CODEBUILD_STACK_CONFIG_BASE_BRANCH", "main"),
                ("CODEBUILD_STACK_SECRET_PULUMI_ACCESS_TOKEN", "pul-x"),
                ("UNRELATED", "ignored"),
            ]),
        )
        .unwrap();

        assert_eq!(config.get("base-branch"), Some("main"));
        assert!(config.is_secret("pulumi-access-token"));
        assert_eq!(config.keys().count(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(stack(), Some(&dir.path().join("absent.toml")), Vec::new()).unwrap_err();
        assert!(format!("{err:#}").contains("reading config file"));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[settings]\nregion = \"us-east-1\"\n").unwrap();
        assert!(load(stack(), Some(file.path()), Vec::new()).is_err());
    }
}
