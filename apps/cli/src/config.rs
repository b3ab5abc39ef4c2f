//! Layered configuration: defaults → `rotor.toml` → `ROTOR_*` env → flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format as _, Serialized, Toml};
use rotor_log::LogConfig;
use rotor_retry::RetryConfig;
use rotor_sandbox::SandboxLimits;
use serde::{Deserialize, Serialize};

/// File read when `--config` is not given. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "rotor.toml";

/// Everything the binary can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Logger.
    pub log: LogConfig,
    /// Limits for test-run and check sandboxes.
    pub sandbox: SandboxLimits,
    /// Retry routing.
    pub retry: RetryConfig,
    /// Outbound fetch settings.
    pub fetch: FetchConfig,
}

/// Outbound HTTP from functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Values given on the command line; they win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl AppConfig {
    /// Build the configuration. An explicit `path` must exist.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let file = match path {
            Some(path) => {
                anyhow::ensure!(path.is_file(), "config file not found: {}", path.display());
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed("ROTOR_").split("__"));
        if let Some(level) = &overrides.log_level {
            figment = figment.merge(("log.level", level));
        }
        if let Some(format) = &overrides.log_format {
            figment = figment.merge(("log.format", format));
        }

        figment
            .extract()
            .with_context(|| format!("invalid configuration (file: {})", file.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rotor_log::Format;

    #[test]
    fn layers_apply_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [log]
                level = "debug"
                format = "json"

                [retry]
                retry_topic = "from-file"
                dead_letter_topic = "from-file"
                "#,
            )?;
            jail.set_env("ROTOR_RETRY__DEAD_LETTER_TOPIC", "from-env");

            let config = AppConfig::load(
                None,
                &Overrides {
                    log_format: Some("pretty".into()),
                    ..Overrides::default()
                },
            )
            .map_err(|e| e.to_string())?;

            assert_eq!(config.log.level, "debug");
            assert_eq!(config.log.format, Format::Pretty);
            assert_eq!(config.retry.retry_topic, "from-file");
            assert_eq!(config.retry.dead_letter_topic, "from-env");
            assert_eq!(config.fetch.timeout, Duration::from_secs(30));
            Ok(())
        });
    }

    #[test]
    fn durations_read_from_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[sandbox]\ntimeout = \"2s\"\n[fetch]\ntimeout = \"500ms\"\n")?;
            let config = AppConfig::load(Some(Path::new("custom.toml")), &Overrides::default())
                .map_err(|e| e.to_string())?;
            assert_eq!(config.sandbox.timeout, Duration::from_secs(2));
            assert_eq!(config.fetch.timeout, Duration::from_millis(500));
            Ok(())
        });
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/rotor.toml")), &Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
