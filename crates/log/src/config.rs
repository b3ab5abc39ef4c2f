//! Logger configuration.

use serde::{Deserialize, Serialize};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human oriented.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Logger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info,rotor_chain=debug`.
    /// `RUST_LOG` overrides it when set.
    pub level: String,
    /// Output format.
    pub format: Format,
    /// Colored output. Ignored for JSON.
    pub ansi: bool,
    /// Include the event target (module path).
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: Format::Compact,
            ansi: true,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Pretty, debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_owned(),
            format: Format::Pretty,
            ..Self::default()
        }
    }

    /// JSON, info level, no colors.
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_owned(),
            format: Format::Json,
            ansi: false,
            with_target: true,
        }
    }

    /// Compact output without colors, for tests and CI.
    #[must_use]
    pub fn test() -> Self {
        Self {
            level: "trace".to_owned(),
            ansi: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("pretty", Format::Pretty)]
    #[case("COMPACT", Format::Compact)]
    #[case("json", Format::Json)]
    fn format_parses(#[case] input: &str, #[case] expected: Format) {
        assert_eq!(input.parse::<Format>().unwrap(), expected);
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!("logfmt".parse::<Format>().is_err());
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: LogConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(cfg.format, Format::Json);
        assert_eq!(cfg.level, "info");
    }

    #[test]
    fn production_disables_ansi() {
        assert!(!LogConfig::production().ansi);
    }
}
