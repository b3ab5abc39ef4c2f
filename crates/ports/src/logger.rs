//! Sink for log calls made by functions.

use serde::{Deserialize, Serialize};

/// Level of a function log call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `log.debug`
    Debug,
    /// `log.info`
    Info,
    /// `log.warn`
    Warn,
    /// `log.error`
    Error,
}

impl LogLevel {
    /// Level from the guest ABI code (0 = debug … 3 = error).
    /// Unknown codes are treated as `Info`.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Debug,
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::Info,
        }
    }
}

/// One function log call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Function that logged.
    pub function_id: String,
    /// Level.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Time of the call.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Receives function log calls.
pub trait FunctionLogger: Send + Sync {
    /// Handle one record.
    fn log(&self, record: LogRecord);
}

/// Forwards function logs to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl FunctionLogger for TracingLogger {
    fn log(&self, record: LogRecord) {
        let function_id = record.function_id.as_str();
        match record.level {
            LogLevel::Debug => tracing::debug!(target: "rotor::function", function_id, "{}", record.message),
            LogLevel::Info => tracing::info!(target: "rotor::function", function_id, "{}", record.message),
            LogLevel::Warn => tracing::warn!(target: "rotor::function", function_id, "{}", record.message),
            LogLevel::Error => tracing::error!(target: "rotor::function", function_id, "{}", record.message),
        }
    }
}
