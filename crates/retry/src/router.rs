//! Retry routing.
//!
//! A failed event goes one of three ways: dropped, requeued on the retry
//! topic with a back-off hint, or parked on the dead-letter topic once its
//! policy has no retries left.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rotor_chain::ChainError;
use rotor_core::{FunctionError, InboundMessage, RetryPolicy};
use rotor_ports::{MessagePublisher, OutboundMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{RetryDisposition, classify_with};
use crate::error::RetryError;

/// Header carrying the JSON-encoded [`FunctionError`].
pub const HEADER_ERROR: &str = "error";
/// Header carrying the number of retries scheduled so far.
pub const HEADER_RETRIES: &str = "retries";
/// Header carrying the topic the message was first consumed from.
pub const HEADER_ORIGINAL_TOPIC: &str = "original_topic";
/// Header carrying the earliest time the retry should run (RFC 3339).
pub const HEADER_RETRY_TIME: &str = "retry_time";
/// Header carrying the comma-separated connection ids to replay.
pub const HEADER_CONNECTION_IDS: &str = "connection_ids";
/// Header carrying the function that failed.
pub const HEADER_FUNCTION_ID: &str = "function_id";

/// Router settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Topic retries are published to.
    pub retry_topic: String,
    /// Topic for messages that exhausted their retries.
    pub dead_letter_topic: String,
    /// Policy for retryable errors that carry none.
    pub default_policy: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_topic: "rotor.retry".to_owned(),
            dead_letter_topic: "rotor.dead_letter".to_owned(),
            default_policy: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Typed view of the retry headers on a transport message.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryHeaders {
    /// The error that caused the retry.
    pub error: FunctionError,
    /// Retries scheduled so far.
    pub retries: u32,
    /// Topic the message was first consumed from.
    pub original_topic: String,
    /// Earliest time to run the retry. Absent on dead letters.
    pub retry_time: Option<DateTime<Utc>>,
    /// Connections to replay.
    pub connection_ids: Vec<String>,
    /// Function that failed.
    pub function_id: Option<String>,
}

impl RetryHeaders {
    /// Encode as transport headers.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(
            HEADER_ERROR.to_owned(),
            serde_json::to_string(&self.error).unwrap_or_else(|_| self.error.to_string()),
        );
        headers.insert(HEADER_RETRIES.to_owned(), self.retries.to_string());
        headers.insert(HEADER_ORIGINAL_TOPIC.to_owned(), self.original_topic.clone());
        if let Some(time) = self.retry_time {
            headers.insert(HEADER_RETRY_TIME.to_owned(), time.to_rfc3339());
        }
        headers.insert(HEADER_CONNECTION_IDS.to_owned(), self.connection_ids.join(","));
        if let Some(function_id) = &self.function_id {
            headers.insert(HEADER_FUNCTION_ID.to_owned(), function_id.clone());
        }
        headers
    }

    /// Decode transport headers. Returns `None` when the message has never
    /// been retried.
    pub fn from_map(headers: &BTreeMap<String, String>) -> Result<Option<Self>, RetryError> {
        let Some(retries) = headers.get(HEADER_RETRIES) else {
            return Ok(None);
        };
        let retries = retries
            .parse()
            .map_err(|e| RetryError::header(HEADER_RETRIES, format!("{e}")))?;

        let error = match headers.get(HEADER_ERROR) {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| FunctionError::plain(raw.clone())),
            None => return Err(RetryError::header(HEADER_ERROR, "missing")),
        };

        let retry_time = headers
            .get(HEADER_RETRY_TIME)
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| RetryError::header(HEADER_RETRY_TIME, e.to_string()))
            })
            .transpose()?;

        Ok(Some(Self {
            error,
            retries,
            original_topic: headers.get(HEADER_ORIGINAL_TOPIC).cloned().unwrap_or_default(),
            retry_time,
            connection_ids: headers
                .get(HEADER_CONNECTION_IDS)
                .map(|ids| {
                    ids.split(',')
                        .filter(|id| !id.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            function_id: headers.get(HEADER_FUNCTION_ID).cloned(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Failure / Route
// ---------------------------------------------------------------------------

/// A failed run, ready to be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    /// What went wrong.
    pub error: FunctionError,
    /// The message being processed.
    pub message: InboundMessage,
    /// Topic the message was consumed from.
    pub original_topic: String,
    /// Connections whose chains must replay it.
    pub connection_ids: Vec<String>,
}

impl Failure {
    /// Failure of `message` on its own connection.
    pub fn new(error: FunctionError, message: InboundMessage, original_topic: impl Into<String>) -> Self {
        Self {
            connection_ids: vec![message.connection_id.clone()],
            error,
            message,
            original_topic: original_topic.into(),
        }
    }

    /// Failure raised by a chain run.
    pub fn from_chain_error(
        error: ChainError,
        message: InboundMessage,
        original_topic: impl Into<String>,
    ) -> Self {
        let error = match error {
            ChainError::Retryable {
                function_id, error, ..
            } if error.function_id.is_none() => error.with_function_id(function_id),
            other => other.into_function_error(),
        };
        Self::new(error, message, original_topic)
    }

    /// Replace the connections to replay.
    #[must_use]
    pub fn with_connection_ids(mut self, connection_ids: Vec<String>) -> Self {
        self.connection_ids = connection_ids;
        self
    }
}

/// Where a failed message goes next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    /// Discard.
    Drop,
    /// Publish again after `delay`.
    Requeue {
        /// Retry topic.
        topic: String,
        /// Back-off before the retry should run.
        #[serde(with = "humantime_serde")]
        delay: Duration,
        /// Retry number this message represents, 1-based.
        attempt: u32,
        /// Dedup key, set on the first retry only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        /// Retry headers.
        headers: BTreeMap<String, String>,
        /// Message to replay.
        payload: Value,
    },
    /// Give up.
    DeadLetter {
        /// Dead-letter topic.
        topic: String,
        /// Retry headers.
        headers: BTreeMap<String, String>,
        /// Message as it was last attempted.
        payload: Value,
    },
}

impl Route {
    /// Topic and message to publish, or `None` for a drop.
    pub fn into_message(self) -> Option<(String, OutboundMessage)> {
        match self {
            Self::Drop => None,
            Self::Requeue {
                topic,
                key,
                headers,
                payload,
                ..
            } => Some((topic, OutboundMessage { key, headers, payload })),
            Self::DeadLetter {
                topic,
                headers,
                payload,
            } => Some((
                topic,
                OutboundMessage {
                    key: None,
                    headers,
                    payload,
                },
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryRouter
// ---------------------------------------------------------------------------

/// Turns failures into routes and publishes them.
#[derive(Debug, Clone, Default)]
pub struct RetryRouter {
    config: RetryConfig,
}

impl RetryRouter {
    /// Router with `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Route `failure` for retry number `attempt` (1-based).
    pub fn route(&self, failure: &Failure, attempt: u32) -> Route {
        let attempt = attempt.max(1);
        let (policy, partial) = match classify_with(&failure.error, &self.config.default_policy) {
            RetryDisposition::Drop => return Route::Drop,
            RetryDisposition::Fatal => return self.dead_letter(failure, attempt - 1, None),
            RetryDisposition::Retry { policy, event, .. } => (policy, event),
        };

        let Some(delay) = policy.delay_for(attempt) else {
            return self.dead_letter(failure, attempt - 1, partial);
        };

        let headers = RetryHeaders {
            error: failure.error.clone(),
            retries: attempt,
            original_topic: failure.original_topic.clone(),
            retry_time: TimeDelta::from_std(delay)
                .ok()
                .and_then(|delta| Utc::now().checked_add_signed(delta)),
            connection_ids: failure.connection_ids.clone(),
            function_id: failure.error.function_id.clone(),
        };
        let key = (attempt == 1).then(|| {
            format!(
                "{}:{}",
                failure.message.message_id, failure.message.connection_id
            )
        });

        Route::Requeue {
            topic: self.config.retry_topic.clone(),
            delay,
            attempt,
            key,
            headers: headers.to_map(),
            payload: payload(&failure.message, partial),
        }
    }

    /// Route `failure` and publish the result through `publisher`.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(message_id = %failure.message.message_id, attempt)
    )]
    pub async fn dispatch(
        &self,
        publisher: &dyn MessagePublisher,
        failure: &Failure,
        attempt: u32,
    ) -> Result<Route, RetryError> {
        let route = self.route(failure, attempt);
        match &route {
            Route::Drop => {
                tracing::debug!(error = %failure.error, "failure dropped");
                return Ok(route);
            }
            Route::Requeue { delay, .. } => {
                tracing::info!(
                    delay = %humantime::format_duration(*delay),
                    error = %failure.error,
                    "scheduling retry"
                );
            }
            Route::DeadLetter { .. } => {
                tracing::warn!(error = %failure.error, "retries exhausted, dead-lettering");
            }
        }

        if let Some((topic, message)) = route.clone().into_message() {
            publisher.publish(&topic, message).await?;
        }
        Ok(route)
    }

    fn dead_letter(&self, failure: &Failure, retries: u32, partial: Option<Value>) -> Route {
        let headers = RetryHeaders {
            error: failure.error.clone(),
            retries,
            original_topic: failure.original_topic.clone(),
            retry_time: None,
            connection_ids: failure.connection_ids.clone(),
            function_id: failure.error.function_id.clone(),
        };
        Route::DeadLetter {
            topic: self.config.dead_letter_topic.clone(),
            headers: headers.to_map(),
            payload: payload(&failure.message, partial),
        }
    }
}

/// The message to replay, resuming from the partial event when there is one.
fn payload(message: &InboundMessage, partial: Option<Value>) -> Value {
    let mut message = message.clone();
    if let Some(event) = partial {
        message.http_payload = event;
    }
    serde_json::to_value(message).unwrap_or(Value::Null)
}
