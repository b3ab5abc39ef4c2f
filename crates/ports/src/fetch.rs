//! Outbound HTTP port used by the `fetch` host binding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortsError;

/// A request issued by a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    /// Absolute URL.
    pub url: String,
    /// HTTP method, `GET` when omitted.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_owned()
}

impl FetchRequest {
    /// A `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// Response envelope returned to sandboxed code.
///
/// The body is always fully read (`bodyUsed` is `true`); only the text and
/// JSON views are supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase.
    pub status_text: String,
    /// Response type, always `"basic"` or `"default"`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// Whether a redirect was followed.
    pub redirected: bool,
    /// Body text.
    pub body: String,
    /// Always `true`.
    pub body_used: bool,
    /// Final URL.
    pub url: String,
    /// `status` is 2xx.
    pub ok: bool,
    /// Response headers, lowercase names.
    pub headers: BTreeMap<String, String>,
}

/// Guests receive the envelope as JSON and read `body` themselves. The
/// accessors below serve host-side callers, such as native stages and test
/// tooling, that hold a `FetchResponse` directly.
impl FetchResponse {
    /// Build an envelope from the essentials.
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: String::new(),
            response_type: "default".to_owned(),
            redirected: false,
            body: body.into(),
            body_used: true,
            url: url.into(),
            ok: (200..300).contains(&status),
            headers: BTreeMap::new(),
        }
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Result<serde_json::Value, PortsError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Body as text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.body
    }

    /// `arrayBuffer()` is not supported; always [`PortsError::NotImplemented`].
    pub fn array_buffer(&self) -> Result<Vec<u8>, PortsError> {
        Err(PortsError::not_implemented("arrayBuffer()"))
    }

    /// `blob()` is not supported; always [`PortsError::NotImplemented`].
    pub fn blob(&self) -> Result<Vec<u8>, PortsError> {
        Err(PortsError::not_implemented("blob()"))
    }

    /// `formData()` is not supported; always [`PortsError::NotImplemented`].
    pub fn form_data(&self) -> Result<BTreeMap<String, String>, PortsError> {
        Err(PortsError::not_implemented("formData()"))
    }

    /// `clone()` is not supported; always [`PortsError::NotImplemented`].
    pub fn clone_response(&self) -> Result<Self, PortsError> {
        Err(PortsError::not_implemented("clone()"))
    }
}

/// Performs HTTP requests on behalf of functions.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Execute `request` and buffer the whole response.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, PortsError>;
}
