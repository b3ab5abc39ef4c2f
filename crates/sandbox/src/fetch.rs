//! HTTP client behind the guest `fetch` import.

use std::time::Duration;

use async_trait::async_trait;
use rotor_ports::{FetchRequest, FetchResponse, Fetcher, PortsError};

/// Default deadline for one guest HTTP request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    /// Fetcher with the default timeout.
    pub fn new() -> Result<Self, PortsError> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Fetcher with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, PortsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortsError::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, err: &reqwest::Error) -> PortsError {
        if err.is_timeout() {
            PortsError::timeout("fetch", self.timeout)
        } else if err.is_connect() || err.is_request() {
            PortsError::Connection(err.to_string())
        } else if err.is_builder() {
            PortsError::InvalidArgument(err.to_string())
        } else {
            PortsError::Backend(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, PortsError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| PortsError::InvalidArgument(format!("bad method {}", request.method)))?;
        let mut builder = self.client.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(&e))?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
            .collect();
        let body = response.text().await.map_err(|e| self.map_error(&e))?;

        let mut out = FetchResponse::new(status.as_u16(), url.clone(), body);
        out.status_text = status.canonical_reason().unwrap_or_default().to_owned();
        out.redirected = reqwest::Url::parse(&request.url).map_or(true, |sent| sent.as_str() != url);
        out.headers = headers;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn round_trips_method_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-token", "t1"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-reply", "yes")
                    .set_body_string("created"),
            )
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new().unwrap();
        let mut request = FetchRequest::get(format!("{}/hook", server.uri()));
        request.method = "post".to_owned();
        request.headers.insert("x-token".to_owned(), "t1".to_owned());
        request.body = Some("{}".to_owned());

        let response = fetcher.fetch(request).await.unwrap();
        assert_eq!(response.status, 201);
        assert!(response.ok);
        assert_eq!(response.status_text, "Created");
        assert_eq!(response.body, "created");
        assert_eq!(response.headers.get("x-reply").map(String::as_str), Some("yes"));
        assert!(!response.redirected);
    }

    #[tokio::test]
    async fn error_status_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new().unwrap();
        let response = fetcher.fetch(FetchRequest::get(server.uri())).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.ok);
    }

    #[tokio::test]
    async fn unreachable_host_is_retryable() {
        let fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(2)).unwrap();
        let err = fetcher
            .fetch(FetchRequest::get("http://127.0.0.1:9/"))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
