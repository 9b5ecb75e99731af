//! Request-issuing layer.
//!
//! The [`Transport`] trait is the only thing the resilience layer needs from
//! the outside world: a way to send one request and get back a status, headers
//! and a body. [`HttpTransport`] implements it over `reqwest`; tests and
//! embedders can supply their own.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde_json::Value;
use url::Url;

pub use reqwest::Method;

use crate::cache::Params;
use crate::error::ApiGuardError;

/// A response from the remote API.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Decoded JSON body; `Null` when empty, a string when not JSON
    pub body: Value,
}

/// Issues a single request against the remote API.
///
/// Implementations return `Err` for transport failures and for non-success
/// status codes, so that the retry layer can classify them.
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// `query` is encoded into the query string; `body`, when present, is sent
    /// as JSON.
    fn perform_request(
        &self,
        method: Method,
        path: &str,
        query: &Params,
        body: Option<&Value>,
    ) -> impl Future<Output = Result<ApiResponse, ApiGuardError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn perform_request(
        &self,
        method: Method,
        path: &str,
        query: &Params,
        body: Option<&Value>,
    ) -> impl Future<Output = Result<ApiResponse, ApiGuardError>> + Send {
        (**self).perform_request(method, path, query, body)
    }
}

/// [`Transport`] over HTTP using `reqwest` with tracing middleware.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use api_guard::transport::HttpTransport;
///
/// let transport = HttpTransport::builder()
///     .base_url("https://api.example.com/v1")
///     .timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct HttpTransport {
    http_client: ClientWithMiddleware,
    base_url: String,
}

impl HttpTransport {
    /// Create a new transport builder.
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str, query: &Params) -> Result<String, ApiGuardError> {
        if path.contains("://") {
            return Err(ApiGuardError::Validation(format!(
                "path must be relative to the base URL: {path}"
            )));
        }

        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        // Nulls mean "not set" and are left out of the query string.
        let pairs: Vec<(&String, &Value)> = query.iter().filter(|(_, v)| !v.is_null()).collect();
        if !pairs.is_empty() {
            let encoded: Vec<(&str, String)> = pairs
                .into_iter()
                .map(|(name, value)| match value {
                    Value::String(s) => Ok((name.as_str(), s.clone())),
                    Value::Number(_) | Value::Bool(_) => Ok((name.as_str(), value.to_string())),
                    _ => Err(ApiGuardError::Validation(format!(
                        "query parameter {name} must be a scalar"
                    ))),
                })
                .collect::<Result<_, _>>()?;
            let query_string = serde_urlencoded::to_string(&encoded)
                .map_err(|e| ApiGuardError::Validation(e.to_string()))?;
            url.push('?');
            url.push_str(&query_string);
        }

        Ok(url)
    }

    async fn parse_response(&self, response: reqwest::Response) -> Result<ApiResponse, ApiGuardError> {
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(ApiGuardError::Status {
                status: status.as_u16(),
                retry_after,
                body: text,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    async fn perform_request(
        &self,
        method: Method,
        path: &str,
        query: &Params,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiGuardError> {
        let url = self.url_for(path, query)?;

        let mut request = self.http_client.request(method, &url);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = request.send().await.map_err(map_middleware_error)?;
        self.parse_response(response).await
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn map_reqwest_error(error: reqwest::Error) -> ApiGuardError {
    if error.is_timeout() {
        ApiGuardError::Timeout
    } else if error.is_connect() {
        ApiGuardError::Connection(error.to_string())
    } else {
        ApiGuardError::Http(error)
    }
}

fn map_middleware_error(error: reqwest_middleware::Error) -> ApiGuardError {
    match error {
        reqwest_middleware::Error::Reqwest(e) => map_reqwest_error(e),
        other => ApiGuardError::HttpMiddleware(other),
    }
}

/// Builder for [`HttpTransport`].
pub struct HttpTransportBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    headers: HeaderMap,
}

impl HttpTransportBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: Some(Duration::from_secs(30)),
            connect_timeout: None,
            user_agent: None,
            headers: HeaderMap::new(),
        }
    }

    /// Set the base URL every request path is appended to.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the total timeout for each request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout for establishing connections.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Add a header sent with every request.
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<HttpTransport, ApiGuardError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ApiGuardError::Config("base URL is required".to_string()))?;
        let parsed = Url::parse(&base_url)?;
        if parsed.cannot_be_a_base() {
            return Err(ApiGuardError::Config(format!("not a base URL: {base_url}")));
        }

        let mut headers = self.headers;
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("api-guard/{}", env!("CARGO_PKG_VERSION")));
        let header_value = HeaderValue::from_str(&user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("api-guard"));
        headers.insert(USER_AGENT, header_value);

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let reqwest_client = builder.build()?;

        let client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        Ok(HttpTransport {
            http_client: client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
