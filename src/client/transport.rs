//! The HTTP seam between [`Client`](super::Client) and the network.
//!
//! [`Transport`] is the trait tests replace; [`HttpTransport`] is the reqwest
//! implementation that adds authentication, the User-Agent, the `X-Filter`
//! header and transient-failure retries.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::error::{ApiError, ClientError};
use crate::retry::{retry_with_backoff, RetryConfig};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// The method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-JSON request body, sent to presigned object-storage URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBody {
    /// Bytes to send.
    pub bytes: Vec<u8>,
    /// Extra headers, e.g. `Content-Type` and `x-amz-acl`.
    pub headers: Vec<(String, String)>,
}

/// One API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the versioned base URL, or an absolute URL when `presigned`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Value of the `X-Filter` header.
    pub filter: Option<Value>,
    /// Raw body for presigned uploads.
    pub raw: Option<RawBody>,
    /// The URL is presigned: send it as-is, without bearer auth.
    pub presigned: bool,
}

impl ApiRequest {
    /// A request with no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            filter: None,
            raw: None,
            presigned: false,
        }
    }

    /// A request to a presigned URL.
    pub fn presigned(method: Method, url: impl Into<String>) -> Self {
        Self {
            presigned: true,
            ..Self::new(method, url)
        }
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a filter.
    pub fn with_filter(mut self, filter: Option<Value>) -> Self {
        self.filter = filter;
        self
    }

    /// Add a query parameter.
    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Attach a raw body.
    pub fn with_raw(mut self, raw: RawBody) -> Self {
        self.raw = Some(raw);
        self
    }

    /// A query parameter's value.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A response from the API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body; `Null` when empty or not JSON.
    pub body: Value,
    /// Value of `X-Request-Id`.
    pub request_id: Option<String>,
    /// Response headers, lower-cased names.
    pub headers: BTreeMap<String, String>,
}

impl ApiResponse {
    /// A JSON response.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            request_id: None,
            headers: BTreeMap::new(),
        }
    }

    /// A `200 OK` with body `{}`.
    pub fn ok() -> Self {
        Self::json(200, Value::Object(Default::default()))
    }

    /// An error response in the API's `errors` shape.
    pub fn error(status: u16, reason: &str) -> Self {
        Self::json(
            status,
            serde_json::json!({ "errors": [{ "reason": reason }] }),
        )
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// A header value by lower-case name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Convert a non-2xx response into an [`ApiError`].
    pub fn into_result(self) -> Result<Self, ClientError> {
        if self.is_success() {
            return Ok(self);
        }
        let mut err = ApiError::from_body(self.status, &self.body, self.request_id.clone());
        err.retry_after = self
            .header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        Err(ClientError::Api(err))
    }
}

/// Executes API requests.
///
/// Implementations must be safe to share between concurrent operations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the response, whatever its status.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError>;
}

/// Settings for [`HttpTransport`].
#[derive(Clone)]
pub struct HttpTransportConfig {
    /// Versioned base URL, e.g. `https://api.linode.com/v4`.
    pub base_url: String,
    /// Bearer token.
    pub token: String,
    /// User-Agent header.
    pub user_agent: String,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl fmt::Debug for HttpTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransportConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("user_agent", &self.user_agent)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// reqwest-backed [`Transport`].
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Build the transport.
    pub fn new(config: HttpTransportConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, request: &ApiRequest) -> String {
        if request.presigned {
            request.path.clone()
        } else {
            format!("{}{}", self.config.base_url.trim_end_matches('/'), request.path)
        }
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, self.url(request));

        if !request.presigned {
            builder = builder.bearer_auth(&self.config.token);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(filter) = &request.filter {
            builder = builder.header("X-Filter", filter.to_string());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(raw) = &request.raw {
            for (name, value) in &raw.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder = builder.body(raw.bytes.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        debug!(
            method = %request.method,
            path = %request.path,
            status = status,
            "API response"
        );

        ApiResponse {
            status,
            body,
            request_id: headers.get("x-request-id").cloned(),
            headers,
        }
        .into_result()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let operation = format!("{} {}", request.method, request.path);
        retry_with_backoff(&self.config.retry, &operation, || self.send_once(&request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport() -> HttpTransport {
        HttpTransport::new(HttpTransportConfig {
            base_url: "https://api.linode.com/v4/".to_string(),
            token: "secret-token".to_string(),
            user_agent: "linode-provider/test".to_string(),
            retry: RetryConfig::none(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_base() {
        let t = transport();
        assert_eq!(
            t.url(&ApiRequest::new(Method::Get, "/volumes/7")),
            "https://api.linode.com/v4/volumes/7"
        );
        assert_eq!(
            t.url(&ApiRequest::presigned(Method::Put, "https://bucket.example/key?sig=1")),
            "https://bucket.example/key?sig=1"
        );
    }

    #[test]
    fn test_config_debug_hides_token() {
        let debug = format!("{:?}", transport().config);
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn test_response_into_result() {
        assert!(ApiResponse::ok().into_result().is_ok());

        let err = ApiResponse::error(429, "Too many requests")
            .with_header("Retry-After", "2")
            .into_result()
            .unwrap_err();
        match err {
            ClientError::Api(api) => {
                assert_eq!(api.status, 429);
                assert_eq!(api.retry_after, Some(Duration::from_secs(2)));
            },
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_request_builders() {
        let req = ApiRequest::new(Method::Get, "/domains")
            .with_query("page", 2)
            .with_filter(Some(json!({"domain": "example.com"})));
        assert_eq!(req.query_param("page"), Some("2"));
        assert!(req.filter.is_some());
        assert!(!req.presigned);
    }
}
