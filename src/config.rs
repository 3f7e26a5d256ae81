//! Provider configuration.
//!
//! The host's Configure options map is deserialized into [`ProviderOptions`]
//! and completed from the environment into a [`ProviderConfig`]. Explicit
//! options win over environment variables, which win over defaults.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::client::HttpTransportConfig;
use crate::error::ProviderError;
use crate::retry::RetryConfig;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema, Validator};

/// Environment variable holding the access token.
pub const TOKEN_ENV: &str = "LINODE_TOKEN";
/// Environment variable overriding the API URL.
pub const URL_ENV: &str = "LINODE_URL";
/// Environment variable overriding the API version.
pub const API_VERSION_ENV: &str = "LINODE_API_VERSION";
/// Environment variable prefixing the User-Agent.
pub const UA_PREFIX_ENV: &str = "LINODE_UA_PREFIX";
/// Environment variable overriding the event poll interval.
pub const EVENT_POLL_ENV: &str = "LINODE_EVENT_POLL_MS";

/// Default API URL.
pub const DEFAULT_URL: &str = "https://api.linode.com";
/// Default API version.
pub const DEFAULT_API_VERSION: &str = "v4";

/// Options exactly as the host passed them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderOptions {
    token: Option<String>,
    url: Option<String>,
    api_version: Option<String>,
    ua_prefix: Option<String>,
    skip_instance_ready_poll: Option<bool>,
    skip_instance_delete_poll: Option<bool>,
    event_poll_ms: Option<u64>,
    lke_event_poll_ms: Option<u64>,
    lke_node_ready_poll_ms: Option<u64>,
    min_retry_delay_ms: Option<u64>,
    max_retry_delay_ms: Option<u64>,
    max_retries: Option<u32>,
    page_size: Option<u32>,
    max_pages: Option<u32>,
}

/// Fully-resolved provider configuration.
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    /// Access token.
    pub token: String,
    /// API URL without the version segment.
    pub url: String,
    /// API version path segment.
    pub api_version: String,
    /// Prepended to the User-Agent.
    pub ua_prefix: Option<String>,
    /// Return from instance Create without waiting for it to boot.
    pub skip_instance_ready_poll: bool,
    /// Return from instance Delete without waiting for 404.
    pub skip_instance_delete_poll: bool,
    /// Poll interval for instance, volume and image waits.
    pub event_poll_interval: Duration,
    /// Poll interval for LKE cluster waits.
    pub lke_event_poll_interval: Duration,
    /// Poll interval for LKE node readiness.
    pub lke_node_ready_poll_interval: Duration,
    /// Initial retry delay for transient failures.
    pub min_retry_delay: Duration,
    /// Maximum retry delay for transient failures.
    pub max_retry_delay: Duration,
    /// Retries for transient failures.
    pub max_retries: u32,
    /// Items per page for list calls.
    pub page_size: u32,
    /// Page cap for list calls.
    pub max_pages: u32,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("token", &"[REDACTED]")
            .field("url", &self.url)
            .field("api_version", &self.api_version)
            .field("ua_prefix", &self.ua_prefix)
            .field("skip_instance_ready_poll", &self.skip_instance_ready_poll)
            .field("skip_instance_delete_poll", &self.skip_instance_delete_poll)
            .field("event_poll_interval", &self.event_poll_interval)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    /// Resolve options against the process environment.
    pub fn from_options(options: &Value) -> Result<Self, ProviderError> {
        Self::from_options_with_env(options, |key| std::env::var(key).ok())
    }

    /// Resolve options against an arbitrary environment lookup.
    pub fn from_options_with_env<E>(options: &Value, env: E) -> Result<Self, ProviderError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let options: ProviderOptions = match options {
            Value::Null => ProviderOptions::default(),
            other => serde_json::from_value(other.clone())
                .map_err(|e| ProviderError::Configuration(format!("invalid options: {}", e)))?,
        };
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let token = options
            .token
            .filter(|t| !t.is_empty())
            .or_else(|| env(TOKEN_ENV))
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "an access token is required: set `token` or {}",
                    TOKEN_ENV
                ))
            })?;

        let event_poll_ms = match options.event_poll_ms {
            Some(ms) => ms,
            None => match env(EVENT_POLL_ENV) {
                Some(raw) => raw.parse().map_err(|_| {
                    ProviderError::Configuration(format!("{} must be an integer", EVENT_POLL_ENV))
                })?,
                None => 4000,
            },
        };

        let config = Self {
            token,
            url: options
                .url
                .or_else(|| env(URL_ENV))
                .unwrap_or_else(|| DEFAULT_URL.to_string()),
            api_version: options
                .api_version
                .or_else(|| env(API_VERSION_ENV))
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            ua_prefix: options
                .ua_prefix
                .or_else(|| env(UA_PREFIX_ENV))
                .filter(|p| !p.trim().is_empty()),
            skip_instance_ready_poll: options.skip_instance_ready_poll.unwrap_or(false),
            skip_instance_delete_poll: options.skip_instance_delete_poll.unwrap_or(false),
            event_poll_interval: Duration::from_millis(event_poll_ms),
            lke_event_poll_interval: Duration::from_millis(
                options.lke_event_poll_ms.unwrap_or(3000),
            ),
            lke_node_ready_poll_interval: Duration::from_millis(
                options.lke_node_ready_poll_ms.unwrap_or(3000),
            ),
            min_retry_delay: Duration::from_millis(options.min_retry_delay_ms.unwrap_or(100)),
            max_retry_delay: Duration::from_millis(options.max_retry_delay_ms.unwrap_or(2000)),
            max_retries: options.max_retries.unwrap_or(5),
            page_size: options.page_size.unwrap_or(100),
            max_pages: options.max_pages.unwrap_or(20),
        };
        config.check()?;
        Ok(config)
    }

    /// A config with defaults and the given token, for tests and tools.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: DEFAULT_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            ua_prefix: None,
            skip_instance_ready_poll: false,
            skip_instance_delete_poll: false,
            event_poll_interval: Duration::from_millis(4000),
            lke_event_poll_interval: Duration::from_millis(3000),
            lke_node_ready_poll_interval: Duration::from_millis(3000),
            min_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(2000),
            max_retries: 5,
            page_size: 100,
            max_pages: 20,
        }
    }

    /// Use the same poll interval for every wait.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.event_poll_interval = interval;
        self.lke_event_poll_interval = interval;
        self.lke_node_ready_poll_interval = interval;
        self
    }

    fn check(&self) -> Result<(), ProviderError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ProviderError::Configuration(format!(
                "url must be an http(s) URL, got {:?}",
                self.url
            )));
        }
        if self.min_retry_delay > self.max_retry_delay {
            return Err(ProviderError::Configuration(
                "min_retry_delay_ms must not exceed max_retry_delay_ms".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > 500 {
            return Err(ProviderError::Configuration(
                "page_size must be between 1 and 500".to_string(),
            ));
        }
        Ok(())
    }

    /// `<url>/<api_version>`.
    pub fn base_url(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        )
    }

    /// The User-Agent header.
    pub fn user_agent(&self) -> String {
        let ua = format!("linode-provider/{}", env!("CARGO_PKG_VERSION"));
        match &self.ua_prefix {
            Some(prefix) => format!("{} {}", prefix.trim(), ua),
            None => ua,
        }
    }

    /// Retry policy for the transport.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: self.min_retry_delay,
            max_delay: self.max_retry_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// Settings for the reqwest transport.
    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            base_url: self.base_url(),
            token: self.token.clone(),
            user_agent: self.user_agent(),
            retry: self.retry_config(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Schema of the Configure options map.
pub fn provider_schema() -> Schema {
    let optional_ms = || {
        Attribute::new(AttributeType::Int64, AttributeFlags::optional())
            .with_validator(Validator::int_at_least(1))
    };
    Schema::v0()
        .with_attribute(
            "token",
            Attribute::optional_string()
                .sensitive()
                .with_description("Access token; falls back to LINODE_TOKEN."),
        )
        .with_attribute("url", Attribute::optional_string())
        .with_attribute("api_version", Attribute::optional_string())
        .with_attribute("ua_prefix", Attribute::optional_string())
        .with_attribute("skip_instance_ready_poll", Attribute::optional_bool())
        .with_attribute("skip_instance_delete_poll", Attribute::optional_bool())
        .with_attribute("event_poll_ms", optional_ms())
        .with_attribute("lke_event_poll_ms", optional_ms())
        .with_attribute("lke_node_ready_poll_ms", optional_ms())
        .with_attribute("min_retry_delay_ms", optional_ms())
        .with_attribute("max_retry_delay_ms", optional_ms())
        .with_attribute(
            "max_retries",
            Attribute::optional_int64().with_validator(Validator::int_at_least(0)),
        )
        .with_attribute(
            "page_size",
            Attribute::optional_int64().with_validator(Validator::int_between(1, 500)),
        )
        .with_attribute("max_pages", optional_ms())
}
