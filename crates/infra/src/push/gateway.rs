//! Outbound push calls.
//!
//! A push never fails at the Rust level: every call resolves to a
//! [`PushOutcome`]. The tenant's answer (2xx or not) comes back verbatim; only
//! a transport failure (DNS, refused connection, timeout) is synthesized, and
//! that is the only outcome the worker treats as transient.

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SECRET_HEADER: &str = "x-push-secret";

#[derive(Debug, thiserror::Error)]
pub enum PushConfigError {
    #[error("invalid secret header name '{0}'")]
    HeaderName(String),
    #[error("shared secret is not a valid header value")]
    HeaderValue,
    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Header carrying the shared secret on every request
    pub secret_header: String,
    /// Static secret tenants authenticate the control plane with
    pub shared_secret: String,
    pub timeout: Duration,
}

impl PushConfig {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            secret_header: DEFAULT_SECRET_HEADER.to_string(),
            shared_secret: shared_secret.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_secret_header(mut self, header: impl Into<String>) -> Self {
        self.secret_header = header.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl PushMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            PushMethod::Get => reqwest::Method::GET,
            PushMethod::Post => reqwest::Method::POST,
            PushMethod::Put => reqwest::Method::PUT,
            PushMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Tenant-side resource a push targets; picks the default path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEndpoint {
    Articles,
    Ads,
}

impl PushEndpoint {
    pub fn default_path(&self) -> &'static str {
        match self {
            PushEndpoint::Articles => "/api/articles",
            PushEndpoint::Ads => "/api/ads",
        }
    }
}

/// One call to a tenant backend.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub base_url: String,
    pub endpoint: PushEndpoint,
    pub method: PushMethod,
    pub body: Option<Value>,
    /// Replaces the endpoint's default path
    pub path_override: Option<String>,
}

impl PushRequest {
    pub fn new(base_url: impl Into<String>, endpoint: PushEndpoint, method: PushMethod) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint,
            method,
            body: None,
            path_override: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path_override = Some(path.into());
        self
    }

    /// Absolute URL: the override or the default path, appended to the base.
    pub fn url(&self) -> String {
        let path = self
            .path_override
            .as_deref()
            .unwrap_or_else(|| self.endpoint.default_path());
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Tenant answered 2xx.
    Delivered { status: u16, body: Value },
    /// Tenant answered, but not with 2xx.
    Rejected { status: u16, body: Value },
    /// No HTTP response at all.
    Unreachable { message: String },
}

impl PushOutcome {
    /// Body as the caller sees it: the tenant's response verbatim, or the
    /// synthesized `{ statusCode: 500, status: "ERROR", message }` envelope.
    pub fn body(&self) -> Value {
        match self {
            PushOutcome::Delivered { body, .. } | PushOutcome::Rejected { body, .. } => {
                body.clone()
            }
            PushOutcome::Unreachable { message } => json!({
                "statusCode": 500,
                "status": "ERROR",
                "message": message,
            }),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            PushOutcome::Delivered { status, .. } | PushOutcome::Rejected { status, .. } => {
                Some(*status)
            }
            PushOutcome::Unreachable { .. } => None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, PushOutcome::Delivered { .. })
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, PushOutcome::Unreachable { .. })
    }
}

/// Issues pushes with the shared-secret header attached.
#[derive(Debug, Clone)]
pub struct PushGateway {
    client: reqwest::Client,
    secret_header: HeaderName,
    secret: HeaderValue,
}

impl PushGateway {
    pub fn new(config: PushConfig) -> Result<Self, PushConfigError> {
        let secret_header = HeaderName::from_bytes(config.secret_header.as_bytes())
            .map_err(|_| PushConfigError::HeaderName(config.secret_header.clone()))?;
        let mut secret = HeaderValue::from_str(&config.shared_secret)
            .map_err(|_| PushConfigError::HeaderValue)?;
        secret.set_sensitive(true);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PushConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            secret_header,
            secret,
        })
    }

    /// Send one request to a tenant. Always resolves.
    pub async fn push_to_website(&self, request: &PushRequest) -> PushOutcome {
        let url = request.url();
        let method = request.method;

        let mut builder = self
            .client
            .request(method.as_reqwest(), &url)
            .header(self.secret_header.clone(), self.secret.clone());

        // DELETE never carries a body.
        if method != PushMethod::Delete {
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(%url, ?method, %error, "push transport failure");
                return PushOutcome::Unreachable {
                    message: error.to_string(),
                };
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(text) => parse_body(text),
            Err(error) => {
                warn!(%url, ?method, %error, "push response body unreadable");
                return PushOutcome::Unreachable {
                    message: error.to_string(),
                };
            }
        };

        if status.is_success() {
            debug!(%url, ?method, status = status.as_u16(), "push delivered");
            PushOutcome::Delivered {
                status: status.as_u16(),
                body,
            }
        } else {
            warn!(%url, ?method, status = status.as_u16(), "push rejected by tenant");
            PushOutcome::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}

/// JSON bodies come back as JSON, anything else as a string.
fn parse_body(text: String) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slashes() {
        let req = PushRequest::new("https://site.example/", PushEndpoint::Articles, PushMethod::Post);
        assert_eq!(req.url(), "https://site.example/api/articles");

        let req = PushRequest::new("https://site.example", PushEndpoint::Ads, PushMethod::Put)
            .with_path("api/ads/AD1");
        assert_eq!(req.url(), "https://site.example/api/ads/AD1");
    }

    #[test]
    fn unreachable_body_is_error_envelope() {
        let outcome = PushOutcome::Unreachable {
            message: "connection refused".into(),
        };
        assert_eq!(
            outcome.body(),
            json!({ "statusCode": 500, "status": "ERROR", "message": "connection refused" })
        );
        assert_eq!(outcome.status(), None);
        assert!(outcome.is_transport_failure());
    }

    #[test]
    fn non_json_body_is_kept_as_text() {
        assert_eq!(parse_body("ok".into()), Value::String("ok".into()));
        assert_eq!(parse_body(String::new()), Value::Null);
        assert_eq!(parse_body(r#"{"a":1}"#.into()), json!({ "a": 1 }));
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let err = PushGateway::new(PushConfig::new("s").with_secret_header("bad header")).unwrap_err();
        assert!(matches!(err, PushConfigError::HeaderName(_)));
    }
}
