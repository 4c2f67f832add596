use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::catalog::Endpoint;
use crate::error::EngineError;

/// Identity of one endpoint: `(method, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId {
    pub method: Method,
    pub path: String,
}

impl EndpointId {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl Serialize for EndpointId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// One fully synthesized request for an endpoint: parameter values keyed by
/// parameter name, plus an optional JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedRequest {
    pub endpoint: EndpointId,
    #[serde(rename = "parameterValues")]
    pub parameter_values: BTreeMap<String, Value>,
    pub body: Option<Value>,
}

/// Strategy used to pick which endpoint a given request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrafficPattern {
    /// A single shared cursor walks the endpoint list in fixed order,
    /// wrapping at the end. Deterministic, repeatable calling order.
    Sequential,
    /// Request slot `i` of a tick uses endpoint `i mod len`, keeping several
    /// endpoints in flight together in a fixed relative order.
    Interleaved,
    /// Every request independently picks an endpoint uniformly at random.
    Random,
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one run. Lives for exactly one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_base_url: String,
    pub endpoints: Vec<Endpoint>,
    pub concurrency: u32,
    pub duration_seconds: u32,
    pub rate_per_second: Option<u32>,
    pub pattern: TrafficPattern,
    pub request_timeout: Duration,
}

impl RunConfig {
    pub fn new(target_base_url: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            target_base_url: target_base_url.into(),
            endpoints,
            concurrency: 1,
            duration_seconds: 10,
            rate_per_second: None,
            pattern: TrafficPattern::Sequential,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.concurrency < 1 {
            return Err(EngineError::RunConfig("concurrency must be at least 1".into()));
        }
        if self.duration_seconds < 1 {
            return Err(EngineError::RunConfig(
                "durationSeconds must be at least 1".into(),
            ));
        }
        if self.endpoints.is_empty() {
            return Err(EngineError::RunConfig("endpoint list is empty".into()));
        }
        Ok(())
    }
}

/// Run lifecycle: `Idle → Running → {Completed, Cancelled, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Category of a failed request. This is outcome data, not an error: it is
/// counted and never aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    HttpError,
    Other,
}

impl ErrorKind {
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::ConnectionRefused
        } else if error.is_status() {
            Self::HttpError
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "Timeout",
            Self::ConnectionRefused => "ConnectionRefused",
            Self::HttpError => "HttpError",
            Self::Other => "Other",
        };
        f.write_str(name)
    }
}

/// The recorded result of one dispatched request, produced exactly once per
/// attempted request, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub endpoint: EndpointId,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(rename = "errorKind")]
    pub error_kind: Option<ErrorKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_rejects_bad_values() {
        let endpoint = Endpoint {
            path: "/items".into(),
            method: Method::GET,
            parameters: vec![],
            request_body: None,
        };

        let mut config = RunConfig::new("http://localhost:8080", vec![endpoint]);
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(EngineError::RunConfig(_))
        ));

        config.concurrency = 1;
        config.duration_seconds = 0;
        assert!(config.validate().is_err());

        config.duration_seconds = 1;
        config.endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_id_display_is_method_then_path() {
        let id = EndpointId::new(Method::POST, "/users");
        assert_eq!(id.to_string(), "POST /users");
    }
}
