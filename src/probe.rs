//! Metric probe abstraction
//!
//! How metrics are physically retrieved from an instance is opaque to the
//! engine. A probe receives the instance and the resolved query template and
//! returns named metric values, optionally with a category payload.
//!
//! [`HttpProbe`] forwards probe calls to an agent over HTTP:
//!
//! ```text
//! POST {url}/probe  {"instance_id": .., "engine_version": .., "query": ..}
//!   -> 200 {"values": {"value": 30.5}, "detail": {...}}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::detail::CategoryDetail;
use crate::model::Instance;

/// Raw metrics returned by a probe call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub detail: Option<CategoryDetail>,
}

impl ProbeOutput {
    pub fn value(name: &str, value: f64) -> Self {
        Self {
            values: BTreeMap::from([(name.to_string(), value)]),
            detail: None,
        }
    }
}

/// Reasons a probe call can fail
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// The instance could not be reached
    Unreachable(String),

    /// The instance answered with an error
    Rejected(String),

    /// The response could not be decoded
    InvalidResponse(String),

    /// The probe did not answer in time
    Timeout,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Unreachable(msg) => write!(f, "instance unreachable: {msg}"),
            ProbeError::Rejected(msg) => write!(f, "probe rejected: {msg}"),
            ProbeError::InvalidResponse(msg) => write!(f, "invalid probe response: {msg}"),
            ProbeError::Timeout => write!(f, "probe timed out"),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Retrieves raw metrics from one instance
#[async_trait]
pub trait MetricProbe: Send + Sync {
    async fn probe(&self, instance: &Instance, query: &str) -> Result<ProbeOutput, ProbeError>;
}

#[derive(Debug, Serialize)]
struct ProbeRequest<'a> {
    instance_id: &'a str,
    engine_version: String,
    query: &'a str,
}

/// Probe forwarding calls to an HTTP agent
#[derive(Debug, Clone)]
pub struct HttpProbe {
    /// HTTP client (reused across requests)
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl MetricProbe for HttpProbe {
    #[instrument(skip(self, query), fields(instance = %instance.id))]
    async fn probe(&self, instance: &Instance, query: &str) -> Result<ProbeOutput, ProbeError> {
        let url = format!("{}/probe", self.url);
        trace!("probing via {url}");

        let mut request = self.client.post(&url).json(&ProbeRequest {
            instance_id: &instance.id,
            engine_version: instance.engine_version.to_string(),
            query,
        });

        if let Some(token) = &self.token {
            request = request.header("X-MONITORING-SECRET", token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout
            } else {
                ProbeError::Unreachable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(ProbeError::Rejected(format!("HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::InvalidResponse(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| ProbeError::InvalidResponse(e.to_string()))
    }
}
