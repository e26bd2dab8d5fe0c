//! JSON message types exchanged with the monitoring server

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AgentError, AgentResult};

/// Request for the marching orders of one host
#[derive(Debug, Clone, Serialize)]
pub struct ActiveChecksRequest<'a> {
    pub request: &'static str,
    pub host: &'a str,
}

impl<'a> ActiveChecksRequest<'a> {
    pub fn new(host: &'a str) -> Self {
        Self {
            request: "active checks",
            host,
        }
    }
}

/// One entry of a marching-orders reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCheck {
    pub key: String,

    /// Polling interval in seconds
    #[serde(deserialize_with = "number_or_string")]
    pub delay: u64,

    #[serde(default)]
    pub lastlogsize: u64,

    #[serde(default)]
    pub mtime: u64,
}

impl ActiveCheck {
    pub fn new(key: impl Into<String>, delay: u64) -> Self {
        Self {
            key: key.into(),
            delay,
            lastlogsize: 0,
            mtime: 0,
        }
    }
}

// Servers send delays either as numbers or as numeric strings
fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Generic server reply
///
/// Marching-orders replies carry `data`; submission acknowledgements carry
/// `info`. Failures carry `info` with the reason.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerResponse {
    pub response: String,

    #[serde(default)]
    pub info: Option<String>,

    #[serde(default)]
    pub data: Option<Vec<ActiveCheck>>,
}

static UNKNOWN_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)host \[?.*?\]? not (found|monitored)|no active checks on server")
        .expect("valid unknown-host pattern")
});

impl ServerResponse {
    pub fn parse(payload: &[u8]) -> AgentResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn is_success(&self) -> bool {
        self.response == "success"
    }

    /// Interpret the reply to an `active checks` request for `host`
    pub fn into_marching_orders(self, host: &str) -> AgentResult<Vec<ActiveCheck>> {
        if self.is_success() {
            return Ok(self.data.unwrap_or_default());
        }

        let info = self.info.unwrap_or_else(|| self.response.clone());
        if UNKNOWN_HOST.is_match(&info) {
            Err(AgentError::UnknownHost(host.to_string()))
        } else {
            Err(AgentError::Rejected(info))
        }
    }
}

/// Parsed `info` of a submission acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SubmissionAck {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    pub seconds: f64,
}

static ACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*processed:?\s*(\d+);?\s*failed:?\s*(\d+);?\s*total:?\s*(\d+);?\s*seconds spent:?\s*(\d+(?:\.\d+)?)\s*$",
    )
    .expect("valid acknowledgement pattern")
});

impl SubmissionAck {
    /// Parse `Processed <p> Failed <f> Total <t> Seconds spent <s>`
    ///
    /// Also accepts the `processed: 1; failed: 0; ...` spelling. Returns `None`
    /// for anything else.
    pub fn parse(info: &str) -> Option<Self> {
        let captures = ACK.captures(info)?;
        Some(Self {
            processed: captures[1].parse().ok()?,
            failed: captures[2].parse().ok()?,
            total: captures[3].parse().ok()?,
            seconds: captures[4].parse().ok()?,
        })
    }
}

/// One submitted check result
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord<'a> {
    pub host: &'a str,
    pub key: &'a str,
    pub value: &'a str,

    /// `1` marks the value as an error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<u8>,

    pub clock: i64,
}

impl<'a> ResultRecord<'a> {
    pub fn success(host: &'a str, key: &'a str, value: &'a str, clock: i64) -> Self {
        Self {
            host,
            key,
            value,
            state: None,
            clock,
        }
    }

    pub fn error(host: &'a str, key: &'a str, message: &'a str, clock: i64) -> Self {
        Self {
            host,
            key,
            value: message,
            state: Some(1),
            clock,
        }
    }

    /// Encoded record followed by the array separator
    pub fn to_record_text(&self) -> AgentResult<String> {
        let mut text = serde_json::to_string(self)?;
        text.push(',');
        Ok(text)
    }
}

/// Render a low-level discovery value: `{"data":[...]}`
pub fn discovery_value<T: Serialize>(records: &[T]) -> AgentResult<String> {
    Ok(serde_json::to_string(&serde_json::json!({ "data": records }))?)
}
