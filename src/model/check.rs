use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::ActiveCheck;

/// A single monitored item, identified by its key within the owning host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub key: String,

    /// Polling interval in seconds
    pub delay: u64,

    pub last_value: Option<String>,

    pub last_check_time: Option<DateTime<Utc>>,

    /// Log position bookkeeping echoed from the marching orders
    pub lastlogsize: u64,
    pub mtime: u64,
}

impl Check {
    pub fn new(key: impl Into<String>, delay: u64) -> Self {
        Self {
            key: key.into(),
            delay,
            last_value: None,
            last_check_time: None,
            lastlogsize: 0,
            mtime: 0,
        }
    }

    pub fn record(&mut self, value: String, at: DateTime<Utc>) {
        self.last_value = Some(value);
        self.last_check_time = Some(at);
    }
}

impl From<&ActiveCheck> for Check {
    fn from(active: &ActiveCheck) -> Self {
        Self {
            key: active.key.clone(),
            delay: active.delay,
            last_value: None,
            last_check_time: None,
            lastlogsize: active.lastlogsize,
            mtime: active.mtime,
        }
    }
}
