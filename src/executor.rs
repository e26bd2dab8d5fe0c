//! Check executor seam
//!
//! The core never computes check values itself. It hands each due check to a
//! [`CheckExecutor`] and turns the outcome into a result record: a value on
//! success, an error-marked record on failure.

use async_trait::async_trait;

use crate::model::Check;

#[async_trait]
pub trait CheckExecutor: Send + Sync {
    /// Obtain the current value of `check` on behalf of `host`
    async fn execute(&self, host: &str, check: &Check) -> anyhow::Result<String>;
}
