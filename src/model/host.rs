//! Host: a set of checks plus the marching-orders refresh state machine
//!
//! ```text
//!            ┌───────────── success ─────────────┐
//!            │                                   ▼
//!  INIT ─────┼──── transport/parse failure ──► MO_FAILED ──┐
//!            │                                              │ success
//!            └──── host unknown to server ──► NO_HOST_DEF ──┤
//!                                                           ▼
//!  STALE ◄── refresh period elapsed ── ACTIVE ◄─────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use super::check::Check;
use crate::collation::CollectionStream;
use crate::config::HostConfig;
use crate::error::{AgentError, AgentResult};
use crate::executor::CheckExecutor;
use crate::protocol::{ActiveCheck, ResultRecord};
use crate::schedule::{PassiveScheduler, ScheduleBucket};
use crate::util::seconds_between;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    /// Never refreshed
    Init,

    /// Marching orders are current
    Active,

    /// Last refresh failed (transport, parse or rejection)
    MoFailed,

    /// The server does not know this host
    NoHostDef,

    /// Marching orders are older than the refresh period
    Stale,
}

impl HostState {
    /// Every state but `Active` wants new marching orders
    pub fn requires_update(&self) -> bool {
        !matches!(self, HostState::Active)
    }
}

#[derive(Debug)]
struct RefreshState {
    state: HostState,
    last_refresh: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    removed: BTreeSet<String>,
}

/// Outcome of applying one set of marching orders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Counts for one execution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub executed: usize,
    pub failed: usize,
}

impl ExecutionSummary {
    pub fn merge(&mut self, other: ExecutionSummary) {
        self.executed += other.executed;
        self.failed += other.failed;
    }
}

pub struct Host {
    name: String,
    refresh_period: u64,
    checks: RwLock<BTreeMap<String, Check>>,
    refresh: Mutex<RefreshState>,

    /// Set by `withdraw()` under the checks write lock
    withdrawn: AtomicBool,

    /// Check keys by delay; reports this host into the server bucket
    bucket: ScheduleBucket<String>,
}

impl Host {
    /// `inherited_period` applies unless the host sets its own refresh period
    pub fn new(
        config: &HostConfig,
        inherited_period: u64,
        server_bucket: Arc<ScheduleBucket<String>>,
    ) -> AgentResult<Self> {
        config.validate()?;

        let listener = PassiveScheduler::new(server_bucket, config.name.clone());
        Ok(Self {
            name: config.name.clone(),
            refresh_period: config.refresh_period_or(inherited_period),
            checks: RwLock::new(BTreeMap::new()),
            refresh: Mutex::new(RefreshState {
                state: HostState::Init,
                last_refresh: None,
                last_attempt: None,
                removed: BTreeSet::new(),
            }),
            withdrawn: AtomicBool::new(false),
            bucket: ScheduleBucket::new(format!("host:{}", config.name), Box::new(listener)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn refresh_period(&self) -> u64 {
        self.refresh_period
    }

    pub fn bucket(&self) -> &ScheduleBucket<String> {
        &self.bucket
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.refresh.lock().last_refresh
    }

    /// Current state, moving `Active` to `Stale` once the refresh period is over
    pub fn state(&self, now: DateTime<Utc>) -> HostState {
        let mut refresh = self.refresh.lock();
        if refresh.state == HostState::Active
            && let Some(last) = refresh.last_refresh
            && seconds_between(last, now) >= self.refresh_period
        {
            trace!(host = %self.name, "marching orders went stale");
            refresh.state = HostState::Stale;
        }
        refresh.state
    }

    /// Whether this host is due for a marching-orders refresh at `now`
    ///
    /// `NO_HOST_DEF` hosts are only retried once a full refresh period has
    /// passed since the previous attempt; every other non-active state is
    /// retried on the next sweep.
    pub fn requires_refresh(&self, now: DateTime<Utc>) -> bool {
        let state = self.state(now);
        let refresh = self.refresh.lock();

        if state == HostState::NoHostDef {
            return refresh
                .last_attempt
                .is_none_or(|last| seconds_between(last, now) >= self.refresh_period);
        }

        state.requires_update()
            || refresh
                .last_refresh
                .is_none_or(|last| seconds_between(last, now) >= self.refresh_period)
    }

    /// Reconcile the local checks with the authoritative list from the server
    ///
    /// New checks are added, changed delays migrate between buckets and absent
    /// checks are dropped. The whole reconciliation happens under the checks
    /// lock, so executions never see a half-applied list. Orders arriving
    /// after `withdraw()` are dropped without touching any bucket.
    #[instrument(skip_all, fields(host = %self.name))]
    pub fn upsert_marching_orders(&self, orders: &[ActiveCheck], now: DateTime<Utc>) -> UpsertSummary {
        let mut summary = UpsertSummary::default();
        let mut checks = self.checks.write();

        if self.withdrawn.load(Ordering::Acquire) {
            debug!(orders = orders.len(), "host was withdrawn, dropping marching orders");
            return summary;
        }

        let mut wanted = BTreeSet::new();
        for order in orders {
            if order.delay == 0 {
                warn!(key = %order.key, "ignoring check with zero delay");
                continue;
            }
            wanted.insert(order.key.as_str());

            match checks.get_mut(&order.key) {
                Some(check) => {
                    if check.delay != order.delay {
                        debug!(key = %order.key, from = check.delay, to = order.delay, "check delay changed");
                        self.bucket.move_item(check.delay, order.delay, order.key.clone());
                        check.delay = order.delay;
                        summary.updated += 1;
                    }
                    check.lastlogsize = order.lastlogsize;
                    check.mtime = order.mtime;
                }
                None => {
                    self.bucket.add_item(order.delay, order.key.clone());
                    checks.insert(order.key.clone(), Check::from(order));
                    summary.added += 1;
                }
            }
        }

        let stale: Vec<String> = checks
            .keys()
            .filter(|key| !wanted.contains(key.as_str()))
            .cloned()
            .collect();

        for key in &stale {
            if let Some(check) = checks.remove(key) {
                self.bucket.remove_item(check.delay, key);
            }
        }
        summary.removed = stale.len();
        drop(checks);

        let mut refresh = self.refresh.lock();
        refresh.state = HostState::Active;
        refresh.last_refresh = Some(now);
        refresh.last_attempt = Some(now);
        refresh.removed = stale.into_iter().collect();

        info!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            "applied marching orders"
        );
        summary
    }

    /// Record a failed refresh attempt
    pub fn mark_refresh_failed(&self, err: &AgentError, now: DateTime<Utc>) -> HostState {
        let mut refresh = self.refresh.lock();
        refresh.last_attempt = Some(now);
        refresh.state = match err {
            AgentError::UnknownHost(_) => HostState::NoHostDef,
            _ => HostState::MoFailed,
        };
        refresh.state
    }

    /// Keys dropped by the most recent successful refresh
    pub fn removed_since_last_refresh(&self) -> BTreeSet<String> {
        self.refresh.lock().removed.clone()
    }

    pub fn check(&self, key: &str) -> Option<Check> {
        self.checks.read().get(key).cloned()
    }

    pub fn checks(&self) -> Vec<Check> {
        self.checks.read().values().cloned().collect()
    }

    /// Snapshot of the checks due at `delay`
    pub fn checks_at(&self, delay: u64) -> Vec<Check> {
        let checks = self.checks.read();
        self.bucket
            .get(delay)
            .iter()
            .filter_map(|key| checks.get(key).cloned())
            .collect()
    }

    pub fn delays(&self) -> Vec<u64> {
        self.bucket.keys()
    }

    /// Whether `withdraw()` has run; a withdrawn host never schedules again
    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn.load(Ordering::Acquire)
    }

    /// Drop every check, withdrawing this host from all delays for good
    pub fn withdraw(&self) {
        let mut checks = self.checks.write();
        self.withdrawn.store(true, Ordering::Release);
        for (key, check) in std::mem::take(&mut *checks) {
            self.bucket.remove_item(check.delay, &key);
        }
    }

    /// Execute all checks (or only those due at `delay`) into `stream`
    ///
    /// A failing check produces an error-marked record and never stops the
    /// pass. Only stream failures are returned as errors.
    #[instrument(skip(self, executor, stream), fields(host = %self.name))]
    pub async fn execute_checks(
        &self,
        delay: Option<u64>,
        executor: &dyn CheckExecutor,
        stream: &CollectionStream,
    ) -> AgentResult<ExecutionSummary> {
        let due = match delay {
            Some(delay) => self.checks_at(delay),
            None => self.checks(),
        };

        let mut summary = ExecutionSummary::default();
        for check in &due {
            if !self.execute_one(check, executor, stream).await? {
                summary.failed += 1;
            }
            summary.executed += 1;
        }

        trace!(executed = summary.executed, failed = summary.failed, "executed checks");
        Ok(summary)
    }

    /// Execute a single check by key. Returns `Ok(None)` if the check is gone.
    pub async fn execute_check(
        &self,
        key: &str,
        executor: &dyn CheckExecutor,
        stream: &CollectionStream,
    ) -> AgentResult<Option<bool>> {
        let Some(check) = self.check(key) else {
            trace!(host = %self.name, key, "check removed before execution");
            return Ok(None);
        };
        self.execute_one(&check, executor, stream).await.map(Some)
    }

    /// Returns whether the check produced a value
    async fn execute_one(
        &self,
        check: &Check,
        executor: &dyn CheckExecutor,
        stream: &CollectionStream,
    ) -> AgentResult<bool> {
        let outcome = executor.execute(&self.name, check).await;
        let now = Utc::now();
        let clock = now.timestamp();

        let (text, succeeded) = match outcome {
            Ok(value) => {
                let text = ResultRecord::success(&self.name, &check.key, &value, clock).to_record_text();
                self.record_value(&check.key, value, now);
                (text, true)
            }
            Err(e) => {
                warn!(host = %self.name, key = %check.key, "check failed: {e:#}");
                let message = format!("{e:#}");
                let text = ResultRecord::error(&self.name, &check.key, &message, clock).to_record_text();
                (text, false)
            }
        };

        match text {
            Ok(text) => stream.add_result(&text)?,
            Err(e) => {
                warn!(host = %self.name, key = %check.key, "could not encode result: {e}");
                return Ok(false);
            }
        }
        Ok(succeeded)
    }

    /// Store the latest value; ignored if the check was removed meanwhile
    fn record_value(&self, key: &str, value: String, at: DateTime<Utc>) {
        if let Some(check) = self.checks.write().get_mut(key) {
            check.record(value, at);
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("refresh_period", &self.refresh_period)
            .field("checks", &self.checks.read().len())
            .field("refresh", &*self.refresh.lock())
            .finish()
    }
}
