//! Execution plans: partitioning one dispatch into concurrent units of work

use std::sync::Arc;

use tracing::{debug, trace};

use crate::collation::CollectionStream;
use crate::config::ThreadPolicy;
use crate::error::AgentResult;
use crate::executor::CheckExecutor;
use crate::model::{ExecutionSummary, Host, Server};

/// What a single unit of work covers
#[derive(Debug, Clone)]
pub enum WorkScope {
    /// Every host of the server with checks at the delay
    Server(Arc<Server>),

    /// Every check of one host at the delay
    Host(Arc<Host>),

    /// One check
    Check { host: Arc<Host>, key: String },
}

/// A schedulable piece of a dispatch, writing into a shared stream
#[derive(Debug, Clone)]
pub struct WorkUnit {
    delay: u64,
    scope: WorkScope,
    stream: Arc<CollectionStream>,
}

impl WorkUnit {
    pub fn new(delay: u64, scope: WorkScope, stream: Arc<CollectionStream>) -> Self {
        Self {
            delay,
            scope,
            stream,
        }
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    pub fn scope(&self) -> &WorkScope {
        &self.scope
    }

    pub async fn run(self, executor: Arc<dyn CheckExecutor>) -> AgentResult<ExecutionSummary> {
        let executor = executor.as_ref();
        let stream = self.stream.as_ref();

        match &self.scope {
            WorkScope::Server(server) => {
                let mut summary = ExecutionSummary::default();
                for host in server.hosts_at(self.delay) {
                    summary.merge(host.execute_checks(Some(self.delay), executor, stream).await?);
                }
                Ok(summary)
            }
            WorkScope::Host(host) => host.execute_checks(Some(self.delay), executor, stream).await,
            WorkScope::Check { host, key } => {
                let summary = match host.execute_check(key, executor, stream).await? {
                    Some(true) => ExecutionSummary {
                        executed: 1,
                        failed: 0,
                    },
                    Some(false) => ExecutionSummary {
                        executed: 1,
                        failed: 1,
                    },
                    None => ExecutionSummary::default(),
                };
                Ok(summary)
            }
        }
    }
}

impl ThreadPolicy {
    /// Partition the work due at `delay` on `server`
    ///
    /// Yields one unit for `server`, one per due host for `host` and one per
    /// due check for `check`. Nothing due means no units.
    pub fn create_plan(
        &self,
        delay: u64,
        server: &Arc<Server>,
        stream: &Arc<CollectionStream>,
    ) -> Vec<WorkUnit> {
        let hosts = server.hosts_at(delay);
        let unit = |scope: WorkScope| WorkUnit::new(delay, scope, stream.clone());

        let plan: Vec<WorkUnit> = match self {
            ThreadPolicy::Server if hosts.is_empty() => Vec::new(),
            ThreadPolicy::Server => vec![unit(WorkScope::Server(server.clone()))],
            ThreadPolicy::Host => hosts.into_iter().map(|host| unit(WorkScope::Host(host))).collect(),
            ThreadPolicy::Check => hosts
                .into_iter()
                .flat_map(|host| {
                    host.checks_at(delay)
                        .into_iter()
                        .map(move |check| WorkScope::Check {
                            host: host.clone(),
                            key: check.key,
                        })
                })
                .map(unit)
                .collect(),
        };

        if plan.is_empty() {
            trace!(server = %server.id(), delay, "nothing due");
        } else {
            debug!(server = %server.id(), delay, policy = ?self, units = plan.len(), "created execution plan");
        }
        plan
    }
}
