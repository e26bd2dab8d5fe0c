use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};

use super::host::{ExecutionSummary, HostState};
use super::server::{Server, SubmissionStats};
use crate::actors::messages::{AgentStats, DelayTick};
use crate::collation::{disk::sweep_stale, open_stream};
use crate::config::{AgentConfig, CollationMode, Config, ServerConfig, ThreadPolicy};
use crate::error::{AgentError, AgentResult};
use crate::executor::CheckExecutor;
use crate::protocol::SubmissionAck;
use crate::schedule::{ActiveScheduler, ScheduleBucket};
use crate::transport::Connector;

/// The two injected pools: delay timers run on `scheduler`, units of work on
/// `workers`. Both may point at the same runtime.
#[derive(Debug, Clone)]
pub struct AgentRuntime {
    pub scheduler: Handle,
    pub workers: Handle,
}

impl AgentRuntime {
    /// Use the runtime of the calling task for both pools
    pub fn current() -> Self {
        let handle = Handle::current();
        Self {
            scheduler: handle.clone(),
            workers: handle,
        }
    }
}

/// Mutable runtime settings
#[derive(Debug, Clone)]
struct Settings {
    thread_policy: ThreadPolicy,
    collation: CollationMode,
    collation_dir: Option<PathBuf>,
}

/// Outcome of one refresh sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub attempted: usize,
    pub active: usize,
    pub failed: usize,
    pub unknown: usize,

    /// Hosts removed while their refresh was in flight
    pub withdrawn: usize,
}

/// Outcome of one dispatch round for one server
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub server: String,
    pub delay: u64,
    pub units: usize,
    pub execution: ExecutionSummary,
    pub submitted: u64,
    pub ack: Option<SubmissionAck>,
}

/// The agent context: all servers, the root bucket and the runtime settings
///
/// One `Agent` is constructed per process and passed explicitly to whatever
/// needs it.
pub struct Agent {
    servers: RwLock<BTreeMap<String, Arc<Server>>>,

    /// Server ids by delay; the only bucket that owns real timers
    root: Arc<ScheduleBucket<String>>,
    scheduler: Arc<ActiveScheduler>,

    settings: RwLock<Settings>,
    executor: Arc<dyn CheckExecutor>,
    connector: Connector,
    workers: Handle,
    refresh_sweep: u64,
}

impl Agent {
    /// Build the agent and every configured server/host
    ///
    /// Returns the receiving end of the delay timers; whoever drives dispatch
    /// (normally the agent actor) must poll it.
    pub fn new(
        config: &Config,
        executor: Arc<dyn CheckExecutor>,
        runtime: AgentRuntime,
    ) -> AgentResult<(Arc<Self>, mpsc::UnboundedReceiver<DelayTick>)> {
        config.validate()?;

        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(ActiveScheduler::new(runtime.scheduler, tick_tx));
        let root = Arc::new(ScheduleBucket::new("root", Box::new(scheduler.clone())));

        let AgentConfig {
            thread_policy,
            collation,
            collation_dir,
            refresh_sweep,
            timeout,
        } = config.agent.clone();

        if let Some(dir) = &collation_dir {
            match sweep_stale(dir) {
                Ok(0) => {}
                Ok(removed) => info!(dir = %dir.display(), removed, "removed stale collation files"),
                Err(e) => warn!("could not sweep collation dir {}: {e}", dir.display()),
            }
        }

        let agent = Arc::new(Self {
            servers: RwLock::new(BTreeMap::new()),
            root,
            scheduler,
            settings: RwLock::new(Settings {
                thread_policy,
                collation,
                collation_dir,
            }),
            executor,
            connector: Connector::from_secs(timeout),
            workers: runtime.workers,
            refresh_sweep,
        });

        for server in &config.servers {
            agent.add_server(server)?;
        }

        info!(
            servers = config.servers.len(),
            policy = ?thread_policy,
            collation = ?collation,
            "agent initialized"
        );
        Ok((agent, tick_rx))
    }

    pub fn add_server(&self, config: &ServerConfig) -> AgentResult<Arc<Server>> {
        let id = config.id();
        let mut servers = self.servers.write();
        if servers.contains_key(&id) {
            return Err(AgentError::InvalidConfig(format!("server {id} already registered")));
        }

        let server = Arc::new(Server::new(config, self.root.clone())?);
        servers.insert(id.clone(), server.clone());
        debug!(server = %id, "registered server");
        Ok(server)
    }

    /// Unregister a server, withdrawing every delay its hosts held
    pub fn remove_server(&self, id: &str) -> Option<Arc<Server>> {
        let server = self.servers.write().remove(id)?;
        for host in server.hosts() {
            server.remove_host(host.name());
        }
        self.root.remove_everywhere(&id.to_string());
        info!(server = id, "removed server");
        Some(server)
    }

    pub fn server(&self, id: &str) -> Option<Arc<Server>> {
        self.servers.read().get(id).cloned()
    }

    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.read().values().cloned().collect()
    }

    pub fn root(&self) -> &ScheduleBucket<String> {
        &self.root
    }

    pub fn armed_delays(&self) -> Vec<u64> {
        self.scheduler.armed_delays()
    }

    pub fn refresh_sweep(&self) -> u64 {
        self.refresh_sweep
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn thread_policy(&self) -> ThreadPolicy {
        self.settings.read().thread_policy
    }

    pub fn set_thread_policy(&self, policy: ThreadPolicy) {
        self.settings.write().thread_policy = policy;
        info!(?policy, "thread policy changed");
    }

    pub fn collation(&self) -> CollationMode {
        self.settings.read().collation
    }

    pub fn set_collation(&self, mode: CollationMode) {
        self.settings.write().collation = mode;
        info!(?mode, "collation mode changed");
    }

    /// Refresh the marching orders of every host that needs it
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshSummary {
        let now = Utc::now();
        let due: Vec<_> = self
            .servers()
            .into_iter()
            .flat_map(|server| {
                server
                    .hosts_requiring_refresh(now)
                    .into_iter()
                    .map(move |host| (server.clone(), host))
            })
            .collect();

        if due.is_empty() {
            trace!("no host requires a refresh");
            return RefreshSummary::default();
        }

        let states = join_all(
            due.iter()
                .map(|(server, host)| server.refresh_host(host, &self.connector)),
        )
        .await;

        let mut summary = RefreshSummary {
            attempted: states.len(),
            ..Default::default()
        };
        for state in states {
            match state {
                Some(HostState::Active) => summary.active += 1,
                Some(HostState::NoHostDef) => summary.unknown += 1,
                Some(_) => summary.failed += 1,
                None => summary.withdrawn += 1,
            }
        }

        debug!(?summary, "refresh sweep finished");
        summary
    }

    /// Execute and submit everything due at `delay`, one stream per server
    #[instrument(skip(self))]
    pub async fn dispatch(&self, delay: u64) -> Vec<DispatchReport> {
        let servers: Vec<_> = {
            let servers = self.servers.read();
            self.root
                .get(delay)
                .iter()
                .filter_map(|id| servers.get(id).cloned())
                .collect()
        };

        let outcomes = join_all(servers.iter().map(|server| self.dispatch_server(server, delay))).await;

        outcomes
            .into_iter()
            .zip(&servers)
            .filter_map(|(outcome, server)| match outcome {
                Ok(report) => Some(report),
                Err(e) => {
                    error!(server = %server.id(), delay, "dispatch failed: {e}");
                    None
                }
            })
            .collect()
    }

    /// One collection round for one server: plan, execute, finalize, submit
    pub async fn dispatch_server(&self, server: &Arc<Server>, delay: u64) -> AgentResult<DispatchReport> {
        let settings = self.settings.read().clone();
        let mut report = DispatchReport {
            server: server.id().to_string(),
            delay,
            ..Default::default()
        };

        let stream = Arc::new(open_stream(settings.collation, settings.collation_dir.as_deref())?);
        stream.write_header()?;

        let plan = settings.thread_policy.create_plan(delay, server, &stream);
        report.units = plan.len();
        if plan.is_empty() {
            stream.close();
            return Ok(report);
        }

        let tasks = plan
            .into_iter()
            .map(|unit| self.workers.spawn(unit.run(self.executor.clone())));

        let mut stream_error = None;
        for joined in join_all(tasks).await {
            match joined {
                Ok(Ok(summary)) => report.execution.merge(summary),
                Ok(Err(e)) => {
                    warn!(server = %server.id(), delay, "unit of work failed: {e}");
                    stream_error.get_or_insert(e);
                }
                Err(e) => error!(server = %server.id(), delay, "unit of work panicked: {e}"),
            }
        }

        if let Some(e) = stream_error {
            stream.close();
            return Err(e);
        }

        report.submitted = stream.result_count();
        if report.submitted == 0 {
            trace!(server = %server.id(), delay, "no results, skipping submission");
            stream.close();
            return Ok(report);
        }

        stream.finalize(Utc::now().timestamp())?;
        let submission = server.submit(&stream, &self.connector).await;
        stream.close();
        report.ack = submission?;

        Ok(report)
    }

    pub fn stats(&self) -> AgentStats {
        let settings = self.settings.read().clone();
        let servers = self.servers();

        let submissions: BTreeMap<String, SubmissionStats> = servers
            .iter()
            .map(|server| (server.id().to_string(), server.stats()))
            .collect();

        AgentStats {
            servers: servers.len(),
            hosts: servers.iter().map(|s| s.hosts().len()).sum(),
            armed_delays: self.armed_delays(),
            thread_policy: settings.thread_policy,
            collation: settings.collation,
            submissions,
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("servers", &self.servers.read().keys().collect::<Vec<_>>())
            .field("root", &self.root)
            .field("settings", &*self.settings.read())
            .finish()
    }
}
