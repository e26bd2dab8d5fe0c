use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::host::{Host, HostState};
use crate::collation::CollectionStream;
use crate::config::{HostConfig, ServerConfig};
use crate::error::{AgentError, AgentResult};
use crate::protocol::{ActiveChecksRequest, ServerResponse, SubmissionAck};
use crate::schedule::{PassiveScheduler, ScheduleBucket};
use crate::transport::Connector;

/// Running totals of submissions to one server
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmissionStats {
    pub rounds: u64,
    pub failed_rounds: u64,
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    pub last_ack: Option<SubmissionAck>,
    pub last_error: Option<String>,
    pub last_submission: Option<DateTime<Utc>>,
}

impl SubmissionStats {
    fn record_ack(&mut self, ack: Option<SubmissionAck>, at: DateTime<Utc>) {
        self.rounds += 1;
        self.last_submission = Some(at);
        if let Some(ack) = ack {
            self.processed += ack.processed;
            self.failed += ack.failed;
            self.total += ack.total;
            self.last_ack = Some(ack);
        }
    }

    fn record_error(&mut self, err: &AgentError, at: DateTime<Utc>) {
        self.rounds += 1;
        self.failed_rounds += 1;
        self.last_submission = Some(at);
        self.last_error = Some(err.to_string());
    }
}

/// A monitoring server and the hosts this agent reports to it
pub struct Server {
    address: String,
    port: u16,
    id: String,

    /// Inherited by hosts without their own refresh period
    refresh_period: u64,
    hosts: RwLock<BTreeMap<String, Arc<Host>>>,

    /// Host names by delay; reports this server into the root bucket
    bucket: Arc<ScheduleBucket<String>>,
    stats: Mutex<SubmissionStats>,
}

impl Server {
    pub fn new(config: &ServerConfig, root: Arc<ScheduleBucket<String>>) -> AgentResult<Self> {
        config.validate()?;

        let id = config.id();
        let listener = PassiveScheduler::new(root, id.clone());
        let server = Self {
            address: config.address.clone(),
            port: config.port,
            id: id.clone(),
            refresh_period: config.refresh_period,
            hosts: RwLock::new(BTreeMap::new()),
            bucket: Arc::new(ScheduleBucket::new(format!("server:{id}"), Box::new(listener))),
            stats: Mutex::new(SubmissionStats::default()),
        };

        for host in &config.hosts {
            server.add_host(host)?;
        }
        Ok(server)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn refresh_period(&self) -> u64 {
        self.refresh_period
    }

    pub fn bucket(&self) -> &ScheduleBucket<String> {
        &self.bucket
    }

    pub fn add_host(&self, config: &HostConfig) -> AgentResult<Arc<Host>> {
        let mut hosts = self.hosts.write();
        if hosts.contains_key(&config.name) {
            return Err(AgentError::InvalidConfig(format!(
                "host '{}' already registered on {}",
                config.name, self.id
            )));
        }

        let host = Arc::new(Host::new(config, self.refresh_period, self.bucket.clone())?);
        hosts.insert(config.name.clone(), host.clone());
        debug!(server = %self.id, host = %config.name, "registered host");
        Ok(host)
    }

    /// Unregister a host and withdraw all of its delays
    pub fn remove_host(&self, name: &str) -> Option<Arc<Host>> {
        let host = self.hosts.write().remove(name)?;
        host.withdraw();
        info!(server = %self.id, host = name, "removed host");
        Some(host)
    }

    pub fn host(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts.read().get(name).cloned()
    }

    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.read().values().cloned().collect()
    }

    /// Hosts with at least one check due at `delay`
    pub fn hosts_at(&self, delay: u64) -> Vec<Arc<Host>> {
        let hosts = self.hosts.read();
        self.bucket
            .get(delay)
            .iter()
            .filter_map(|name| hosts.get(name).cloned())
            .collect()
    }

    pub fn hosts_requiring_refresh(&self, now: DateTime<Utc>) -> Vec<Arc<Host>> {
        self.hosts()
            .into_iter()
            .filter(|host| host.requires_refresh(now))
            .collect()
    }

    /// Fetch and apply marching orders for `host`
    ///
    /// Failures never propagate: they are logged and reflected in the host
    /// state so the next sweep can retry. Returns `None` when the host was
    /// removed while the request was in flight.
    #[instrument(skip_all, fields(server = %self.id, host = %host.name()))]
    pub async fn refresh_host(&self, host: &Host, connector: &Connector) -> Option<HostState> {
        let outcome = self.fetch_marching_orders(host.name(), connector).await;
        let now = Utc::now();

        let state = match outcome {
            Ok(orders) => {
                host.upsert_marching_orders(&orders, now);
                HostState::Active
            }
            Err(e) => {
                let state = host.mark_refresh_failed(&e, now);
                match state {
                    HostState::NoHostDef => warn!("server does not know this host: {e}"),
                    _ => error!("failed to refresh marching orders: {e}"),
                }
                state
            }
        };

        (!host.is_withdrawn()).then_some(state)
    }

    async fn fetch_marching_orders(
        &self,
        host: &str,
        connector: &Connector,
    ) -> AgentResult<Vec<crate::protocol::ActiveCheck>> {
        let request = serde_json::to_vec(&ActiveChecksRequest::new(host))?;
        let reply = connector.request(&self.address, self.port, &request).await?;
        ServerResponse::parse(&reply)?.into_marching_orders(host)
    }

    /// Send a finalized stream and interpret the acknowledgement
    ///
    /// An unparseable `info` is tolerated and yields `Ok(None)`.
    #[instrument(skip_all, fields(server = %self.id, results = stream.result_count()))]
    pub async fn submit(
        &self,
        stream: &CollectionStream,
        connector: &Connector,
    ) -> AgentResult<Option<SubmissionAck>> {
        let outcome = self.exchange_submission(stream, connector).await;
        let now = Utc::now();

        match &outcome {
            Ok(ack) => {
                if let Some(ack) = ack {
                    info!(
                        processed = ack.processed,
                        failed = ack.failed,
                        total = ack.total,
                        "submission acknowledged"
                    );
                }
                self.stats.lock().record_ack(*ack, now);
            }
            Err(e) => {
                error!("submission failed: {e}");
                self.stats.lock().record_error(e, now);
            }
        }
        outcome
    }

    async fn exchange_submission(
        &self,
        stream: &CollectionStream,
        connector: &Connector,
    ) -> AgentResult<Option<SubmissionAck>> {
        let reply = connector.submit(&self.address, self.port, stream).await?;
        let response = ServerResponse::parse(&reply)?;
        let info = response.info.clone().unwrap_or_default();

        if !response.is_success() {
            return Err(AgentError::Rejected(if info.is_empty() {
                response.response
            } else {
                info
            }));
        }

        let ack = SubmissionAck::parse(&info);
        if ack.is_none() {
            warn!(info = %info, "could not parse submission acknowledgement");
        }
        Ok(ack)
    }

    pub fn stats(&self) -> SubmissionStats {
        self.stats.lock().clone()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("refresh_period", &self.refresh_period)
            .field("hosts", &self.hosts.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
