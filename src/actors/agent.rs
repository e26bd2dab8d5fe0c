//! AgentActor - drives refresh sweeps and delay dispatches
//!
//! ## Message Flow
//!
//! ```text
//! Sweep tick  → refresh hosts requiring it → upsert marching orders → buckets/timers
//! Delay tick  → dispatch(delay) → plan → units on worker pool → stream → submit
//!     ↑
//!     └─── Commands (RefreshNow, DispatchNow, SetThreadPolicy, SetCollation, GetStats, Shutdown)
//! ```
//!
//! Sweeps and dispatches run as spawned tasks so a slow server never stalls
//! the loop. At most one sweep is in flight at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use super::messages::{AgentCommand, AgentStats, DelayTick};
use crate::config::{CollationMode, ThreadPolicy};
use crate::model::{Agent, DispatchReport, RefreshSummary};

pub struct AgentActor {
    agent: Arc<Agent>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<AgentCommand>,

    /// Ticks from the delay timers armed by the root bucket
    tick_rx: mpsc::UnboundedReceiver<DelayTick>,

    sweep_period: Duration,

    /// Set while a sweep task is running
    sweeping: Arc<AtomicBool>,
}

impl AgentActor {
    pub fn new(
        agent: Arc<Agent>,
        command_rx: mpsc::Receiver<AgentCommand>,
        tick_rx: mpsc::UnboundedReceiver<DelayTick>,
    ) -> Self {
        let sweep_period = Duration::from_secs(agent.refresh_sweep());
        Self {
            agent,
            command_rx,
            tick_rx,
            sweep_period,
            sweeping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the actor's main loop
    ///
    /// The first sweep fires immediately so hosts get their marching orders at
    /// startup. Runs until a Shutdown command arrives or every channel closes.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting agent actor");

        let mut sweep = interval(self.sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sweep.tick() => self.spawn_sweep(),

                Some(DelayTick { delay }) = self.tick_rx.recv() => {
                    trace!(delay, "delay tick");
                    self.spawn_dispatch(delay, None);
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AgentCommand::RefreshNow { respond_to } => {
                            debug!("received RefreshNow command");
                            let agent = self.agent.clone();
                            tokio::spawn(async move {
                                let _ = respond_to.send(agent.refresh().await);
                            });
                        }

                        AgentCommand::DispatchNow { delay, respond_to } => {
                            debug!(delay, "received DispatchNow command");
                            self.spawn_dispatch(delay, Some(respond_to));
                        }

                        AgentCommand::SetThreadPolicy { policy } => {
                            self.agent.set_thread_policy(policy);
                        }

                        AgentCommand::SetCollation { mode } => {
                            self.agent.set_collation(mode);
                        }

                        AgentCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.agent.stats());
                        }

                        AgentCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("all channels closed, shutting down");
                    break;
                }
            }
        }

        debug!("agent actor stopped");
    }

    fn spawn_sweep(&self) {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            trace!("previous refresh sweep still running, skipping");
            return;
        }

        let agent = self.agent.clone();
        let sweeping = self.sweeping.clone();
        tokio::spawn(async move {
            agent.refresh().await;
            sweeping.store(false, Ordering::Release);
        });
    }

    fn spawn_dispatch(&self, delay: u64, respond_to: Option<oneshot::Sender<Vec<DispatchReport>>>) {
        let agent = self.agent.clone();
        tokio::spawn(async move {
            let reports = agent.dispatch(delay).await;
            if let Some(tx) = respond_to {
                let _ = tx.send(reports);
            }
        });
    }
}

/// Handle for controlling an AgentActor
///
/// Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct AgentHandle {
    sender: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    /// Spawn the actor for `agent`, consuming the tick receiver returned by
    /// [`Agent::new`]
    pub fn spawn(agent: Arc<Agent>, tick_rx: mpsc::UnboundedReceiver<DelayTick>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = AgentActor::new(agent, cmd_rx, tick_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn refresh_now(&self) -> Result<RefreshSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::RefreshNow { respond_to: tx })
            .await
            .context("failed to send RefreshNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn dispatch_now(&self, delay: u64) -> Result<Vec<DispatchReport>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::DispatchNow {
                delay,
                respond_to: tx,
            })
            .await
            .context("failed to send DispatchNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn set_thread_policy(&self, policy: ThreadPolicy) -> Result<()> {
        self.sender
            .send(AgentCommand::SetThreadPolicy { policy })
            .await
            .context("failed to send SetThreadPolicy command")?;
        Ok(())
    }

    pub async fn set_collation(&self, mode: CollationMode) -> Result<()> {
        self.sender
            .send(AgentCommand::SetCollation { mode })
            .await
            .context("failed to send SetCollation command")?;
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<AgentStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AgentCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(AgentCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
