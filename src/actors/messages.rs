//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: request/response messages sent to the agent actor via mpsc
//! 2. **Ticks**: fire-and-forget notifications from the delay timers
//! 3. **Snapshots**: stats are returned by value, never as shared references

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::{CollationMode, ThreadPolicy};
use crate::model::{DispatchReport, RefreshSummary, SubmissionStats};

/// Emitted by a delay timer each time its period elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayTick {
    pub delay: u64,
}

/// Commands that can be sent to the AgentActor
#[derive(Debug)]
pub enum AgentCommand {
    /// Run a marching-orders refresh sweep immediately
    RefreshNow {
        respond_to: oneshot::Sender<RefreshSummary>,
    },

    /// Dispatch a delay immediately, bypassing its timer
    ///
    /// Used for testing and manual collection rounds.
    DispatchNow {
        delay: u64,
        respond_to: oneshot::Sender<Vec<DispatchReport>>,
    },

    /// Switch the execution-plan policy; applies from the next dispatch
    SetThreadPolicy { policy: ThreadPolicy },

    /// Switch the collation mode; applies from the next dispatch
    SetCollation { mode: CollationMode },

    /// Get agent statistics
    GetStats {
        respond_to: oneshot::Sender<AgentStats>,
    },

    /// Gracefully shut down the agent actor
    ///
    /// In-flight dispatches are allowed to finish on the worker pool.
    Shutdown,
}

/// Agent statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStats {
    pub servers: usize,
    pub hosts: usize,

    /// Delays that currently own a timer
    pub armed_delays: Vec<u64>,

    pub thread_policy: ThreadPolicy,
    pub collation: CollationMode,

    /// Submission bookkeeping keyed by server id
    pub submissions: BTreeMap<String, SubmissionStats>,
}
