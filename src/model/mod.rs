//! Agent → Server → Host → Check hierarchy
//!
//! Each level owns a [`ScheduleBucket`](crate::schedule::ScheduleBucket) of
//! its children keyed by delay. Host and server buckets are passive and report
//! their own presence one level up; the agent's root bucket arms the timers.

pub mod agent;
pub mod check;
pub mod host;
pub mod server;

pub use agent::{Agent, AgentRuntime, DispatchReport, RefreshSummary};
pub use check::Check;
pub use host::{ExecutionSummary, Host, HostState, UpsertSummary};
pub use server::{Server, SubmissionStats};
