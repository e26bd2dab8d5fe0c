//! Actor-based control loop
//!
//! ## Architecture Overview
//!
//! ```text
//!   ┌────────────────┐  DelayTick   ┌──────────────┐  spawn   ┌──────────────┐
//!   │ ActiveScheduler├─────────────►│  AgentActor  ├─────────►│ worker pool  │
//!   │ (delay timers) │              │              │          │ (units of    │
//!   └───────▲────────┘              └──────▲───────┘          │  work)       │
//!           │ start/cancel                 │ commands         └──────┬───────┘
//!   ┌───────┴────────┐              ┌──────┴───────┐                 │
//!   │  root bucket   │              │ AgentHandle  │          stream + submit
//!   └────────────────┘              └──────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: the actor has an mpsc command channel for control messages
//! 2. **Ticks**: timers deliver `DelayTick` over an unbounded channel
//! 3. **Request/Response**: oneshot channels for queries

pub mod agent;
pub mod messages;

pub use agent::{AgentActor, AgentHandle};
