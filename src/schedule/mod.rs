//! Delay-bucketed scheduling
//!
//! The same [`ScheduleBucket`] type is used at host, server and agent level.
//! What differs is the listener each level is constructed with:
//!
//! - host and server buckets use a [`PassiveScheduler`] that reports the
//!   owning host/server into the bucket one level up;
//! - the agent's root bucket uses the [`ActiveScheduler`], the only place
//!   where real timers are created and cancelled.
//!
//! A delay timer therefore exists exactly while some check, anywhere in the
//! hierarchy, is due at that delay.

pub mod active;
pub mod bucket;
pub mod passive;

pub use active::ActiveScheduler;
pub use bucket::{ScheduleBucket, ScheduleListener};
pub use passive::PassiveScheduler;
