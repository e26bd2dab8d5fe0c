pub mod actors;
pub mod collation;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod plan;
pub mod protocol;
pub mod schedule;
pub mod system;
pub mod transport;
pub mod util;

pub use error::{AgentError, AgentResult};
