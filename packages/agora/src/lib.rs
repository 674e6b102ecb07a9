mod aggregator;
mod cache;
mod common;
mod coordinator;
mod error;
mod gateway;
mod types;

pub use aggregator::Aggregator;
pub use cache::PollCache;
pub use common::init_logger;
pub use coordinator::Coordinator;
pub use error::{AgoraError, Result};
pub use gateway::*;
pub use types::*;

pub(crate) use jiff::Timestamp;
pub(crate) use std::sync::Arc;
