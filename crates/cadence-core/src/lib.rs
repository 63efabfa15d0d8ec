//! Shared building blocks for the cadence workspace: identifiers, layered
//! configuration and the top-level error type.

pub mod config;
pub mod error;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use types::{HostId, TaskId};
