//! WES Error Handling Library
//!
//! Error types shared across the data sharing service. The taxonomy follows
//! the service's recovery policy: data-plane errors are resolved locally by
//! rejecting the offending delivery and counting it, transport faults tear
//! the broker connection down for the supervisor to rebuild, and a dead pod
//! watcher is fatal.

pub mod types;

pub use types::*;

// Re-export external dependencies
pub use anyhow::{anyhow, Context, Result as AnyhowResult};
pub use thiserror::Error;
