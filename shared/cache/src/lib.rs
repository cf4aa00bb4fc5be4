//! WES Application Metadata Cache
//!
//! Producers register their metadata in a key-value store before they start
//! publishing; the handler reads it back by producer UID. Reads go through a
//! small in-process memoization layer so steady-state traffic does not hit
//! the store on every delivery.

pub mod app_meta;
pub mod errors;

pub use app_meta::{AppMeta, AppMetaCache};
pub use errors::{CacheError, CacheResult};
