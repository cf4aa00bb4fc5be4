//! WES Message Library
//!
//! The message envelope model shared by every component of the data sharing
//! service, together with the wire codec and the publish scope carried on
//! delivery routing keys.

pub mod codec;
pub mod envelope;
pub mod scope;

pub use codec::{decode, encode, CodecError};
pub use envelope::{Message, MetaMap, Value};
pub use scope::Scope;
