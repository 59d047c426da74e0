//! In-flight request coalescion.
//!
//! Concurrent calls that derive the same key share a single run of the underlying
//! operation and all observe its outcome. Outcomes are dropped as soon as the
//! operation settles, the next call with that key runs the operation again.

mod coalesced;
mod config;
mod error;
mod key;
mod service;

pub use coalesced::{wrap, Coalesced};
pub use config::CoalescionServiceConfig;
pub use error::Error;
pub use key::{content_hash_key, joined_key, DeriveFn, KeyStrategy, ANONYMOUS};
pub use service::{CoalescionService, OperationHandle};
