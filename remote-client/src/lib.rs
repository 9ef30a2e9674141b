//! Resilient remote-client wrapper
//!
//! Wraps a lazily-connected client to a remote service and retries calls that
//! fail at the connection level, either against one fixed endpoint or across a
//! shuffled pool of candidate endpoints.
//!
//! The crate is split into:
//! - `client`: the `RemoteClient` wrapper and the `Connector` seam
//! - `endpoint`: `host:port` endpoints and the endpoint pool
//! - `error`: the error type shared by every transport implementation
//! - `metrics`: call and retry counters

pub mod client;
pub mod endpoint;
pub mod error;
pub mod metrics;

pub use client::{Connector, FnConnector, RemoteClient, RetryPolicy, Target};
pub use endpoint::{Endpoint, EndpointPool};
pub use error::{RemoteError, Result};
