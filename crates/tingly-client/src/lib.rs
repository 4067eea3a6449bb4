//! Shared upstream HTTP machinery: a transport pool keyed by
//! (base URL, proxy, auth style) and per-provider client handles with
//! credential injection.

pub mod pool;
pub mod transport;

use std::time::Duration;

pub use pool::{AuthHook, ClientPool, UpstreamBody, UpstreamClient, UpstreamResponse};
pub use transport::{transport_key, TransportPool};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http client build failed: {0}")]
    Build(String),
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    #[error("client pool lock poisoned")]
    Poisoned,
}
