//! Redis-protocol access to the key-value endpoints of the endpoint registry.
//!
//! A single async transport ([`RedisClient`]) serves both call sites: async
//! tasks use it directly, and [`BlockingRedisClient`] drives it on a private
//! runtime. Both share an [`InflightLimiter`] which bounds the requests each
//! endpoint has in flight.
use std::time::Duration;

mod blocking;
mod client;
mod clients;
mod limiter;
pub mod resp;

#[cfg(any(test, feature = "test-server"))]
pub mod fake;

pub use blocking::BlockingRedisClient;
pub use client::RedisClient;
pub use clients::{AsyncIoClients, IoClients};
pub use limiter::{InflightGuard, InflightLimiter};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("redis: {op} error: connect to {address} timed out after {timeout:?}")]
    ConnectTimeout {
        op: &'static str,
        address: String,
        timeout: Duration,
    },
    #[error("redis: {op} error: connect to {address} failed: {source}")]
    Connect {
        op: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("redis: {op} error: request timed out after {timeout:?}")]
    RequestTimeout { op: &'static str, timeout: Duration },
    #[error("redis: {op} error: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("redis: {op} error: {message}")]
    Server { op: &'static str, message: String },
    #[error("redis: {op} error: protocol: {message}")]
    Protocol { op: &'static str, message: String },
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),
    #[error("endpoint '{endpoint_id}' has kind '{kind}' but a redis client was requested")]
    WrongKind {
        endpoint_id: String,
        kind: models::EndpointKind,
    },
    #[error("failed to build blocking client runtime")]
    Runtime(#[source] std::io::Error),
    #[error("in-flight limiter of endpoint '{0}' is closed")]
    LimiterClosed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
