//! Error types for the service lifecycle.
//!
//! Each component owns a narrow error type; [`Error`] unifies the ones that
//! can end the process so the orchestrator can return a single result to
//! `main`.
//!
//! ## Fatal
//! - [`AllocationError`]: no free port could be found.
//! - [`BindError`]: a listener could not bind its endpoint (including a race
//!   lost after allocation).
//! - [`Error::Registration`]: the registry was unreachable or rejected the
//!   registration.
//! - [`Error::Consumer`]: the background consumer failed to subscribe or
//!   start.
//! - [`Error::ServerTerminated`]: the serve loop exited while serving.
//!
//! ## Logged only
//! - [`Error::Deregistration`]: the registry TTL reaps the entry instead.
//! - [`HandlerError`]: per-message failure, the subscription continues.

use core::net::SocketAddr;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the lifecycle coordinator.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid configuration detected before startup.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// No free port could be allocated.
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// A listener failed to bind.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Registration with the service registry failed.
    #[error("Service registration failed: {0}")]
    Registration(#[source] RegistryError),

    /// Deregistration failed. Never fatal.
    #[error("Service deregistration failed: {0}")]
    Deregistration(#[source] RegistryError),

    /// The background consumer could not subscribe, start or stop.
    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    /// The gRPC serve loop exited while the process was serving.
    #[error("Server terminated unexpectedly: {reason}")]
    ServerTerminated { reason: String },
}

/// Failure to find a free local port.
#[derive(thiserror::Error, Debug)]
#[error("Failed to allocate a free port: {0}")]
pub struct AllocationError(#[from] pub std::io::Error);

/// Failure to bind a listener on the chosen endpoint.
#[derive(thiserror::Error, Debug)]
#[error("Failed to bind {addr}: {source}")]
pub struct BindError {
    pub addr: SocketAddr,
    #[source]
    pub source: std::io::Error,
}

/// Errors returned by a [`Registry`](crate::Registry) backend.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    /// The backend could not be reached (connect, timeout, TLS).
    #[error("Registry unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Registry rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Errors raised by the background consumer and its message sources.
#[derive(thiserror::Error, Debug)]
pub enum ConsumerError {
    /// Subscribing to the topic failed. Fatal for the owning process.
    #[error("Failed to subscribe to `{topic}`: {reason}")]
    Subscribe { topic: String, reason: String },

    /// `start` was called without a subscription or twice.
    #[error("Consumer cannot start: {reason}")]
    Start { reason: String },

    /// The delivery loop could not be stopped cleanly.
    #[error("Consumer shutdown failed: {reason}")]
    Shutdown { reason: String },

    /// The message source failed to receive or settle a message.
    #[error("Message source error: {reason}")]
    Source { reason: String },
}

/// Per-message failure returned by a [`MessageHandler`](crate::MessageHandler).
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    /// The payload could not be decoded.
    #[error("Malformed message payload: {reason}")]
    Malformed { reason: String },

    /// The payload was valid but processing it failed.
    #[error("Message processing failed: {reason}")]
    Failed { reason: String },
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed {
            reason: err.to_string(),
        }
    }
}
