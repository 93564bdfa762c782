//! Service registry client.
//!
//! The orchestrator talks to the registry through the [`Registry`] trait: one
//! `register` call after the server set is listening and one `deregister`
//! call after it has stopped. [`ConsulRegistry`] implements the trait against
//! the Consul agent HTTP API.
//!
//! ## Structure
//!
//! - [`HealthCheckDescriptor`] - probe configuration, built from the bound
//!   endpoint (pure data, no I/O).
//! - [`Registration`] - everything submitted in the register call.
//! - [`consul`] - Consul agent backend.

pub mod consul;

pub use consul::ConsulRegistry;

use crate::{RegistryError, ServiceIdentity, config::CheckConfig};
use core::net::SocketAddr;
use core::time::Duration;
use std::collections::BTreeMap;

/// Path the metrics listener serves Prometheus text on.
pub const METRICS_PATH: &str = "/metrics";

/// A service-discovery backend.
///
/// The backend does not guarantee idempotency; callers treat a repeated
/// `register` with the same instance id as overwriting one logical entry and
/// issue exactly one per process lifetime.
#[tonic::async_trait]
pub trait Registry: Send + Sync {
    /// Registers the instance described by `registration`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or rejects the
    /// descriptor.
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError>;

    /// Removes the instance registered under `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or refuses the removal.
    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError>;
}

/// How the registry probes the instance's liveness.
///
/// Submitted once at registration; the backend owns its evaluation
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckDescriptor {
    /// `host:port` reachable through the gRPC health protocol.
    pub target: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub deregister_after: Duration,
}

impl HealthCheckDescriptor {
    /// Builds a gRPC health check pointing at the identity's endpoint.
    ///
    /// An empty host or a zero port is a programming error.
    pub fn grpc(identity: &ServiceIdentity, check: &CheckConfig) -> Self {
        debug_assert!(!identity.host.is_empty(), "health-check host must be set");
        debug_assert_ne!(identity.port, 0, "health-check port must be bound");
        Self {
            target: identity.endpoint(),
            interval: check.interval,
            timeout: check.timeout,
            deregister_after: check.deregister_after,
        }
    }
}

/// Everything the registry needs to advertise one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub identity: ServiceIdentity,
    pub check: HealthCheckDescriptor,
    pub meta: BTreeMap<String, String>,
}

impl Registration {
    pub fn new(identity: ServiceIdentity, check: HealthCheckDescriptor) -> Self {
        Self {
            identity,
            check,
            meta: BTreeMap::new(),
        }
    }

    /// Advertises the metrics listener so scrapers can discover it through
    /// the registry.
    #[must_use]
    pub fn with_metrics(mut self, metrics_addr: Option<SocketAddr>) -> Self {
        if let Some(addr) = metrics_addr {
            self.meta
                .insert("metrics_path".to_string(), METRICS_PATH.to_string());
            self.meta
                .insert("metrics_port".to_string(), addr.port().to_string());
        }
        self
    }

    pub fn instance_id(&self) -> String {
        self.identity.instance_id.to_string()
    }
}
