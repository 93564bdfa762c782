#![doc = include_str!("../README.md")]

pub mod allocator;
pub mod config;
pub mod consumer;
mod error;
pub mod identity;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod signal;
pub mod telemetry;

pub use allocator::{EphemeralPortAllocator, PortAllocator};
pub use config::{LifecycleArgs, LifecycleConfig};
pub use consumer::{
    BackgroundConsumer, BackgroundService, ConsumeOutcome, Delivery, MessageHandler,
    MessageSource, Subscription,
};
pub use error::*;
pub use identity::ServiceIdentity;
pub use orchestrator::{LifecycleState, Orchestrator};
pub use registry::{ConsulRegistry, HealthCheckDescriptor, Registration, Registry};
pub use server::{MetricsEndpoint, ServerOptions, ServerSet, ServerSetHandle};
pub use signal::TerminationSignal;
