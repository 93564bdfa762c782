//! Startup and shutdown sequencing for one process instance.
//!
//! The [`Orchestrator`] is the only component that touches the registry, the
//! server set and the background service. It drives them through a fixed
//! state machine:
//!
//! ```text
//! Init -> [Allocating] -> StartingServers -> Registering -> Serving
//!      -> ShuttingDown -> Deregistering -> Terminated
//! ```
//!
//! `Allocating` is entered only when the configured port is `0`. A failure in
//! `Allocating`, `StartingServers` or `Registering` goes straight to
//! `Terminated` with an error; a failed registration stops the listeners
//! first and never deregisters.
//!
//! ## Invariants
//!
//! - Registration happens only once the listeners are bound, and the
//!   health-check target is the endpoint actually bound.
//! - Deregistration happens if and only if registration succeeded, after the
//!   background service and the listeners have stopped.
//! - `Serving` is left exactly once. Shutdown steps run one after another,
//!   each fully awaited.

use crate::{
    EphemeralPortAllocator, Error, HealthCheckDescriptor, LifecycleConfig, PortAllocator,
    Registration, Registry, ServerSet, ServiceIdentity, TerminationSignal,
    consumer::BackgroundService,
};
use core::fmt;
use core::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Position of the orchestrator in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Allocating,
    StartingServers,
    Registering,
    Serving,
    ShuttingDown,
    Deregistering,
    Terminated,
}

impl LifecycleState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Allocating => "ALLOCATING",
            Self::StartingServers => "STARTING_SERVERS",
            Self::Registering => "REGISTERING",
            Self::Serving => "SERVING",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Deregistering => "DEREGISTERING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one process instance from startup to exit.
pub struct Orchestrator {
    config: LifecycleConfig,
    instance_id: Uuid,
    registry: Arc<dyn Registry>,
    servers: ServerSet,
    allocator: Box<dyn PortAllocator>,
    background: Option<Box<dyn BackgroundService>>,
    state: watch::Sender<LifecycleState>,
}

impl Orchestrator {
    /// Creates an orchestrator with a fresh instance id.
    pub fn new(config: LifecycleConfig, registry: Arc<dyn Registry>, servers: ServerSet) -> Self {
        let allocator = EphemeralPortAllocator::new(config.bind_ip);
        let (state, _) = watch::channel(LifecycleState::Init);
        Self {
            config,
            instance_id: Uuid::new_v4(),
            registry,
            servers,
            allocator: Box::new(allocator),
            background: None,
            state,
        }
    }

    /// Replaces the allocator used when the configured port is `0`.
    #[must_use]
    pub fn with_allocator(mut self, allocator: impl PortAllocator + 'static) -> Self {
        self.allocator = Box::new(allocator);
        self
    }

    /// Attaches a background service, started once registered and stopped
    /// before the listeners.
    #[must_use]
    pub fn with_background(mut self, service: impl BackgroundService + 'static) -> Self {
        self.background = Some(Box::new(service));
        self
    }

    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Observes state transitions.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Runs the full lifecycle and returns when the process may exit.
    ///
    /// Returns `Ok(())` after a signal-driven shutdown, whatever the outcome
    /// of deregistration.
    ///
    /// # Errors
    ///
    /// - [`Error::Allocation`] or [`Error::Bind`]: nothing was registered.
    /// - [`Error::Registration`]: the listeners were stopped, nothing to
    ///   deregister.
    /// - [`Error::Consumer`] or [`Error::ServerTerminated`]: raised while
    ///   serving; the ordered shutdown and deregistration still ran.
    #[tracing::instrument(
        name = "lifecycle",
        skip_all,
        fields(service = %self.config.name, instance_id = %self.instance_id)
    )]
    pub async fn run(self, signal: TerminationSignal) -> Result<(), Error> {
        let Self {
            config,
            instance_id,
            registry,
            servers,
            allocator,
            mut background,
            state,
        } = self;
        let transition = |next: LifecycleState| {
            tracing::debug!(state = %next, "Lifecycle transition");
            state.send_replace(next);
        };

        let port = if config.port == 0 {
            transition(LifecycleState::Allocating);
            match allocator.allocate() {
                Ok(port) => port,
                Err(e) => {
                    tracing::error!("{e}");
                    transition(LifecycleState::Terminated);
                    return Err(e.into());
                }
            }
        } else {
            config.port
        };

        transition(LifecycleState::StartingServers);
        let mut handle = match servers.start(SocketAddr::new(config.bind_ip, port)).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("{e}");
                transition(LifecycleState::Terminated);
                return Err(e.into());
            }
        };

        let identity = ServiceIdentity::new(
            config.name.clone(),
            instance_id,
            config.host.clone(),
            handle.local_addr().port(),
            config.tags.clone(),
        );
        let check = HealthCheckDescriptor::grpc(&identity, &config.check);
        let registration = Registration::new(identity, check).with_metrics(handle.metrics_addr());

        transition(LifecycleState::Registering);
        if let Err(e) = registry.register(&registration).await {
            let err = Error::Registration(e);
            tracing::error!("{err}");
            handle.graceful_stop().await;
            transition(LifecycleState::Terminated);
            return Err(err);
        }
        metrics::counter!("lifecycle_registrations_total").increment(1);
        tracing::info!(
            addr = %registration.check.target,
            tags = ?registration.identity.tags,
            "Registered with service registry"
        );

        transition(LifecycleState::Serving);
        let mut fatal = None;
        if let Some(service) = background.as_mut() {
            if signal.is_triggered() {
                tracing::info!(
                    consumer = service.name(),
                    "Termination requested during startup, not starting"
                );
            } else if let Err(e) = service.start().await {
                tracing::error!(consumer = service.name(), "{e}");
                fatal = Some(Error::Consumer(e));
            }
        }

        if fatal.is_none() {
            tracing::info!("Serving");
            tokio::select! {
                () = signal.wait() => {}
                err = handle.terminated() => {
                    tracing::error!("{err}");
                    fatal = Some(err);
                }
            }
        }

        transition(LifecycleState::ShuttingDown);
        if let Some(service) = background.as_mut() {
            if let Err(e) = service.shutdown().await {
                tracing::warn!(consumer = service.name(), "{e}");
            }
        }
        handle.graceful_stop().await;

        transition(LifecycleState::Deregistering);
        match registry.deregister(&registration.instance_id()).await {
            Ok(()) => tracing::info!("Deregistered from service registry"),
            Err(e) => tracing::warn!("{}", Error::Deregistration(e)),
        }

        transition(LifecycleState::Terminated);
        fatal.map_or(Ok(()), Err)
    }
}
