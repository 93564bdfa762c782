//! The set of protocol listeners a process exposes.
//!
//! A [`ServerSet`] bundles the primary gRPC services with the
//! `grpc.health.v1.Health` responder and, optionally, a Prometheus metrics
//! listener. [`ServerSet::start`] binds every listener before returning, so a
//! bind failure is reported synchronously and nothing is registered for an
//! endpoint that never listened.
//!
//! ## Health
//!
//! The health responder reports `SERVING` for the overall server and every
//! watched service as soon as `start` succeeds, and `NOT_SERVING` from the
//! first instant [`ServerSetHandle::graceful_stop`] begins. It reflects
//! liveness only, not business readiness.
//!
//! ## Panics in handlers
//!
//! A handler that panics answers its caller with `INTERNAL` instead of
//! tearing down the connection; the panic is logged.
//!
//! ## Structure
//!
//! - [`scrape`] - axum router serving the Prometheus scrape endpoint.

pub mod scrape;

use crate::{BindError, Error, LifecycleConfig};
use core::any::Any;
use core::net::SocketAddr;
use core::time::Duration;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tonic::body::Body;
use tonic::codegen::http;
use tonic::service::Routes;
use tonic::transport::Server;
use tonic_health::ServingStatus;
use tonic_health::server::HealthReporter;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};

/// Health-check name of the overall server.
const OVERALL: &str = "";

/// Where and what the metrics listener serves.
#[derive(Clone)]
pub struct MetricsEndpoint {
    pub port: u16,
    pub handle: PrometheusHandle,
}

/// Tunables for the server set.
#[derive(Clone)]
pub struct ServerOptions {
    /// Time in-flight requests get during graceful stop before connections
    /// are closed.
    pub grace_period: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub max_connection_age: Option<Duration>,
    pub metrics: Option<MetricsEndpoint>,
}

impl ServerOptions {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            grace_period: config.grace_period,
            keepalive_interval: config.keepalive_interval,
            keepalive_timeout: config.keepalive_timeout,
            max_connection_age: config.max_connection_age,
            metrics: None,
        }
    }

    /// Enables the metrics listener when `port` is set.
    #[must_use]
    pub fn with_metrics(mut self, port: Option<u16>, handle: PrometheusHandle) -> Self {
        self.metrics = port.map(|port| MetricsEndpoint { port, handle });
        self
    }
}

/// Listeners to be started; see the [module documentation](self).
pub struct ServerSet {
    routes: Routes,
    watched: Vec<&'static str>,
    options: ServerOptions,
    #[cfg(test)]
    kill_switch: Option<CancellationToken>,
}

impl ServerSet {
    /// Creates a server set serving `routes` alongside the health responder.
    pub fn new(routes: Routes, options: ServerOptions) -> Self {
        Self {
            routes,
            watched: Vec::new(),
            options,
            #[cfg(test)]
            kill_switch: None,
        }
    }

    /// Aborts the gRPC serve task when `token` is cancelled, as if the serve
    /// loop had died on its own.
    #[cfg(test)]
    pub(crate) fn abort_serve_on(mut self, token: CancellationToken) -> Self {
        self.kill_switch = Some(token);
        self
    }

    /// Reports health for `service_name` (usually `NamedService::NAME`) in
    /// addition to the overall server.
    #[must_use]
    pub fn watch_health(mut self, service_name: &'static str) -> Self {
        self.watched.push(service_name);
        self
    }

    /// Binds every listener on `addr.ip()` and spawns the serve loops.
    ///
    /// The gRPC listener binds `addr`; the metrics listener, when enabled,
    /// binds the configured metrics port on the same interface.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] if any listener cannot bind. Listeners bound
    /// before the failure are released.
    pub async fn start(self, addr: SocketAddr) -> Result<ServerSetHandle, BindError> {
        let grpc_listener = bind(addr).await?;
        let local_addr = grpc_listener
            .local_addr()
            .map_err(|source| BindError { addr, source })?;

        let metrics_listener = match &self.options.metrics {
            Some(endpoint) => {
                let metrics_addr = SocketAddr::new(addr.ip(), endpoint.port);
                let listener = bind(metrics_addr).await?;
                let bound = listener.local_addr().map_err(|source| BindError {
                    addr: metrics_addr,
                    source,
                })?;
                Some((listener, bound, endpoint.handle.clone()))
            }
            None => None,
        };

        let (reporter, health_service) = tonic_health::server::health_reporter();
        reporter
            .set_service_status(OVERALL, ServingStatus::Serving)
            .await;
        for name in &self.watched {
            reporter
                .set_service_status(*name, ServingStatus::Serving)
                .await;
        }

        let stop = CancellationToken::new();
        let routes = self.routes.add_service(health_service);
        let options = self.options.clone();
        let grpc_stop = stop.clone();
        let grpc_task = tokio::spawn(async move {
            let mut builder = Server::builder()
                .accept_http1(true)
                .http2_adaptive_window(Some(true))
                .http2_keepalive_interval(Some(options.keepalive_interval))
                .http2_keepalive_timeout(Some(options.keepalive_timeout))
                .tcp_nodelay(true);
            if let Some(age) = options.max_connection_age {
                builder = builder.max_connection_age(age);
            }
            builder
                .layer(
                    ServiceBuilder::new()
                        .layer(
                            CorsLayer::new()
                                .allow_origin(cors::Any)
                                .allow_methods(cors::Any)
                                .allow_headers(cors::Any),
                        )
                        .layer(GrpcWebLayer::new())
                        .layer(CatchPanicLayer::custom(panic_to_status)),
                )
                .add_routes(routes)
                .serve_with_incoming_shutdown(
                    TcpListenerStream::new(grpc_listener),
                    grpc_stop.cancelled_owned(),
                )
                .await
        });

        #[cfg(test)]
        if let Some(kill) = self.kill_switch {
            let abort = grpc_task.abort_handle();
            let stopped = stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = kill.cancelled() => abort.abort(),
                    () = stopped.cancelled() => {}
                }
            });
        }

        let (metrics_addr, metrics_task) = match metrics_listener {
            Some((listener, bound, handle)) => {
                let metrics_stop = stop.clone();
                let task = tokio::spawn(async move {
                    axum::serve(listener, scrape::router(handle))
                        .with_graceful_shutdown(metrics_stop.cancelled_owned())
                        .await
                });
                (Some(bound), Some(task))
            }
            None => (None, None),
        };

        tracing::info!(
            %local_addr,
            metrics_addr = ?metrics_addr,
            "Server set listening"
        );

        Ok(ServerSetHandle {
            local_addr,
            metrics_addr,
            reporter,
            watched: self.watched,
            stop,
            grace_period: self.options.grace_period,
            grpc_task: Some(grpc_task),
            metrics_task,
        })
    }
}

/// Answers a panicking request with `INTERNAL`.
fn panic_to_status(panic: Box<dyn Any + Send + 'static>) -> http::Response<Body> {
    let message = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    tracing::error!(panic = message, "Request handler panicked");
    Status::internal("request handler panicked").into_http()
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, BindError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| BindError { addr, source })
}

/// Handle to the running listeners, exclusively owned by the orchestrator.
pub struct ServerSetHandle {
    local_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    reporter: HealthReporter,
    watched: Vec<&'static str>,
    stop: CancellationToken,
    grace_period: Duration,
    grpc_task: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
    metrics_task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ServerSetHandle {
    /// The endpoint the gRPC listener actually bound.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The endpoint the metrics listener bound, if enabled.
    pub const fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Resolves when the gRPC serve loop exits on its own.
    ///
    /// The returned [`Error::ServerTerminated`] describes why the loop
    /// stopped. Never resolves once the exit has already been observed.
    /// Cancel safe: dropping the future leaves the handle intact.
    pub async fn terminated(&mut self) -> Error {
        let Some(task) = self.grpc_task.as_mut() else {
            return std::future::pending().await;
        };
        let result = task.await;
        self.grpc_task = None;

        let reason = match result {
            Ok(Ok(())) => "serve loop returned".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("serve task failed: {e}"),
        };
        Error::ServerTerminated { reason }
    }

    /// Stops every listener and returns once they are stopped.
    ///
    /// - Publishes `NOT_SERVING` for the overall server and watched services.
    /// - Stops accepting connections and lets in-flight requests finish.
    /// - After the grace period, closes whatever is still open.
    pub async fn graceful_stop(mut self) {
        self.reporter
            .set_service_status(OVERALL, ServingStatus::NotServing)
            .await;
        for name in &self.watched {
            self.reporter
                .set_service_status(*name, ServingStatus::NotServing)
                .await;
        }

        tracing::info!(grace_period = ?self.grace_period, "Stopping server set");
        self.stop.cancel();

        // Both listeners share one grace period.
        let grace = self.grace_period;
        let (grpc_task, metrics_task) = (self.grpc_task.take(), self.metrics_task.take());
        let grpc = async move {
            if let Some(task) = grpc_task {
                report("gRPC", drain(task, grace).await);
            }
        };
        let metrics = async move {
            if let Some(task) = metrics_task {
                report("Metrics", drain(task, grace).await);
            }
        };
        tokio::join!(grpc, metrics);

        tracing::info!(local_addr = %self.local_addr, "Server set stopped");
    }
}

fn report(listener: &str, drained: Option<Result<(), String>>) {
    match drained {
        Some(Ok(())) => tracing::debug!("{listener} listener stopped"),
        Some(Err(e)) => tracing::warn!("{listener} listener stopped with error: {e}"),
        None => tracing::warn!("{listener} listener forced closed after grace period"),
    }
}

/// Waits up to `grace` for `task` to finish, aborting it otherwise.
///
/// Returns `None` when the task had to be aborted.
async fn drain<T, E>(
    mut task: JoinHandle<Result<T, E>>,
    grace: Duration,
) -> Option<Result<T, String>>
where
    E: core::fmt::Display,
{
    match timeout(grace, &mut task).await {
        Ok(Ok(result)) => Some(result.map_err(|e| e.to_string())),
        Ok(Err(join)) => Some(Err(join.to_string())),
        Err(_) => {
            task.abort();
            // Aborted tasks resolve with a cancellation error; the listener
            // and its connections are dropped by then.
            let _ = task.await;
            None
        }
    }
}

#[cfg(test)]
mod tests;
