//! Process bootstrap shared by the service binaries.

use shop_lifecycle::{
    LifecycleConfig, Orchestrator, ServerOptions, ServerSet, TerminationSignal,
    telemetry::TelemetryProviders,
};
use shop_tonic_core::proto::FILE_DESCRIPTOR_SET;
use tonic::service::Routes;

/// Builds the server set for `routes`, adding gRPC reflection and the
/// metrics listener when the config enables one.
pub fn server_set(
    config: &LifecycleConfig,
    providers: &TelemetryProviders,
    routes: Routes,
) -> anyhow::Result<ServerSet> {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let options = ServerOptions::from_config(config)
        .with_metrics(config.metrics_port, providers.prometheus.clone());
    Ok(ServerSet::new(routes.add_service(reflection), options))
}

pub fn log_startup_info(config: &LifecycleConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting {} with full config: {:#?}", config.name, config);
    } else {
        tracing::info!(
            bind_ip = %config.bind_ip,
            port = config.port,
            registry = %config.registry.addr,
            "Starting {}",
            config.name
        );
    }
}

/// Installs the OS signal handlers, runs the lifecycle and flushes telemetry.
pub async fn run(orchestrator: Orchestrator, providers: TelemetryProviders) -> anyhow::Result<()> {
    let signal = TerminationSignal::new();
    let handlers = signal.install_os_handlers();

    let result = orchestrator.run(signal).await;
    handlers.abort();

    match &result {
        Ok(()) => tracing::info!("Service shut down successfully"),
        Err(e) => tracing::error!("Service exited with error: {e}"),
    }
    providers.shutdown();
    Ok(result?)
}
