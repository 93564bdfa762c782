use shop_lifecycle::{
    ConsulRegistry, LifecycleConfig, Orchestrator, config::parse_with_defaults,
    telemetry::init_telemetry,
};
use shop_tonic_core::proto::userop::user_fav_server::UserFavServer;
use shop_tonic_server::cli::{USEROP_DEFAULTS, UserOpArgs};
use shop_tonic_server::launch;
use shop_tonic_server::userop::UserFavService;
use std::sync::Arc;
use tonic::server::NamedService;
use tonic::service::Routes;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args: UserOpArgs = parse_with_defaults(USEROP_DEFAULTS);
    let config = LifecycleConfig::try_from(args.lifecycle)?;

    let providers = init_telemetry(&config.name)?;
    launch::log_startup_info(&config);

    let routes = Routes::new(UserFavServer::new(UserFavService::default()));
    let servers = launch::server_set(&config, &providers, routes)?
        .watch_health(UserFavServer::<UserFavService>::NAME);
    let registry = Arc::new(ConsulRegistry::new(&config.registry)?);

    launch::run(Orchestrator::new(config, registry, servers), providers).await
}
