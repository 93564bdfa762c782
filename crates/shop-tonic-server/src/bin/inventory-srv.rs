use shop_lifecycle::{
    ConsulRegistry, LifecycleConfig, Orchestrator, config::parse_with_defaults,
    telemetry::init_telemetry,
};
use shop_tonic_core::proto::inventory::inventory_server::InventoryServer;
use shop_tonic_server::cli::{INVENTORY_DEFAULTS, InventoryArgs};
use shop_tonic_server::inventory::{InventoryService, InventoryStore};
use shop_tonic_server::launch;
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
    let args: InventoryArgs = parse_with_defaults(INVENTORY_DEFAULTS);
    let config = LifecycleConfig::try_from(args.lifecycle)?;

    let providers = init_telemetry(&config.name)?;
    launch::log_startup_info(&config);

    let store = Arc::new(InventoryStore::default());
    let routes = Routes::new(InventoryServer::new(InventoryService::new(Arc::clone(&store))));
    let servers = launch::server_set(&config, &providers, routes)?
        .watch_health(InventoryServer::<InventoryService>::NAME);
    let registry = Arc::new(ConsulRegistry::new(&config.registry)?);
    let orchestrator = Orchestrator::new(config, registry, servers);

    // Subscribing before the lifecycle starts makes a refused subscription
    // fatal before anything is registered.
    let orchestrator = match args.broker {
        Some(brokers) => {
            attach_reback_listener(
                orchestrator,
                brokers,
                args.reback_topic,
                args.consumer_group,
                store,
            )
            .await?
        }
        None => {
            tracing::warn!("No broker configured, stock reback listener disabled");
            orchestrator
        }
    };

    launch::run(orchestrator, providers).await
}

#[cfg(feature = "kafka")]
async fn attach_reback_listener(
    orchestrator: Orchestrator,
    brokers: String,
    topic: String,
    consumer_group: String,
    store: Arc<InventoryStore>,
) -> anyhow::Result<Orchestrator> {
    use shop_lifecycle::consumer::kafka::KafkaSource;
    use shop_tonic_server::inventory::reback;

    let source = KafkaSource::new(brokers);
    let consumer = reback::subscribe(source, topic, consumer_group, store).await?;
    Ok(orchestrator.with_background(consumer))
}

#[cfg(not(feature = "kafka"))]
async fn attach_reback_listener(
    _orchestrator: Orchestrator,
    _brokers: String,
    topic: String,
    _consumer_group: String,
    _store: Arc<InventoryStore>,
) -> anyhow::Result<Orchestrator> {
    anyhow::bail!(
        "cannot subscribe to `{topic}`: a broker is configured but this build \
         lacks the `kafka` feature"
    )
}
