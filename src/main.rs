use clap::Parser;
use shard_reconciler::store::grpc::GrpcUpsfStore;
use shard_reconciler::{mapper::ShardMapper, materializer::DefaultItemMaterializer, policy::PolicyLoader};
use std::sync::Arc;

fn main() -> Result<(), anyhow::Error> {
    // Required in order for libraries to use `rustls` for TLS.
    // See: https://docs.rs/rustls/latest/rustls/crypto/struct.CryptoProvider.html
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("failed to install default crypto provider");

    let config = shard_reconciler::Config::parse();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.loglevel.as_tracing_filter())),
        )
        .with_ansi(!matches!(std::env::var("NO_COLOR"), Ok(v) if v == "1"))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(runtime.spawn(run(config)));

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}

async fn run(config: shard_reconciler::Config) -> anyhow::Result<()> {
    tracing::info!(config = ?config, "shard-reconciler starting");

    let store: Arc<dyn shard_reconciler::store::UpsfStore> =
        Arc::new(GrpcUpsfStore::connect(config.upsf_addr()).await?);

    let policy = PolicyLoader::new(config.config_file.clone());
    let mapper = ShardMapper::new(store.clone(), PolicyLoader::new(config.config_file.clone()));
    let materializer =
        DefaultItemMaterializer::new(store.clone(), policy, config.virtual_mac.clone());

    let control_loop = shard_reconciler::ControlLoop::new(
        store,
        mapper,
        materializer,
        config.registration_interval,
        config.upsf_auto_register,
    );

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("caught shutdown signal, stopping reconciler..."),
            Err(err) => tracing::error!(?err, "error subscribing to shutdown signal"),
        }
    };

    control_loop.run(shutdown).await;

    tracing::info!("shard-reconciler shut down cleanly");
    Ok(())
}
