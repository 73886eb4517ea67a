use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use podcast_proto::config::{Config, SubscriptionBackend};
use podcast_relay::dispatcher::Dispatcher;
use podcast_relay::http::{self, HttpState};
use podcast_relay::registry::{
    FileSubscriptionStore, MemorySubscriptionStore, SubscriptionRegistry, SubscriptionStore,
};
use podcast_relay::vapid::VapidKeys;
use podcast_relay::webpush::WebPushTransport;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Push relay and app shell server.
#[derive(Parser, Debug)]
#[command(name = "podcast-relay", version)]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = podcast_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("relay.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,podcast_relay=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)?;
    info!("Config loaded from: {:?}", config_path);
    if let Some(port) = cli.port {
        config.relay.port = port;
    }

    let keys = Arc::new(VapidKeys::load_or_generate(&config.vapid)?);
    info!("VAPID public key: {}", keys.public_key_b64());

    let store: Arc<dyn SubscriptionStore> = match config.subscriptions.backend {
        SubscriptionBackend::Memory => {
            warn!("Subscriptions are kept in memory and lost on restart");
            Arc::new(MemorySubscriptionStore::new())
        }
        SubscriptionBackend::File => {
            Arc::new(FileSubscriptionStore::open(config.subscriptions.file.clone()).await?)
        }
    };

    let registry = Arc::new(SubscriptionRegistry::new(store, keys.clone()));
    let transport = Arc::new(WebPushTransport::new(keys, &config.vapid, &config.push)?);
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), transport));

    let app = http::router(
        HttpState {
            registry,
            dispatcher,
        },
        &config.relay,
    );

    http::serve(&config.relay, app, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    })
    .await?;

    info!("Relay stopped");
    Ok(())
}
