use clap::Parser;
use mockrelay::control::{ControlPlaneServer, ServerContext};
use mockrelay::events::EventBus;
use mockrelay::generate::ResponderRegistry;
use mockrelay::ledger::LedgerStore;
use mockrelay::mock::MockStore;
use mockrelay::settings::SettingsStore;
use mockrelay::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mockrelay", about = "Mock resolution engine with a JSON control plane")]
struct Args {
    /// Path to a JSON config file; flags below override it.
    #[arg(short, long, env = "MOCKRELAY_CONFIG")]
    config: Option<String>,
    #[arg(short, long, env = "MOCKRELAY_PORT")]
    port: Option<u16>,
    #[arg(short, long, env = "MOCKRELAY_BIND")]
    bind: Option<String>,
    #[arg(short, long, env = "MOCKRELAY_DATA_DIR")]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mockrelay=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir.into();
    }
    config.validate()?;

    std::fs::create_dir_all(&config.data_dir)?;
    let bus = EventBus::new();
    let mocks = Arc::new(MockStore::open(config.mocks_path(), bus.clone())?);
    let ledger = LedgerStore::open(config.ledger_path(), bus.clone())?;
    let settings = SettingsStore::open(config.settings_path(), bus.clone())?;
    settings.migrate()?;

    let watch = Duration::from_millis(config.watch_interval_ms);
    let _mock_watcher = mocks.keyed().spawn_watcher(watch);
    let _ledger_watcher = ledger.keyed().spawn_watcher(watch);
    let _settings_watcher = settings.keyed().spawn_watcher(watch);

    let ctx = ServerContext::new(
        mocks,
        ledger,
        settings,
        ResponderRegistry::new(),
        bus,
    );
    let server = ControlPlaneServer::bind(&config.addr(), ctx).await?;
    let shutdown = server.shutdown_handle();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            let _ = shutdown.send(());
        }
    }
    Ok(())
}
