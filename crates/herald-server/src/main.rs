mod api;
mod error;

use std::path::Path;
use std::sync::Arc;

use herald_core::config::{HeraldConfig, StoreBackend};
use herald_core::store::{DistributedLock, ScheduleStore};
use herald_core::{DispatchService, Dispatcher, InMemoryStore, MessageRepository, RocksDbStore};
use tracing::{info, warn};

fn load_config() -> HeraldConfig {
    let paths = ["herald.toml", "/etc/herald/herald.toml"];

    for path in &paths {
        if Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match HeraldConfig::from_toml(&contents) {
                    Ok(config) => {
                        info!(path, "loaded configuration");
                        return config;
                    }
                    Err(e) => {
                        eprintln!("error parsing {path}: {e}");
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("error reading {path}: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    info!("no config file found, using defaults");
    HeraldConfig::default()
}

/// Apply `PORT` and `HERALD_DATA_DIR` on top of the file configuration.
fn apply_env_overrides(config: &mut HeraldConfig, port: Option<String>, data_dir: Option<String>) {
    if let Some(port) = port.filter(|p| !p.is_empty()) {
        let host = config
            .server
            .listen_addr
            .rsplit_once(':')
            .map_or("0.0.0.0", |(host, _)| host);
        config.server.listen_addr = format!("{host}:{port}");
    }
    if let Some(dir) = data_dir.filter(|d| !d.is_empty()) {
        config.store.data_dir = dir;
    }
}

/// The opened backend. The same object serves as schedule store and lock.
struct Backend {
    store: Arc<dyn ScheduleStore>,
    lock: Arc<dyn DistributedLock>,
    rocksdb: Option<Arc<RocksDbStore>>,
}

async fn open_backend(config: &HeraldConfig) -> Result<Backend, Box<dyn std::error::Error>> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("using in-memory store, scheduled messages will not survive a restart");
            let store = Arc::new(InMemoryStore::new());
            Ok(Backend {
                store: store.clone(),
                lock: store,
                rocksdb: None,
            })
        }
        StoreBackend::Rocksdb => {
            let store = Arc::new(RocksDbStore::open(&config.store.data_dir)?);
            info!(data_dir = %config.store.data_dir, "opened rocksdb store");
            Ok(Backend {
                store: store.clone(),
                lock: store.clone(),
                rocksdb: Some(store),
            })
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let store =
                Arc::new(herald_core::store::RedisStore::connect(&config.store.redis_url).await?);
            Ok(Backend {
                store: store.clone(),
                lock: store,
                rocksdb: None,
            })
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(
            "store.backend = \"redis\" requires building herald-server with the `redis` feature"
                .into(),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    herald_core::telemetry::init_tracing();

    let mut config = load_config();
    apply_env_overrides(
        &mut config,
        std::env::var("PORT").ok(),
        std::env::var("HERALD_DATA_DIR").ok(),
    );
    config.validate()?;

    let backend = open_backend(&config).await?;

    let service = DispatchService::new(MessageRepository::new(backend.store));
    let dispatcher = Dispatcher::new(service.clone(), backend.lock, &config.dispatcher);
    dispatcher.start();

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr.as_str()).await?;
    info!(addr = %listener.local_addr()?, "starting HTTP server");

    axum::serve(listener, api::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, shutting down dispatcher");
    dispatcher.shutdown().await;

    if let Some(store) = backend.rocksdb {
        store.flush()?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, waiting for ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    info!("received shutdown signal");
}
