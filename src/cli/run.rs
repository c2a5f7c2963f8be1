use super::config::{
    default_config_path, default_store_path, CourierConfig, CredentialSourceKind,
};
use super::logging;
use courier::delivery::Deliverer;
use courier::dispatch::Dispatcher;
use courier::platform::{AccountsTable, CredentialSource, EnvCredentials, GatewayConnector};
use courier::queue::SqliteQueueStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run the dispatcher service
///
/// ## Configuration Loading
///
/// 1. `--config` flag if provided
/// 2. Default config at `~/.local/share/courier/config.toml`
///
/// If the config file doesn't exist a default one is generated, with the
/// queue database placed next to it.
///
/// Credentials for the `env` source may also come from a `.env` file in the
/// working directory.
pub async fn execute(
    config_path: Option<String>,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Absent .env is normal in production
    dotenvy::dotenv().ok();

    let (config_path, config) = load_or_create(config_path)?;

    let _log_guard = match logging::init(&config.logging, &config.log_directory()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: file logging disabled: {}", e);
            None
        }
    };

    info!(
        config = %config_path.display(),
        store = %config.store.path.display(),
        gateway = %config.platform.gateway_url,
        "starting courier"
    );

    let store = Arc::new(SqliteQueueStore::open(&config.store.path, config.busy_timeout()?).await?);

    let credentials: Arc<dyn CredentialSource> = match config.credentials.source {
        CredentialSourceKind::Env => Arc::new(EnvCredentials),
        CredentialSourceKind::AccountsTable => {
            let table = AccountsTable::new(store.pool().clone());
            table.ensure_schema().await?;
            Arc::new(table)
        }
    };

    let connector = GatewayConnector::new(
        config.platform.gateway_url.as_str(),
        config.platform.session_dir.clone(),
        config.request_timeout()?,
        credentials,
    )?;
    let deliverer = Deliverer::new(Arc::new(connector), config.retry_policy()?);

    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        store.clone(),
        deliverer,
        config.dispatch_config()?,
        shutdown.clone(),
    );

    if once {
        let report = dispatcher.run_once().await?;
        println!(
            "Cycle complete: {} fetched, {} sent, {} failed, {} malformed",
            report.fetched, report.sent, report.failed, report.malformed
        );
    } else {
        tokio::spawn(watch_ctrl_c(shutdown));
        dispatcher.run().await?;
    }

    store.close().await;
    info!("courier stopped");
    Ok(())
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown requested");
            shutdown.cancel();
        }
        Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
    }
}

fn load_or_create(
    config_path: Option<String>,
) -> Result<(PathBuf, CourierConfig), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(&default_store_path()));

    if config_path.exists() {
        let config = CourierConfig::load(&config_path)?;
        return Ok((config_path, config));
    }

    let store_path = store_path_for(&config_path);
    println!("No config file found. Creating default configuration...");
    CourierConfig::create_default(&config_path, &store_path)?;
    println!("   Created: {}", config_path.display());
    warn!(config = %config_path.display(), "created default configuration");

    let config = CourierConfig::load(&config_path)?;
    Ok((config_path, config))
}

fn store_path_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|dir| dir.join("messages.db"))
        .unwrap_or_else(default_store_path)
}
