use super::config::{default_config_path, default_store_path, CourierConfig};
use courier::queue::{QueueStore, SqliteQueueStore};
use std::path::PathBuf;

/// Print pending, sent and failed job counts from the queue database
pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(&default_store_path()));

    let config = if config_path.exists() {
        CourierConfig::load(&config_path)?
    } else {
        CourierConfig::new(default_store_path())
    };

    if !config.store.path.exists() {
        return Err(format!(
            "queue database '{}' does not exist",
            config.store.path.display()
        )
        .into());
    }

    let store = SqliteQueueStore::open(&config.store.path, config.busy_timeout()?).await?;
    let counts = store.status_counts().await?;
    store.close().await;

    println!("Courier queue: {}", config.store.path.display());
    println!("  Pending: {}", counts.pending);
    println!("  Sent:    {}", counts.sent);
    println!("  Failed:  {}", counts.failed);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_execute() {
        let temp_dir = TempDir::new().unwrap();
        let store_path = temp_dir.path().join("messages.db");
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!("[store]\npath = \"{}\"\n", store_path.display()),
        )
        .unwrap();

        let store = SqliteQueueStore::open(&store_path, Duration::from_secs(1))
            .await
            .unwrap();
        store.enqueue("A", "B", "hi").await.unwrap();
        store.close().await;

        let result = execute(Some(config_path.to_string_lossy().to_string())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_status_missing_database() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!(
                "[store]\npath = \"{}\"\n",
                temp_dir.path().join("absent.db").display()
            ),
        )
        .unwrap();

        let result = execute(Some(config_path.to_string_lossy().to_string())).await;
        assert!(result.is_err());
    }
}
