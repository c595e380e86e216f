//! Cache command - executes a single operation and prints the result

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::infrastructure::cache::CacheManager;
use crate::infrastructure::logging;

use super::Command;

/// Load configuration, build the manager and run `command`
pub async fn run(command: Command, store: Option<String>) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);

    let manager = CacheManager::from_settings(&config.cache).await?;
    let output = execute(&manager, command, store.as_deref()).await?;
    println!("{}", output);

    Ok(())
}

/// Runs `command` against `manager` and renders its result
pub async fn execute(
    manager: &CacheManager,
    command: Command,
    store: Option<&str>,
) -> anyhow::Result<String> {
    debug!(?command, ?store, "Executing cache command");

    let repository = || manager.repository(None, store);

    let output = match command {
        Command::Get { key } => {
            let value: Option<Value> = repository()?.get(&key).await?;
            serde_json::to_string_pretty(&value.unwrap_or(Value::Null))?
        }
        Command::Put { key, value, ttl } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            repository()?
                .put(&key, &value, ttl.map(Duration::from_secs))
                .await?
                .to_string()
        }
        Command::Forget { key } => repository()?.forget(&key).await?.to_string(),
        Command::Flush => repository()?.flush().await?.to_string(),
        Command::Incr { key, by } => repository()?.increment(&key, by).await?.to_string(),
        Command::Decr { key, by } => repository()?.decrement(&key, by).await?.to_string(),
        Command::Stores => render_stores(manager),
    };

    Ok(output)
}

fn render_stores(manager: &CacheManager) -> String {
    manager
        .store_names()
        .into_iter()
        .map(|name| {
            let driver = manager
                .store(Some(name))
                .map(|store| store.driver())
                .unwrap_or("unknown");

            if name == manager.default_store_name() {
                format!("{} ({}) [default]", name, driver)
            } else {
                format!("{} ({})", name, driver)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
