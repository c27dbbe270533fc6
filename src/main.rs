use anyhow::Result;

use hivenote::config::{ConfigManager, HostConfig};
use hivenote::runtime::HostRuntime;

fn main() -> Result<()> {
    env_logger::init();

    let config = match ConfigManager::new() {
        Ok(manager) => manager.load_config().unwrap_or_else(|err| {
            log::warn!("failed to load host config, using defaults: {err}");
            HostConfig::default()
        }),
        Err(err) => {
            log::warn!("config directory unavailable, using defaults: {err}");
            HostConfig::default()
        }
    };

    // Single-threaded cooperative loop; all update state lives on one task.
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(run(config))
}

async fn run(config: HostConfig) -> Result<()> {
    let mut host = HostRuntime::start(config).await?;
    log::info!("UI location: {}", host.ui_location());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("shutting down"),
        _ = host.restart_requested() => log::info!("restarting to apply update"),
    }

    host.shutdown();
    Ok(())
}
