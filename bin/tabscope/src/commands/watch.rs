use tabscope_core::{Config, Paths};
use tabscope_monitor::TabSupervisor;
use tokio::sync::broadcast;
use tracing::info;

pub fn apply_overrides(
    config: &mut Config,
    host: Option<String>,
    port: Option<u16>,
    output: Option<String>,
) {
    if let Some(host) = host {
        config.chrome.host = host;
    }
    if let Some(port) = port {
        config.chrome.port = port;
    }
    if let Some(output) = output {
        config.output.dir = Some(output);
    }
}

/// Attach to all tabs and record until Ctrl-C.
pub async fn run(
    host: Option<String>,
    port: Option<u16>,
    output: Option<String>,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    apply_overrides(&mut config, host, port, output);
    config.validate()?;

    let records_dir = config.records_dir(&paths);
    std::fs::create_dir_all(&records_dir)?;
    info!(
        devtools = %config.devtools_base_url(),
        records = %records_dir.display(),
        "Watching browser tabs"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let supervisor = TabSupervisor::new(config, records_dir);
    let handle = tokio::spawn(supervisor.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, detaching from tabs...");
    let _ = shutdown_tx.send(());

    handle.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        apply_overrides(&mut config, Some("10.0.0.2".into()), Some(9333), Some("/data".into()));
        assert_eq!(config.devtools_base_url(), "http://10.0.0.2:9333");
        assert_eq!(config.output.dir.as_deref(), Some("/data"));

        let mut config = Config::default();
        apply_overrides(&mut config, None, None, None);
        assert_eq!(config.devtools_base_url(), "http://127.0.0.1:9222");
    }
}
