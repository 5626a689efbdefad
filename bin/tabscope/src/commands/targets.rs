use tabscope_core::{Config, Paths};
use tabscope_monitor::list_page_targets;

use super::watch::apply_overrides;

/// Print the page targets Chrome currently exposes.
pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    apply_overrides(&mut config, host, port, None);

    let targets = list_page_targets(&config.devtools_base_url()).await?;
    if targets.is_empty() {
        println!("(No page targets at {})", config.devtools_base_url());
        return Ok(());
    }

    println!("{:<34} {:<24} URL", "ID", "TITLE");
    for target in targets {
        println!(
            "{:<34} {:<24} {}",
            target.id,
            tabscope_core::truncate_chars(&target.title, 24),
            target.url
        );
    }
    Ok(())
}
