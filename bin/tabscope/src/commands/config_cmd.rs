use tabscope_core::{Config, Paths};

/// Show the effective configuration as pretty-printed JSON.
pub async fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let json = serde_json::to_value(&config)?;

    println!();
    println!("Current configuration");
    println!("  File:    {}", paths.config_file().display());
    println!("  Records: {}", config.records_dir(&paths).display());
    println!();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Write the default configuration file.
pub async fn init(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    write_default(&paths, force)?;
    println!("Wrote {}", paths.config_file().display());
    Ok(())
}

fn write_default(paths: &Paths, force: bool) -> anyhow::Result<()> {
    let path = paths.config_file();
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(&path)?;
    Ok(())
}
