mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabscope")]
#[command(
    about = "Per-tab browser performance monitor over the Chrome DevTools Protocol",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to every open tab and record events until Ctrl-C
    Watch {
        /// DevTools host (overrides config chrome.host)
        #[arg(long)]
        host: Option<String>,

        /// DevTools port (overrides config chrome.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Records directory (overrides config output.dir)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List the page targets Chrome currently exposes
    Targets {
        /// DevTools host (overrides config chrome.host)
        #[arg(long)]
        host: Option<String>,

        /// DevTools port (overrides config chrome.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show today's records for one tab
    Tail {
        /// Target id of the tab
        #[arg(short, long)]
        tab: String,

        /// Number of records to show
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,

        /// Show correlation reports instead of raw events
        #[arg(long)]
        correlations: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    match cli.command {
        Commands::Watch { host, port, output } => {
            commands::watch::run(host, port, output).await?;
        }
        Commands::Targets { host, port } => {
            commands::targets::run(host, port).await?;
        }
        Commands::Tail {
            tab,
            lines,
            correlations,
        } => {
            commands::tail::run(&tab, lines, correlations).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show().await?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(force).await?;
            }
        },
    }

    Ok(())
}
