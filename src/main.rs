use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hippoled::{Config, Daemon};

/// hippoled - directory daemon for networked LED lamps
#[derive(Parser)]
#[command(name = "hippoled", version, about)]
struct Cli {
    /// Port for the read-only API (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the device database (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,hippoled=info",
        1 => "info,hippoled=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config)?;
    tracing::info!("hippoled started");

    // Run until interrupted
    daemon.run().await?;

    tracing::info!("hippoled ending");
    Ok(())
}
