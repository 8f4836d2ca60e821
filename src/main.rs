use clap::{Parser, Subcommand};
use pixsync::config::{SyncConfig, STOCK_CONFIG};
use pixsync::fetch::HttpFetcher;
use pixsync::orchestrate::{Engine, StopToken};
use pixsync::upload::FtpTransport;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixsync")]
#[command(about = "Synchronize remote images to an FTP destination")]
#[command(long_about = "\
Synchronize remote images to an FTP destination

Each configured source URL is fetched over HTTP and hashed. Sources whose
content changed since the last successful run are pushed through the
enhancement/resize pipeline, archived with a timestamp, and uploaded; the
rest are skipped. State lives in a hash ledger inside the work directory,
so repeated runs only touch what actually changed.

Run 'pixsync gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single synchronization pass over all sources
    Run,
    /// Run passes on the configured interval until interrupted
    Serve,
    /// Prune stale archive entries and sweep stale working files
    Sweep,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if matches!(cli.command, Command::GenConfig) {
        print!("{}", STOCK_CONFIG);
        return Ok(ExitCode::SUCCESS);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SyncConfig::load(&cli.config)?;
    let stop = StopToken::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        info!("interrupt received, finishing in-flight sources");
        handler_stop.stop();
    })?;

    let fetcher = HttpFetcher::new(&config.fetch)?;
    let transport = FtpTransport::new(&config.upload);
    let engine = Engine::new(config, fetcher, transport, stop)?;

    match cli.command {
        Command::Run => {
            let summary = engine.run_pass();
            println!("{summary}");
            if summary.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Serve => {
            engine.serve();
        }
        Command::Sweep => {
            engine.maintenance();
        }
        Command::GenConfig => unreachable!("handled before engine construction"),
    }

    Ok(ExitCode::SUCCESS)
}
