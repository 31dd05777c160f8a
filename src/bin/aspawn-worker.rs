// src/bin/aspawn-worker.rs

use aspawn::cli::LogLevel;
use aspawn::{logging, worker};
use clap::Parser;

/// Worker runtime for `aspawn`. Speaks the supervisor protocol on
/// stdin/stdout; not meant to be run by hand.
#[derive(Debug, Parser)]
#[command(name = "aspawn-worker", version)]
struct WorkerArgs {
    #[arg(long, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("aspawn-worker error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = WorkerArgs::parse();
    logging::init_logging(args.log_level)?;
    worker::run_worker(tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}
