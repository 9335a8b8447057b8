//! Thick Client Bridge agent entry point

use clap::Parser;
use tcb_agent::logging::{init_logging, LoggingConfig};
use tcb_agent::{run, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut logging = LoggingConfig::with_level(&args.log_level)?;
    logging.json_format = args.log_json;
    init_logging(&logging)?;

    tokio::select! {
        result = run(args) => {
            if let Err(e) = &result {
                tracing::error!("tcb-agent failed: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping...");
            Ok(())
        }
    }
}
