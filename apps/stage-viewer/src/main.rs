use clap::Parser;
use stage_viewer_core::telemetry::logging;
use stage_viewer_core::terminal::{app, cli::Cli, error::CliError};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).map_err(|err| CliError::Logging(err.to_string()))?;
    app::run(cli).await
}
