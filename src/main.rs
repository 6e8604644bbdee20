use clap::Parser;
use snowcard::config::{StudioConfig, setup_logging};
use tracing::error;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = snowcard::cli::CliOptions::parse();

    if setup_logging(cli.debug).is_err() {
        return;
    }

    let config = StudioConfig::from(&cli);
    if let Err(err) = snowcard::web::setup_server(&config).await {
        error!("Application error: {}", err);
    }
}
