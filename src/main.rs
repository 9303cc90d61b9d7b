use clap::Parser;
use hotel_booking_api::{
    CliArgs, LoggingConfig, ServerConfig, init_logging, run_server, shutdown_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(cli)?;

    // fail before binding the port
    config.validate()?;

    let result = run_server(config).await;

    // flush traces before exit
    shutdown_telemetry();

    result
}
