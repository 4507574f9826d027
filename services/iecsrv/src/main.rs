//! IEC 60870-5-104 Server Service (`iecsrv`)
//!
//! Loads the station configuration, starts the server core and runs until
//! Ctrl+C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};

use common::logging::init_logging;
use common::shutdown::wait_for_shutdown;
use errors::{VoltageError, VoltageErrorTrait, VoltageResult};
use iecsrv::config::ServerConfig;
use iecsrv::error::IecSrvError;
use iecsrv::server::Server;
use iecsrv::transport::LogTransport;

#[derive(Parser, Debug)]
#[command(name = "iecsrv", version, about = "IEC 60870-5-104 server service")]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "IECSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter, overrides the configured level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> VoltageResult<()> {
    let result = run(Args::parse()).await;
    if let Err(err) = &result {
        report_failure(err);
    }
    result
}

/// Log a fatal error at the level of its category
fn report_failure(err: &VoltageError) {
    let code = err.error_code();
    match err.log_level() {
        Level::ERROR => error!(code, "iecsrv failed: {}", err),
        Level::WARN => warn!(code, "iecsrv failed: {}", err),
        _ => info!(code, "iecsrv failed: {}", err),
    }
}

async fn run(args: Args) -> VoltageResult<()> {

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging = config.logging.with_level(level);
    }
    let _log_guard = init_logging(&config.logging).map_err(IecSrvError::from)?;

    config.validate()?;
    if args.validate {
        info!(
            "Configuration valid: {} stations, {} points",
            config.stations.len(),
            config.stations.iter().map(|s| s.points.len()).sum::<usize>()
        );
        return Ok(());
    }

    let transport = Arc::new(LogTransport::new());
    let server = Server::new(config.server_options(), transport)?;
    config.build_stations(&server)?;
    server.start()?;
    // No socket is bound; LogTransport only logs outbound frames
    info!(
        "iecsrv started with {} stations over the log transport (configured endpoint {}:{} not bound)",
        server.stations().len(),
        config.bind_ip,
        config.port
    );

    let signal = wait_for_shutdown().await;
    info!("Received {}, shutting down", signal);
    server.stop();
    drop(server);
    info!("iecsrv stopped");
    Ok(())
}
