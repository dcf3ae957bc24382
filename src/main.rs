//! Scrape a Prometheus endpoint and print the relevant samples as InfluxDB line protocol,
//! ready to be consumed as Sensu check output.
//!
//! ```bash
//! prom-influx-bridge -m myservice -f http://localhost:9100/metrics -r "metrics_DBPuller, contactvalidator"
//! ```
use clap::{
    error::ErrorKind,
    Parser,
};
use prom_influx_bridge::{
    Bridge,
    BridgeConfig,
    BridgeError,
    Measurement,
    RelevantPrefixes,
    Scraper,
    Timestamp,
    EXIT_USAGE,
};
use reqwest::Url;
use std::{
    process::ExitCode,
    time::Duration,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Convert Prometheus metrics to InfluxDB line protocol
#[derive(Parser, Debug)]
#[command(name = "prom-influx-bridge")]
#[command(version, about)]
struct Cli {
    /// Name of the InfluxDB measurement
    #[arg(short = 'm', long, alias = "measurementName", value_name = "NAME")]
    measurement_name: Measurement,

    /// Endpoint to scrape (http://url:port/path)
    #[arg(short = 'f', long, alias = "fromEndpoint", value_name = "URL")]
    from_endpoint: Url,

    /// Which metrics to consider in the endpoint output (comma-separated prefixes)
    #[arg(short = 'r', long, alias = "relevantPrefix", value_name = "PREFIXES")]
    relevant_prefix: Option<RelevantPrefixes>,

    /// Give up on the endpoint after this many seconds (waits forever by default)
    #[arg(short = 't', long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

fn main() -> ExitCode {
    // Captured before anything else, shared by every record of the run
    let timestamp = Timestamp::now();
    init_logging();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            // Nowhere left to report to if stderr is gone
            e.print().ok();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match run(cli, timestamp) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            debug!(error = ?e, "run failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli, timestamp: Result<Timestamp, BridgeError>) -> Result<String, BridgeError> {
    let config = BridgeConfig::new(
        cli.measurement_name,
        cli.relevant_prefix.unwrap_or_default(),
        timestamp?,
    );
    let bridge = Bridge::new(config);
    debug!(config = ?bridge.config(), "configuration loaded");
    let scraper = Scraper::new(cli.from_endpoint, cli.timeout.map(Duration::from_secs))?;
    bridge.scrape(&scraper)
}

/// Logs go to stderr, stdout only carries line protocol.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
