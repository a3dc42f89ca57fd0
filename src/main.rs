#[macro_use]
extern crate log;

mod cli;
mod cluster_offsets;
mod constants;
mod http;
mod kafka_types;
mod lag_collector;
mod logging;
mod prometheus_metrics;

use std::fmt::Display;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::lag_collector::CollectorSettings;
use crate::prometheus_metrics::MetricSink;

#[tokio::main]
async fn main() {
    let cli = parse_cli_and_init_logging();

    // Init `prometheus_metrics` module
    let metrics = prometheus_metrics::init(cli.cluster_name.clone())
        .unwrap_or_else(|e| fatal(exit_code::SOFTWARE_ERROR, e));
    let sink = MetricSink::new(&metrics, cli.stale_after_cycles)
        .unwrap_or_else(|e| fatal(exit_code::SOFTWARE_ERROR, e));
    let metrics = Arc::new(metrics);

    // Init `cluster_offsets` module
    let (directory, reader) = cluster_offsets::init(cli.build_client_config(), cli.fetch_timeout())
        .await
        .unwrap_or_else(|e| fatal(exit_code::SERVICE_UNAVAILABLE, e));

    // Listen before collecting, so that an unusable address is reported right away
    let listener =
        http::bind(cli.listen_address).await.unwrap_or_else(|e| fatal(exit_code::OS_ERROR, e));

    let shutdown_token = build_shutdown_token();

    // Init `lag_collector` module
    let settings = CollectorSettings {
        fetch_timeout: cli.fetch_timeout(),
        cycle_timeout: cli.cycle_timeout(),
        group_filter: cli.group_filter.clone(),
        topic_filter: cli.topic_filter.clone(),
    };
    let collector_handle = lag_collector::init(
        directory,
        reader,
        Arc::new(sink),
        settings,
        cli.refresh_interval(),
        &metrics,
        shutdown_token.clone(),
    )
    .unwrap_or_else(|e| fatal(exit_code::SOFTWARE_ERROR, e));

    // Serve until shutdown
    let served =
        http::serve(listener, &cli.telemetry_path, metrics, shutdown_token.clone()).await;
    if let Err(e) = served {
        error!("{e}");
        shutdown_token.cancel();
    }

    // Join all the async tasks, then let it terminate
    if let Err(e) = collector_handle.await {
        error!("Collection task terminated abnormally: {e}");
    }

    info!("Shutdown!");
}

fn parse_cli_and_init_logging() -> Cli {
    // Parse command line input and initialize logging
    let cli = Cli::parse_and_validate();
    logging::init(cli.verbosity_level());

    trace!("Created:\n{:#?}", cli);

    cli
}

fn build_shutdown_token() -> CancellationToken {
    let shutdown_token = CancellationToken::new();

    // Setup shutdown signal handler:
    // when it's time to shutdown, cancels the token and all clones react to it.
    //
    // NOTE: This handler will be listening on its own dedicated thread.
    let handler_token = shutdown_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutting down...");
        handler_token.cancel();
    }) {
        error!("Failed to register signal handler: {e}");
    }

    // Return a token so we can notify other parts of the system.
    shutdown_token
}

/// Logs a startup error that leaves nothing useful to run, and terminates the process.
fn fatal<E: Display>(code: i32, e: E) -> ! {
    error!("{e}");
    std::process::exit(code)
}
