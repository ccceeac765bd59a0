//! endpoint-proxy — local forwarding proxy binary entry point.
//!
//! Initializes structured logging (with an in-memory ring buffer backing the Public API
//! Surface's `get_recent_logs`/`start_log_stream`), then loads configuration and runs
//! the HTTP listener. Everything else lives in the library crate.

use endpoint_proxy::utils::log_buffer::LogBuffer;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

const RECENT_LOG_CAPACITY: usize = 2_000;

#[tokio::main]
async fn main() -> ExitCode {
    let log_buffer = LogBuffer::new(RECENT_LOG_CAPACITY);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(log_buffer.clone())
        .init();

    match endpoint_proxy::server::run_server(log_buffer).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
