//!
//! src/logging.rs
//!
//! Initializes the tracing subscriber so resolutions emit structured
//! events, json in production and pretty for local runs.
//!
//!

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_error::ErrorLayer;
use tracing_appender::non_blocking;

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::ResolveError;

/// Keeps the background writer alive, drop it last.
pub struct LoggingGuard(tracing_appender::non_blocking::WorkerGuard);

fn filter(cfg: &LoggingConfig) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(cfg.filter_directives.clone()))
}

pub fn init_logging(cfg: &LoggingConfig) ->
    Result<LoggingGuard, ResolveError> {

    let (writer, guard) = non_blocking(std::io::stdout());
    let time = tracing_subscriber::fmt::time::UtcTime::rfc_3339();

    let registry = tracing_subscriber::registry()
        .with(filter(cfg))
        .with(ErrorLayer::default());

    let installed = match cfg.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .with_writer(writer)
                .with_timer(time)
                .with_target(cfg.include_target)
                .with_file(cfg.include_file_line)
                .with_line_number(cfg.include_file_line)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true);
            registry.with(fmt_layer).try_init()
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_writer(writer)
                .with_timer(time)
                .with_ansi(cfg.with_ansi)
                .with_target(cfg.include_target)
                .with_file(cfg.include_file_line)
                .with_line_number(cfg.include_file_line)
                .pretty();
            registry.with(fmt_layer).try_init()
        }
    };

    installed.map_err(|e| ResolveError::Config(format!("logging init: {e}")))?;
    Ok( LoggingGuard(guard) )
}
