//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. Output goes to stderr so that
//! stdout carries only command results; `RUST_LOG` replaces the default
//! directives when set.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "pusd_cli=info,pusd_engine=info,pusd_protocol=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, one line per event.
    Pretty,
    /// JSON lines with event fields flattened to the top level.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Call once, before anything logs.
pub fn init_logging(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr).with_target(true))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
            .init(),
    }
    tracing::debug!(?format, "logging initialized");
}
