use log::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use super::args::{Args, LogFormat};
use crate::config::VERSION;
use crate::stats::LogCounterLayer;

/// Initialize logging: EnvFilter overridable from the environment, the
/// CLI-selected format, and the counter layer feeding the
/// `pgexporter_logging_*` metrics.
pub fn init_logging(args: &Args) {
    let filter = EnvFilter::from_default_env().add_directive(args.log_level.into());

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(LogCounterLayer);

    let fmt_layer = tracing_subscriber::fmt::layer().with_ansi(!args.no_color);

    match args.log_format {
        LogFormat::Structured => registry.with(fmt_layer.json()).init(),
        LogFormat::Debug => registry.with(fmt_layer.pretty()).init(),
        LogFormat::Text => registry.with(fmt_layer).init(),
    };

    info!("Welcome to pgexporter! (Version {VERSION})");
}
