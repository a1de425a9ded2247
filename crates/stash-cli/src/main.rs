//! stash CLI entrypoint.

use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod args;
mod plugin;
mod settings;


use args::{Args, LogFormat};
use settings::Settings;

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = Args::parse();
    args.apply_env_fallbacks(|name| std::env::var(name).ok());
    init_tracing(args.debug, args.log_format);

    let result = match Settings::resolve(args) {
        Ok(settings) => plugin::execute(&settings).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "stash failed");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over `--debug`; the default level is `info`.
fn init_tracing(debug: bool, format: LogFormat) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}
