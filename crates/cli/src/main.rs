//! `bincache` command-line interface.

mod cli;
mod commands;
mod tracing;

use crate::tracing::{TracingConfig, TracingFormat};
use ::tracing::Instrument;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report(&error);
        std::process::exit(1);
    }
}

async fn run() -> miette::Result<()> {
    let cli = cli::parse();

    let config = TracingConfig {
        format: if cli.json {
            TracingFormat::Json
        } else {
            TracingFormat::Compact
        },
        level: cli.level.into(),
        ..Default::default()
    };
    crate::tracing::init_tracing(config)?;

    let span = ::tracing::info_span!(
        "command",
        correlation_id = %crate::tracing::correlation_id(),
    );
    commands::execute(cli.command, cli.cache_dir)
        .instrument(span)
        .await
}

#[allow(clippy::print_stderr)]
fn report(error: &miette::Report) {
    eprintln!("{error:?}");
}
