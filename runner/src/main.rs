#![warn(clippy::all, rust_2018_idioms)]

use anyhow::Context;
use runner::config::Config;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Log to stdout, `RUST_LOG=debug` for per cycle output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // load configuration file
    let path = std::env::args()
        .nth(1)
        .context("usage: runner <config.yaml>")?;
    let config = Config::from_file(&path)?;

    let summary = runner::run(&config)?;

    match summary.final_error {
        Some(e) => tracing::info!(
            "finished after {} updates, final position error {:.3} m, heading error {:.3} rad",
            summary.updates,
            e.position,
            e.heading
        ),
        None => tracing::info!("finished after {} updates", summary.updates),
    }

    Ok(())
}
