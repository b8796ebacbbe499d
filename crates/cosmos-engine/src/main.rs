//! # Cosmos Engine
//!
//! Scene runner for the cosmos spatial audio engine.
//!
//! Loads `cosmos.toml` and a scene file, then flies a listener through the
//! scene at a fixed tick rate while a render task pulls stereo blocks from
//! the engine:
//! - Config: engine and audio settings with file fallback to defaults
//! - Scene: zones (presets or full descriptions) and sources
//! - Loader: raw PCM files and procedural tones

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod app;
mod config;
mod loader;
mod scene;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::EngineConfig;

/// Main entry point.
fn main() -> Result<()> {
    // First argument overrides the config file location.
    let mut config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };
    config.validate();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_filter))
                .context("invalid log filter")?,
        )
        .init();

    info!("Cosmos starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(app::run(config))?;

    info!("Cosmos shutdown complete");
    Ok(())
}
