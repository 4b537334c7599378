//! cropbench: crop strategy benchmark against a synthetic camera

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use cropbench::capture::{HandlePool, SyntheticSource};
use cropbench::display::CpuCompositor;
use cropbench::{BenchHarness, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    init_tracing(&config.logging.filter);

    info!("cropbench launching...");
    info!(?config, "Configuration loaded");

    let pool = HandlePool::new(config.pipeline.handle_pool_size);
    let compositor = Arc::new(CpuCompositor::new());
    let mut harness = BenchHarness::new(
        config.pipeline.clone(),
        config.settings(),
        pool.clone(),
        compositor,
    );

    let mut source = SyntheticSource::new(
        pool,
        config.resolution(),
        config.capture.format,
        config.capture.fps,
    )
    .paced(config.capture.realtime);
    if let Some(frames) = config.capture.frames {
        source = source.with_limit(frames);
    }

    let output = harness
        .bind(Some(Box::new(source)))
        .await
        .ok_or_else(|| eyre!("no output stream available"))?;

    let mut report = tokio::time::interval(Duration::from_millis(
        config.pipeline.report_interval_ms.max(1),
    ));
    let mut consumed = 0u64;

    loop {
        tokio::select! {
            frame = output.recv() => match frame {
                Some(frame) => {
                    consumed += 1;
                    frame.close();
                }
                None => {
                    info!("Output stream ended");
                    break;
                }
            },
            _ = report.tick() => {
                info!(
                    crop = ?harness.current_crop_rect(),
                    stats = ?harness.stats(),
                    "Latency report\n{}",
                    harness.latency_report()
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for ctrl-c: {}", e);
                }
                break;
            }
        }
    }

    harness.shutdown().await;
    info!(consumed, "Final latency report\n{}", harness.latency_report());
    info!("cropbench shutting down");
    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()),
    );

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}
