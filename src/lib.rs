pub mod buffer;
pub mod capture;
pub mod display;
pub mod error;
pub mod geometry;
pub mod output;
pub mod pipeline;
pub mod profiler;
pub mod settings;

use std::path::Path;

use capture::frame::PixelFormat;
use geometry::{RawGeometry, SourceResolution};
use pipeline::{PipelineMode, Strategy};
use serde::{Deserialize, Serialize};
use settings::Settings;

pub use error::{Error, Result};
pub use output::{BenchHarness, OutputStream};

/// Environment variable prefix, e.g. `CROPBENCH__PIPELINE__MODE=single`.
pub const ENV_PREFIX: &str = "CROPBENCH";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    /// Initial crop geometry, unclamped.
    pub geometry: RawGeometry,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Pace the synthetic source at `fps` instead of producing as fast as
    /// the pipeline pulls.
    pub realtime: bool,
    /// Stop after this many frames. Unset runs until interrupted.
    pub frames: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// Strategy whose result is emitted.
    pub strategy: Strategy,
    /// Frames the output stream holds before the pipeline stops pulling.
    pub output_capacity: usize,
    pub handle_pool_size: usize,
    /// Draw the rebuilt and view frames onto surfaces, timed as extra stages.
    pub present: bool,
    pub report_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            format: PixelFormat::I420,
            realtime: true,
            frames: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Benchmark,
            strategy: Strategy::DirectCopy,
            output_capacity: 0,
            handle_pool_size: 16,
            present: false,
            report_interval_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "cropbench=info".into(),
        }
    }
}

impl Config {
    /// Defaults, then `path` if given, then `CROPBENCH__*` environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let layered = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(layered.try_deserialize()?)
    }

    pub fn resolution(&self) -> SourceResolution {
        SourceResolution::new(self.capture.width, self.capture.height)
    }

    /// Shared crop settings seeded from this configuration.
    pub fn settings(&self) -> Settings {
        Settings::new(self.geometry, self.resolution())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_store() {
        let config = Config::default();
        assert_eq!(config.geometry, RawGeometry::default());
        assert_eq!(config.pipeline.output_capacity, 0);
        assert_eq!(config.pipeline.mode, PipelineMode::Benchmark);
        assert_eq!(config.settings().crop_rect().size(), (2, 2));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("cropbench-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[geometry]\nx = -5\ny = 1079\nwidth = 3\nheight = 4\n\n\
             [pipeline]\nmode = \"single\"\nstrategy = \"surface-draw\"\n\n\
             [capture]\nformat = \"NV12\""
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.pipeline.mode, PipelineMode::Single);
        assert_eq!(config.pipeline.strategy, Strategy::SurfaceDraw);
        assert_eq!(config.capture.format, PixelFormat::Nv12);
        assert_eq!(config.capture.width, 1920);
        assert_eq!(
            config.settings().crop_rect(),
            geometry::CropRect { x: 0, y: 1078, width: 2, height: 2 }
        );
    }
}
