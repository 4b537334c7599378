use std::fmt;

use serde::{Deserialize, Serialize};

/// Competing ways of producing the cropped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Visible-rect view, copy out, rebuild a frame from the copy.
    DirectCopy,
    /// One-step resize into a bitmap, frame from bitmap, copy out as RGBA.
    BitmapResize,
    /// Scaled draw onto a raster surface, read back as RGBA.
    SurfaceDraw,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::DirectCopy,
        Strategy::BitmapResize,
        Strategy::SurfaceDraw,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::DirectCopy => "direct-copy",
            Strategy::BitmapResize => "bitmap-resize",
            Strategy::SurfaceDraw => "surface-draw",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many strategies run per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Every strategy runs on every frame for comparison.
    #[default]
    Benchmark,
    /// Only the output strategy runs.
    Single,
}

impl PipelineMode {
    /// Strategies to run, in order. `output` always takes part.
    pub fn strategies(self, output: Strategy) -> &'static [Strategy] {
        match (self, output) {
            (PipelineMode::Benchmark, _) => &Strategy::ALL,
            (PipelineMode::Single, Strategy::DirectCopy) => &[Strategy::DirectCopy],
            (PipelineMode::Single, Strategy::BitmapResize) => &[Strategy::BitmapResize],
            (PipelineMode::Single, Strategy::SurfaceDraw) => &[Strategy::SurfaceDraw],
        }
    }
}
