//! Crop geometry constraint solver
//!
//! Turns unclamped user geometry plus the current source resolution into a
//! crop rectangle that is always usable: even dimensions of at least 2 that
//! stay inside the source. The solver is total, out-of-range input is absorbed
//! rather than rejected so the frame loop never waits on valid configuration.

use serde::{Deserialize, Serialize};

/// Smallest extent a crop side may take.
pub const MIN_EXTENT: u32 = 2;

/// Geometry as entered by the user. May be negative, oversized or odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawGeometry {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Default for RawGeometry {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: i64::from(MIN_EXTENT),
            height: i64::from(MIN_EXTENT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResolution {
    pub width: u32,
    pub height: u32,
}

impl SourceResolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Clamped crop rectangle. Always recomputed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Round down to the nearest even value.
///
/// Half-way values go down (3 becomes 2) so the result never exceeds the
/// clamped input it came from.
pub fn round_to_even(v: i64) -> i64 {
    v.div_euclid(2) * 2
}

/// Resolve raw geometry against a source resolution.
///
/// Order matters: the width and height bounds depend on the already clamped
/// origin. Sources smaller than [`MIN_EXTENT`] on a side are treated as
/// [`MIN_EXTENT`].
pub fn resolve(raw: &RawGeometry, source: SourceResolution) -> CropRect {
    let min = i64::from(MIN_EXTENT);
    let source_width = i64::from(source.width.max(MIN_EXTENT));
    let source_height = i64::from(source.height.max(MIN_EXTENT));

    let x = raw.x.clamp(0, source_width - min);
    let y = raw.y.clamp(0, source_height - min);
    let width = round_to_even(raw.width.clamp(min, source_width - x));
    let height = round_to_even(raw.height.clamp(min, source_height - y));

    // Every value above is within [0, u32::MAX] by construction.
    CropRect {
        x: x as u32,
        y: y as u32,
        width: width as u32,
        height: height as u32,
    }
}
