//! Shared crop settings
//!
//! One explicit handle, cloned into whoever needs it. Setters accept any
//! integer; the crop rectangle is derived on every read so it can never go
//! stale against a resolution change.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::capture::PixelFormat;
use crate::geometry::{resolve, CropRect, RawGeometry, SourceResolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometrySettings {
    pub raw: RawGeometry,
    pub resolution: SourceResolution,
}

impl GeometrySettings {
    pub fn crop_rect(&self) -> CropRect {
        resolve(&self.raw, self.resolution)
    }

    /// Crop rectangle against a frame's own resolution.
    pub fn crop_rect_for(&self, resolution: SourceResolution) -> CropRect {
        resolve(&self.raw, resolution)
    }
}

#[derive(Clone)]
pub struct Settings {
    inner: Arc<ArcSwap<GeometrySettings>>,
}

impl Settings {
    pub fn new(raw: RawGeometry, resolution: SourceResolution) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(GeometrySettings { raw, resolution })),
        }
    }

    /// Current values. The pipeline reads this once at the start of a frame.
    pub fn snapshot(&self) -> GeometrySettings {
        **self.inner.load()
    }

    fn update(&self, f: impl Fn(&mut GeometrySettings)) {
        self.inner.rcu(|current| {
            let mut next = **current;
            f(&mut next);
            next
        });
        debug!(settings = ?self.snapshot(), "Crop settings updated");
    }

    pub fn set_x(&self, x: i64) {
        self.update(|s| s.raw.x = x);
    }

    pub fn set_y(&self, y: i64) {
        self.update(|s| s.raw.y = y);
    }

    pub fn set_width(&self, width: i64) {
        self.update(|s| s.raw.width = width);
    }

    pub fn set_height(&self, height: i64) {
        self.update(|s| s.raw.height = height);
    }

    pub fn set_geometry(&self, raw: RawGeometry) {
        self.update(|s| s.raw = raw);
    }

    pub fn set_resolution(&self, resolution: SourceResolution) {
        self.update(|s| s.resolution = resolution);
    }

    pub fn raw(&self) -> RawGeometry {
        self.snapshot().raw
    }

    pub fn resolution(&self) -> SourceResolution {
        self.snapshot().resolution
    }

    pub fn crop_rect(&self) -> CropRect {
        self.snapshot().crop_rect()
    }

    /// Size of the direct-copy buffer for `format` at the current crop.
    pub fn copied_buffer_size(&self, format: PixelFormat) -> usize {
        let rect = self.crop_rect();
        format.allocation_size(rect.width, rect.height)
    }

    /// Size of the RGBA buffer at the current crop.
    pub fn copied_rgba_buffer_size(&self) -> usize {
        self.copied_buffer_size(PixelFormat::Rgba)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(RawGeometry::default(), SourceResolution::new(1920, 1080))
    }
}
