//! Presentation surfaces
//!
//! The transform strategies that rasterize go through [`Compositor`], so a GPU
//! backend can replace the CPU one without touching the pipeline.

pub mod cpu;
pub mod present;

use async_trait::async_trait;
use bytes::Bytes;

use crate::capture::{FrameInit, FrameMetadata, HandleLease, PixelFormat, SourceFrame};
use crate::error::Result;

pub use cpu::{CpuCompositor, CpuSurface};
pub use present::{NullPresenter, PresentTarget, Presenter, SurfacePresenter};

/// Creates bitmaps and off-screen raster surfaces.
#[async_trait]
pub trait Compositor: Send + Sync {
    /// Rasterize the visible region of `frame` into a `width` x `height`
    /// RGBA bitmap in one resize step.
    async fn create_bitmap(
        &self,
        frame: &SourceFrame,
        width: u32,
        height: u32,
        lease: HandleLease,
    ) -> Result<Bitmap>;

    /// Off-screen RGBA surface. Fails with `ResourceUnavailable` when no
    /// drawing context can be created.
    fn create_surface(&self, width: u32, height: u32) -> Result<Box<dyn Surface>>;
}

/// Off-screen raster target.
pub trait Surface: Send {
    fn size(&self) -> (u32, u32);

    /// Draw the visible region of `frame` at the origin, scaled to
    /// `width` x `height`.
    fn draw_frame(&mut self, frame: &SourceFrame, width: u32, height: u32) -> Result<()>;

    /// Read the whole surface back as RGBA.
    fn read_pixels(&self, dst: &mut [u8]) -> Result<()>;
}

/// Decoded RGBA image holding a pool handle.
pub struct Bitmap {
    data: Bytes,
    width: u32,
    height: u32,
    _lease: HandleLease,
}

impl Bitmap {
    pub fn new(data: Bytes, width: u32, height: u32, lease: HandleLease) -> Self {
        Self {
            data,
            width,
            height,
            _lease: lease,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Frame sharing this bitmap's pixels, carrying `timing`'s timestamp
    /// and duration.
    pub fn to_frame(&self, timing: &FrameMetadata, lease: HandleLease) -> Result<SourceFrame> {
        SourceFrame::from_bytes(
            self.data.clone(),
            FrameInit::derived(timing, PixelFormat::Rgba, self.width, self.height),
            lease,
        )
    }
}
