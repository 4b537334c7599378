//! CPU compositor: SIMD resize for bitmaps, `image` canvases for surfaces

use async_trait::async_trait;
use bytes::Bytes;
use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x4;
use fir::{FilterType, ResizeAlg, ResizeOptions, Resizer};
use image::imageops::{self, FilterType as CanvasFilter};
use image::RgbaImage;
use tracing::{debug, instrument};

use super::{Bitmap, Compositor, Surface};
use crate::capture::{HandleLease, PixelFormat, SourceFrame};
use crate::error::{Error, Result};

/// Largest surface side, matching common GPU texture limits.
pub const DEFAULT_MAX_EXTENT: u32 = 16_384;

#[derive(Debug, Clone)]
pub struct CpuCompositor {
    max_extent: u32,
}

impl Default for CpuCompositor {
    fn default() -> Self {
        Self {
            max_extent: DEFAULT_MAX_EXTENT,
        }
    }
}

impl CpuCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_extent(max_extent: u32) -> Self {
        Self { max_extent }
    }
}

/// Bilinear resize of a tightly packed RGBA image.
fn resize_rgba(src: &[u8], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Result<Vec<u8>> {
    let src_view = TypedImageRef::<U8x4>::from_buffer(src_w, src_h, src)?;
    let mut dst = vec![0u8; PixelFormat::Rgba.allocation_size(dst_w, dst_h)];
    {
        let mut dst_image = TypedImage::<U8x4>::from_buffer(dst_w, dst_h, &mut dst)?;
        let opts = ResizeOptions::new()
            .resize_alg(ResizeAlg::Convolution(FilterType::Bilinear))
            .use_alpha(false);
        Resizer::new().resize_typed::<U8x4>(&src_view, &mut dst_image, &opts)?;
    }
    Ok(dst)
}

#[async_trait]
impl Compositor for CpuCompositor {
    #[instrument(level = "trace", skip(self, frame, lease))]
    async fn create_bitmap(
        &self,
        frame: &SourceFrame,
        width: u32,
        height: u32,
        lease: HandleLease,
    ) -> Result<Bitmap> {
        if width == 0 || height == 0 || width > self.max_extent || height > self.max_extent {
            return Err(Error::transform(
                "bitmap",
                format!("cannot create {width}x{height} bitmap"),
            ));
        }

        let rgba = frame.to_rgba();
        let (src_w, src_h) = (frame.display_width(), frame.display_height());
        let pixels = tokio::task::spawn_blocking(move || {
            resize_rgba(&rgba, src_w, src_h, width, height)
        })
        .await
        .map_err(|e| Error::transform("bitmap", e.to_string()))??;

        Ok(Bitmap::new(Bytes::from(pixels), width, height, lease))
    }

    fn create_surface(&self, width: u32, height: u32) -> Result<Box<dyn Surface>> {
        if width == 0 || height == 0 || width > self.max_extent || height > self.max_extent {
            return Err(Error::unavailable(format!(
                "no 2d context for {width}x{height} surface (max {})",
                self.max_extent
            )));
        }
        debug!("Creating {}x{} raster surface", width, height);
        Ok(Box::new(CpuSurface::new(width, height)))
    }
}

/// RGBA canvas backed by an `image` buffer.
pub struct CpuSurface {
    canvas: RgbaImage,
}

impl CpuSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
        }
    }
}

impl Surface for CpuSurface {
    fn size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn draw_frame(&mut self, frame: &SourceFrame, width: u32, height: u32) -> Result<()> {
        let src = RgbaImage::from_raw(frame.display_width(), frame.display_height(), frame.to_rgba())
            .ok_or_else(|| Error::transform("surface", "frame pixels do not fill its size"))?;
        if src.dimensions() == (width, height) {
            imageops::replace(&mut self.canvas, &src, 0, 0);
        } else {
            let scaled = imageops::resize(&src, width, height, CanvasFilter::Triangle);
            imageops::replace(&mut self.canvas, &scaled, 0, 0);
        }
        Ok(())
    }

    fn read_pixels(&self, dst: &mut [u8]) -> Result<()> {
        let raw = self.canvas.as_raw();
        if dst.len() < raw.len() {
            let (width, height) = self.canvas.dimensions();
            return Err(Error::BufferTooSmall {
                format: PixelFormat::Rgba,
                width,
                height,
                needed: raw.len(),
                got: dst.len(),
            });
        }
        dst[..raw.len()].copy_from_slice(raw);
        Ok(())
    }
}
