use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::convert;
use super::pool::{HandleKind, HandleLease};
use crate::error::{Error, Result};
use crate::geometry::{CropRect, SourceResolution};

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// Planar 4:2:0, Y then U then V.
    I420,
    /// Semi-planar 4:2:0, Y then interleaved UV.
    Nv12,
    Rgba,
    Rgbx,
    Bgra,
    Bgrx,
}

/// Sample layout of one plane relative to the luma/pixel grid.
#[derive(Debug, Clone, Copy)]
struct PlaneSpec {
    bytes_per_sample: usize,
    h_sub: u32,
    v_sub: u32,
}

const fn plane(bytes_per_sample: usize, h_sub: u32, v_sub: u32) -> PlaneSpec {
    PlaneSpec {
        bytes_per_sample,
        h_sub,
        v_sub,
    }
}

impl PlaneSpec {
    fn row_bytes(&self, width: u32) -> usize {
        width.div_ceil(self.h_sub) as usize * self.bytes_per_sample
    }

    fn rows(&self, height: u32) -> usize {
        height.div_ceil(self.v_sub) as usize
    }
}

impl PixelFormat {
    fn planes(self) -> &'static [PlaneSpec] {
        const I420: [PlaneSpec; 3] = [plane(1, 1, 1), plane(1, 2, 2), plane(1, 2, 2)];
        const NV12: [PlaneSpec; 2] = [plane(1, 1, 1), plane(2, 2, 2)];
        const PACKED: [PlaneSpec; 1] = [plane(4, 1, 1)];
        match self {
            PixelFormat::I420 => &I420,
            PixelFormat::Nv12 => &NV12,
            PixelFormat::Rgba | PixelFormat::Rgbx | PixelFormat::Bgra | PixelFormat::Bgrx => {
                &PACKED
            }
        }
    }

    pub fn is_subsampled(self) -> bool {
        matches!(self, PixelFormat::I420 | PixelFormat::Nv12)
    }

    /// Bytes needed to hold a tightly packed `width` x `height` image.
    ///
    /// For even dimensions this is `ceil(w * h * 1.5)` for the 4:2:0 formats
    /// and `w * h * 4` for the packed ones.
    pub fn allocation_size(self, width: u32, height: u32) -> usize {
        self.planes()
            .iter()
            .map(|p| p.row_bytes(width) * p.rows(height))
            .sum()
    }

    /// Offsets and strides of each plane in a tightly packed image.
    pub fn layout(self, width: u32, height: u32) -> Vec<PlaneLayout> {
        let mut offset = 0;
        self.planes()
            .iter()
            .map(|p| {
                let layout = PlaneLayout {
                    offset,
                    stride: p.row_bytes(width),
                };
                offset += p.row_bytes(width) * p.rows(height);
                layout
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub stride: usize,
}

/// Region of the coded area that is in view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisibleRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl VisibleRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

impl From<CropRect> for VisibleRect {
    fn from(rect: CropRect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub format: PixelFormat,
    pub coded_width: u32,
    pub coded_height: u32,
    pub visible: VisibleRect,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
    pub duration_us: Option<u64>,
}

/// Parameters for building a frame around tightly packed pixels.
#[derive(Debug, Clone, Copy)]
pub struct FrameInit {
    pub sequence: u64,
    pub format: PixelFormat,
    pub coded_width: u32,
    pub coded_height: u32,
    pub timestamp_us: i64,
    pub duration_us: Option<u64>,
}

impl FrameInit {
    /// Same timing metadata as `meta`, new format and size.
    pub fn derived(meta: &FrameMetadata, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            sequence: meta.sequence,
            format,
            coded_width: width,
            coded_height: height,
            timestamp_us: meta.timestamp_us,
            duration_us: meta.duration_us,
        }
    }
}

/// One image from the frame stream.
///
/// Pixel data is shared, so views built with [`SourceFrame::with_visible_rect`]
/// cost no copy. Each frame owns a pool lease that is released when the frame
/// is closed or dropped.
pub struct SourceFrame {
    data: Bytes,
    meta: FrameMetadata,
    lease: HandleLease,
}

impl SourceFrame {
    /// Wrap existing pixel data without copying.
    pub fn from_bytes(data: Bytes, init: FrameInit, lease: HandleLease) -> Result<Self> {
        if init.coded_width == 0 || init.coded_height == 0 {
            return Err(Error::InvalidFrame(format!(
                "empty coded size {}x{}",
                init.coded_width, init.coded_height
            )));
        }
        let needed = init.format.allocation_size(init.coded_width, init.coded_height);
        if data.len() < needed {
            return Err(Error::BufferTooSmall {
                format: init.format,
                width: init.coded_width,
                height: init.coded_height,
                needed,
                got: data.len(),
            });
        }

        Ok(Self {
            data,
            meta: FrameMetadata {
                sequence: init.sequence,
                format: init.format,
                coded_width: init.coded_width,
                coded_height: init.coded_height,
                visible: VisibleRect::full(init.coded_width, init.coded_height),
                timestamp_us: init.timestamp_us,
                duration_us: init.duration_us,
            },
            lease,
        })
    }

    /// Build a frame by copying out of `buffer`.
    pub fn from_buffer(buffer: &[u8], init: FrameInit, lease: HandleLease) -> Result<Self> {
        let needed = init
            .format
            .allocation_size(init.coded_width, init.coded_height)
            .min(buffer.len());
        Self::from_bytes(Bytes::copy_from_slice(&buffer[..needed]), init, lease)
    }

    /// A view of this frame restricted to `rect`, sharing pixel data.
    pub fn with_visible_rect(&self, rect: VisibleRect, lease: HandleLease) -> Result<Self> {
        if rect.width == 0
            || rect.height == 0
            || rect.x.saturating_add(rect.width) > self.meta.coded_width
            || rect.y.saturating_add(rect.height) > self.meta.coded_height
        {
            return Err(Error::InvalidFrame(format!(
                "visible rect {rect:?} outside coded area {}x{}",
                self.meta.coded_width, self.meta.coded_height
            )));
        }

        Ok(Self {
            data: self.data.clone(),
            meta: FrameMetadata {
                visible: rect,
                ..self.meta.clone()
            },
            lease,
        })
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn visible(&self) -> VisibleRect {
        self.meta.visible
    }

    pub fn display_width(&self) -> u32 {
        self.meta.visible.width
    }

    pub fn display_height(&self) -> u32 {
        self.meta.visible.height
    }

    /// Declared display size, used as the source resolution for cropping.
    pub fn resolution(&self) -> SourceResolution {
        SourceResolution::new(self.display_width(), self.display_height())
    }

    pub fn timestamp_us(&self) -> i64 {
        self.meta.timestamp_us
    }

    pub fn duration_us(&self) -> Option<u64> {
        self.meta.duration_us
    }

    pub fn handle_kind(&self) -> HandleKind {
        self.lease.kind()
    }

    /// Bytes needed by [`SourceFrame::copy_to`].
    pub fn allocation_size(&self) -> usize {
        self.meta
            .format
            .allocation_size(self.display_width(), self.display_height())
    }

    /// Copy the visible region into `dst`, tightly packed.
    ///
    /// Chroma of the 4:2:0 formats is sampled from the pair containing the
    /// visible origin, so odd origins shift chroma by at most one luma sample.
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<Vec<PlaneLayout>> {
        let needed = self.allocation_size();
        if dst.len() < needed {
            return Err(Error::BufferTooSmall {
                format: self.meta.format,
                width: self.display_width(),
                height: self.display_height(),
                needed,
                got: dst.len(),
            });
        }

        let vis = self.meta.visible;
        let src_layout = self.meta.format.layout(self.meta.coded_width, self.meta.coded_height);
        let dst_layout = self.meta.format.layout(vis.width, vis.height);

        for ((spec, src), out) in self
            .meta
            .format
            .planes()
            .iter()
            .zip(&src_layout)
            .zip(&dst_layout)
        {
            let x0 = (vis.x / spec.h_sub) as usize * spec.bytes_per_sample;
            let y0 = (vis.y / spec.v_sub) as usize;
            let row_bytes = spec.row_bytes(vis.width);
            for row in 0..spec.rows(vis.height) {
                let from = src.offset + (y0 + row) * src.stride + x0;
                let to = out.offset + row * out.stride;
                dst[to..to + row_bytes].copy_from_slice(&self.data[from..from + row_bytes]);
            }
        }

        Ok(dst_layout)
    }

    /// Visible region as tightly packed RGBA.
    pub fn to_rgba(&self) -> Vec<u8> {
        convert::visible_to_rgba(&self.data, &self.meta)
    }

    /// Release the frame's handle now.
    pub fn close(self) {}
}

impl fmt::Debug for SourceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFrame")
            .field("meta", &self.meta)
            .field("kind", &self.lease.kind())
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pool::HandlePool;

    fn init(format: PixelFormat, width: u32, height: u32) -> FrameInit {
        FrameInit {
            sequence: 1,
            format,
            coded_width: width,
            coded_height: height,
            timestamp_us: 33_333,
            duration_us: Some(33_333),
        }
    }

    #[test]
    fn allocation_sizes_match_packed_and_rgba_formulas() {
        assert_eq!(PixelFormat::I420.allocation_size(640, 360), 345_600);
        assert_eq!(PixelFormat::Nv12.allocation_size(640, 360), 345_600);
        assert_eq!(PixelFormat::Rgba.allocation_size(640, 360), 921_600);
        assert_eq!(PixelFormat::I420.allocation_size(2, 2), 6);
    }

    #[test]
    fn i420_layout_places_chroma_after_luma() {
        let layout = PixelFormat::I420.layout(4, 2);
        assert_eq!(
            layout,
            vec![
                PlaneLayout { offset: 0, stride: 4 },
                PlaneLayout { offset: 8, stride: 2 },
                PlaneLayout { offset: 10, stride: 2 },
            ]
        );
    }

    #[test]
    fn copy_to_extracts_visible_rgba_region() {
        let pool = HandlePool::new(4);
        // 4x2 RGBA where each pixel's bytes are its index.
        let pixels: Vec<u8> = (0..8u8).flat_map(|i| [i, i, i, 255]).collect();
        let frame = SourceFrame::from_bytes(
            Bytes::from(pixels),
            init(PixelFormat::Rgba, 4, 2),
            pool.acquire(HandleKind::Source).unwrap(),
        )
        .unwrap();

        let rect = VisibleRect { x: 2, y: 0, width: 2, height: 2 };
        let view = frame
            .with_visible_rect(rect, pool.acquire(HandleKind::Intermediate).unwrap())
            .unwrap();
        assert_eq!(view.resolution(), SourceResolution::new(2, 2));

        let mut dst = vec![0; view.allocation_size()];
        view.copy_to(&mut dst).unwrap();
        let firsts: Vec<u8> = dst.chunks(4).map(|px| px[0]).collect();
        assert_eq!(firsts, vec![2, 3, 6, 7]);
    }

    #[test]
    fn copy_to_extracts_i420_planes() {
        let pool = HandlePool::new(4);
        let mut data = vec![0u8; PixelFormat::I420.allocation_size(4, 4)];
        for (i, y) in data[..16].iter_mut().enumerate() {
            *y = i as u8;
        }
        // U plane 2x2 then V plane 2x2.
        data[16..20].copy_from_slice(&[100, 101, 102, 103]);
        data[20..24].copy_from_slice(&[200, 201, 202, 203]);

        let frame = SourceFrame::from_bytes(
            Bytes::from(data),
            init(PixelFormat::I420, 4, 4),
            pool.acquire(HandleKind::Source).unwrap(),
        )
        .unwrap();
        let view = frame
            .with_visible_rect(
                VisibleRect { x: 2, y: 2, width: 2, height: 2 },
                pool.acquire(HandleKind::Intermediate).unwrap(),
            )
            .unwrap();

        let mut dst = vec![0; 6];
        view.copy_to(&mut dst).unwrap();
        assert_eq!(dst, vec![10, 11, 14, 15, 103, 203]);
    }

    #[test]
    fn view_outside_coded_area_is_rejected() {
        let pool = HandlePool::new(4);
        let frame = SourceFrame::from_bytes(
            Bytes::from(vec![0u8; 16]),
            init(PixelFormat::Rgba, 2, 2),
            pool.acquire(HandleKind::Source).unwrap(),
        )
        .unwrap();
        let err = frame
            .with_visible_rect(
                VisibleRect { x: 1, y: 0, width: 2, height: 2 },
                pool.acquire(HandleKind::Intermediate).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
        // The lease passed to the failed call went back to the pool.
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let pool = HandlePool::new(1);
        let err = SourceFrame::from_buffer(
            &[0u8; 5],
            init(PixelFormat::I420, 2, 2),
            pool.acquire(HandleKind::Output).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { needed: 6, got: 5, .. }));
        assert_eq!(pool.outstanding(), 0);
    }
}
