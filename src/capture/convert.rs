//! Pixel conversion to RGBA for the raster paths

use super::frame::{FrameMetadata, PixelFormat};

/// BT.601 full range.
#[inline]
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = (y + 1.402 * v).clamp(0.0, 255.0);
    let g = (y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0);
    let b = (y + 1.772 * u).clamp(0.0, 255.0);
    [r as u8, g as u8, b as u8, 255]
}

/// Convert the visible region of a tightly packed coded image to RGBA.
pub(crate) fn visible_to_rgba(data: &[u8], meta: &FrameMetadata) -> Vec<u8> {
    let vis = meta.visible;
    let coded_w = meta.coded_width as usize;
    let coded_h = meta.coded_height as usize;
    let (x0, y0) = (vis.x as usize, vis.y as usize);
    let (w, h) = (vis.width as usize, vis.height as usize);

    let mut out = Vec::with_capacity(w * h * 4);
    match meta.format {
        PixelFormat::I420 | PixelFormat::Nv12 => {
            let chroma_w = coded_w.div_ceil(2);
            let chroma_h = coded_h.div_ceil(2);
            let luma = &data[..coded_w * coded_h];
            let chroma = &data[coded_w * coded_h..];
            for row in y0..y0 + h {
                for col in x0..x0 + w {
                    let (cx, cy) = (col / 2, row / 2);
                    let (u, v) = if meta.format == PixelFormat::I420 {
                        let plane = chroma_w * chroma_h;
                        (
                            chroma[cy * chroma_w + cx],
                            chroma[plane + cy * chroma_w + cx],
                        )
                    } else {
                        let at = cy * chroma_w * 2 + cx * 2;
                        (chroma[at], chroma[at + 1])
                    };
                    out.extend_from_slice(&yuv_to_rgba(luma[row * coded_w + col], u, v));
                }
            }
        }
        PixelFormat::Rgba | PixelFormat::Rgbx | PixelFormat::Bgra | PixelFormat::Bgrx => {
            let swap = matches!(meta.format, PixelFormat::Bgra | PixelFormat::Bgrx);
            let opaque = matches!(meta.format, PixelFormat::Rgbx | PixelFormat::Bgrx);
            for row in y0..y0 + h {
                let start = (row * coded_w + x0) * 4;
                for px in data[start..start + w * 4].chunks_exact(4) {
                    let (r, b) = if swap { (px[2], px[0]) } else { (px[0], px[2]) };
                    let a = if opaque { 255 } else { px[3] };
                    out.extend_from_slice(&[r, px[1], b, a]);
                }
            }
        }
    }
    out
}
