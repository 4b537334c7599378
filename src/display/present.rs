//! Display sinks for the reconstructed and cropped frames

use std::collections::HashMap;
use std::sync::Arc;

use super::{Compositor, Surface};
use crate::capture::{PixelFormat, SourceFrame};
use crate::error::Result;

/// Which frame is being shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentTarget {
    /// Frame rebuilt from the copied buffer.
    BufferFrame,
    /// Visible-rect view of the source frame.
    ViewFrame,
}

pub trait Presenter: Send {
    fn present(&mut self, target: PresentTarget, frame: &SourceFrame) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _target: PresentTarget, _frame: &SourceFrame) -> Result<()> {
        Ok(())
    }
}

/// Draws each target onto its own surface sized to the frame.
pub struct SurfacePresenter {
    compositor: Arc<dyn Compositor>,
    surfaces: HashMap<PresentTarget, Box<dyn Surface>>,
}

impl SurfacePresenter {
    pub fn new(compositor: Arc<dyn Compositor>) -> Self {
        Self {
            compositor,
            surfaces: HashMap::new(),
        }
    }

    /// RGBA contents of the surface last drawn for `target`.
    pub fn snapshot(&self, target: PresentTarget) -> Option<Vec<u8>> {
        let surface = self.surfaces.get(&target)?;
        let (w, h) = surface.size();
        let mut pixels = vec![0u8; PixelFormat::Rgba.allocation_size(w, h)];
        surface.read_pixels(&mut pixels).ok()?;
        Some(pixels)
    }
}

impl Presenter for SurfacePresenter {
    fn present(&mut self, target: PresentTarget, frame: &SourceFrame) -> Result<()> {
        let size = (frame.display_width(), frame.display_height());
        let stale = self
            .surfaces
            .get(&target)
            .map_or(true, |surface| surface.size() != size);
        if stale {
            let surface = self.compositor.create_surface(size.0, size.1)?;
            self.surfaces.insert(target, surface);
        }

        match self.surfaces.get_mut(&target) {
            Some(surface) => surface.draw_frame(frame, size.0, size.1),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameInit, HandleKind, HandlePool};
    use crate::display::CpuCompositor;
    use bytes::Bytes;

    #[test]
    fn surface_follows_frame_size() {
        let pool = HandlePool::new(4);
        let frame = |w: u32, h: u32| {
            SourceFrame::from_bytes(
                Bytes::from(vec![255u8; PixelFormat::Rgba.allocation_size(w, h)]),
                FrameInit {
                    sequence: 0,
                    format: PixelFormat::Rgba,
                    coded_width: w,
                    coded_height: h,
                    timestamp_us: 0,
                    duration_us: None,
                },
                pool.acquire(HandleKind::Output).unwrap(),
            )
            .unwrap()
        };

        let mut presenter = SurfacePresenter::new(Arc::new(CpuCompositor::new()));
        assert!(presenter.snapshot(PresentTarget::BufferFrame).is_none());

        presenter.present(PresentTarget::BufferFrame, &frame(2, 2)).unwrap();
        assert_eq!(presenter.snapshot(PresentTarget::BufferFrame).unwrap().len(), 16);

        presenter.present(PresentTarget::BufferFrame, &frame(4, 2)).unwrap();
        let pixels = presenter.snapshot(PresentTarget::BufferFrame).unwrap();
        assert_eq!(pixels.len(), 32);
        assert!(pixels.iter().all(|&b| b == 255));
    }
}
