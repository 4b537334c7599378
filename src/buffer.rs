//! Reusable pixel scratch buffer

use tracing::debug;

use crate::capture::PixelFormat;

/// Byte region sized for the current crop rectangle and target format.
///
/// The buffer is only reallocated when the implied size or format changes,
/// so a steady crop costs no allocation per frame.
#[derive(Debug, Default)]
pub struct PixelBuffer {
    data: Vec<u8>,
    shape: Option<(PixelFormat, u32, u32)>,
    reallocations: u64,
}

impl PixelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the buffer fit `format` at `width` x `height`. Returns `true` if
    /// it had to be reallocated.
    pub fn ensure(&mut self, format: PixelFormat, width: u32, height: u32) -> bool {
        let size = format.allocation_size(width, height);
        let same_format = self.shape.is_some_and(|(current, _, _)| current == format);
        self.shape = Some((format, width, height));
        if same_format && self.data.len() == size {
            return false;
        }

        debug!(
            "Reallocating {:?} buffer: {} -> {} bytes ({}x{})",
            format,
            self.data.len(),
            size,
            width,
            height
        );
        self.data = vec![0; size];
        self.reallocations += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Format and size the buffer was last fitted to.
    pub fn shape(&self) -> Option<(PixelFormat, u32, u32)> {
        self.shape
    }

    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }
}
