//! Error types for the frame transform pipeline

use crate::capture::PixelFormat;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A presentation surface or transform primitive could not be created.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// A single frame failed mid-transform. The frame is dropped.
    #[error("transform failed during {stage}: {message}")]
    TransformFailure {
        stage: &'static str,
        message: String,
    },

    /// Every handle in the pool is currently held.
    #[error("handle pool exhausted ({capacity} handles outstanding)")]
    ResourceExhausted { capacity: usize },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("buffer too small for {format:?} {width}x{height}: need {needed} bytes, got {got}")]
    BufferTooSmall {
        format: PixelFormat,
        width: u32,
        height: u32,
        needed: usize,
        got: usize,
    },

    #[error(transparent)]
    Resize(#[from] fast_image_resize::ResizeError),

    #[error(transparent)]
    ImageBuffer(#[from] fast_image_resize::ImageBufferError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn transform(stage: &'static str, message: impl Into<String>) -> Self {
        Self::TransformFailure {
            stage,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ResourceUnavailable(message.into())
    }
}
