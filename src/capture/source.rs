//! Pull-based frame sources

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::frame::{FrameInit, PixelFormat, SourceFrame};
use super::pool::{HandleKind, HandlePool};
use crate::error::Result;
use crate::geometry::SourceResolution;

/// A readable sequence of frames. `None` ends the stream.
///
/// The pipeline only asks for the next frame once the previous one has been
/// fully processed, so implementations never see two requests in flight.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Result<SourceFrame>>;
}

/// Test-pattern generator standing in for a camera.
pub struct SyntheticSource {
    pool: Arc<HandlePool>,
    format: PixelFormat,
    resolution: SourceResolution,
    frame_duration: Duration,
    sequence: u64,
    limit: Option<u64>,
    realtime: bool,
    ticker: Option<Interval>,
}

impl SyntheticSource {
    pub fn new(
        pool: Arc<HandlePool>,
        resolution: SourceResolution,
        format: PixelFormat,
        fps: u32,
    ) -> Self {
        info!(
            "Synthetic source: {}x{} {:?} @ {} fps",
            resolution.width, resolution.height, format, fps
        );
        Self {
            pool,
            format,
            resolution,
            frame_duration: Duration::from_micros(1_000_000 / u64::from(fps.max(1))),
            sequence: 0,
            limit: None,
            realtime: false,
            ticker: None,
        }
    }

    /// End the stream after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Pace frames at the configured rate instead of as fast as pulled.
    pub fn paced(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn resolution(&self) -> SourceResolution {
        self.resolution
    }

    /// Diagonal gradient that drifts by one sample per frame.
    fn render(&self, sequence: u64) -> Bytes {
        let (w, h) = (self.resolution.width, self.resolution.height);
        let shift = sequence as u32;
        let mut data = vec![0u8; self.format.allocation_size(w, h)];

        if self.format.is_subsampled() {
            let luma = w as usize * h as usize;
            for (i, y) in data[..luma].iter_mut().enumerate() {
                let (col, row) = ((i % w as usize) as u32, (i / w as usize) as u32);
                *y = col.wrapping_add(row).wrapping_add(shift) as u8;
            }
            for (i, c) in data[luma..].iter_mut().enumerate() {
                *c = 128u8.wrapping_add((i as u32).wrapping_add(shift) as u8 >> 4);
            }
        } else {
            for (i, px) in data.chunks_exact_mut(4).enumerate() {
                let (col, row) = ((i % w as usize) as u32, (i / w as usize) as u32);
                px.copy_from_slice(&[
                    col.wrapping_add(shift) as u8,
                    row as u8,
                    shift.wrapping_mul(3) as u8,
                    255,
                ]);
            }
        }
        Bytes::from(data)
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> Option<Result<SourceFrame>> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            debug!("Synthetic source exhausted after {} frames", self.sequence);
            return None;
        }

        if self.realtime {
            let period = self.frame_duration;
            let ticker = self.ticker.get_or_insert_with(|| {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
            ticker.tick().await;
        }

        let sequence = self.sequence;
        self.sequence += 1;

        let lease = match self.pool.acquire(HandleKind::Source) {
            Ok(lease) => lease,
            Err(e) => return Some(Err(e)),
        };
        let duration_us = self.frame_duration.as_micros() as u64;
        let init = FrameInit {
            sequence,
            format: self.format,
            coded_width: self.resolution.width,
            coded_height: self.resolution.height,
            timestamp_us: (sequence * duration_us) as i64,
            duration_us: Some(duration_us),
        };
        Some(SourceFrame::from_bytes(self.render(sequence), init, lease))
    }
}

/// Frames pushed by an external capture loop.
pub struct ChannelSource {
    rx: flume::Receiver<SourceFrame>,
}

impl ChannelSource {
    pub fn new(rx: flume::Receiver<SourceFrame>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<SourceFrame>> {
        self.rx.recv_async().await.ok().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_source_stops_at_limit() {
        let pool = HandlePool::new(4);
        let mut source =
            SyntheticSource::new(Arc::clone(&pool), SourceResolution::new(8, 4), PixelFormat::I420, 30)
                .with_limit(3);

        let mut timestamps = Vec::new();
        while let Some(frame) = source.next_frame().await {
            let frame = frame.unwrap();
            assert_eq!(frame.resolution(), SourceResolution::new(8, 4));
            assert_eq!(frame.handle_kind(), HandleKind::Source);
            timestamps.push(frame.timestamp_us());
        }

        assert_eq!(timestamps, vec![0, 33_333, 66_666]);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.released(HandleKind::Source), 3);
    }

    #[tokio::test]
    async fn pattern_indexes_rows_of_non_square_frames() {
        let pool = HandlePool::new(2);
        let mut rgba =
            SyntheticSource::new(Arc::clone(&pool), SourceResolution::new(5, 3), PixelFormat::Rgba, 30);
        let frame = rgba.next_frame().await.unwrap().unwrap();
        let px = &frame.to_rgba()[(2 * 5 + 4) * 4..][..4];
        assert_eq!(px, &[4, 2, 0, 255]);

        let mut i420 =
            SyntheticSource::new(Arc::clone(&pool), SourceResolution::new(6, 4), PixelFormat::I420, 30);
        let frame = i420.next_frame().await.unwrap().unwrap();
        let mut packed = vec![0u8; frame.allocation_size()];
        frame.copy_to(&mut packed).unwrap();
        assert_eq!(packed[3 * 6 + 5], 8);
    }

    #[tokio::test]
    async fn held_frames_exhaust_the_pool() {
        let pool = HandlePool::new(1);
        let mut source =
            SyntheticSource::new(Arc::clone(&pool), SourceResolution::new(4, 4), PixelFormat::Rgba, 60);
        let _held = source.next_frame().await.unwrap().unwrap();
        assert!(source.next_frame().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn channel_source_ends_when_sender_drops() {
        let pool = HandlePool::new(2);
        let (tx, rx) = flume::bounded(1);
        let mut source = ChannelSource::new(rx);

        let mut synthetic =
            SyntheticSource::new(Arc::clone(&pool), SourceResolution::new(4, 4), PixelFormat::Rgba, 30);
        tx.send_async(synthetic.next_frame().await.unwrap().unwrap())
            .await
            .unwrap();
        drop(tx);

        assert!(source.next_frame().await.is_some());
        assert!(source.next_frame().await.is_none());
    }
}
