//! Per-frame crop transform
//!
//! Each frame is cropped by every active strategy in turn. The output
//! strategy's result becomes the emitted frame; the others only feed their
//! latency series.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::strategy::Strategy;
use super::PipelineCounters;
use crate::buffer::PixelBuffer;
use crate::capture::{
    FrameInit, FrameSource, HandleKind, HandlePool, PixelFormat, SourceFrame, VisibleRect,
};
use crate::display::{Compositor, PresentTarget, Presenter, Surface};
use crate::error::{Error, Result};
use crate::geometry::{CropRect, SourceResolution, MIN_EXTENT};
use crate::profiler::{LatencyBoard, Profilers, Stage};
use crate::settings::Settings;
use crate::PipelineConfig;

/// Wait after a failed read before asking the source again.
const SOURCE_RETRY: Duration = Duration::from_millis(10);

pub struct FramePipeline {
    settings: Settings,
    strategies: &'static [Strategy],
    output: Strategy,
    pool: Arc<HandlePool>,
    compositor: Arc<dyn Compositor>,
    presenter: Option<Box<dyn Presenter>>,
    profilers: Profilers,
    board: LatencyBoard,
    counters: Arc<PipelineCounters>,
    direct: PixelBuffer,
    bitmap: PixelBuffer,
    readback: PixelBuffer,
    surface: Option<Box<dyn Surface>>,
    last_crop: Option<CropRect>,
    last_resolution: Option<SourceResolution>,
}

impl FramePipeline {
    /// Fails with `ResourceUnavailable` when the surface strategy is active,
    /// or presenting is enabled, and the compositor cannot create a drawing
    /// context.
    pub fn new(
        config: &PipelineConfig,
        settings: Settings,
        pool: Arc<HandlePool>,
        compositor: Arc<dyn Compositor>,
    ) -> Result<Self> {
        let strategies = config.mode.strategies(config.strategy);
        let surface = if strategies.contains(&Strategy::SurfaceDraw) {
            Some(compositor.create_surface(MIN_EXTENT, MIN_EXTENT)?)
        } else {
            None
        };
        if config.present {
            compositor.create_surface(MIN_EXTENT, MIN_EXTENT)?;
        }

        info!(
            mode = ?config.mode,
            output = %config.strategy,
            "Frame pipeline ready ({} strategies)",
            strategies.len()
        );

        Ok(Self {
            settings,
            strategies,
            output: config.strategy,
            pool,
            compositor,
            presenter: None,
            profilers: Profilers::new(),
            board: LatencyBoard::new(),
            counters: Arc::new(PipelineCounters::default()),
            direct: PixelBuffer::new(),
            bitmap: PixelBuffer::new(),
            readback: PixelBuffer::new(),
            surface,
            last_crop: None,
            last_resolution: None,
        })
    }

    pub fn with_presenter(mut self, presenter: Box<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Continue existing latency series instead of starting empty ones.
    pub fn with_profilers(mut self, profilers: Profilers) -> Self {
        self.profilers = profilers;
        self
    }

    pub fn with_board(mut self, board: LatencyBoard) -> Self {
        self.board = board;
        self
    }

    pub fn with_counters(mut self, counters: Arc<PipelineCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> &Arc<PipelineCounters> {
        &self.counters
    }

    pub fn profilers(&self) -> &Profilers {
        &self.profilers
    }

    pub fn into_profilers(self) -> Profilers {
        self.profilers
    }

    pub fn output_strategy(&self) -> Strategy {
        self.output
    }

    /// Crop one frame. The source frame is closed before this returns,
    /// whether or not the transform succeeded.
    #[instrument(level = "debug", skip_all, fields(sequence = frame.meta().sequence))]
    pub async fn process(&mut self, frame: SourceFrame) -> Result<SourceFrame> {
        self.counters.record_received();

        let resolution = frame.resolution();
        let crop = self.settings.snapshot().crop_rect_for(resolution);
        self.last_crop = Some(crop);
        self.last_resolution = Some(resolution);
        self.fit_buffers(frame.format(), crop);

        let result = self.transform(&frame, crop).await;
        frame.close();
        self.publish();
        result
    }

    async fn transform(&mut self, frame: &SourceFrame, crop: CropRect) -> Result<SourceFrame> {
        let strategies = self.strategies;
        let mut output = None;
        for &strategy in strategies {
            let produced = match strategy {
                Strategy::DirectCopy => self.direct_copy(frame, crop).map(Some),
                Strategy::BitmapResize => self.bitmap_resize(frame, crop).await.map(|()| None),
                Strategy::SurfaceDraw => self.surface_draw(frame, crop).map(|()| None),
            }
            .map_err(|e| failure(strategy, e))?;

            if strategy == self.output {
                output = produced;
            }
        }

        match output {
            Some(frame) => Ok(frame),
            None => self
                .rebuild_from_rgba(frame, crop)
                .map_err(|e| failure(self.output, e)),
        }
    }

    fn direct_copy(&mut self, frame: &SourceFrame, crop: CropRect) -> Result<SourceFrame> {
        let visible = frame.visible();
        let rect = VisibleRect {
            x: visible.x + crop.x,
            y: visible.y + crop.y,
            width: crop.width,
            height: crop.height,
        };
        let pool = &self.pool;

        let view = self
            .profilers
            .get_mut(Stage::ConstructFrame)
            .measure(|| frame.with_visible_rect(rect, pool.acquire(HandleKind::Intermediate)?))?;

        let buffer = &mut self.direct;
        self.profilers
            .get_mut(Stage::CopyToBuffer)
            .measure(|| view.copy_to(buffer.as_mut_slice()))?;

        let init = FrameInit::derived(frame.meta(), view.format(), crop.width, crop.height);
        let buffer = &self.direct;
        let rebuilt = self.profilers.get_mut(Stage::BufferToFrame).measure(|| {
            SourceFrame::from_buffer(buffer.as_slice(), init, pool.acquire(HandleKind::Output)?)
        })?;

        if let Some(presenter) = self.presenter.as_mut() {
            let targets = [
                (Stage::PresentBufferFrame, PresentTarget::BufferFrame, &rebuilt),
                (Stage::PresentViewFrame, PresentTarget::ViewFrame, &view),
            ];
            for (stage, target, shown) in targets {
                let profiler = self.profilers.get_mut(stage);
                if let Err(e) = profiler.measure_ok(|| presenter.present(target, shown)) {
                    warn!("Presenting {:?} failed: {}", target, e);
                }
            }
        }

        Ok(rebuilt)
    }

    async fn bitmap_resize(&mut self, frame: &SourceFrame, crop: CropRect) -> Result<()> {
        let compositor = &self.compositor;
        let pool = &self.pool;
        let buffer = &mut self.bitmap;

        self.profilers
            .get_mut(Stage::BitmapToBuffer)
            .measure_async(async move {
                let lease = pool.acquire(HandleKind::Intermediate)?;
                let bitmap = compositor
                    .create_bitmap(frame, crop.width, crop.height, lease)
                    .await?;
                let as_frame =
                    bitmap.to_frame(frame.meta(), pool.acquire(HandleKind::Intermediate)?)?;
                as_frame.copy_to(buffer.as_mut_slice())?;
                Ok::<(), Error>(())
            })
            .await
    }

    fn surface_draw(&mut self, frame: &SourceFrame, crop: CropRect) -> Result<()> {
        let size = crop.size();
        if self.surface.as_ref().map_or(true, |s| s.size() != size) {
            debug!("Recreating surface at {}x{}", size.0, size.1);
            self.surface = Some(self.compositor.create_surface(size.0, size.1)?);
        }
        let Some(surface) = self.surface.as_mut() else {
            return Err(Error::unavailable("surface was not created"));
        };

        let buffer = &mut self.readback;
        self.profilers.get_mut(Stage::SurfaceToBuffer).measure(|| {
            surface.draw_frame(frame, size.0, size.1)?;
            surface.read_pixels(buffer.as_mut_slice())
        })
    }

    fn rebuild_from_rgba(&self, frame: &SourceFrame, crop: CropRect) -> Result<SourceFrame> {
        let buffer = match self.output {
            Strategy::SurfaceDraw => &self.readback,
            _ => &self.bitmap,
        };
        SourceFrame::from_buffer(
            buffer.as_slice(),
            FrameInit::derived(frame.meta(), PixelFormat::Rgba, crop.width, crop.height),
            self.pool.acquire(HandleKind::Output)?,
        )
    }

    /// Size every active strategy's buffer to the crop. Buffers keep their
    /// allocation while the size holds.
    fn fit_buffers(&mut self, format: PixelFormat, crop: CropRect) {
        let strategies = self.strategies;
        let mut reallocated = 0;
        for &strategy in strategies {
            let (buffer, format) = match strategy {
                Strategy::DirectCopy => (&mut self.direct, format),
                Strategy::BitmapResize => (&mut self.bitmap, PixelFormat::Rgba),
                Strategy::SurfaceDraw => (&mut self.readback, PixelFormat::Rgba),
            };
            if buffer.ensure(format, crop.width, crop.height) {
                reallocated += 1;
            }
        }

        if reallocated > 0 {
            info!(
                "Copy buffers resized for {}x{} crop at ({}, {})",
                crop.width, crop.height, crop.x, crop.y
            );
            self.counters.record_reallocations(reallocated);
        }
    }

    fn publish(&self) {
        let copied = if self.strategies.contains(&Strategy::DirectCopy) {
            self.direct.len()
        } else {
            self.bitmap.len().max(self.readback.len())
        };
        let mut report = self.profilers.report(self.last_crop, copied);
        report.resolution = self.last_resolution;
        self.board.publish(report);
    }

    /// Pull, crop and emit until the source ends or `cancel` fires. A frame
    /// is only requested once the previous output has been accepted by
    /// `sink`. Returns the latency series so a successor can continue them.
    pub async fn run(
        mut self,
        mut source: Box<dyn FrameSource>,
        sink: flume::Sender<SourceFrame>,
        cancel: CancellationToken,
    ) -> Profilers {
        info!("Frame pipeline started");
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = source.next_frame() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!("Source error: {}", e);
                    self.counters.record_source_error();
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(SOURCE_RETRY) => {}
                    }
                    continue;
                }
                None => {
                    info!("Source ended");
                    break;
                }
            };

            let sequence = frame.meta().sequence;
            let cropped = match self.process(frame).await {
                Ok(cropped) => cropped,
                Err(e) => {
                    warn!("Dropping frame {}: {}", sequence, e);
                    self.counters.record_dropped();
                    metrics::counter!("cropbench_frames_dropped").increment(1);
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = sink.send_async(cropped) => {
                    if sent.is_err() {
                        debug!("Output consumer gone");
                        break;
                    }
                    self.counters.record_emitted();
                }
            }
        }

        info!(stats = ?self.counters.snapshot(), "Frame pipeline stopped");
        self.profilers
    }
}

fn failure(strategy: Strategy, err: Error) -> Error {
    match err {
        Error::TransformFailure { .. } => err,
        other => Error::transform(strategy.as_str(), other.to_string()),
    }
}
