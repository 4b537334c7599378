//! Output track wiring
//!
//! [`BenchHarness`] owns at most one running pipeline. Binding a source
//! always tears the previous pipeline down first, so a replaced input never
//! keeps feeding an old output stream.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::capture::{FrameSource, HandlePool, SourceFrame};
use crate::display::{Compositor, SurfacePresenter};
use crate::geometry::{CropRect, SourceResolution};
use crate::pipeline::{FramePipeline, PipelineCounters, PipelineStats};
use crate::profiler::{LatencyBoard, LatencyReport, Profilers};
use crate::settings::Settings;
use crate::PipelineConfig;

/// Consumer side of the cropped frame stream.
///
/// With the default capacity of zero the pipeline waits for every frame to
/// be taken before it reads the next one.
#[derive(Clone)]
pub struct OutputStream {
    rx: flume::Receiver<SourceFrame>,
}

impl OutputStream {
    /// Next cropped frame, `None` once the pipeline has stopped.
    pub async fn recv(&self) -> Option<SourceFrame> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<SourceFrame> {
        self.rx.try_recv().ok()
    }

    pub fn is_disconnected(&self) -> bool {
        self.rx.is_disconnected()
    }
}

struct ActivePipeline {
    output: OutputStream,
    cancel: CancellationToken,
    task: JoinHandle<Profilers>,
}

pub struct BenchHarness {
    settings: Settings,
    config: PipelineConfig,
    pool: Arc<HandlePool>,
    compositor: Arc<dyn Compositor>,
    board: LatencyBoard,
    counters: Arc<PipelineCounters>,
    profilers: Option<Profilers>,
    active: Option<ActivePipeline>,
}

impl BenchHarness {
    pub fn new(
        config: PipelineConfig,
        settings: Settings,
        pool: Arc<HandlePool>,
        compositor: Arc<dyn Compositor>,
    ) -> Self {
        Self {
            settings,
            config,
            pool,
            compositor,
            board: LatencyBoard::new(),
            counters: Arc::new(PipelineCounters::default()),
            profilers: None,
            active: None,
        }
    }

    /// Replace the input. Returns the new output stream, or `None` when no
    /// source is given or the pipeline cannot be built.
    #[instrument(level = "info", skip_all, fields(bound = source.is_some()))]
    pub async fn bind(&mut self, source: Option<Box<dyn FrameSource>>) -> Option<OutputStream> {
        self.teardown().await;

        let Some(source) = source else {
            info!("No input bound");
            return None;
        };

        let pipeline = match FramePipeline::new(
            &self.config,
            self.settings.clone(),
            self.pool.clone(),
            self.compositor.clone(),
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!("Output unavailable: {}", e);
                return None;
            }
        };

        let mut pipeline = pipeline
            .with_board(self.board.clone())
            .with_counters(self.counters.clone());
        if let Some(profilers) = self.profilers.take() {
            pipeline = pipeline.with_profilers(profilers);
        }
        if self.config.present {
            pipeline =
                pipeline.with_presenter(Box::new(SurfacePresenter::new(self.compositor.clone())));
        }

        let (tx, rx) = flume::bounded(self.config.output_capacity);
        let output = OutputStream { rx };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(source, tx, cancel.clone()));

        self.active = Some(ActivePipeline {
            output: output.clone(),
            cancel,
            task,
        });
        info!("Input bound, output stream ready");
        Some(output)
    }

    pub async fn unbind(&mut self) {
        self.teardown().await;
    }

    /// Bind a source at a new resolution. The crop is re-resolved against it
    /// from the next frame on.
    pub async fn switch_resolution(
        &mut self,
        resolution: SourceResolution,
        source: Box<dyn FrameSource>,
    ) -> Option<OutputStream> {
        info!(
            "Switching source to {}x{}",
            resolution.width, resolution.height
        );
        self.settings.set_resolution(resolution);
        self.bind(Some(source)).await
    }

    /// Stop the running pipeline and wait for it. The frame in flight, if
    /// any, is released before this returns.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.cancel.cancel();
        drop(active.output);
        match active.task.await {
            Ok(profilers) => self.profilers = Some(profilers),
            Err(e) => warn!("Pipeline task ended abnormally: {}", e),
        }

        // The next source may deliver a different frame size.
        let mut report = LatencyReport::clone(&self.board.snapshot());
        report.resolution = None;
        self.board.publish(report);
        info!(stats = ?self.counters.snapshot(), "Pipeline torn down");
    }

    pub fn output_stream(&self) -> Option<OutputStream> {
        self.active.as_ref().map(|active| active.output.clone())
    }

    pub fn is_bound(&self) -> bool {
        self.active.is_some()
    }

    pub fn average_latency(&self, name: &str) -> Option<f64> {
        self.board.average_latency(name)
    }

    /// Crop applied to the stream: the current geometry resolved against
    /// the last processed frame's size, or against the configured
    /// resolution before any frame has arrived.
    pub fn current_crop_rect(&self) -> CropRect {
        let geometry = self.settings.snapshot();
        match self.board.snapshot().resolution {
            Some(resolution) => geometry.crop_rect_for(resolution),
            None => geometry.crop_rect(),
        }
    }

    pub fn latency_report(&self) -> Arc<LatencyReport> {
        self.board.snapshot()
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pool(&self) -> &Arc<HandlePool> {
        &self.pool
    }
}

impl Drop for BenchHarness {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}
