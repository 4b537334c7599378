//! Rolling latency profiler
//!
//! Each measured stage owns a fixed window of the most recent samples. When
//! the window is full the oldest sample is evicted. Samples are milliseconds
//! taken from the monotonic clock.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::geometry::{CropRect, SourceResolution};

/// Samples kept per series.
pub const WINDOW: usize = 100;

/// Operations the pipeline times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Direct copy: visible-rect view construction.
    ConstructFrame,
    /// Direct copy: view pixels into the packed buffer.
    CopyToBuffer,
    /// Direct copy: buffer back into a frame.
    BufferToFrame,
    /// Bitmap resize, frame from bitmap, copy out.
    BitmapToBuffer,
    /// Surface draw and readback.
    SurfaceToBuffer,
    /// Presenting the reconstructed frame.
    PresentBufferFrame,
    /// Presenting the cropped view of the source frame.
    PresentViewFrame,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::ConstructFrame,
        Stage::CopyToBuffer,
        Stage::BufferToFrame,
        Stage::BitmapToBuffer,
        Stage::SurfaceToBuffer,
        Stage::PresentBufferFrame,
        Stage::PresentViewFrame,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ConstructFrame => "construct_frame",
            Stage::CopyToBuffer => "copy_to_buffer",
            Stage::BufferToFrame => "buffer_to_frame",
            Stage::BitmapToBuffer => "bitmap_to_buffer",
            Stage::SurfaceToBuffer => "surface_to_buffer",
            Stage::PresentBufferFrame => "present_buffer_frame",
            Stage::PresentViewFrame => "present_view_frame",
        }
    }

    /// Row label for the statistics table.
    pub fn label(self) -> &'static str {
        match self {
            Stage::ConstructFrame => "Construct cropped frame view",
            Stage::CopyToBuffer => "Copy frame view to buffer",
            Stage::BufferToFrame => "Construct frame from buffer",
            Stage::BitmapToBuffer => "Frame -> bitmap -> frame -> RGBA buffer",
            Stage::SurfaceToBuffer => "Surface draw -> RGBA readback",
            Stage::PresentBufferFrame => "Present frame from buffer",
            Stage::PresentViewFrame => "Present cropped source view",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name that matches no [`Stage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_owned()))
    }
}

/// Bounded FIFO of latency samples for one operation.
pub struct TimeProfiler {
    name: &'static str,
    samples: HeapRb<f64>,
    started: Option<Instant>,
}

impl TimeProfiler {
    pub fn new(name: &'static str) -> Self {
        Self::with_window(name, WINDOW)
    }

    /// # Panics
    /// If `window` is zero.
    pub fn with_window(name: &'static str, window: usize) -> Self {
        Self {
            name,
            samples: HeapRb::new(window),
            started: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the open measurement and record it. Returns the sample, or
    /// `None` when no measurement was started.
    pub fn end(&mut self) -> Option<f64> {
        let started = self.started.take()?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.push(elapsed_ms);
        Some(elapsed_ms)
    }

    pub fn push(&mut self, sample_ms: f64) {
        self.samples.push_overwrite(sample_ms);
        metrics::histogram!("cropbench_stage_latency_ms", "stage" => self.name).record(sample_ms);
    }

    /// Time a synchronous operation.
    pub fn measure<T>(&mut self, op: impl FnOnce() -> T) -> T {
        self.start();
        let out = op();
        self.end();
        out
    }

    /// Time a fallible operation. Failures leave the series untouched.
    pub fn measure_ok<T, E>(&mut self, op: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        self.start();
        let out = op();
        if out.is_ok() {
            self.end();
        } else {
            self.started = None;
        }
        out
    }

    /// Time an awaited operation. The exclusive borrow keeps a second timer
    /// on this series from opening while the first is pending.
    pub async fn measure_async<F: Future>(&mut self, op: F) -> F::Output {
        self.start();
        let out = op.await;
        self.end();
        out
    }

    pub fn len(&self) -> usize {
        self.samples.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn average(&self) -> f64 {
        let len = self.len();
        if len == 0 {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / len as f64
    }
}

/// One series per [`Stage`], created once and kept for the process lifetime.
pub struct Profilers {
    series: Vec<TimeProfiler>,
}

impl Default for Profilers {
    fn default() -> Self {
        Self {
            series: Stage::ALL
                .into_iter()
                .map(|stage| TimeProfiler::new(stage.as_str()))
                .collect(),
        }
    }
}

impl Profilers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stage: Stage) -> &TimeProfiler {
        &self.series[stage.index()]
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut TimeProfiler {
        &mut self.series[stage.index()]
    }

    pub fn average(&self, stage: Stage) -> f64 {
        self.get(stage).average()
    }

    pub fn report(&self, crop: Option<CropRect>, copied_buffer_size: usize) -> LatencyReport {
        LatencyReport {
            rows: Stage::ALL
                .into_iter()
                .map(|stage| {
                    let series = self.get(stage);
                    StageLatency {
                        stage,
                        average_ms: series.average(),
                        samples: series.len(),
                    }
                })
                .collect(),
            crop,
            resolution: None,
            copied_buffer_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageLatency {
    pub stage: Stage,
    pub average_ms: f64,
    pub samples: usize,
}

/// Snapshot of every series average, published after each frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyReport {
    pub rows: Vec<StageLatency>,
    pub crop: Option<CropRect>,
    /// Size of the frame the crop was resolved against.
    pub resolution: Option<SourceResolution>,
    pub copied_buffer_size: usize,
}

impl LatencyReport {
    pub fn average(&self, stage: Stage) -> f64 {
        self.rows
            .iter()
            .find(|row| row.stage == stage)
            .map_or(0.0, |row| row.average_ms)
    }

    /// Label/value pairs with averages fixed to four decimals.
    pub fn table(&self) -> Vec<(&'static str, String)> {
        let mut table = vec![("Copied buffer size", self.copied_buffer_size.to_string())];
        table.extend(
            self.rows
                .iter()
                .map(|row| (row.stage.label(), format!("{:.4}", row.average_ms))),
        );
        table
    }
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, value) in self.table() {
            writeln!(f, "{label:<42} {value:>12}")?;
        }
        Ok(())
    }
}

/// Shared read side of the profiler. The pipeline publishes, displays load.
#[derive(Clone, Default)]
pub struct LatencyBoard {
    current: Arc<ArcSwap<LatencyReport>>,
}

impl LatencyBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, report: LatencyReport) {
        self.current.store(Arc::new(report));
    }

    pub fn snapshot(&self) -> Arc<LatencyReport> {
        self.current.load_full()
    }

    /// Average for a named stage, `None` if the name is unknown.
    pub fn average_latency(&self, name: &str) -> Option<f64> {
        let stage = name.parse::<Stage>().ok()?;
        Some(self.current.load().average(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series_averages_to_zero() {
        let profiler = TimeProfiler::new("empty");
        assert!(profiler.is_empty());
        assert_eq!(profiler.average(), 0.0);
    }

    #[test]
    fn keeps_only_the_latest_window() {
        let mut profiler = TimeProfiler::new("window");
        for i in 0..150 {
            profiler.push(i as f64);
        }

        let samples = profiler.samples();
        assert_eq!(samples.len(), WINDOW);
        let expected: Vec<f64> = (50..150).map(|i| i as f64).collect();
        assert_eq!(samples, expected);

        let mean = expected.iter().sum::<f64>() / expected.len() as f64;
        assert!((profiler.average() - mean).abs() < 1e-9);
    }

    #[test]
    fn end_without_start_records_nothing() {
        let mut profiler = TimeProfiler::new("unopened");
        assert_eq!(profiler.end(), None);
        assert!(profiler.is_empty());
    }

    #[test]
    fn measure_records_one_sample() {
        let mut profiler = TimeProfiler::new("sync");
        let value = profiler.measure(|| 21 * 2);
        assert_eq!(value, 42);
        assert_eq!(profiler.len(), 1);
        assert!(profiler.average() >= 0.0);
    }

    #[tokio::test]
    async fn measure_async_brackets_the_await() {
        let mut profiler = TimeProfiler::new("async");
        let value = profiler
            .measure_async(async {
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                7
            })
            .await;
        assert_eq!(value, 7);
        assert!(profiler.average() >= 2.0);
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>(), Ok(stage));
        }
        assert_eq!(
            "draw_webgl".parse::<Stage>(),
            Err(UnknownStage("draw_webgl".into()))
        );
    }

    #[test]
    fn failed_measurements_are_not_sampled() {
        let mut profiler = TimeProfiler::new("fallible");
        assert_eq!(profiler.measure_ok(|| Err::<(), _>("no surface")), Err("no surface"));
        assert!(profiler.is_empty());

        assert_eq!(profiler.measure_ok(|| Ok::<_, ()>(3)), Ok(3));
        assert_eq!(profiler.len(), 1);

        // A failure does not leave a timer open for the next end().
        let _ = profiler.measure_ok(|| Err::<(), _>(()));
        assert_eq!(profiler.end(), None);
        assert_eq!(profiler.len(), 1);
    }

    #[test]
    fn board_answers_by_name() {
        let mut profilers = Profilers::new();
        profilers.get_mut(Stage::CopyToBuffer).push(2.0);
        profilers.get_mut(Stage::CopyToBuffer).push(4.0);

        let board = LatencyBoard::new();
        board.publish(profilers.report(None, 0));

        assert_eq!(board.average_latency("copy_to_buffer"), Some(3.0));
        assert_eq!(board.average_latency("surface_to_buffer"), Some(0.0));
        assert_eq!(board.average_latency("nope"), None);
    }

    #[test]
    fn table_formats_four_decimals() {
        let mut profilers = Profilers::new();
        profilers.get_mut(Stage::ConstructFrame).push(1.0 / 3.0);
        let report = profilers.report(None, 345_600);
        let table = report.table();
        assert_eq!(table[0], ("Copied buffer size", "345600".to_string()));
        assert_eq!(table[1].1, "0.3333");
    }
}
