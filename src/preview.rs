//! Live detection preview loop.
//!
//! One logical thread polls the device's two output queues, keeps a running
//! fps over received detection batches, draws the most recent batch onto each
//! new frame and hands the frame to a sink. Iteration order is fixed:
//!
//! 1. sample diagnostics (if enabled)
//! 2. poll frame queue
//! 3. poll detection queue
//! 4. render + show (only if a frame arrived)
//! 5. poll quit signal
//!
//! Frames and batches are not re-synchronized: the latest batch is reused for
//! every frame until a newer batch arrives, so detections may lag the frame
//! they are drawn on by one tick.
//!
//! The only clean exit is the quit signal. A disconnected queue surfaces as
//! `PreviewError::Stream` and ends the loop.

use std::time::{Duration, Instant};

use crate::device::DeviceQueues;
use crate::diagnostics::{DiagnosticsSampler, SystemMonitor};
use crate::error::{DisplayError, PreviewError};
use crate::frame::{DetectionBatch, Frame};
use crate::model::LabelMap;
use crate::overlay::{OverlayRenderer, OverlayStyle};

// ----------------------------------------------------------------------------
// Seams
// ----------------------------------------------------------------------------

/// Time source for fps measurement and idle waits.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Destination for rendered frames.
pub trait FrameSink {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;
}

/// Non-blocking quit poll. Returns true once the user asked to stop.
pub trait QuitSignal {
    fn poll(&mut self) -> bool;
}

// ----------------------------------------------------------------------------
// fps
// ----------------------------------------------------------------------------

/// Detection-batch throughput since `start`.
#[derive(Clone, Copy, Debug)]
pub struct FpsCounter {
    start: Instant,
    count: u64,
    fps: f64,
}

impl FpsCounter {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            count: 0,
            fps: 0.0,
        }
    }

    /// Count one batch received at `now` and return the updated fps.
    pub fn record(&mut self, now: Instant) -> f64 {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.start).as_secs_f64();
        if elapsed > 0.0 {
            self.fps = self.count as f64 / elapsed;
        }
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

// ----------------------------------------------------------------------------
// Loop
// ----------------------------------------------------------------------------

/// Settings shared by the preview loop, constructed once at startup.
#[derive(Clone, Debug)]
pub struct PreviewConfig {
    pub labels: LabelMap,
    pub style: OverlayStyle,
    /// Log available memory and CPU utilization every iteration.
    pub print_log: bool,
    /// Log fps to the console at this interval (useful when not displaying).
    pub fps_log_interval: Option<Duration>,
    /// Wait applied when no frame was available this iteration.
    pub idle_wait: Duration,
}

impl PreviewConfig {
    pub fn new(labels: LabelMap) -> Self {
        Self {
            labels,
            style: OverlayStyle::default(),
            print_log: false,
            fps_log_interval: None,
            idle_wait: Duration::from_millis(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Quit,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreviewStats {
    pub frames_rendered: u64,
    pub batches_received: u64,
    /// Frames drawn with a batch that was already used for an earlier frame.
    pub reused_batches: u64,
}

pub struct PreviewLoop<'a> {
    config: &'a PreviewConfig,
    queues: DeviceQueues,
    renderer: OverlayRenderer,
    sink: Box<dyn FrameSink + 'a>,
    quit: Box<dyn QuitSignal + 'a>,
    clock: Box<dyn Clock + 'a>,
    sampler: Option<Box<dyn DiagnosticsSampler + 'a>>,
    fps: FpsCounter,
    latest: DetectionBatch,
    latest_used: bool,
    last_fps_log: Instant,
    stats: PreviewStats,
}

impl<'a> PreviewLoop<'a> {
    pub fn new(
        config: &'a PreviewConfig,
        queues: DeviceQueues,
        sink: Box<dyn FrameSink + 'a>,
        quit: Box<dyn QuitSignal + 'a>,
    ) -> Self {
        let sampler: Option<Box<dyn DiagnosticsSampler + 'a>> = if config.print_log {
            Some(Box::new(SystemMonitor::new()))
        } else {
            None
        };
        let clock = SystemClock;
        let start = clock.now();
        Self {
            config,
            queues,
            renderer: OverlayRenderer::new(config.style.clone()),
            sink,
            quit,
            clock: Box::new(clock),
            sampler,
            fps: FpsCounter::new(start),
            latest: DetectionBatch::default(),
            latest_used: false,
            last_fps_log: start,
            stats: PreviewStats::default(),
        }
    }

    /// Replace the clock. Resets the fps start time to the new clock's `now`.
    pub fn with_clock(mut self, clock: impl Clock + 'a) -> Self {
        let start = clock.now();
        self.fps = FpsCounter::new(start);
        self.last_fps_log = start;
        self.clock = Box::new(clock);
        self
    }

    /// Replace (or disable) the diagnostics sampler.
    pub fn with_sampler(mut self, sampler: Option<Box<dyn DiagnosticsSampler + 'a>>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn fps(&self) -> f64 {
        self.fps.fps()
    }

    pub fn stats(&self) -> PreviewStats {
        self.stats
    }

    /// Batch currently drawn onto new frames.
    pub fn latest_batch(&self) -> &DetectionBatch {
        &self.latest
    }

    /// Run a single iteration.
    pub fn tick(&mut self) -> Result<LoopControl, PreviewError> {
        if let Some(sampler) = self.sampler.as_mut() {
            let sample = sampler.sample();
            log::info!("available memory: {} MB", sample.available_memory_mb);
            log::info!("cpu utilization: {:.1}%", sample.cpu_percent);
        }

        let frame = self.queues.frames.try_get()?;

        if let Some(batch) = self.queues.detections.try_get()? {
            self.fps.record(self.clock.now());
            self.latest = batch;
            self.latest_used = false;
            self.stats.batches_received += 1;
        }

        let idle = frame.is_none();
        if let Some(mut frame) = frame {
            self.renderer
                .render(&mut frame, &self.latest, &self.config.labels, self.fps.fps())?;
            self.sink.show(&frame)?;
            if self.latest_used {
                self.stats.reused_batches += 1;
            }
            self.latest_used = true;
            self.stats.frames_rendered += 1;
            if self.stats.frames_rendered % 100 == 0 {
                log::debug!(
                    "rendered {} frames, {} frames dropped by queue",
                    self.stats.frames_rendered,
                    self.queues.frames.dropped()
                );
            }
            self.log_fps_if_due();
        }

        if self.quit.poll() {
            return Ok(LoopControl::Quit);
        }
        if idle {
            self.clock.sleep(self.config.idle_wait);
        }
        Ok(LoopControl::Continue)
    }

    /// Iterate until the quit signal fires or the stream faults.
    pub fn run(&mut self) -> Result<PreviewStats, PreviewError> {
        log::info!(
            "preview running (queues '{}' and '{}'), waiting for quit signal",
            self.queues.frames.name(),
            self.queues.detections.name()
        );
        loop {
            match self.tick() {
                Ok(LoopControl::Continue) => {}
                Ok(LoopControl::Quit) => break,
                Err(err) => {
                    log::error!("preview stopped: {}", err);
                    return Err(err);
                }
            }
        }
        log::info!(
            "preview stopped: {} frames, {} detection batches, fps {:.2}, {} dropped by queue",
            self.stats.frames_rendered,
            self.stats.batches_received,
            self.fps.fps(),
            self.queues.frames.dropped()
        );
        Ok(self.stats)
    }

    fn log_fps_if_due(&mut self) {
        let Some(interval) = self.config.fps_log_interval else {
            return;
        };
        let now = self.clock.now();
        if now.saturating_duration_since(self.last_fps_log) >= interval {
            log::info!("fps: {:.2}", self.fps.fps());
            self.last_fps_log = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_is_count_over_elapsed() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        for _ in 0..9 {
            fps.record(start + Duration::from_millis(500));
        }
        let value = fps.record(start + Duration::from_secs(2));
        assert_eq!(fps.count(), 10);
        assert!((value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn fps_stays_zero_without_elapsed_time() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        assert_eq!(fps.record(start), 0.0);
        assert_eq!(fps.count(), 1);
    }
}
