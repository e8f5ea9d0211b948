//! Camera + inference device collaborator.
//!
//! The preview loop only sees two output queues: "frame" (downscaled preview
//! frames) and "nn" (detection batches). This module provides the bundled
//! `stub://` device, a synthetic producer that fills both queues at the
//! configured rate. Real hardware pipelines plug in by producing into the
//! same `QueueProducer`s.
//!
//! Frames and detections are pushed from a background thread on independent
//! timelines, the same way a hardware pipeline delivers them.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::{Detection, DetectionBatch, Frame};
use crate::queue::{output_queue, OutputQueue, QueueProducer, DEFAULT_QUEUE_CAPACITY};

pub const FRAME_QUEUE: &str = "frame";
pub const DETECTION_QUEUE: &str = "nn";

/// Pipeline settings handed to the device.
#[derive(Clone, Debug)]
pub struct DeviceSettings {
    /// Source URL. Only `stub://` is bundled.
    pub source_url: String,
    /// Preview frame width (also the model input width).
    pub width: u32,
    /// Preview frame height (also the model input height).
    pub height: u32,
    /// Frames per second produced by the camera.
    pub fps: u32,
    /// Capacity of each output queue.
    pub queue_capacity: usize,
    /// Disconnect after producing this many frames (testing / demos).
    pub max_frames: Option<u64>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            source_url: "stub://oak".to_string(),
            width: 320,
            height: 320,
            fps: 40,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frames: None,
        }
    }
}

/// Consumer ends of the device output queues.
pub struct DeviceQueues {
    pub frames: OutputQueue<Frame>,
    pub detections: OutputQueue<DetectionBatch>,
}

/// Running device. Dropping the handle asks the producer thread to stop,
/// which disconnects the queues.
#[derive(Debug)]
pub struct DeviceHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    pub fn stop(mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("device thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Synthetic device: a moving target on a gradient background, with one
/// detection per frame cycling through the model's classes.
pub struct SyntheticDevice;

impl SyntheticDevice {
    pub fn start(settings: DeviceSettings, classes: usize) -> Result<(DeviceHandle, DeviceQueues)> {
        if !settings.source_url.starts_with("stub://") {
            return Err(anyhow!(
                "unsupported source '{}'; only stub:// devices are bundled",
                settings.source_url
            ));
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!("device frame size must be non-zero"));
        }
        if classes == 0 {
            return Err(anyhow!("device requires at least one model class"));
        }

        let (frame_tx, frames) = output_queue(FRAME_QUEUE, settings.queue_capacity);
        let (nn_tx, detections) = output_queue(DETECTION_QUEUE, settings.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        log::info!(
            "starting synthetic device {} ({}x{} @ {} fps, queue capacity {})",
            settings.source_url,
            settings.width,
            settings.height,
            settings.fps,
            settings.queue_capacity
        );

        let join = std::thread::spawn(move || {
            run_synthetic(settings, classes, frame_tx, nn_tx, stop_thread);
        });

        Ok((
            DeviceHandle {
                stop,
                join: Some(join),
            },
            DeviceQueues { frames, detections },
        ))
    }
}

fn run_synthetic(
    settings: DeviceSettings,
    classes: usize,
    frame_tx: QueueProducer<Frame>,
    nn_tx: QueueProducer<DetectionBatch>,
    stop: Arc<AtomicBool>,
) {
    let interval = frame_interval(settings.fps);
    let mut rng = rand::thread_rng();
    let mut sequence = 0u64;

    while !stop.load(Ordering::SeqCst) {
        if settings.max_frames.is_some_and(|max| sequence >= max) {
            log::info!("synthetic device reached {} frames, disconnecting", sequence);
            break;
        }
        sequence += 1;

        let target = target_box(sequence);
        let frame = synthetic_frame(settings.width, settings.height, target, sequence);
        let detection = Detection {
            label: (sequence % classes as u64) as u32,
            confidence: rng.gen_range(0.5..0.99),
            xmin: target[0],
            ymin: target[1],
            xmax: target[2],
            ymax: target[3],
        };

        frame_tx.send(frame);
        nn_tx.send(DetectionBatch::new(sequence, vec![detection]));

        std::thread::sleep(interval);
    }
    // Dropping the producers disconnects both queues.
}

/// Normalized box of the target for a given tick; it drifts diagonally.
fn target_box(sequence: u64) -> [f32; 4] {
    let phase = (sequence % 200) as f32 / 200.0;
    let x = 0.1 + 0.6 * phase;
    let y = 0.7 - 0.5 * phase;
    [x, y, x + 0.15, y + 0.12]
}

fn synthetic_frame(width: u32, height: u32, target: [f32; 4], sequence: u64) -> Frame {
    let mut img = RgbImage::from_fn(width, height, |x, y| {
        let g = (80 + (x * 60 / width.max(1))) as u8;
        let b = (60 + (y * 60 / height.max(1))) as u8;
        Rgb([40, g, b])
    });
    let x0 = (target[0] * width as f32) as i32;
    let y0 = (target[1] * height as f32) as i32;
    let w = (((target[2] - target[0]) * width as f32) as u32).max(1);
    let h = (((target[3] - target[1]) * height as f32) as u32).max(1);
    draw_filled_rect_mut(&mut img, Rect::at(x0, y0).of_size(w, h), Rgb([30, 20, 10]));
    Frame::new(img, sequence)
}

fn frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / fps).max(1) as u64)
    }
}
