//! Edge Watch
//!
//! Field-device side of an insect monitoring camera.
//!
//! # Architecture
//!
//! Two independent halves share this crate:
//!
//! 1. **Live preview**: a camera + inference device fills two bounded output
//!    queues ("frame" and "nn"). `PreviewLoop` polls both without blocking,
//!    draws the latest detection batch onto each new frame and hands it to a
//!    `FrameSink` until the user quits.
//! 2. **Session upload**: after a recording session, each track's metadata
//!    rows are reduced to a time span plus its crop images and POSTed to the
//!    classification service, retrying transient failures with backoff.
//!
//! # Module Structure
//!
//! - `frame`: Frame, Detection, DetectionBatch and `frame_norm`
//! - `model`: detection-model JSON and `LabelMap`
//! - `overlay` / `font`: box and text drawing
//! - `queue` / `device`: non-blocking output queues and the `stub://` device
//! - `preview` / `display` / `diagnostics`: the preview loop and its seams
//! - `session` / `upload`: track aggregation and resilient upload
//! - `config`: JSON config file with environment overrides

pub mod config;
pub mod device;
pub mod diagnostics;
pub mod display;
pub mod error;
pub mod font;
pub mod frame;
pub mod model;
pub mod overlay;
pub mod preview;
pub mod queue;
pub mod session;
pub mod upload;

pub use device::{DeviceHandle, DeviceQueues, DeviceSettings, SyntheticDevice};
pub use error::{
    DisplayError, LabelError, ModelConfigError, PreviewError, SendError, SessionError,
    StreamFault, UploadError,
};
pub use frame::{frame_norm, Detection, DetectionBatch, Frame};
pub use model::{LabelMap, ModelConfig};
pub use overlay::{OverlayRenderer, OverlayStyle};
pub use preview::{
    Clock, FpsCounter, FrameSink, LoopControl, PreviewConfig, PreviewLoop, PreviewStats,
    QuitSignal, SystemClock,
};
pub use queue::{output_queue, OutputQueue, QueueProducer};
pub use session::{summarize, track_ids, SessionPaths, TrackRecord, TrackSummary};
pub use upload::{
    send_session, send_track_data, RetryPolicy, SessionUploadReport, UploadConfig, UploadPayload,
    UploadResponse, Uploader,
};
