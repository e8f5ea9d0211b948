//! Frame sinks and quit sources for the preview binary.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use image::ImageFormat;

use crate::error::DisplayError;
use crate::frame::Frame;
use crate::preview::{FrameSink, QuitSignal};

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

/// Writes every `every`-th rendered frame to a JPEG file, replacing it
/// atomically so viewers never see a half-written image.
pub struct SnapshotSink {
    path: PathBuf,
    tmp_path: PathBuf,
    every: u64,
    seen: u64,
}

impl SnapshotSink {
    pub fn new(path: impl AsRef<Path>, every: u64) -> Self {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("tmp.jpg");
        Self {
            path,
            tmp_path,
            every: every.max(1),
            seen: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for SnapshotSink {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return Ok(());
        }
        frame
            .image()
            .save_with_format(&self.tmp_path, ImageFormat::Jpeg)?;
        std::fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}

/// Drops frames. Used when measuring true throughput without display cost.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessSink;

impl FrameSink for HeadlessSink {
    fn show(&mut self, _frame: &Frame) -> Result<(), DisplayError> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Quit sources
// ----------------------------------------------------------------------------

/// Fires when `key` is read from the keyboard channel.
pub struct KeyboardQuit {
    key: char,
    keys: Receiver<char>,
    fired: bool,
}

impl KeyboardQuit {
    pub fn new(key: char, keys: Receiver<char>) -> Self {
        Self {
            key,
            keys,
            fired: false,
        }
    }

    /// Read stdin on a background thread; each typed character is forwarded
    /// once its line is submitted.
    pub fn spawn_stdin(key: char) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                for ch in line.chars() {
                    if tx.send(ch).is_err() {
                        return;
                    }
                }
            }
        });
        Self::new(key, rx)
    }
}

impl QuitSignal for KeyboardQuit {
    fn poll(&mut self) -> bool {
        if self.fired {
            return true;
        }
        loop {
            match self.keys.try_recv() {
                Ok(ch) if ch == self.key => {
                    self.fired = true;
                    return true;
                }
                Ok(_) => {}
                // A closed stdin (e.g. running detached) never quits.
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return false,
            }
        }
    }
}

/// Fires after Ctrl-C.
pub struct CtrlCQuit {
    flag: Arc<AtomicBool>,
}

impl CtrlCQuit {
    pub fn install() -> Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = flag.clone();
        ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        })
        .context("install ctrl-c handler")?;
        Ok(Self { flag })
    }
}

impl QuitSignal for CtrlCQuit {
    fn poll(&mut self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Fires when any inner source fires.
#[derive(Default)]
pub struct AnyQuit {
    sources: Vec<Box<dyn QuitSignal>>,
}

impl AnyQuit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl QuitSignal + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl QuitSignal for AnyQuit {
    fn poll(&mut self) -> bool {
        // Poll every source so keyboard channels keep draining.
        let mut fired = false;
        for source in &mut self.sources {
            fired |= source.poll();
        }
        fired
    }
}
