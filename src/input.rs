use log::{debug, info};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::landmarks::HandPose;

#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub timestamp_ms: u128,
    pub buffer: Option<PixelBuffer>,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("no frame to run detection on")]
    NoFrame,
    #[error("landmark model unavailable")]
    ModelUnavailable,
}

pub trait CaptureSource: Send {
    /// Blocks until the next frame; `None` once the stream has ended.
    fn next_frame(&mut self) -> Option<Frame>;
}

pub trait CaptureDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureError>;
}

pub trait LandmarkSource: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<HandPose>, DetectionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RecordedError {
    ModelUnavailable,
}

#[derive(Debug, Clone, Deserialize)]
struct RecordedFrame {
    #[serde(default)]
    hands: Vec<HandPose>,
    #[serde(default)]
    dropped: bool,
    #[serde(default)]
    error: Option<RecordedError>,
}

#[derive(Debug, Clone)]
pub struct Recording {
    frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let txt = fs::read_to_string(path).map_err(|source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&txt).map_err(|(line, source)| CaptureError::Parse {
            path: path.to_path_buf(),
            line,
            source,
        })
    }

    /// Blank lines and `#` comments are skipped. Errors carry the 1-based line.
    pub fn parse(txt: &str) -> Result<Self, (usize, serde_json::Error)> {
        let mut frames = Vec::new();
        for (i, line) in txt.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let frame: RecordedFrame = serde_json::from_str(line).map_err(|e| (i + 1, e))?;
            frames.push(frame);
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.frames
            .iter()
            .enumerate()
            .map(|(i, rec)| recorded_frame(i as u64, 0, rec))
    }
}

fn recorded_frame(seq: u64, timestamp_ms: u128, rec: &RecordedFrame) -> Frame {
    Frame {
        seq,
        timestamp_ms,
        buffer: (!rec.dropped).then(|| PixelBuffer {
            width: 0,
            height: 0,
            data: Arc::from(seq.to_le_bytes().as_slice()),
        }),
    }
}

impl LandmarkSource for Recording {
    fn detect(&self, frame: &Frame) -> Result<Vec<HandPose>, DetectionError> {
        if frame.buffer.is_none() {
            return Err(DetectionError::NoFrame);
        }
        let rec = usize::try_from(frame.seq)
            .ok()
            .and_then(|i| self.frames.get(i))
            .ok_or(DetectionError::NoFrame)?;
        match rec.error {
            Some(RecordedError::ModelUnavailable) => Err(DetectionError::ModelUnavailable),
            None => Ok(rec.hands.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordingDevice {
    path: PathBuf,
    recording: Arc<Recording>,
    fps: u32,
    looped: bool,
}

impl RecordingDevice {
    pub fn load(path: &Path, fps: u32) -> Result<Self, CaptureError> {
        let recording = Recording::load(path)?;
        if recording.is_empty() {
            return Err(CaptureError::Unavailable(format!(
                "{} holds no frames",
                path.display()
            )));
        }
        info!(
            "loaded recording {} ({} frames)",
            path.display(),
            recording.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            recording: Arc::new(recording),
            fps: fps.max(1),
            looped: true,
        })
    }

    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    pub fn detector(&self) -> Arc<Recording> {
        Arc::clone(&self.recording)
    }
}

impl CaptureDevice for RecordingDevice {
    fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureError> {
        if !self.path.exists() {
            return Err(CaptureError::Unavailable(format!(
                "{} no longer exists",
                self.path.display()
            )));
        }
        Ok(Box::new(RecordingStream {
            recording: Arc::clone(&self.recording),
            interval: Duration::from_secs(1) / self.fps,
            looped: self.looped,
            cursor: 0,
            started: Instant::now(),
            next_due: None,
        }))
    }
}

struct RecordingStream {
    recording: Arc<Recording>,
    interval: Duration,
    looped: bool,
    cursor: usize,
    started: Instant,
    next_due: Option<Instant>,
}

impl CaptureSource for RecordingStream {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.cursor >= self.recording.len() {
            if !self.looped {
                return None;
            }
            debug!("recording wrapped");
            self.cursor = 0;
        }

        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.interval);

        let seq = self.cursor as u64;
        let rec = &self.recording.frames[self.cursor];
        self.cursor += 1;
        Some(recorded_frame(
            seq,
            self.started.elapsed().as_millis(),
            rec,
        ))
    }
}
