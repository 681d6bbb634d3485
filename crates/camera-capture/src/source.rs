//! Frame sources feeding the capture loop

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::frame::{decode_image, VideoFrame};
use crate::{CameraConfig, CameraError};

/// A producer of frames, exclusively owned by the capture loop
pub trait FrameSource: Send {
    /// Next frame. `Ok(None)` marks end of stream, `Err` a frame that could
    /// not be read or decoded (the caller skips it and asks again).
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        (**self).next_frame()
    }
}

const STILL_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Plays a directory of still images in file-name order
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    cursor: usize,
    looped: bool,
    interval: Option<Duration>,
    next_deadline: Option<Instant>,
    opened_at: Instant,
    sequence: u32,
}

impl ImageSequenceSource {
    /// Open the directory named by the config. Fails if it is missing or
    /// holds no readable stills.
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let files = list_stills(&config.source)?;
        if files.is_empty() {
            return Err(CameraError::Open(format!(
                "no images found in {}",
                config.source.display()
            )));
        }

        info!(
            "Opened image sequence {} ({} frames, {} fps, looped={})",
            config.source.display(),
            files.len(),
            config.fps,
            config.looped
        );

        Ok(Self {
            files,
            cursor: 0,
            looped: config.looped,
            interval: (config.fps > 0).then(|| Duration::from_micros(1_000_000 / config.fps as u64)),
            next_deadline: None,
            opened_at: Instant::now(),
            sequence: 0,
        })
    }

    /// Number of stills in the sequence
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        let Some(interval) = self.interval else { return };
        let now = Instant::now();
        if let Some(deadline) = self.next_deadline {
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        self.next_deadline = Some(self.next_deadline.unwrap_or(now).max(now) + interval);
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        if self.cursor >= self.files.len() {
            if !self.looped {
                return Ok(None);
            }
            self.cursor = 0;
        }

        self.pace();

        let path = &self.files[self.cursor];
        self.cursor += 1;
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let timestamp_ns = self.opened_at.elapsed().as_nanos() as u64;

        let bytes = std::fs::read(path)
            .map_err(|e| CameraError::Decode(format!("{}: {}", path.display(), e)))?;
        decode_image(&bytes, timestamp_ns, sequence)
            .map(Some)
            .map_err(|e| CameraError::Decode(format!("{}: {}", path.display(), e)))
    }
}

impl Drop for ImageSequenceSource {
    fn drop(&mut self) {
        debug!("Image sequence released after {} frames", self.sequence);
    }
}

fn list_stills(dir: &Path) -> Result<Vec<PathBuf>, CameraError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CameraError::Open(format!("{}: {}", dir.display(), e)))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| STILL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// In-memory source, mostly for replaying captured frames and for tests
#[derive(Debug, Default)]
pub struct MemorySource {
    queue: VecDeque<Result<VideoFrame, CameraError>>,
}

impl MemorySource {
    /// Source yielding the given frames, then end of stream
    pub fn new(frames: Vec<VideoFrame>) -> Self {
        Self {
            queue: frames.into_iter().map(Ok).collect(),
        }
    }

    /// Source yielding the given results in order, failures included
    pub fn from_results(results: Vec<Result<VideoFrame, CameraError>>) -> Self {
        Self {
            queue: results.into(),
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        match self.queue.pop_front() {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
