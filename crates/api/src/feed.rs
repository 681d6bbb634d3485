//! Latest annotated frame as JPEG, shared with the MJPEG endpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use camera_capture::encode_jpeg;
use dms::{DmsError, FrameSink};
use image::RgbImage;
use tokio::sync::watch;

pub const BOUNDARY: &str = "frame";

/// Single-slot JPEG feed. Cloning gives another handle to the same slot;
/// subscribers only ever see the newest frame.
#[derive(Debug, Clone)]
pub struct FrameFeed {
    tx: Arc<watch::Sender<Option<Bytes>>>,
    quality: u8,
    frames: Arc<AtomicU64>,
}

impl FrameFeed {
    pub fn new(quality: u8) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            quality,
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Bytes>> {
        self.tx.subscribe()
    }

    /// Frames published so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn publish_jpeg(&self, jpeg: Vec<u8>) {
        self.tx.send_replace(Some(Bytes::from(jpeg)));
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

impl FrameSink for FrameFeed {
    fn consume(&mut self, frame: RgbImage) -> Result<(), DmsError> {
        let jpeg = encode_jpeg(&frame, self.quality)?;
        self.publish_jpeg(jpeg);
        Ok(())
    }
}

/// One `multipart/x-mixed-replace` part holding a JPEG
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", jpeg.len());
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
