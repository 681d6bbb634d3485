//! Live camera source backed by `nokhwa`
//!
//! The device is opened and read on its own thread and frames are handed
//! over a small channel, so the source itself stays `Send` whatever the
//! platform backend is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tracing::{debug, info, warn};

use crate::frame::VideoFrame;
use crate::source::FrameSource;
use crate::CameraError;

/// Frames buffered between the device thread and the capture loop
const FRAME_QUEUE: usize = 2;

type FrameResult = Result<VideoFrame, CameraError>;

/// A capture device. Open in [`CameraSource::open`], released when dropped.
pub struct CameraSource {
    name: String,
    frames: Receiver<FrameResult>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraSource {
    /// Open device `index`. Fails with [`CameraError::Open`] if the device
    /// is missing or refuses every RGB-decodable format.
    pub fn open(index: u32) -> Result<Self, CameraError> {
        Self::spawn(format!("camera-{index}"), move || open_device(index))
    }

    /// Run `open` on a new capture thread and wait for it to report.
    /// The grabber it returns is called until the source is dropped.
    fn spawn<O, G>(thread_name: String, open: O) -> Result<Self, CameraError>
    where
        O: FnOnce() -> Result<(String, G), CameraError> + Send + 'static,
        G: FnMut() -> FrameResult,
    {
        let (ready_tx, ready_rx) = bounded::<Result<String, CameraError>>(1);
        let (frame_tx, frames) = bounded(FRAME_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let (name, grab) = match open() {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(name.clone()));
                pump(grab, &frame_tx, &stop_flag);
                debug!("Released {}", name);
            })
            .map_err(|e| CameraError::Open(format!("capture thread: {e}")))?;

        let name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(CameraError::Open("capture thread exited before opening".into()));
            }
        };

        info!("Opened {}", name);
        Ok(Self {
            name,
            frames,
            stop,
            handle: Some(handle),
        })
    }

    /// Human-readable device name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Forward grabbed frames until stopped or the receiver is gone. A full
/// queue drops the new frame rather than stalling the device.
fn pump<G>(mut grab: G, frames: &Sender<FrameResult>, stop: &AtomicBool)
where
    G: FnMut() -> FrameResult,
{
    while !stop.load(Ordering::Relaxed) {
        match frames.try_send(grab()) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

fn open_device(index: u32) -> Result<(String, impl FnMut() -> FrameResult), CameraError> {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(CameraIndex::Index(index), requested)
        .map_err(|e| CameraError::Open(format!("camera {index}: {e}")))?;
    camera
        .open_stream()
        .map_err(|e| CameraError::Open(format!("camera {index}: {e}")))?;

    let name = format!("{} ({})", camera.info().human_name(), camera.camera_format());
    let opened_at = Instant::now();
    let mut sequence = 0u32;

    let grab = move || {
        let buffer = camera
            .frame()
            .map_err(|e| CameraError::Decode(format!("camera read: {e}")))?;
        let resolution = buffer.resolution();
        let rgb = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::Decode(format!("camera frame: {e}")))?;

        let frame = VideoFrame::new(
            rgb.into_raw(),
            resolution.width_x,
            resolution.height_y,
            opened_at.elapsed().as_nanos() as u64,
            sequence,
        );
        sequence = sequence.wrapping_add(1);
        Ok(frame)
    };
    Ok((name, grab))
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        match self.frames.recv() {
            Ok(frame) => frame.map(Some),
            Err(_) => {
                warn!("{} stopped delivering frames", self.name);
                Ok(None)
            }
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Grabber producing 2x2 frames, counting reads
    fn counting(reads: Arc<AtomicU32>) -> impl FnMut() -> FrameResult {
        move || {
            let n = reads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            Ok(VideoFrame::new(vec![0; 12], 2, 2, 0, n))
        }
    }

    #[test]
    fn test_open_failure_is_reported() {
        let result = CameraSource::spawn("test-camera".into(), || {
            Err::<(String, fn() -> FrameResult), _>(CameraError::Open("no such device".into()))
        });
        assert!(matches!(result, Err(CameraError::Open(_))));
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        assert!(matches!(CameraSource::open(u32::MAX), Err(CameraError::Open(_))));
    }

    #[test]
    fn test_frames_flow_in_order() {
        let reads = Arc::new(AtomicU32::new(0));
        let grab = counting(reads.clone());
        let mut source = CameraSource::spawn("test-camera".into(), move || Ok(("fake".to_string(), grab))).unwrap();
        assert_eq!(source.name(), "fake");

        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();
        assert!(b.sequence > a.sequence);
        assert!(b.validate().is_ok());
    }

    #[test]
    fn test_read_errors_pass_through() {
        let mut calls = 0;
        let grab = move || {
            calls += 1;
            thread::sleep(Duration::from_millis(1));
            if calls % 2 == 1 {
                Err(CameraError::Decode("torn frame".into()))
            } else {
                Ok(VideoFrame::new(vec![0; 3], 1, 1, 0, calls))
            }
        };
        let mut source = CameraSource::spawn("test-camera".into(), move || Ok(("fake".to_string(), grab))).unwrap();

        let mut saw_error = false;
        let mut saw_frame = false;
        for _ in 0..20 {
            match source.next_frame() {
                Ok(Some(_)) => saw_frame = true,
                Err(CameraError::Decode(_)) => saw_error = true,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(saw_error && saw_frame);
    }

    #[test]
    fn test_drop_releases_device() {
        let reads = Arc::new(AtomicU32::new(0));
        let grab = counting(reads.clone());
        let mut source = CameraSource::spawn("test-camera".into(), move || Ok(("fake".to_string(), grab))).unwrap();
        source.next_frame().unwrap();
        drop(source);

        let after_drop = reads.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(reads.load(Ordering::SeqCst), after_drop);
    }
}
