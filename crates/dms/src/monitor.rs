//! Capture loop on a dedicated thread

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use camera_capture::FrameSource;
use image::RgbImage;
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::pipeline::FrameOrchestrator;
use crate::DmsError;

/// Consumer of annotated frames, called once per processed frame.
///
/// Returning [`DmsError::SinkClosed`] ends the capture loop; any other error
/// drops that frame only.
pub trait FrameSink: Send {
    fn consume(&mut self, frame: RgbImage) -> Result<(), DmsError>;
}

/// Discards every frame
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn consume(&mut self, _frame: RgbImage) -> Result<(), DmsError> {
        Ok(())
    }
}

/// Handle to the running capture loop. Dropping it stops the loop.
pub struct Monitor {
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Move `source` and `orchestrator` onto a new thread and start pulling
    /// frames. The source is dropped when the loop ends, however it ends.
    pub fn start<S, K>(source: S, orchestrator: FrameOrchestrator, sink: K) -> Result<Self, DmsError>
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));

        let worker = CaptureLoop {
            source,
            orchestrator,
            sink,
            stop: Arc::clone(&stop),
            frames: Arc::clone(&frames),
        };
        let handle = thread::Builder::new()
            .name("dms-capture".into())
            .spawn(move || worker.run())
            .map_err(|e| DmsError::Thread(e.to_string()))?;

        info!("DMS monitor started");
        Ok(Self {
            stop,
            frames,
            handle: Some(handle),
        })
    }

    /// Frames that made it through the pipeline so far
    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Ask the loop to stop after the current frame and wait for it
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join_worker();
    }

    /// Wait for the loop to end on its own (end of stream or sink closed)
    pub fn wait(mut self) {
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("DMS capture thread panicked");
            } else {
                info!("DMS monitor stopped after {} frames", self.frames_processed());
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureLoop<S, K> {
    source: S,
    orchestrator: FrameOrchestrator,
    sink: K,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
}

impl<S: FrameSource, K: FrameSink> CaptureLoop<S, K> {
    fn run(mut self) {
        while !self.stop.load(Ordering::SeqCst) {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    warn!("Skipping frame: {}", e);
                    counter!("dms_frames_skipped_total").increment(1);
                    continue;
                }
            };

            let started = Instant::now();
            let (annotated, record) = match self.orchestrator.run_pipeline(&frame) {
                Ok(output) => output,
                Err(e) => {
                    warn!("Skipping frame {}: {}", frame.sequence, e);
                    counter!("dms_frames_skipped_total").increment(1);
                    continue;
                }
            };
            histogram!("dms_pipeline_seconds").record(started.elapsed().as_secs_f64());
            counter!("dms_frames_total").increment(1);
            if record.face_detected {
                counter!("dms_faces_detected_total").increment(1);
            }
            self.frames.fetch_add(1, Ordering::Relaxed);

            match self.sink.consume(annotated) {
                Ok(()) => {}
                Err(DmsError::SinkClosed) => {
                    info!("Frame sink closed");
                    break;
                }
                Err(e) => warn!("Dropping annotated frame {}: {}", frame.sequence, e),
            }
        }
        debug!("Releasing frame source");
    }
}
