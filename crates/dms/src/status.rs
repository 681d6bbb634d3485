//! Published per-frame status and the single-slot store holding it

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::classifier::{ClassificationResult, NO_LABEL};
use crate::eyes::EyePair;
use crate::pose::HeadPose;

/// Everything known about the driver after one frame.
///
/// When `face_detected` is false every dependent field holds its sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub face_detected: bool,
    pub head_pose: Option<HeadPose>,
    pub eyes: Option<EyePair>,
    pub emotion: ClassificationResult,
    pub drowsiness: ClassificationResult,
    /// Publish time, seconds since the Unix epoch
    pub ts: f64,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            face_detected: false,
            head_pose: None,
            eyes: None,
            emotion: ClassificationResult::emotion_sentinel(),
            drowsiness: ClassificationResult::drowsiness_sentinel(),
            ts: 0.0,
        }
    }
}

impl StatusRecord {
    /// The record for a frame without a face
    pub fn no_face(ts: f64) -> Self {
        Self {
            ts,
            ..Default::default()
        }
    }

    pub fn is_drowsy(&self) -> bool {
        self.drowsiness.label == "Drowsy"
    }

    pub fn to_flat(&self) -> FlatStatus {
        let eye = |f: fn(&EyePair) -> String| self.eyes.as_ref().map(f).unwrap_or_else(|| NO_LABEL.to_string());
        FlatStatus {
            ts: self.ts,
            face_detected: self.face_detected,
            yaw: self.head_pose.map(|p| p.yaw),
            pitch: self.head_pose.map(|p| p.pitch),
            roll: self.head_pose.map(|p| p.roll),
            left_eye: eye(|e| e.left.to_string()),
            right_eye: eye(|e| e.right.to_string()),
            emotion_label: self.emotion.label.clone(),
            emotion_conf: self.emotion.confidence,
            drowsy_label: self.drowsiness.label.clone(),
            drowsy_conf: self.drowsiness.confidence,
        }
    }
}

/// Flat key/value view served to status pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatStatus {
    pub ts: f64,
    pub face_detected: bool,
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub left_eye: String,
    pub right_eye: String,
    pub emotion_label: String,
    pub emotion_conf: f32,
    pub drowsy_label: String,
    pub drowsy_conf: f32,
}

/// Wall-clock seconds since the Unix epoch
pub fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Latest published [`StatusRecord`].
///
/// Cloning gives another handle to the same slot. Publishing swaps in a new
/// `Arc`, so the lock is held only for a pointer copy and readers never see a
/// half-written record.
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    slot: Arc<RwLock<Arc<StatusRecord>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, record: StatusRecord) {
        let record = Arc::new(record);
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = record;
    }

    /// Shared reference to the current record
    pub fn latest(&self) -> Arc<StatusRecord> {
        Arc::clone(&self.slot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Owned copy of the current record
    pub fn snapshot(&self) -> StatusRecord {
        self.latest().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eyes::EyeStatus;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_default_holds_sentinels() {
        let flat = StatusStore::new().snapshot().to_flat();
        assert!(!flat.face_detected);
        assert_eq!(flat.yaw, None);
        assert_eq!(flat.left_eye, "—");
        assert_eq!(flat.right_eye, "—");
        assert_eq!(flat.emotion_label, "—");
        assert_eq!(flat.drowsy_label, "Awake");
        assert_eq!(flat.drowsy_conf, 0.0);
    }

    #[test]
    fn test_flat_json_keys() {
        let record = StatusRecord {
            face_detected: true,
            head_pose: Some(HeadPose {
                yaw: 1.0,
                pitch: 2.0,
                roll: 3.0,
            }),
            eyes: Some(EyePair {
                left: EyeStatus::Open,
                right: EyeStatus::Closed,
            }),
            emotion: ClassificationResult::new("Happy", 0.5),
            drowsiness: ClassificationResult::new("Drowsy", 0.75),
            ts: 12.5,
        };
        assert!(record.is_drowsy());

        let json = serde_json::to_value(record.to_flat()).unwrap();
        assert_eq!(json["yaw"], 1.0);
        assert_eq!(json["left_eye"], "Open");
        assert_eq!(json["right_eye"], "Closed");
        assert_eq!(json["emotion_label"], "Happy");
        assert_eq!(json["drowsy_conf"], 0.75);
        assert_eq!(json["ts"], 12.5);
        assert!(StatusRecord::no_face(1.0).to_flat().roll.is_none());
        assert!(serde_json::to_value(StatusRecord::no_face(1.0).to_flat()).unwrap()["roll"].is_null());
    }

    #[test]
    fn test_publish_replaces() {
        let store = StatusStore::new();
        let reader = store.clone();
        store.publish(StatusRecord::no_face(5.0));
        assert_eq!(reader.snapshot().ts, 5.0);
        store.publish(StatusRecord::no_face(6.0));
        assert_eq!(reader.snapshot().ts, 6.0);
        assert_eq!(reader.snapshot(), reader.snapshot());
    }

    /// Every field derived from one counter, so a torn read shows up as a mismatch
    fn record_for(n: u32) -> StatusRecord {
        let v = n as f64;
        StatusRecord {
            face_detected: n % 2 == 0,
            head_pose: Some(HeadPose {
                yaw: v,
                pitch: -v,
                roll: v * 2.0,
            }),
            eyes: None,
            emotion: ClassificationResult::new(n.to_string(), n as f32),
            drowsiness: ClassificationResult::new(format!("d{n}"), n as f32),
            ts: v,
        }
    }

    #[test]
    fn test_readers_never_see_torn_records() {
        let store = StatusStore::new();
        store.publish(record_for(0));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        let record = store.snapshot();
                        assert_eq!(record, record_for(record.ts as u32));
                    }
                })
            })
            .collect();

        for n in 1..5_000 {
            store.publish(record_for(n));
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.snapshot(), record_for(4_999));
    }
}
