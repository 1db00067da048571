//! Append-only recording of applied poses, with explicit gap markers
//! where data went missing so editing tools can see the discontinuity.

use serde::{Deserialize, Serialize};

use crate::frame::TargetPose;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackEntry {
    Keyframe { timestamp_us: u64, pose: TargetPose },
    /// A dropped out-of-order append; marks where data was missing
    /// instead of silently interpolating across.
    Gap { timestamp_us: u64 },
}

impl TrackEntry {
    pub fn timestamp_us(&self) -> u64 {
        match self {
            TrackEntry::Keyframe { timestamp_us, .. } => *timestamp_us,
            TrackEntry::Gap { timestamp_us } => *timestamp_us,
        }
    }
}

/// Idle -> (start) -> Recording -> (stop) -> Idle. `append` only takes
/// effect while Recording; a stray late tick after stop is a no-op.
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    recording: bool,
    entries: Vec<TrackEntry>,
    last_timestamp_us: Option<u64>,
    gap_count: u64,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecorderState {
        if self.recording {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn start(&mut self) {
        if self.recording {
            tracing::debug!("recorder already running");
            return;
        }
        self.recording = true;
        tracing::info!("recording started");
    }

    pub fn stop(&mut self) {
        if self.recording {
            self.recording = false;
            tracing::info!(keyframes = self.keyframe_count(), "recording stopped");
        }
    }

    /// Clear the track between sessions. Ignored while recording.
    pub fn reset(&mut self) {
        if self.recording {
            tracing::warn!("reset ignored while recording");
            return;
        }
        self.entries.clear();
        self.last_timestamp_us = None;
        self.gap_count = 0;
    }

    /// Append one applied pose. No-op while Idle. Timestamps must be
    /// strictly increasing; an out-of-order append is dropped and the
    /// drop is recorded as a gap marker, never reordered in.
    pub fn append(&mut self, timestamp_us: u64, pose: &TargetPose) {
        if !self.recording {
            return;
        }
        if let Some(last) = self.last_timestamp_us {
            if timestamp_us <= last {
                self.gap_count += 1;
                self.entries.push(TrackEntry::Gap { timestamp_us });
                tracing::warn!(
                    timestamp_us,
                    last_timestamp_us = last,
                    "out-of-order append dropped, gap recorded"
                );
                return;
            }
        }
        self.last_timestamp_us = Some(timestamp_us);
        self.entries.push(TrackEntry::Keyframe {
            timestamp_us,
            pose: pose.clone(),
        });
    }

    /// Side-effect-free snapshot of the track up to this call. Valid in
    /// both states; repeated calls without appends yield identical
    /// sequences.
    pub fn export(&self) -> Vec<TrackEntry> {
        self.entries.clone()
    }

    pub fn keyframe_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, TrackEntry::Keyframe { .. }))
            .count()
    }

    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoneTransform;
    use crate::math::IDENTITY_QUAT;

    fn pose(x: f32) -> TargetPose {
        let mut p = TargetPose::new();
        p.insert("Hips", BoneTransform::new([x, 0.0, 0.0], IDENTITY_QUAT));
        p
    }

    #[test]
    fn test_append_while_idle_is_noop() {
        let mut rec = RecordingBuffer::new();
        rec.append(100, &pose(1.0));
        assert!(rec.export().is_empty());
    }

    #[test]
    fn test_append_after_stop_is_noop() {
        let mut rec = RecordingBuffer::new();
        rec.start();
        rec.append(100, &pose(1.0));
        rec.stop();
        rec.append(200, &pose(2.0));
        assert_eq!(rec.keyframe_count(), 1);
    }

    #[test]
    fn test_out_of_order_append_dropped_with_gap() {
        let mut rec = RecordingBuffer::new();
        rec.start();
        rec.append(200, &pose(1.0));
        rec.append(100, &pose(0.0));

        let track = rec.export();
        assert_eq!(track.len(), 2);
        assert!(matches!(
            &track[0],
            TrackEntry::Keyframe { timestamp_us: 200, .. }
        ));
        assert!(matches!(&track[1], TrackEntry::Gap { timestamp_us: 100 }));
        assert_eq!(rec.gap_count(), 1);

        // keyframes stay strictly increasing
        let mut last = 0;
        for e in track {
            if let TrackEntry::Keyframe { timestamp_us, .. } = e {
                assert!(timestamp_us > last);
                last = timestamp_us;
            }
        }
    }

    #[test]
    fn test_equal_timestamp_dropped() {
        let mut rec = RecordingBuffer::new();
        rec.start();
        rec.append(100, &pose(1.0));
        rec.append(100, &pose(2.0));
        assert_eq!(rec.keyframe_count(), 1);
        assert_eq!(rec.gap_count(), 1);
    }

    #[test]
    fn test_export_idempotent() {
        let mut rec = RecordingBuffer::new();
        rec.start();
        rec.append(100, &pose(1.0));
        rec.append(200, &pose(2.0));
        let a = rec.export();
        let b = rec.export();
        assert_eq!(a, b);
    }

    #[test]
    fn test_export_while_recording() {
        let mut rec = RecordingBuffer::new();
        rec.start();
        rec.append(100, &pose(1.0));
        let snapshot = rec.export();
        rec.append(200, &pose(2.0));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(rec.export().len(), 2);
    }

    #[test]
    fn test_restart_appends_to_same_track_until_reset() {
        let mut rec = RecordingBuffer::new();
        rec.start();
        rec.append(100, &pose(1.0));
        rec.stop();
        rec.start();
        rec.append(200, &pose(2.0));
        rec.stop();
        assert_eq!(rec.keyframe_count(), 2);

        rec.reset();
        assert!(rec.export().is_empty());
        assert_eq!(rec.gap_count(), 0);
    }

    #[test]
    fn test_reset_ignored_while_recording() {
        let mut rec = RecordingBuffer::new();
        rec.start();
        rec.append(100, &pose(1.0));
        rec.reset();
        assert_eq!(rec.keyframe_count(), 1);
    }
}
