//! The contract between the core and the host rig.

use crate::frame::TargetPose;

/// Implemented by the host. Called once per output tick; bones absent
/// from the pose must keep their rest or previous transform.
pub trait PoseSink {
    fn apply(&mut self, pose: &TargetPose, tick_timestamp_us: u64);
}

/// Sink that only logs, for headless runs and debugging.
#[derive(Debug, Default)]
pub struct LogSink;

impl PoseSink for LogSink {
    fn apply(&mut self, pose: &TargetPose, tick_timestamp_us: u64) {
        tracing::debug!(tick_timestamp_us, bones = pose.len(), "pose applied");
    }
}

/// Sink that keeps every applied pose, for tests.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub applied: Vec<(u64, TargetPose)>,
}

impl PoseSink for CollectSink {
    fn apply(&mut self, pose: &TargetPose, tick_timestamp_us: u64) {
        self.applied.push((tick_timestamp_us, pose.clone()));
    }
}
