//! Turns protocol-specific decoded messages into canonical frames:
//! clock reconciliation, unit/handedness conversion and validity
//! tagging, one normalizer instance per connector.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::IngestConfig;
use crate::frame::{CanonicalFrame, JointSample, SkeletonTopology};
use crate::math::{self, AxisMap};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("joint '{joint}' references unknown parent '{parent}'")]
    MalformedTopology { joint: String, parent: String },
    #[error("frame carries zero joints")]
    EmptyFrame,
    /// Dropped to keep the downstream ring buffers monotonic; a
    /// transient condition counted, not surfaced to the user.
    #[error("frame older than last accepted ({timestamp_us} < {last_timestamp_us})")]
    OutOfOrder {
        timestamp_us: u64,
        last_timestamp_us: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handedness {
    #[default]
    Right,
    Left,
}

/// Declared by each connector: how to get from its wire space into the
/// pipeline's canonical right-handed metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateConvention {
    /// Multiplier from the connector's linear unit to metres.
    pub unit_scale: f32,
    pub handedness: Handedness,
}

impl Default for CoordinateConvention {
    fn default() -> Self {
        Self {
            unit_scale: 1.0,
            handedness: Handedness::Right,
        }
    }
}

impl CoordinateConvention {
    pub fn centimetres() -> Self {
        Self {
            unit_scale: 0.01,
            ..Self::default()
        }
    }

    fn axis_map(&self) -> AxisMap {
        match self.handedness {
            Handedness::Right => AxisMap::identity(),
            Handedness::Left => AxisMap::flip_z(),
        }
    }
}

/// One joint as a connector decoded it, still in the connector's space.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedJoint {
    pub name: String,
    pub parent: Option<String>,
    pub translation: [f32; 3],
    pub rotation: [f32; 4],
}

/// A decoded message, still on the source clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    pub source_timestamp_us: u64,
    pub joints: Vec<DecodedJoint>,
}

/// The typed adapter seam: one implementation per protocol, the core
/// depends only on this.
pub trait ConnectorAdapter: Send {
    fn convention(&self) -> CoordinateConvention;
    fn decode(&self, raw: &[u8]) -> Result<DecodedFrame, crate::connector::DecodeError>;
}

/// Per-connector normalization state.
pub struct Normalizer {
    convention: CoordinateConvention,
    axis_map: AxisMap,
    max_translation: f32,
    /// pipeline clock minus source clock, microseconds; recomputed on
    /// each reconnect
    clock_offset_us: Option<i64>,
    last_timestamp_us: Option<u64>,
    last_known: HashMap<String, JointSample>,
    topology: Option<Arc<SkeletonTopology>>,
}

impl Normalizer {
    pub fn new(convention: CoordinateConvention, max_translation: f32) -> Self {
        Self {
            convention,
            axis_map: convention.axis_map(),
            max_translation,
            clock_offset_us: None,
            last_timestamp_us: None,
            last_known: HashMap::new(),
            topology: None,
        }
    }

    pub fn from_config(config: &IngestConfig, convention: CoordinateConvention) -> Self {
        Self::new(convention, config.max_translation)
    }

    /// Forget clock state after a reconnect. Last-known joint values are
    /// kept so invalid samples still have something to hold.
    pub fn on_reconnect(&mut self) {
        self.clock_offset_us = None;
        self.last_timestamp_us = None;
        self.topology = None;
    }

    /// Normalize one decoded frame. `now_us` is the pipeline clock at
    /// arrival; it anchors the per-connector clock offset.
    pub fn normalize(
        &mut self,
        decoded: &DecodedFrame,
        now_us: u64,
    ) -> Result<CanonicalFrame, NormalizeError> {
        if decoded.joints.is_empty() {
            return Err(NormalizeError::EmptyFrame);
        }

        let topology = self.reconcile_topology(decoded)?;

        let offset = *self
            .clock_offset_us
            .get_or_insert(now_us as i64 - decoded.source_timestamp_us as i64);
        let timestamp_us = (decoded.source_timestamp_us as i64 + offset).max(0) as u64;

        if let Some(last) = self.last_timestamp_us {
            if timestamp_us < last {
                return Err(NormalizeError::OutOfOrder {
                    timestamp_us,
                    last_timestamp_us: last,
                });
            }
        }
        self.last_timestamp_us = Some(timestamp_us);

        let mut samples = HashMap::with_capacity(decoded.joints.len());
        for joint in &decoded.joints {
            let raw = JointSample::new(joint.translation, joint.rotation);
            let sample = if raw.is_plausible(self.max_translation / self.convention.unit_scale) {
                let translation = self
                    .axis_map
                    .apply_vec3(&math::vec3_scale(&joint.translation, self.convention.unit_scale));
                let rotation = self.axis_map.apply_quat(&math::quat_normalize(&joint.rotation));
                let sample = JointSample::new(translation, rotation);
                self.last_known.insert(joint.name.clone(), sample);
                sample
            } else {
                // hold the last-known canonical value, flagged invalid,
                // to preserve topology continuity
                self.last_known
                    .get(&joint.name)
                    .copied()
                    .unwrap_or_else(JointSample::identity)
                    .invalidated()
            };
            samples.insert(joint.name.clone(), sample);
        }

        Ok(CanonicalFrame {
            timestamp_us,
            topology,
            samples,
        })
    }

    fn reconcile_topology(
        &mut self,
        decoded: &DecodedFrame,
    ) -> Result<Arc<SkeletonTopology>, NormalizeError> {
        let built = SkeletonTopology::from_pairs(
            decoded
                .joints
                .iter()
                .map(|j| (j.name.clone(), j.parent.clone())),
        )
        .map_err(|(joint, parent)| NormalizeError::MalformedTopology { joint, parent })?;

        match &self.topology {
            Some(cached) if **cached == built => Ok(Arc::clone(cached)),
            _ => {
                let arc = Arc::new(built);
                self.topology = Some(Arc::clone(&arc));
                Ok(arc)
            }
        }
    }

    pub fn topology(&self) -> Option<&Arc<SkeletonTopology>> {
        self.topology.as_ref()
    }
}
