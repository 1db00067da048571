//! Protocol-agnostic data model: skeleton topology, joint samples,
//! canonical frames and finished target poses.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::math::{self, IDENTITY_QUAT};

/// Ordered set of joint identifiers plus optional parents, forming a
/// forest. Multiple roots are allowed for partial skeletons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkeletonTopology {
    joints: Vec<String>,
    parents: HashMap<String, String>,
}

impl SkeletonTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a topology from (joint, optional parent) pairs, keeping the
    /// given order. Returns the joint whose parent is unknown, if any.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, (String, String)>
    where
        I: IntoIterator<Item = (S, Option<S>)>,
        S: Into<String>,
    {
        let mut topo = Self::new();
        let mut pending: Vec<(String, String)> = Vec::new();
        for (joint, parent) in pairs {
            let joint = joint.into();
            if let Some(parent) = parent {
                pending.push((joint.clone(), parent.into()));
            }
            topo.joints.push(joint);
        }
        for (joint, parent) in pending {
            if !topo.joints.iter().any(|j| *j == parent) {
                return Err((joint, parent));
            }
            topo.parents.insert(joint, parent);
        }
        Ok(topo)
    }

    pub fn joints(&self) -> &[String] {
        &self.joints
    }

    pub fn parent(&self, joint: &str) -> Option<&str> {
        self.parents.get(joint).map(String::as_str)
    }

    pub fn contains(&self, joint: &str) -> bool {
        self.joints.iter().any(|j| j == joint)
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

/// One joint's sample in a frame. Invalid samples carry the last-known
/// value with `valid = false` instead of garbage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSample {
    /// Translation (x, y, z) in canonical metres.
    pub translation: [f32; 3],
    /// Rotation quaternion (x, y, z, w), unit length.
    pub rotation: [f32; 4],
    pub valid: bool,
}

impl JointSample {
    pub fn new(translation: [f32; 3], rotation: [f32; 4]) -> Self {
        Self {
            translation,
            rotation,
            valid: true,
        }
    }

    pub fn identity() -> Self {
        Self::new([0.0; 3], IDENTITY_QUAT)
    }

    pub fn invalidated(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Finite components and a plausible magnitude. Capture spaces are
    /// room-scale; anything beyond this is sensor garbage.
    pub fn is_plausible(&self, max_translation: f32) -> bool {
        math::vec3_is_finite(&self.translation)
            && math::quat_is_finite(&self.rotation)
            && self.translation.iter().all(|c| c.abs() <= max_translation)
            && math::quat_length(&self.rotation) > 1e-6
    }
}

/// Snapshot of one moment of source skeleton data on the pipeline clock.
#[derive(Debug, Clone)]
pub struct CanonicalFrame {
    /// Monotonic pipeline timestamp, microseconds.
    pub timestamp_us: u64,
    pub topology: Arc<SkeletonTopology>,
    pub samples: HashMap<String, JointSample>,
}

impl CanonicalFrame {
    pub fn sample(&self, joint: &str) -> Option<&JointSample> {
        self.samples.get(joint)
    }
}

/// Final transform for one target bone, in the rig's bone-local space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneTransform {
    pub translation: [f32; 3],
    pub rotation: [f32; 4],
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scale: Option<f32>,
}

impl BoneTransform {
    pub fn new(translation: [f32; 3], rotation: [f32; 4]) -> Self {
        Self {
            translation,
            rotation,
            scale: None,
        }
    }

    pub fn identity() -> Self {
        Self::new([0.0; 3], IDENTITY_QUAT)
    }
}

/// One output tick's finished pose: bone id -> transform. Bones absent
/// from the map must be left untouched by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetPose {
    pub bones: HashMap<String, BoneTransform>,
}

impl TargetPose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bone: &str) -> Option<&BoneTransform> {
        self.bones.get(bone)
    }

    pub fn insert(&mut self, bone: impl Into<String>, transform: BoneTransform) {
        self.bones.insert(bone.into(), transform);
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_from_pairs() {
        let topo = SkeletonTopology::from_pairs([
            ("Hips", None),
            ("Spine", Some("Hips")),
            ("Head", Some("Spine")),
        ])
        .unwrap();
        assert_eq!(topo.len(), 3);
        assert_eq!(topo.parent("Spine"), Some("Hips"));
        assert_eq!(topo.parent("Hips"), None);
    }

    #[test]
    fn test_topology_unknown_parent() {
        let err = SkeletonTopology::from_pairs([("Spine", Some("Hips"))]).unwrap_err();
        assert_eq!(err, ("Spine".to_string(), "Hips".to_string()));
    }

    #[test]
    fn test_topology_multiple_roots() {
        let topo = SkeletonTopology::from_pairs([
            ("LeftHand", None),
            ("RightHand", None),
            ("LeftIndex1", Some("LeftHand")),
        ])
        .unwrap();
        assert_eq!(topo.len(), 3);
        assert!(topo.contains("RightHand"));
    }

    #[test]
    fn test_sample_plausibility() {
        let good = JointSample::new([0.1, 1.2, -0.4], [0.0, 0.0, 0.0, 1.0]);
        assert!(good.is_plausible(100.0));

        let nan = JointSample::new([f32::NAN, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]);
        assert!(!nan.is_plausible(100.0));

        let huge = JointSample::new([1e7, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]);
        assert!(!huge.is_plausible(100.0));

        let zero_rot = JointSample::new([0.0; 3], [0.0; 4]);
        assert!(!zero_rot.is_plausible(100.0));
    }

    #[test]
    fn test_invalidated_keeps_value() {
        let s = JointSample::new([1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 1.0]).invalidated();
        assert!(!s.valid);
        assert_eq!(s.translation, [1.0, 2.0, 3.0]);
    }
}
