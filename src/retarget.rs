//! Retargeting transform chain: scale, offset, axis remap, rotation-order
//! conversion, calibration offset and constraint clamp, in that fixed
//! order per mapped joint.

use thiserror::Error;

use crate::frame::{BoneTransform, CanonicalFrame, TargetPose};
use crate::mapping::{ResolvedEntry, ResolvedMapping};
use crate::math::{self, RotationOrder};

#[derive(Debug, Error)]
pub enum RetargetError {
    /// The axis remap matrix is not invertible. Configuration error;
    /// no partial pose is emitted for the tick that hits this.
    #[error("degenerate axis remap for bone '{bone}'")]
    DegenerateTransform { bone: String },
}

/// Pure function of its inputs for a given mapping snapshot. Joints
/// absent from the mapping, or carrying an invalid sample, produce no
/// entry; the host leaves such bones untouched.
pub fn retarget(
    frame: &CanonicalFrame,
    mapping: &ResolvedMapping,
) -> Result<TargetPose, RetargetError> {
    let mut pose = TargetPose::new();

    for entry in &mapping.entries {
        let Some(sample) = frame.sample(&entry.source_joint) else {
            continue;
        };
        if !sample.valid {
            continue;
        }

        let transform = retarget_joint(
            &sample.translation,
            &sample.rotation,
            entry,
            mapping.target_rotation_order,
        )?;
        pose.insert(entry.target_bone.clone(), transform);
    }

    Ok(pose)
}

fn retarget_joint(
    translation: &[f32; 3],
    rotation: &[f32; 4],
    entry: &ResolvedEntry,
    target_order: RotationOrder,
) -> Result<BoneTransform, RetargetError> {
    if !entry.axis_remap.is_invertible() {
        return Err(RetargetError::DegenerateTransform {
            bone: entry.target_bone.clone(),
        });
    }

    // 1. uniform scale, 2. offset
    let mut t = math::vec3_scale(translation, entry.scale);
    t = math::vec3_add(&t, &entry.offset);

    // 3. axis remap, conjugation for the rotation
    t = entry.axis_remap.apply_vec3(&t);
    let mut q = entry.axis_remap.apply_quat(rotation);

    // 4. rotation-order conversion when source and target disagree
    if let Some(source_order) = entry.rotation_order {
        if source_order != target_order {
            let angles = math::euler_from_quat(&q, source_order);
            q = math::quat_from_euler(&angles, target_order);
        }
    }

    // 5. calibration offset, pre-multiplied so the captured reference
    //    pose becomes the zero pose
    if let Some(calibration) = entry.calibration {
        q = math::quat_mul(&calibration, &q);
    }

    // 6. constraint clamp, silent: visible over-rotation beats a frozen rig
    if let Some(constraint) = entry.constraint {
        let mut angles = math::euler_from_quat(&q, target_order);
        for i in 0..3 {
            angles[i] = angles[i].clamp(constraint.min[i], constraint.max[i]);
        }
        q = math::quat_from_euler(&angles, target_order);
    }

    Ok(BoneTransform::new(t, math::quat_normalize(&q)))
}

/// Rotation a joint sample reaches just before the calibration step.
/// Used to capture calibration offsets.
fn precalibration_rotation(
    rotation: &[f32; 4],
    entry: &ResolvedEntry,
    target_order: RotationOrder,
) -> Option<[f32; 4]> {
    if !entry.axis_remap.is_invertible() {
        return None;
    }
    let mut q = entry.axis_remap.apply_quat(rotation);
    if let Some(source_order) = entry.rotation_order {
        if source_order != target_order {
            let angles = math::euler_from_quat(&q, source_order);
            q = math::quat_from_euler(&angles, target_order);
        }
    }
    Some(q)
}

/// Capture calibration offsets from a reference frame: for every mapped
/// joint with a valid sample, store the inverse of its retargeted
/// rotation so that this frame becomes the rig's zero pose. Returns a
/// new snapshot; entries without a usable sample keep their previous
/// offset.
pub fn calibrate(frame: &CanonicalFrame, mapping: &ResolvedMapping) -> ResolvedMapping {
    let mut out = mapping.clone();
    for entry in &mut out.entries {
        let Some(sample) = frame.sample(&entry.source_joint) else {
            continue;
        };
        if !sample.valid {
            continue;
        }
        if let Some(q) = precalibration_rotation(&sample.rotation, entry, out.target_rotation_order)
        {
            entry.calibration = Some(math::quat_inverse(&math::quat_normalize(&q)));
        }
    }
    out
}

/// Drop all calibration offsets from a snapshot.
pub fn clear_calibration(mapping: &ResolvedMapping) -> ResolvedMapping {
    let mut out = mapping.clone();
    for entry in &mut out.entries {
        entry.calibration = None;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{JointSample, SkeletonTopology};
    use crate::mapping::{
        resolve, BoneConstraint, MappingEntry, MappingTable, RigProfile,
    };
    use crate::math::{AxisMap, IDENTITY_QUAT};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn frame_with(samples: &[(&str, JointSample)]) -> CanonicalFrame {
        let topology = SkeletonTopology::from_pairs(
            samples.iter().map(|(n, _)| (*n, None::<&str>)),
        )
        .unwrap();
        CanonicalFrame {
            timestamp_us: 0,
            topology: Arc::new(topology),
            samples: samples
                .iter()
                .map(|(n, s)| (n.to_string(), *s))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn resolve_simple(table: MappingTable, rig: RigProfile, frame: &CanonicalFrame) -> ResolvedMapping {
        resolve(&frame.topology, &rig, &table).unwrap()
    }

    #[test]
    fn test_scale_and_offset_order() {
        let frame = frame_with(&[(
            "Hips",
            JointSample::new([1.0, 2.0, 0.0], IDENTITY_QUAT),
        )]);
        let mut table = MappingTable::new();
        table.insert(
            MappingEntry::new("Hips", "pelvis")
                .with_scale(2.0)
                .with_offset([0.0, 1.0, 0.0]),
        );
        let mapping = resolve_simple(table, RigProfile::new(["pelvis"]), &frame);

        let pose = retarget(&frame, &mapping).unwrap();
        let t = pose.get("pelvis").unwrap().translation;
        // scale first, then offset: (1,2,0)*2 + (0,1,0)
        assert_eq!(t, [2.0, 5.0, 0.0]);
    }

    #[test]
    fn test_axis_remap_applies_to_translation_and_rotation() {
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let frame = frame_with(&[(
            "Hips",
            JointSample::new([1.0, 0.0, 0.0], [0.0, half, 0.0, half]),
        )]);
        // x->z, y->x, z->y
        let remap = AxisMap([[0, 1, 0], [0, 0, 1], [1, 0, 0]]);
        let mut table = MappingTable::new();
        table.insert(MappingEntry::new("Hips", "pelvis").with_axis_remap(remap));
        let mapping = resolve_simple(table, RigProfile::new(["pelvis"]), &frame);

        let pose = retarget(&frame, &mapping).unwrap();
        let bt = pose.get("pelvis").unwrap();
        assert_eq!(bt.translation, [0.0, 0.0, 1.0]);
        // 90 deg about source Y becomes 90 deg about the axis Y maps to (X)
        let e = math::euler_from_quat(&bt.rotation, RotationOrder::Xyz);
        assert!((e[0] - std::f32::consts::FRAC_PI_2).abs() < 1e-4, "{:?}", e);
    }

    #[test]
    fn test_quaternions_unit_normalized() {
        let frame = frame_with(&[(
            "Hips",
            JointSample::new([0.0; 3], math::quat_from_euler(&[0.3, 0.8, -0.4], RotationOrder::Xyz)),
        )]);
        let mut table = MappingTable::new();
        table.insert(
            MappingEntry::new("Hips", "pelvis")
                .with_axis_remap(AxisMap::flip_z())
                .with_rotation_order(RotationOrder::Zyx),
        );
        let mapping = resolve_simple(table, RigProfile::new(["pelvis"]), &frame);

        let pose = retarget(&frame, &mapping).unwrap();
        let q = pose.get("pelvis").unwrap().rotation;
        assert!((math::quat_length(&q) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unmapped_joint_produces_no_entry() {
        let frame = frame_with(&[
            ("Hips", JointSample::new([0.0; 3], IDENTITY_QUAT)),
            ("Tail", JointSample::new([0.0; 3], IDENTITY_QUAT)),
        ]);
        let mapping = resolve_simple(MappingTable::new(), RigProfile::new(["Hips"]), &frame);

        let pose = retarget(&frame, &mapping).unwrap();
        assert_eq!(pose.len(), 1);
        assert!(pose.get("Tail").is_none());
    }

    #[test]
    fn test_invalid_sample_skipped() {
        let frame = frame_with(&[(
            "Hips",
            JointSample::new([0.0; 3], IDENTITY_QUAT).invalidated(),
        )]);
        let mapping = resolve_simple(MappingTable::new(), RigProfile::new(["Hips"]), &frame);

        let pose = retarget(&frame, &mapping).unwrap();
        assert!(pose.is_empty());
    }

    #[test]
    fn test_degenerate_remap_is_error() {
        let frame = frame_with(&[("Hips", JointSample::new([0.0; 3], IDENTITY_QUAT))]);
        let mut table = MappingTable::new();
        table.insert(
            MappingEntry::new("Hips", "pelvis")
                .with_axis_remap(AxisMap([[1, 0, 0], [1, 0, 0], [0, 0, 1]])),
        );
        let mapping = resolve_simple(table, RigProfile::new(["pelvis"]), &frame);

        match retarget(&frame, &mapping) {
            Err(RetargetError::DegenerateTransform { bone }) => assert_eq!(bone, "pelvis"),
            other => panic!("expected DegenerateTransform, got {:?}", other),
        }
    }

    #[test]
    fn test_constraint_clamps_silently() {
        let big = math::quat_from_euler(&[1.2, 0.0, 0.0], RotationOrder::Xyz);
        let frame = frame_with(&[("Hips", JointSample::new([0.0; 3], big))]);
        let rig = RigProfile::new(["Hips"]).with_constraint(
            "Hips",
            BoneConstraint {
                min: [-0.5, -0.5, -0.5],
                max: [0.5, 0.5, 0.5],
            },
        );
        let mapping = resolve_simple(MappingTable::new(), rig, &frame);

        let pose = retarget(&frame, &mapping).unwrap();
        let q = pose.get("Hips").unwrap().rotation;
        let e = math::euler_from_quat(&q, RotationOrder::Xyz);
        assert!((e[0] - 0.5).abs() < 1e-4, "{:?}", e);
    }

    #[test]
    fn test_rotation_order_conversion_changes_result() {
        let q = math::quat_from_euler(&[0.4, 0.7, 0.2], RotationOrder::Xyz);
        let frame = frame_with(&[("Hips", JointSample::new([0.0; 3], q))]);
        let mut table = MappingTable::new();
        table.insert(MappingEntry::new("Hips", "pelvis").with_rotation_order(RotationOrder::Xyz));
        let mut rig = RigProfile::new(["pelvis"]);
        rig.rotation_order = RotationOrder::Zyx;
        let mapping = resolve_simple(table, rig, &frame);

        let pose = retarget(&frame, &mapping).unwrap();
        let out = pose.get("pelvis").unwrap().rotation;
        // same per-axis angles, recomposed ZYX: a genuinely different rotation
        let expected = math::quat_from_euler(&[0.4, 0.7, 0.2], RotationOrder::Zyx);
        assert!((math::quat_dot(&out, &expected).abs() - 1.0).abs() < 1e-4);
        assert!((math::quat_dot(&out, &q).abs() - 1.0).abs() > 1e-3);
    }

    #[test]
    fn test_calibration_zeroes_reference_pose() {
        let q = math::quat_from_euler(&[0.3, -0.2, 0.5], RotationOrder::Xyz);
        let frame = frame_with(&[("Hips", JointSample::new([0.0; 3], q))]);
        let mapping = resolve_simple(MappingTable::new(), RigProfile::new(["Hips"]), &frame);

        let calibrated = calibrate(&frame, &mapping);
        let pose = retarget(&frame, &calibrated).unwrap();
        let out = pose.get("Hips").unwrap().rotation;
        assert!(
            (math::quat_dot(&out, &IDENTITY_QUAT).abs() - 1.0).abs() < 1e-5,
            "{:?}",
            out
        );

        let cleared = clear_calibration(&calibrated);
        let pose = retarget(&frame, &cleared).unwrap();
        let out = pose.get("Hips").unwrap().rotation;
        assert!((math::quat_dot(&out, &q).abs() - 1.0).abs() < 1e-5);
    }
}
