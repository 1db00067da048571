//! Source-joint to target-bone mapping: auto name matching, manual
//! overrides, preset round-tripping and the immutable resolved snapshot
//! consumed by the retargeting pipeline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::SkeletonTopology;
use crate::math::{AxisMap, RotationOrder};

#[derive(Debug, Error)]
pub enum MappingError {
    /// Two manual overrides target the same bone. Reported, not
    /// auto-resolved; the user has to correct the table.
    #[error("ambiguous target bone '{bone}': mapped from {sources:?}")]
    AmbiguousTarget { bone: String, sources: Vec<String> },
    #[error("preset decode failed: {0}")]
    Preset(#[from] serde_json::Error),
}

/// Per-bone rotation limits in the rig's Euler order, radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneConstraint {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// The target rig as the core sees it: unique bone names, the rig's
/// Euler convention, and optional per-bone limits.
#[derive(Debug, Clone, Default)]
pub struct RigProfile {
    pub bones: Vec<String>,
    pub rotation_order: RotationOrder,
    pub constraints: HashMap<String, BoneConstraint>,
}

impl RigProfile {
    pub fn new<I, S>(bones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bones: bones.into_iter().map(Into::into).collect(),
            rotation_order: RotationOrder::default(),
            constraints: HashMap::new(),
        }
    }

    pub fn with_constraint(mut self, bone: impl Into<String>, c: BoneConstraint) -> Self {
        self.constraints.insert(bone.into(), c);
        self
    }

    fn find_bone(&self, name: &str) -> Option<&str> {
        self.bones
            .iter()
            .find(|b| b.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

fn default_scale() -> f32 {
    1.0
}

fn is_default_scale(s: &f32) -> bool {
    *s == 1.0
}

fn is_zero_offset(o: &[f32; 3]) -> bool {
    *o == [0.0; 3]
}

fn is_identity_map(m: &AxisMap) -> bool {
    m.is_identity()
}

/// One manual mapping entry. The preset wire format is exactly these
/// field names; absent override fields mean identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub source_joint: String,
    pub target_bone: String,
    #[serde(default = "default_scale", skip_serializing_if = "is_default_scale")]
    pub scale: f32,
    #[serde(default, skip_serializing_if = "is_zero_offset")]
    pub offset: [f32; 3],
    #[serde(default, skip_serializing_if = "is_identity_map")]
    pub axis_remap: AxisMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_order: Option<RotationOrder>,
}

impl MappingEntry {
    pub fn new(source_joint: impl Into<String>, target_bone: impl Into<String>) -> Self {
        Self {
            source_joint: source_joint.into(),
            target_bone: target_bone.into(),
            scale: default_scale(),
            offset: [0.0; 3],
            axis_remap: AxisMap::identity(),
            rotation_order: None,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_offset(mut self, offset: [f32; 3]) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_axis_remap(mut self, remap: AxisMap) -> Self {
        self.axis_remap = remap;
        self
    }

    pub fn with_rotation_order(mut self, order: RotationOrder) -> Self {
        self.rotation_order = Some(order);
        self
    }
}

/// User-owned table of manual mapping entries. At most one entry per
/// source joint; `insert` is last-write-wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingTable {
    pub entries: Vec<MappingEntry>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: MappingEntry) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.source_joint == entry.source_joint)
        {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn remove(&mut self, source_joint: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.source_joint != source_joint);
        self.entries.len() != before
    }

    pub fn get(&self, source_joint: &str) -> Option<&MappingEntry> {
        self.entries.iter().find(|e| e.source_joint == source_joint)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another table on top of this one, last write wins per
    /// source joint and per target bone (conflicting presets).
    pub fn merge(&mut self, other: MappingTable) {
        for entry in other.entries {
            self.entries.retain(|e| e.target_bone != entry.target_bone);
            self.insert(entry);
        }
    }
}

/// Serialize a table as an opaque preset blob (JSON entry list).
pub fn save_preset(table: &MappingTable) -> Vec<u8> {
    // entries only contain plain serde types; this cannot fail
    serde_json::to_vec_pretty(&table.entries).unwrap_or_default()
}

/// Parse a preset blob back into a table. Conflicting target bones are
/// resolved last-write-wins, matching `MappingTable::merge`.
pub fn load_preset(bytes: &[u8]) -> Result<MappingTable, MappingError> {
    let entries: Vec<MappingEntry> = serde_json::from_slice(bytes)?;
    let mut table = MappingTable::new();
    table.merge(MappingTable { entries });
    Ok(table)
}

/// One source joint resolved onto one target bone with the override
/// baked in. Calibration is an optional pre-multiplied rotation offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub source_joint: String,
    pub target_bone: String,
    pub scale: f32,
    pub offset: [f32; 3],
    pub axis_remap: AxisMap,
    pub rotation_order: Option<RotationOrder>,
    pub constraint: Option<BoneConstraint>,
    pub calibration: Option<[f32; 4]>,
    pub manual: bool,
}

/// Immutable snapshot of which source joints drive which target bones.
/// Consumed by the retargeting pipeline until the table changes again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedMapping {
    pub entries: Vec<ResolvedEntry>,
    pub target_rotation_order: RotationOrder,
}

impl ResolvedMapping {
    pub fn entry_for_joint(&self, source_joint: &str) -> Option<&ResolvedEntry> {
        self.entries.iter().find(|e| e.source_joint == source_joint)
    }

    pub fn entry_for_bone(&self, bone: &str) -> Option<&ResolvedEntry> {
        self.entries.iter().find(|e| e.target_bone == bone)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve a source topology against the rig: auto-match first
/// (case-insensitive exact), then layer manual overrides on top so they
/// survive reconnects with a different joint ordering. Unmatched source
/// joints are simply unmapped, not an error.
pub fn resolve(
    topology: &SkeletonTopology,
    rig: &RigProfile,
    table: &MappingTable,
) -> Result<ResolvedMapping, MappingError> {
    // Manual overrides must not collide on a target bone.
    let mut by_bone: HashMap<&str, Vec<&str>> = HashMap::new();
    for entry in &table.entries {
        by_bone
            .entry(entry.target_bone.as_str())
            .or_default()
            .push(entry.source_joint.as_str());
    }
    for (bone, sources) in &by_bone {
        if sources.len() > 1 {
            return Err(MappingError::AmbiguousTarget {
                bone: bone.to_string(),
                sources: sources.iter().map(|s| s.to_string()).collect(),
            });
        }
    }

    let mut entries: Vec<ResolvedEntry> = Vec::new();

    // 1. Auto-match in topology order.
    for joint in topology.joints() {
        if let Some(bone) = rig.find_bone(joint) {
            entries.push(ResolvedEntry {
                source_joint: joint.clone(),
                target_bone: bone.to_string(),
                scale: 1.0,
                offset: [0.0; 3],
                axis_remap: AxisMap::identity(),
                rotation_order: None,
                constraint: rig.constraints.get(bone).copied(),
                calibration: None,
                manual: false,
            });
        }
    }

    // 2. Manual overrides take precedence: displace any auto entry for
    //    the same source joint or the same target bone.
    for entry in &table.entries {
        if !topology.contains(&entry.source_joint) {
            continue;
        }
        entries.retain(|e| {
            e.source_joint != entry.source_joint && e.target_bone != entry.target_bone
        });
        entries.push(ResolvedEntry {
            source_joint: entry.source_joint.clone(),
            target_bone: entry.target_bone.clone(),
            scale: entry.scale,
            offset: entry.offset,
            axis_remap: entry.axis_remap,
            rotation_order: entry.rotation_order,
            constraint: rig.constraints.get(&entry.target_bone).copied(),
            calibration: None,
            manual: true,
        });
    }

    Ok(ResolvedMapping {
        entries,
        target_rotation_order: rig.rotation_order,
    })
}

/// Seed a mapping table for common rig naming schemes: `mixamorig:`
/// prefixes and `.L`/`.R`-style side suffixes. Only adds entries whose
/// target exists in the rig; the resolver itself stays exact-match.
pub fn auto_map_rig(topology: &SkeletonTopology, rig: &RigProfile) -> MappingTable {
    let mut table = MappingTable::new();

    for joint in topology.joints() {
        if rig.find_bone(joint).is_some() {
            // exact match is the resolver's job
            continue;
        }
        if let Some(bone) = fuzzy_find_bone(joint, rig) {
            table.insert(MappingEntry::new(joint.clone(), bone));
        }
    }
    table
}

fn fuzzy_find_bone(joint: &str, rig: &RigProfile) -> Option<String> {
    // mixamorig prefix, either direction
    let prefixed = format!("mixamorig:{joint}");
    if let Some(bone) = rig.find_bone(&prefixed) {
        return Some(bone.to_string());
    }
    if let Some(stripped) = joint
        .strip_prefix("mixamorig:")
        .or_else(|| joint.strip_prefix("Mixamorig:"))
    {
        if let Some(bone) = rig.find_bone(stripped) {
            return Some(bone.to_string());
        }
    }

    // Left/Right prefix -> side-suffix conventions
    let lower = joint.to_ascii_lowercase();
    let (base, suffixes): (&str, &[&str]) = if let Some(rest) = lower.strip_prefix("left") {
        (rest, &[".L", "_L", "_left", ".l"])
    } else if let Some(rest) = lower.strip_prefix("right") {
        (rest, &[".R", "_R", "_right", ".r"])
    } else {
        return substring_find_bone(&lower, rig);
    };

    for suffix in suffixes {
        let candidate = format!("{base}{suffix}");
        if let Some(bone) = rig.find_bone(&candidate) {
            return Some(bone.to_string());
        }
    }
    substring_find_bone(&lower, rig)
}

fn substring_find_bone(needle_lower: &str, rig: &RigProfile) -> Option<String> {
    if needle_lower.len() < 3 {
        return None;
    }
    rig.bones
        .iter()
        .find(|b| b.to_ascii_lowercase().contains(needle_lower))
        .cloned()
}
