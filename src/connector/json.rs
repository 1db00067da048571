//! Newline-delimited JSON frames, one object per line:
//!
//! ```json
//! {"timestamp_us": 1200,
//!  "joints": {"Hips": {"location": [0.0, 0.0, 1.0],
//!                      "rotation_wzxy": [1.0, 0.0, 0.0, 0.0],
//!                      "parent": null}}}
//! ```
//!
//! `rotation_wzxy` is (w, x, y, z) on the wire; internally quaternions
//! are (x, y, z, w). Sources without a clock may omit `timestamp_us`;
//! the stream layer stamps arrival time in that case.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::connector::DecodeError;
use crate::ingest::{ConnectorAdapter, CoordinateConvention, DecodedFrame, DecodedJoint};
use crate::math::IDENTITY_QUAT;

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    timestamp_us: u64,
    // BTreeMap keeps joint order deterministic across frames
    joints: BTreeMap<String, WireJoint>,
}

#[derive(Debug, Deserialize)]
struct WireJoint {
    #[serde(default)]
    location: Option<[f32; 3]>,
    #[serde(default)]
    rotation_wzxy: Option<[f32; 4]>,
    #[serde(default)]
    parent: Option<String>,
}

pub struct JsonAdapter {
    convention: CoordinateConvention,
}

impl JsonAdapter {
    pub fn new(convention: CoordinateConvention) -> Self {
        Self { convention }
    }
}

impl Default for JsonAdapter {
    fn default() -> Self {
        Self::new(CoordinateConvention::default())
    }
}

impl ConnectorAdapter for JsonAdapter {
    fn convention(&self) -> CoordinateConvention {
        self.convention
    }

    fn decode(&self, raw: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let wire: WireFrame = serde_json::from_slice(raw)?;
        let joints = wire
            .joints
            .into_iter()
            .map(|(name, j)| {
                let rotation = match j.rotation_wzxy {
                    Some([w, x, y, z]) => [x, y, z, w],
                    None => IDENTITY_QUAT,
                };
                DecodedJoint {
                    name,
                    parent: j.parent,
                    translation: j.location.unwrap_or([0.0; 3]),
                    rotation,
                }
            })
            .collect();
        Ok(DecodedFrame {
            source_timestamp_us: wire.timestamp_us,
            joints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_frame() {
        let raw = br#"{
            "timestamp_us": 1200,
            "joints": {
                "Hips": {"location": [0.0, 0.0, 1.0], "rotation_wzxy": [1.0, 0.0, 0.0, 0.0]},
                "Spine": {"rotation_wzxy": [0.9, 0.05, 0.1, 0.0], "parent": "Hips"}
            }
        }"#;
        let adapter = JsonAdapter::default();
        let frame = adapter.decode(raw).unwrap();
        assert_eq!(frame.source_timestamp_us, 1200);
        assert_eq!(frame.joints.len(), 2);

        let hips = frame.joints.iter().find(|j| j.name == "Hips").unwrap();
        assert_eq!(hips.translation, [0.0, 0.0, 1.0]);
        // wzxy -> xyzw
        assert_eq!(hips.rotation, [0.0, 0.0, 0.0, 1.0]);

        let spine = frame.joints.iter().find(|j| j.name == "Spine").unwrap();
        assert_eq!(spine.parent.as_deref(), Some("Hips"));
        assert_eq!(spine.rotation, [0.05, 0.1, 0.0, 0.9]);
        assert_eq!(spine.translation, [0.0; 3]);
    }

    #[test]
    fn test_missing_timestamp_defaults_to_zero() {
        let raw = br#"{"joints": {"Hips": {"location": [0, 0, 0]}}}"#;
        let frame = JsonAdapter::default().decode(raw).unwrap();
        assert_eq!(frame.source_timestamp_us, 0);
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        let err = JsonAdapter::default().decode(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_empty_joints_decodes_to_empty_frame() {
        // normalization rejects it later as EmptyFrame
        let frame = JsonAdapter::default()
            .decode(br#"{"joints": {}}"#)
            .unwrap();
        assert!(frame.joints.is_empty());
    }
}
