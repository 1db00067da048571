//! OSC joint streams. One message per joint at `/mocap/joint/<name>`
//! with seven float args (tx, ty, tz, qx, qy, qz, qw); a whole skeleton
//! usually arrives as one timestamped bundle.

use rosc::{decoder, OscBundle, OscMessage, OscPacket, OscType};

use crate::connector::DecodeError;
use crate::ingest::{ConnectorAdapter, CoordinateConvention, DecodedFrame, DecodedJoint};

const JOINT_PREFIX: &str = "/mocap/joint/";

pub struct OscAdapter {
    convention: CoordinateConvention,
}

impl OscAdapter {
    pub fn new(convention: CoordinateConvention) -> Self {
        Self { convention }
    }
}

impl Default for OscAdapter {
    fn default() -> Self {
        Self::new(CoordinateConvention::default())
    }
}

fn float_arg(msg: &OscMessage, index: usize) -> Result<f32, DecodeError> {
    match msg.args.get(index) {
        Some(OscType::Float(v)) => Ok(*v),
        Some(OscType::Double(v)) => Ok(*v as f32),
        other => Err(DecodeError::Malformed(format!(
            "{}: arg {} is {:?}, expected float",
            msg.addr, index, other
        ))),
    }
}

fn decode_joint(msg: &OscMessage) -> Result<Option<DecodedJoint>, DecodeError> {
    let Some(name) = msg.addr.strip_prefix(JOINT_PREFIX) else {
        // other addresses on the same port are not ours
        return Ok(None);
    };
    if msg.args.len() < 7 {
        return Err(DecodeError::Malformed(format!(
            "{}: expected 7 args, got {}",
            msg.addr,
            msg.args.len()
        )));
    }
    let translation = [float_arg(msg, 0)?, float_arg(msg, 1)?, float_arg(msg, 2)?];
    let rotation = [
        float_arg(msg, 3)?,
        float_arg(msg, 4)?,
        float_arg(msg, 5)?,
        float_arg(msg, 6)?,
    ];
    Ok(Some(DecodedJoint {
        name: name.to_string(),
        parent: None,
        translation,
        rotation,
    }))
}

fn timetag_us(bundle: &OscBundle) -> u64 {
    let (seconds, fractional) = (bundle.timetag.seconds, bundle.timetag.fractional);
    seconds as u64 * 1_000_000 + ((fractional as u64 * 1_000_000) >> 32)
}

fn collect(packet: &OscPacket, frame: &mut DecodedFrame) -> Result<(), DecodeError> {
    match packet {
        OscPacket::Message(msg) => {
            if let Some(joint) = decode_joint(msg)? {
                frame.joints.push(joint);
            }
            Ok(())
        }
        OscPacket::Bundle(bundle) => {
            if frame.source_timestamp_us == 0 {
                frame.source_timestamp_us = timetag_us(bundle);
            }
            for inner in &bundle.content {
                collect(inner, frame)?;
            }
            Ok(())
        }
    }
}

impl ConnectorAdapter for OscAdapter {
    fn convention(&self) -> CoordinateConvention {
        self.convention
    }

    fn decode(&self, raw: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let (_, packet) =
            decoder::decode_udp(raw).map_err(|e| DecodeError::Osc(e.to_string()))?;
        let mut frame = DecodedFrame::default();
        collect(&packet, &mut frame)?;
        Ok(frame)
    }
}
