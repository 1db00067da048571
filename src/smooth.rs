//! Temporal smoothing: decouples irregular frame arrival from the host's
//! output cadence.
//!
//! Per bone: a small ring buffer of timestamped transforms, lerp/slerp
//! between the samples bracketing the output tick, bounded linear
//! extrapolation past the newest sample (rotation held), and an EMA
//! low-pass on top. Filter state is per bone so a noisy bone does not
//! bleed into stable ones.

use std::collections::{HashMap, VecDeque};

use crate::config::SmootherConfig;
use crate::frame::{BoneTransform, TargetPose};
use crate::math;

/// How a bone's value for one output tick was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Interpolated or within the extrapolation window.
    Fresh,
    /// Fewer than two samples buffered; passthrough.
    ColdStart,
    /// Output tick is beyond the extrapolation window; last valid pose held.
    Stale,
}

/// One output tick's smoothed pose plus per-bone observability.
#[derive(Debug, Clone, Default)]
pub struct SmoothedTick {
    pub pose: TargetPose,
    pub statuses: HashMap<String, TickStatus>,
}

impl SmoothedTick {
    pub fn stale_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| **s == TickStatus::Stale)
            .count()
    }
}

/// EMA low-pass over a bone transform stream. Position is per-component
/// EMA, rotation is shortest-path NLERP toward the new sample.
struct BoneFilter {
    prev: Option<BoneTransform>,
}

impl BoneFilter {
    fn new() -> Self {
        Self { prev: None }
    }

    fn apply(&mut self, t: BoneTransform, alpha_pos: f32, alpha_rot: f32) -> BoneTransform {
        let Some(prev) = self.prev else {
            self.prev = Some(t);
            return t;
        };

        let translation = math::vec3_lerp(&prev.translation, &t.translation, alpha_pos);
        let rotation = math::quat_nlerp(&prev.rotation, &t.rotation, alpha_rot);
        let out = BoneTransform {
            translation,
            rotation,
            scale: t.scale,
        };
        self.prev = Some(out);
        out
    }

    fn reset(&mut self) {
        self.prev = None;
    }
}

struct BoneBuffer {
    samples: VecDeque<(u64, BoneTransform)>,
    filter: BoneFilter,
}

impl BoneBuffer {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            filter: BoneFilter::new(),
        }
    }

    fn newest(&self) -> Option<&(u64, BoneTransform)> {
        self.samples.back()
    }
}

pub struct TemporalSmoother {
    window_us: u64,
    extrapolation_us: u64,
    alpha_position: f32,
    alpha_rotation: f32,
    bones: HashMap<String, BoneBuffer>,
}

impl TemporalSmoother {
    pub fn new(window_us: u64, extrapolation_us: u64, alpha_position: f32, alpha_rotation: f32) -> Self {
        Self {
            window_us,
            extrapolation_us,
            alpha_position,
            alpha_rotation,
            bones: HashMap::new(),
        }
    }

    pub fn from_config(config: &SmootherConfig) -> Self {
        Self::new(
            config.window_ms * 1_000,
            config.extrapolation_ms * 1_000,
            config.alpha_position,
            config.alpha_rotation,
        )
    }

    /// Feed one retargeted pose. Timestamps per bone must be
    /// non-decreasing; the normalizer guarantees this per connector.
    pub fn push(&mut self, timestamp_us: u64, pose: &TargetPose) {
        for (bone, transform) in &pose.bones {
            let buffer = self
                .bones
                .entry(bone.clone())
                .or_insert_with(BoneBuffer::new);

            if let Some(&(last_ts, _)) = buffer.newest() {
                if timestamp_us < last_ts {
                    continue;
                }
                // A gap past the extrapolation window means the source
                // stalled; reset the filter so the snap is not smeared
                // over many ticks.
                if timestamp_us - last_ts > self.extrapolation_us {
                    buffer.filter.reset();
                    buffer.samples.clear();
                }
            }

            buffer.samples.push_back((timestamp_us, *transform));

            // Prune behind the ring window, always keeping a bracket pair.
            let horizon = timestamp_us.saturating_sub(self.window_us);
            while buffer.samples.len() > 2 {
                if buffer.samples[0].0 < horizon {
                    buffer.samples.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Produce the pose for one output tick. Bones with no buffered
    /// samples yield no entry.
    pub fn sample(&mut self, tick_us: u64) -> SmoothedTick {
        let mut out = SmoothedTick::default();

        for (bone, buffer) in &mut self.bones {
            let Some((raw, status)) =
                sample_buffer(&buffer.samples, tick_us, self.extrapolation_us)
            else {
                continue;
            };

            let smoothed = buffer
                .filter
                .apply(raw, self.alpha_position, self.alpha_rotation);
            out.pose.insert(bone.clone(), smoothed);
            out.statuses.insert(bone.clone(), status);
        }
        out
    }

    /// Drop all buffered state (disconnect / session reset).
    pub fn reset(&mut self) {
        self.bones.clear();
    }

    pub fn tracked_bones(&self) -> usize {
        self.bones.len()
    }
}

fn sample_buffer(
    samples: &VecDeque<(u64, BoneTransform)>,
    tick_us: u64,
    extrapolation_us: u64,
) -> Option<(BoneTransform, TickStatus)> {
    match samples.len() {
        0 => None,
        1 => Some((samples[0].1, TickStatus::ColdStart)),
        _ => {
            let &(newest_ts, newest) = samples.back().unwrap();

            if tick_us > newest_ts {
                let ahead = tick_us - newest_ts;
                if ahead > extrapolation_us {
                    return Some((newest, TickStatus::Stale));
                }
                // Linear velocity from the last pair; rotation held.
                let &(prev_ts, prev) = &samples[samples.len() - 2];
                let dt = (newest_ts - prev_ts) as f32 / 1e6;
                if dt <= 0.0 {
                    return Some((newest, TickStatus::Fresh));
                }
                let ahead_s = ahead as f32 / 1e6;
                let velocity = [
                    (newest.translation[0] - prev.translation[0]) / dt,
                    (newest.translation[1] - prev.translation[1]) / dt,
                    (newest.translation[2] - prev.translation[2]) / dt,
                ];
                let translation = math::vec3_add(
                    &newest.translation,
                    &math::vec3_scale(&velocity, ahead_s),
                );
                return Some((
                    BoneTransform {
                        translation,
                        rotation: newest.rotation,
                        scale: newest.scale,
                    },
                    TickStatus::Fresh,
                ));
            }

            // Bracketing pair; clamp to the oldest sample.
            let mut lower = samples[0];
            for pair in samples.iter() {
                if pair.0 <= tick_us {
                    lower = *pair;
                } else {
                    let (a_ts, a) = lower;
                    let (b_ts, b) = *pair;
                    if b_ts == a_ts {
                        return Some((b, TickStatus::Fresh));
                    }
                    let t = (tick_us - a_ts) as f32 / (b_ts - a_ts) as f32;
                    return Some((
                        BoneTransform {
                            translation: math::vec3_lerp(&a.translation, &b.translation, t),
                            rotation: math::quat_slerp(&a.rotation, &b.rotation, t),
                            scale: b.scale,
                        },
                        TickStatus::Fresh,
                    ));
                }
            }
            Some((newest, TickStatus::Fresh))
        }
    }
}
