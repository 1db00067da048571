//! The serialized pipeline stage: deliver → normalize → resolve →
//! retarget → smooth → {sink, recorder}, one frame at a time per rig.
//!
//! The mapping table is the only state shared between the control path
//! (user edits) and the frame path; edits land as atomic snapshot swaps
//! so a frame never sees a half-edited table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::config::Config;
use crate::frame::{CanonicalFrame, SkeletonTopology};
use crate::ingest::{ConnectorAdapter, NormalizeError, Normalizer};
use crate::mapping::{self, MappingError, MappingTable, ResolvedMapping, RigProfile};
use crate::record::{RecordingBuffer, TrackEntry};
use crate::retarget::{self, RetargetError};
use crate::sink::PoseSink;
use crate::smooth::TemporalSmoother;

/// Monotonic pipeline clock, microseconds since creation.
#[derive(Debug, Clone, Copy)]
pub struct PipelineClock {
    epoch: Instant,
}

impl PipelineClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

impl Default for PipelineClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Observability counters. Transient data errors only ever show up
/// here, never as user-facing failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineCounters {
    pub frames_in: u64,
    pub frames_dropped_out_of_order: u64,
    pub frames_rejected: u64,
    pub decode_errors: u64,
    pub invalid_samples: u64,
    pub degenerate_bones: u64,
    pub resolve_errors: u64,
    pub ticks: u64,
    pub stale_bone_ticks: u64,
}

struct ConnectorState {
    adapter: Box<dyn ConnectorAdapter>,
    normalizer: Normalizer,
    resolved: Arc<ResolvedMapping>,
    resolved_version: u64,
    resolved_topology: Option<Arc<SkeletonTopology>>,
    last_frame: Option<CanonicalFrame>,
}

pub struct Pipeline {
    rig: RigProfile,
    table: RwLock<MappingTable>,
    table_version: AtomicU64,
    calibration: RwLock<HashMap<String, [f32; 4]>>,
    connectors: HashMap<String, ConnectorState>,
    smoother: TemporalSmoother,
    recorder: RecordingBuffer,
    counters: PipelineCounters,
    max_translation: f32,
}

impl Pipeline {
    pub fn new(rig: RigProfile, config: &Config) -> Self {
        Self {
            rig,
            table: RwLock::new(MappingTable::new()),
            table_version: AtomicU64::new(1),
            calibration: RwLock::new(HashMap::new()),
            connectors: HashMap::new(),
            smoother: TemporalSmoother::from_config(&config.smoother),
            recorder: RecordingBuffer::new(),
            counters: PipelineCounters::default(),
            max_translation: config.ingest.max_translation,
        }
    }

    // --- connector lifecycle ---

    pub fn add_connector(&mut self, id: impl Into<String>, adapter: Box<dyn ConnectorAdapter>) {
        let id = id.into();
        let convention = adapter.convention();
        let normalizer = Normalizer::new(convention, self.max_translation);
        tracing::info!(connector = %id, "connector added");
        self.connectors.insert(
            id,
            ConnectorState {
                adapter,
                normalizer,
                resolved: Arc::new(ResolvedMapping::default()),
                resolved_version: 0,
                resolved_topology: None,
                last_frame: None,
            },
        );
    }

    /// Disconnect is immediate: state is dropped, in-flight frames from
    /// the connector will be ignored, and the smoother holds last-known
    /// poses until they go stale.
    pub fn remove_connector(&mut self, id: &str) {
        if self.connectors.remove(id).is_some() {
            tracing::info!(connector = %id, "connector removed");
        }
    }

    /// Reset a connector's clock reconciliation after its transport
    /// reconnected.
    pub fn connector_reconnected(&mut self, id: &str) {
        if let Some(state) = self.connectors.get_mut(id) {
            state.normalizer.on_reconnect();
            tracing::info!(connector = %id, "clock offset reset after reconnect");
        }
    }

    // --- frame path ---

    /// Ingest one raw message from a connector. Never fails the
    /// pipeline: typed per-frame failures are counted and the pipeline
    /// keeps its previous good state.
    pub fn deliver(&mut self, connector_id: &str, raw: &[u8], now_us: u64) {
        let Some(state) = self.connectors.get_mut(connector_id) else {
            tracing::warn!(connector = %connector_id, "frame from unknown connector dropped");
            return;
        };
        self.counters.frames_in += 1;

        let mut decoded = match state.adapter.decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.counters.decode_errors += 1;
                tracing::warn!(connector = %connector_id, error = %e, "invalid frame discarded");
                return;
            }
        };
        // Sources without a clock leave the timestamp at zero; arrival
        // time keeps the stream monotonic in that case.
        if decoded.source_timestamp_us == 0 {
            decoded.source_timestamp_us = now_us;
        }

        let frame = match state.normalizer.normalize(&decoded, now_us) {
            Ok(frame) => frame,
            Err(NormalizeError::OutOfOrder { .. }) => {
                self.counters.frames_dropped_out_of_order += 1;
                return;
            }
            Err(e @ (NormalizeError::MalformedTopology { .. } | NormalizeError::EmptyFrame)) => {
                self.counters.frames_rejected += 1;
                tracing::warn!(connector = %connector_id, error = %e, "frame rejected");
                return;
            }
        };
        self.counters.invalid_samples +=
            frame.samples.values().filter(|s| !s.valid).count() as u64;

        // Re-resolve on mapping edits or topology change; manual
        // overrides are layered back on top automatically.
        let version = self.table_version.load(Ordering::Acquire);
        let topology_changed = state
            .resolved_topology
            .as_ref()
            .map_or(true, |t| !Arc::ptr_eq(t, &frame.topology));
        if version != state.resolved_version || topology_changed {
            let table = self.table.read().clone();
            match mapping::resolve(&frame.topology, &self.rig, &table) {
                Ok(mut resolved) => {
                    let calibration = self.calibration.read();
                    for entry in &mut resolved.entries {
                        entry.calibration = calibration.get(&entry.target_bone).copied();
                    }
                    drop(calibration);

                    // Degenerate axis remaps block only their own bone;
                    // strip them here so the rest of the rig keeps moving.
                    let before = resolved.entries.len();
                    resolved.entries.retain(|e| {
                        if e.axis_remap.is_invertible() {
                            true
                        } else {
                            tracing::warn!(
                                bone = %e.target_bone,
                                "degenerate axis remap, bone blocked until corrected"
                            );
                            false
                        }
                    });
                    self.counters.degenerate_bones += (before - resolved.entries.len()) as u64;

                    state.resolved = Arc::new(resolved);
                    state.resolved_version = version;
                    state.resolved_topology = Some(Arc::clone(&frame.topology));
                    tracing::debug!(
                        connector = %connector_id,
                        mapped = state.resolved.len(),
                        "mapping snapshot rebuilt"
                    );
                }
                Err(e) => {
                    // configuration error: report, keep the prior snapshot
                    self.counters.resolve_errors += 1;
                    tracing::error!(connector = %connector_id, error = %e, "mapping not applied");
                }
            }
        }

        let resolved = Arc::clone(&state.resolved);
        match retarget::retarget(&frame, &resolved) {
            Ok(pose) => {
                if !pose.is_empty() {
                    self.smoother.push(frame.timestamp_us, &pose);
                }
            }
            Err(e @ RetargetError::DegenerateTransform { .. }) => {
                // snapshot stripping should make this unreachable
                self.counters.degenerate_bones += 1;
                tracing::error!(connector = %connector_id, error = %e, "frame not retargeted");
            }
        }
        state.last_frame = Some(frame);
    }

    /// One output tick, driven by the host at its own rate.
    pub fn tick(&mut self, now_us: u64, sink: &mut dyn PoseSink) {
        self.counters.ticks += 1;
        let tick = self.smoother.sample(now_us);
        self.counters.stale_bone_ticks += tick.stale_count() as u64;

        sink.apply(&tick.pose, now_us);
        self.recorder.append(now_us, &tick.pose);
    }

    // --- mapping control surface ---

    pub fn set_mapping(&self, table: MappingTable) {
        *self.table.write() = table;
        self.table_version.fetch_add(1, Ordering::Release);
    }

    pub fn get_mapping(&self) -> MappingTable {
        self.table.read().clone()
    }

    /// Merge a preset into the current table, last write wins.
    pub fn load_preset(&self, bytes: &[u8]) -> Result<(), MappingError> {
        let preset = mapping::load_preset(bytes)?;
        let mut table = self.table.write();
        table.merge(preset);
        drop(table);
        self.table_version.fetch_add(1, Ordering::Release);
        Ok(())
    }

    pub fn save_preset(&self) -> Vec<u8> {
        mapping::save_preset(&self.table.read())
    }

    /// Seed the table from rig-name heuristics using a connector's
    /// current topology. `None` until the connector has delivered a
    /// frame; otherwise the number of entries added.
    pub fn auto_map(&self, connector_id: &str) -> Option<usize> {
        let state = self.connectors.get(connector_id)?;
        let topology = state.normalizer.topology()?;
        let seeded = mapping::auto_map_rig(topology, &self.rig);
        let count = seeded.entries.len();
        if count > 0 {
            let mut table = self.table.write();
            table.merge(seeded);
            drop(table);
            self.table_version.fetch_add(1, Ordering::Release);
        }
        Some(count)
    }

    // --- calibration ---

    /// Capture the connector's last frame as the rig's zero pose.
    /// Returns false when no frame has arrived yet.
    pub fn calibrate(&mut self, connector_id: &str) -> bool {
        let Some(state) = self.connectors.get(connector_id) else {
            return false;
        };
        let Some(frame) = &state.last_frame else {
            return false;
        };

        let calibrated = retarget::calibrate(frame, &state.resolved);
        let mut offsets = self.calibration.write();
        for entry in &calibrated.entries {
            if let Some(q) = entry.calibration {
                offsets.insert(entry.target_bone.clone(), q);
            }
        }
        let captured = offsets.len();
        drop(offsets);
        self.table_version.fetch_add(1, Ordering::Release);
        tracing::info!(connector = %connector_id, bones = captured, "calibration captured");
        true
    }

    pub fn clear_calibration(&mut self) {
        self.calibration.write().clear();
        self.table_version.fetch_add(1, Ordering::Release);
    }

    // --- recording control surface ---

    pub fn start_recording(&mut self) {
        self.recorder.start();
    }

    pub fn stop_recording(&mut self) {
        self.recorder.stop();
    }

    pub fn export_track(&self) -> Vec<TrackEntry> {
        self.recorder.export()
    }

    pub fn reset_track(&mut self) {
        self.recorder.reset();
    }

    pub fn counters(&self) -> PipelineCounters {
        self.counters
    }
}
