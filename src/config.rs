use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub smoother: SmootherConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmootherConfig {
    /// Ring buffer span per bone (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Maximum extrapolation past the newest sample (milliseconds)
    #[serde(default = "default_extrapolation_ms")]
    pub extrapolation_ms: u64,
    /// EMA weight of the new sample for positions (1.0 = no smoothing)
    #[serde(default = "default_alpha")]
    pub alpha_position: f32,
    /// EMA weight of the new sample for rotations
    #[serde(default = "default_alpha")]
    pub alpha_rotation: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Samples with any translation component beyond this magnitude
    /// (metres) are tagged invalid
    #[serde(default = "default_max_translation")]
    pub max_translation: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Mocap source address (newline-JSON over TCP)
    #[serde(default = "default_stream_addr")]
    pub addr: String,
    /// Initial reconnect delay (milliseconds), doubled per attempt
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    /// Reconnect delay cap (milliseconds)
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Frame channel depth; oldest frames are dropped when full
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Output tick rate driven by the demo binary (Hz)
    #[serde(default = "default_tick_hz")]
    pub tick_hz: f32,
}

fn default_window_ms() -> u64 { 100 }
fn default_extrapolation_ms() -> u64 { 100 }
fn default_alpha() -> f32 { 0.5 }
fn default_max_translation() -> f32 { 100.0 }
fn default_stream_addr() -> String { "127.0.0.1:5555".to_string() }
fn default_reconnect_initial_ms() -> u64 { 1_000 }
fn default_reconnect_max_ms() -> u64 { 8_000 }
fn default_channel_capacity() -> usize { 4 }
fn default_tick_hz() -> f32 { 60.0 }

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            extrapolation_ms: default_extrapolation_ms(),
            alpha_position: default_alpha(),
            alpha_rotation: default_alpha(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_translation: default_max_translation(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            addr: default_stream_addr(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.smoother.window_ms, 100);
        assert_eq!(config.smoother.extrapolation_ms, 100);
        assert_eq!(config.stream.reconnect_max_ms, 8_000);
        assert_eq!(config.output.tick_hz, 60.0);
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            "[smoother]\nalpha_position = 1.0\n\n[stream]\naddr = \"10.0.0.5:5555\"\n",
        )
        .unwrap();
        assert_eq!(config.smoother.alpha_position, 1.0);
        assert_eq!(config.smoother.alpha_rotation, 0.5);
        assert_eq!(config.stream.addr, "10.0.0.5:5555");
    }
}
