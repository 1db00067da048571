use anyhow::Result;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;

use rigstream::config::Config;
use rigstream::connector::JsonAdapter;
use rigstream::mapping::RigProfile;
use rigstream::pipeline::{Pipeline, PipelineClock};
use rigstream::sink::LogSink;
use rigstream::stream::{self, StreamEvent};

const CONNECTOR_ID: &str = "tcp-json";

/// Standard humanoid rig driven by the demo binary.
fn humanoid_rig() -> RigProfile {
    RigProfile::new([
        "Hips",
        "Spine",
        "Neck",
        "Head",
        "LeftShoulder",
        "LeftArm",
        "LeftForeArm",
        "LeftHand",
        "RightShoulder",
        "RightArm",
        "RightForeArm",
        "RightHand",
        "LeftUpLeg",
        "LeftLeg",
        "LeftFoot",
        "RightUpLeg",
        "RightLeg",
        "RightFoot",
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load_or_default("rigstream.toml");
    tracing::info!(addr = %config.stream.addr, tick_hz = config.output.tick_hz, "starting");

    let clock = PipelineClock::new();
    let mut pipeline = Pipeline::new(humanoid_rig(), &config);
    pipeline.add_connector(CONNECTOR_ID, Box::new(JsonAdapter::default()));

    let (mut events, status) = stream::spawn(config.stream.clone(), clock);
    let mut sink = LogSink;
    let mut needs_auto_map = true;

    let tick_period = Duration::from_secs_f64(1.0 / f64::from(config.output.tick_hz.max(1.0)));
    let mut ticker = interval(tick_period);
    let mut stats = interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Connected) => {
                    pipeline.connector_reconnected(CONNECTOR_ID);
                }
                Some(StreamEvent::Frame { arrival_us, payload }) => {
                    pipeline.deliver(CONNECTOR_ID, &payload, arrival_us);
                    if needs_auto_map {
                        if let Some(added) = pipeline.auto_map(CONNECTOR_ID) {
                            needs_auto_map = false;
                            if added > 0 {
                                tracing::info!(added, "auto-mapped source joints onto rig bones");
                            }
                        }
                    }
                }
                None => {
                    tracing::error!("stream task ended");
                    break;
                }
            },
            _ = ticker.tick() => {
                pipeline.tick(clock.now_us(), &mut sink);
            }
            _ = stats.tick() => {
                let c = pipeline.counters();
                tracing::info!(
                    status = %status.get(),
                    frames_in = c.frames_in,
                    dropped = c.frames_dropped_out_of_order,
                    rejected = c.frames_rejected,
                    decode_errors = c.decode_errors,
                    stale_bone_ticks = c.stale_bone_ticks,
                    "pipeline stats"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}
