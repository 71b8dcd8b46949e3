use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use lidarlink::stats::{FrameStats, PointCloudStats};
use lidarlink::{Bridge, Frame, FrameHandler, LocalRuntime, ReplaySdk};
use lidarlink_abi::LK_DATA_CARTESIAN_HIGH;

const FRAMES: u32 = 32;
const POINTS_PER_FRAME: u32 = 96;

/// Synthetic high-precision Cartesian payload: a wall sweeping away from the
/// sensor, coordinates in millimetres.
fn sweep_frame(frame: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(POINTS_PER_FRAME as usize * 14);
    for i in 0..POINTS_PER_FRAME {
        let x: i32 = 2_000 + (frame as i32) * 25;
        let y: i32 = -1_500 + (i as i32) * 30;
        let z: i32 = 400 + ((i % 16) as i32) * 10;
        payload.extend_from_slice(&x.to_le_bytes());
        payload.extend_from_slice(&y.to_le_bytes());
        payload.extend_from_slice(&z.to_le_bytes());
        payload.push(40 + (i % 60) as u8);
        payload.push(0);
    }
    payload
}

/// Explicit argument, else a `config.json` next to the working directory, else
/// an inline default. The bridge forwards whichever verbatim.
fn resolve_config() -> String {
    if let Some(arg) = std::env::args().nth(1) {
        return arg;
    }
    if Path::new("config.json").exists() {
        return "config.json".to_string();
    }
    r#"{"mode":"demo"}"#.to_string()
}

/// Ingests into the shared accumulator and prints a line every few frames.
struct PrintingStats(Arc<PointCloudStats>);

impl FrameHandler for PrintingStats {
    fn on_frame(&self, frame: Frame<'_>) {
        let Some(stats) = self.0.ingest(frame) else {
            return;
        };
        if stats.frame_number % 8 == 0 {
            print_frame(&stats);
        }
    }
}

fn print_frame(stats: &FrameStats) {
    println!(
        "frame {:>4}: {} points, centroid ({:.2}, {:.2}, {:.2}) m, mean distance {:.2} m, {:.1} pts/m^2",
        stats.frame_number,
        stats.point_count,
        stats.centroid[0],
        stats.centroid[1],
        stats.centroid[2],
        stats.mean_distance,
        stats.planar_density,
    );
}

fn main() -> Result<()> {
    lidarlink::export::init_tracing();

    let config = resolve_config();
    let sdk = Arc::new(ReplaySdk::new());
    let bridge = Bridge::new(sdk.clone(), Arc::new(LocalRuntime));

    if !bridge.init(&config) {
        bail!("sdk initialize failed for config {config}");
    }
    if !bridge.start() {
        bail!("sdk start failed");
    }

    let stats = Arc::new(PointCloudStats::new());
    bridge.set_handler(Some(Box::new(PrintingStats(stats.clone()))));

    let emitter_sdk = sdk.clone();
    let emitter = thread::Builder::new()
        .name("sdk-emitter".to_string())
        .spawn(move || {
            for frame in 0..FRAMES {
                let payload = sweep_frame(frame);
                emitter_sdk.deliver(1, 9, LK_DATA_CARTESIAN_HIGH, POINTS_PER_FRAME, &payload);
                thread::sleep(Duration::from_millis(5));
            }
        })
        .context("spawn emitter thread")?;

    emitter
        .join()
        .map_err(|_| anyhow::anyhow!("emitter thread panicked"))?;

    let summary = stats.summary();
    println!("{summary}");
    println!("{}", serde_json::to_string_pretty(&summary)?);

    bridge.stop();
    Ok(())
}
