//! Downstream point-cloud statistics.
//!
//! The bridge itself never looks inside a payload; this module is the reference
//! consumer that does. It decodes the two Cartesian encodings into metres and
//! keeps per-frame and running aggregates, and it plugs straight into the
//! bridge as a [`FrameHandler`].

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use lidarlink_abi::{LK_DATA_CARTESIAN_HIGH, LK_DATA_CARTESIAN_LOW};

use crate::handler::{Frame, FrameHandler};

/// x(i32) y(i32) z(i32) reflectivity(u8) tag(u8), millimetres.
pub const CARTESIAN_HIGH_POINT_SIZE: usize = 14;
/// x(i16) y(i16) z(i16) reflectivity(u8), centimetres.
pub const CARTESIAN_LOW_POINT_SIZE: usize = 7;

/// One decoded return, in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub reflectivity: u8,
}

/// Decodes a Cartesian payload into metres.
///
/// The decoded count is capped by both the declared point count and the bytes
/// actually present; truncated trailing bytes are ignored. Unknown encodings
/// decode to nothing.
pub fn decode_points(data_type: i32, point_count: i32, payload: &[u8]) -> Vec<Point> {
    let cap = usize::try_from(point_count).unwrap_or(0);
    if data_type == i32::from(LK_DATA_CARTESIAN_HIGH) {
        decode_cartesian_high(payload, cap)
    } else if data_type == i32::from(LK_DATA_CARTESIAN_LOW) {
        decode_cartesian_low(payload, cap)
    } else {
        Vec::new()
    }
}

fn decode_cartesian_high(payload: &[u8], cap: usize) -> Vec<Point> {
    payload
        .chunks_exact(CARTESIAN_HIGH_POINT_SIZE)
        .take(cap)
        .map(|record| Point {
            x: f64::from(LittleEndian::read_i32(&record[0..4])) / 1000.0,
            y: f64::from(LittleEndian::read_i32(&record[4..8])) / 1000.0,
            z: f64::from(LittleEndian::read_i32(&record[8..12])) / 1000.0,
            reflectivity: record[12],
        })
        .collect()
}

fn decode_cartesian_low(payload: &[u8], cap: usize) -> Vec<Point> {
    payload
        .chunks_exact(CARTESIAN_LOW_POINT_SIZE)
        .take(cap)
        .map(|record| Point {
            x: f64::from(LittleEndian::read_i16(&record[0..2])) / 100.0,
            y: f64::from(LittleEndian::read_i16(&record[2..4])) / 100.0,
            z: f64::from(LittleEndian::read_i16(&record[4..6])) / 100.0,
            reflectivity: record[6],
        })
        .collect()
}

/// Aggregate over the decoded points of one frame.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct FrameStats {
    pub frame_number: u64,
    pub point_count: usize,
    pub min: [f64; 3],
    pub max: [f64; 3],
    pub centroid: [f64; 3],
    /// Mean distance from the sensor origin, metres.
    pub mean_distance: f64,
    /// Points per square metre over the x/y footprint; zero for a degenerate
    /// footprint.
    pub planar_density: f64,
}

impl FrameStats {
    /// None when there are no points to aggregate.
    pub fn compute(frame_number: u64, points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        let mut sum = [0.0f64; 3];
        let mut sum_distance = 0.0f64;

        for p in points {
            let coords = [p.x, p.y, p.z];
            for axis in 0..3 {
                min[axis] = min[axis].min(coords[axis]);
                max[axis] = max[axis].max(coords[axis]);
                sum[axis] += coords[axis];
            }
            sum_distance += (p.x * p.x + p.y * p.y + p.z * p.z).sqrt();
        }

        let count = points.len() as f64;
        let area = (max[0] - min[0]) * (max[1] - min[1]);
        Some(Self {
            frame_number,
            point_count: points.len(),
            min,
            max,
            centroid: [sum[0] / count, sum[1] / count, sum[2] / count],
            mean_distance: sum_distance / count,
            planar_density: if area > 0.0 { count / area } else { 0.0 },
        })
    }
}

/// Running totals, serializable for end-of-run reporting.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub frames: u64,
    pub points: u64,
    pub skipped_frames: u64,
    pub mean_points_per_frame: f64,
    pub last_frame: Option<FrameStats>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received {} frames, {} points ({:.1} points/frame, {} skipped)",
            self.frames, self.points, self.mean_points_per_frame, self.skipped_frames
        )
    }
}

#[derive(Default)]
struct Totals {
    frames: u64,
    points: u64,
    skipped_frames: u64,
    last: Option<FrameStats>,
}

/// Decodes Cartesian frames and keeps running aggregates.
///
/// Installable directly as the bridge handler; `ingest` stays cheap enough for
/// the delivery thread (one decode pass and a short uncontended lock). Frames
/// that decode to nothing (unknown encoding, empty payload) count as skipped.
#[derive(Default)]
pub struct PointCloudStats {
    inner: Mutex<Totals>,
}

impl PointCloudStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one frame and fold it into the totals. Returns the per-frame
    /// aggregate for callers that print as they go.
    pub fn ingest(&self, frame: Frame<'_>) -> Option<FrameStats> {
        let points = decode_points(frame.data_type, frame.point_count, frame.payload);
        let mut inner = self.inner.lock();
        if points.is_empty() {
            inner.skipped_frames += 1;
            return None;
        }

        let stats = FrameStats::compute(inner.frames + 1, &points);
        if let Some(stats) = stats {
            inner.frames += 1;
            inner.points += stats.point_count as u64;
            inner.last = Some(stats);
        }
        stats
    }

    pub fn summary(&self) -> Summary {
        let inner = self.inner.lock();
        let mean = if inner.frames > 0 {
            inner.points as f64 / inner.frames as f64
        } else {
            0.0
        };
        Summary {
            frames: inner.frames,
            points: inner.points,
            skipped_frames: inner.skipped_frames,
            mean_points_per_frame: mean,
            last_frame: inner.last,
        }
    }
}

impl FrameHandler for PointCloudStats {
    fn on_frame(&self, frame: Frame<'_>) {
        if self.ingest(frame).is_none() {
            debug!(data_type = frame.data_type, "skipped undecodable frame");
        }
    }
}
