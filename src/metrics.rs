//! Motion statistics derived from raw wheel-sensor velocity samples
//!
//! Samples arrive at roughly 1 Hz, so distance is a rectangular integration
//! with Δt = 1 s and acceleration is the first difference of the velocity
//! series. Warm-up and cool-down readings are trimmed before extremes and
//! averages are taken.
//!
//! The live session path ([`MetricsEngine::compute`]) and the recompute path
//! used for stored exercises ([`MetricsEngine::recompute`],
//! [`MetricsEngine::recompute_from_payload`]) share [`MetricsEngine::motion_statistics`],
//! so the same sample sequence always yields bit-identical results.

use crate::error::MalformedSampleError;
use crate::models::{Exercise, VelocitySample};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::warn;

/// Trimming policy constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Cap on leading samples dropped for every statistic
    pub lead_trim_max_samples: usize,

    /// Fraction of the series dropped at the start for every statistic
    pub lead_trim_fraction: f64,

    /// Cap on trailing samples dropped for max/min velocity
    pub extremes_tail_trim_max_samples: usize,

    /// Fraction of the series dropped at the end for max/min velocity
    pub extremes_tail_trim_fraction: f64,

    /// Cap on trailing samples dropped for the averages
    pub average_tail_trim_max_samples: usize,

    /// Fraction of the series dropped at the end for the averages
    pub average_tail_trim_fraction: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            lead_trim_max_samples: 30,
            lead_trim_fraction: 0.2,
            extremes_tail_trim_max_samples: 30,
            extremes_tail_trim_fraction: 0.2,
            average_tail_trim_max_samples: 15,
            average_tail_trim_fraction: 0.1,
        }
    }
}

/// Number of samples dropped from each end of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimWindow {
    pub lead: usize,
    pub tail: usize,
}

impl TrimWindow {
    fn sized(len: usize, lead_max: usize, lead_fraction: f64, tail_max: usize, tail_fraction: f64) -> Self {
        TrimWindow {
            lead: lead_max.min(fraction_of(len, lead_fraction)),
            tail: tail_max.min(fraction_of(len, tail_fraction)),
        }
    }

    /// Indices kept from a series of `len` samples
    pub fn range(&self, len: usize) -> Range<usize> {
        let end = len.saturating_sub(self.tail);
        let start = self.lead.min(end);
        start..end
    }

    /// Same absolute indices as [`TrimWindow::range`] over `len`, clamped to a
    /// derived series of `series_len` elements
    pub fn clamped_range(&self, len: usize, series_len: usize) -> Range<usize> {
        let range = self.range(len);
        let end = range.end.min(series_len);
        let start = range.start.min(end);
        start..end
    }
}

fn fraction_of(len: usize, fraction: f64) -> usize {
    (len as f64 * fraction).floor() as usize
}

/// Summary statistics for one exercise, unrounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExerciseMetrics {
    pub total_duration_seconds: u32,
    pub total_distance_meters: f64,
    pub avg_velocity_ms: f64,
    pub max_velocity_ms: f64,
    pub min_velocity_ms: f64,
    pub avg_acceleration_ms2: f64,
}

/// Metrics rounded for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetrics {
    pub total_duration_seconds: u32,
    pub total_distance_meters: Decimal,
    pub avg_velocity_ms: Decimal,
    pub max_velocity_ms: Decimal,
    pub min_velocity_ms: Decimal,
    pub avg_acceleration_ms2: Decimal,
}

impl ExerciseMetrics {
    /// Velocities and distance to 2 places, acceleration to 4
    pub fn rounded(&self) -> DisplayMetrics {
        DisplayMetrics {
            total_duration_seconds: self.total_duration_seconds,
            total_distance_meters: round_decimal(self.total_distance_meters, 2),
            avg_velocity_ms: round_decimal(self.avg_velocity_ms, 2),
            max_velocity_ms: round_decimal(self.max_velocity_ms, 2),
            min_velocity_ms: round_decimal(self.min_velocity_ms, 2),
            avg_acceleration_ms2: round_decimal(self.avg_acceleration_ms2, 4),
        }
    }

    /// Write these metrics onto an exercise record
    pub fn apply_to(&self, exercise: &mut Exercise) {
        exercise.duration_seconds = self.total_duration_seconds;
        exercise.total_distance_meters = self.total_distance_meters;
        exercise.avg_velocity_ms = self.avg_velocity_ms;
        exercise.max_velocity_ms = self.max_velocity_ms;
        exercise.min_velocity_ms = self.min_velocity_ms;
        exercise.avg_acceleration_ms2 = self.avg_acceleration_ms2;
    }
}

fn round_decimal(value: f64, dp: u32) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or_default()
        .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Round half away from zero to `dp` decimal places
pub fn round_to(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

/// One row of the per-sample visualisation series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionPoint {
    pub timestamp_seconds: u32,
    /// Elapsed time formatted as `m:ss`
    pub label: String,
    pub velocity_ms: f64,
    /// Zero for the first sample
    pub acceleration_ms2: f64,
    pub cumulative_distance_km: f64,
}

/// Trimmed-window metrics engine
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    config: MetricsConfig,
}

impl MetricsEngine {
    /// Create engine with the default trimming policy
    pub fn new() -> Self {
        MetricsEngine {
            config: MetricsConfig::default(),
        }
    }

    /// Create engine with a custom trimming policy
    pub fn with_config(config: MetricsConfig) -> Self {
        MetricsEngine { config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Window used for max/min velocity
    pub fn extremes_window(&self, len: usize) -> TrimWindow {
        let c = &self.config;
        TrimWindow::sized(
            len,
            c.lead_trim_max_samples,
            c.lead_trim_fraction,
            c.extremes_tail_trim_max_samples,
            c.extremes_tail_trim_fraction,
        )
    }

    /// Window used for average velocity and average acceleration
    pub fn average_window(&self, len: usize) -> TrimWindow {
        let c = &self.config;
        TrimWindow::sized(
            len,
            c.lead_trim_max_samples,
            c.lead_trim_fraction,
            c.average_tail_trim_max_samples,
            c.average_tail_trim_fraction,
        )
    }

    /// Metrics for a finished live session
    pub fn compute(
        &self,
        samples: &[VelocitySample],
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> ExerciseMetrics {
        self.motion_statistics(samples, elapsed_seconds(started_at, ended_at))
    }

    /// Metrics recomputed from an exercise's stored samples
    pub fn recompute(&self, exercise: &Exercise) -> ExerciseMetrics {
        self.motion_statistics(&exercise.samples, exercise.duration_seconds)
    }

    /// Metrics recomputed from a raw stored payload
    ///
    /// A payload that fails to decode is treated as an exercise with no
    /// samples, so every motion statistic comes back as zero.
    pub fn recompute_from_payload(&self, payload: &str, duration_seconds: u32) -> ExerciseMetrics {
        let samples = decode_samples_or_empty(payload);
        self.motion_statistics(&samples, duration_seconds)
    }

    /// Shared core of the live and recompute paths
    pub fn motion_statistics(&self, samples: &[VelocitySample], duration_seconds: u32) -> ExerciseMetrics {
        let mut metrics = ExerciseMetrics {
            total_duration_seconds: duration_seconds,
            ..ExerciseMetrics::default()
        };

        if samples.is_empty() {
            return metrics;
        }

        let velocities: Vec<f64> = samples.iter().map(VelocitySample::velocity_ms).collect();
        let accelerations = first_differences(&velocities);
        let n = velocities.len();

        metrics.total_distance_meters = velocities.iter().sum();

        let extremes = &velocities[self.extremes_window(n).range(n)];
        metrics.max_velocity_ms = extremes.iter().copied().reduce(f64::max).unwrap_or(0.0);
        metrics.min_velocity_ms = extremes
            .iter()
            .copied()
            .filter(|v| *v > 0.0)
            .reduce(f64::min)
            .unwrap_or(0.0);

        let window = self.average_window(n);
        metrics.avg_velocity_ms = mean_or_zero(&velocities[window.range(n)]);
        metrics.avg_acceleration_ms2 =
            mean_or_zero(&accelerations[window.clamped_range(n, accelerations.len())]);

        metrics
    }

    /// Per-sample velocity, acceleration and cumulative distance for charts
    pub fn motion_series(&self, samples: &[VelocitySample]) -> Vec<MotionPoint> {
        let mut distance_m = 0.0;
        let mut previous: Option<f64> = None;

        samples
            .iter()
            .map(|sample| {
                let velocity = sample.velocity_ms();
                distance_m += velocity;
                let acceleration = previous.map_or(0.0, |p| velocity - p);
                previous = Some(velocity);

                MotionPoint {
                    timestamp_seconds: sample.timestamp_seconds,
                    label: format_elapsed(sample.timestamp_seconds),
                    velocity_ms: velocity,
                    acceleration_ms2: acceleration,
                    cumulative_distance_km: distance_m / 1000.0,
                }
            })
            .collect()
    }
}

/// Seconds covered by a sample sequence: last timestamp plus one
pub fn sample_span_seconds(samples: &[VelocitySample]) -> u32 {
    samples
        .last()
        .map_or(0, |s| s.timestamp_seconds.saturating_add(1))
}

/// Whole seconds between two instants, never negative
pub fn elapsed_seconds(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> u32 {
    let seconds = (ended_at - started_at).num_seconds().max(0);
    u32::try_from(seconds).unwrap_or(u32::MAX)
}

fn first_differences(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn format_elapsed(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Serialize samples to the stored JSON payload
pub fn encode_samples(samples: &[VelocitySample]) -> String {
    serde_json::to_string(samples).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a stored JSON sample payload
///
/// An empty payload decodes to no samples. Negative or non-finite velocities
/// are rejected.
pub fn decode_samples(payload: &str) -> Result<Vec<VelocitySample>, MalformedSampleError> {
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }

    let samples: Vec<VelocitySample> =
        serde_json::from_str(payload).map_err(|e| MalformedSampleError { reason: e.to_string() })?;

    if let Some(bad) = samples
        .iter()
        .find(|s| !s.velocity_kmh.is_finite() || s.velocity_kmh < 0.0)
    {
        return Err(MalformedSampleError {
            reason: format!(
                "invalid velocity {} at {}s",
                bad.velocity_kmh, bad.timestamp_seconds
            ),
        });
    }

    Ok(samples)
}

/// Decode a payload, falling back to no samples when it is malformed
pub fn decode_samples_or_empty(payload: &str) -> Vec<VelocitySample> {
    decode_samples(payload).unwrap_or_else(|err| {
        warn!(error = %err, "Malformed sample payload, treating exercise as having no samples");
        Vec::new()
    })
}
