//! Repetition counting from the decoded IMU stream.
//!
//! A three-phase state machine: Rest until the configured axis crosses the
//! exercise threshold, Concentric while the effort lasts, Eccentric on the
//! return, back to Rest (count + 1) once the minimum repetition duration has
//! elapsed. Transitions are evaluated once per sample; the machine never
//! terminates.

use crate::domain::exercises::{ExerciseConfig, MovementClass};
use crate::domain::models::{ImuSample, RepetitionPhase, RepetitionState};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Samples kept for diagnostic statistics.
const BUFFER_SIZE: usize = 10;

/// Below this the configured linear axis is considered inactive and the full
/// 3-axis magnitude is used instead, compensating for sensor orientation.
const LINEAR_AXIS_FLOOR: f64 = 1e-3;

/// Aggregates over the rolling sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BufferStats {
    pub avg_acceleration: f64,
    pub avg_angular_velocity: f64,
    pub peak_acceleration: f64,
}

/// One engine instance per collection run, bound to exactly one
/// [`ExerciseConfig`]. Processing is strictly sequential; the caller
/// guarantees no sample overlaps a [`reset`](RepetitionEngine::reset).
pub struct RepetitionEngine {
    config: ExerciseConfig,
    count: u32,
    phase: RepetitionPhase,
    /// Timestamp of the Concentric entry that opened the current repetition.
    rep_started_ms: u64,
    last_transition_ms: u64,
    buffer: VecDeque<ImuSample>,
}

impl RepetitionEngine {
    pub fn new(config: ExerciseConfig) -> Self {
        Self {
            config,
            count: 0,
            phase: RepetitionPhase::Rest,
            rep_started_ms: 0,
            last_transition_ms: 0,
            buffer: VecDeque::with_capacity(BUFFER_SIZE),
        }
    }

    pub fn config(&self) -> &ExerciseConfig {
        &self.config
    }

    /// Consume one sample and return the state to publish. The returned
    /// value is valid even when no transition occurred.
    pub fn process_sample(&mut self, sample: &ImuSample) -> RepetitionState {
        self.buffer.push_back(*sample);
        if self.buffer.len() > BUFFER_SIZE {
            self.buffer.pop_front();
        }

        let magnitude = self.sample_magnitude(sample);
        let now = sample.timestamp_ms;
        let detection = self.config.detection;

        match self.phase {
            RepetitionPhase::Rest => {
                if magnitude > detection.threshold {
                    self.phase = RepetitionPhase::Concentric;
                    self.rep_started_ms = now;
                    self.last_transition_ms = now;
                    debug!(
                        exercise = %self.config.id,
                        rep = self.count + 1,
                        "repetition started"
                    );
                }
            }
            RepetitionPhase::Concentric => {
                // A drop below the rest threshold too early is noise.
                if magnitude < detection.rest_threshold
                    && now.saturating_sub(self.rep_started_ms) > detection.min_duration_ms / 2
                {
                    self.phase = RepetitionPhase::Eccentric;
                    self.last_transition_ms = now;
                    debug!(exercise = %self.config.id, "eccentric phase");
                }
            }
            RepetitionPhase::Eccentric => {
                // Duration is still measured from the Concentric entry. A
                // renewed rise above the threshold is oscillation within the
                // same repetition and leaves the phase unchanged.
                if magnitude < detection.rest_threshold
                    && now.saturating_sub(self.rep_started_ms) >= detection.min_duration_ms
                {
                    self.count += 1;
                    self.phase = RepetitionPhase::Rest;
                    self.last_transition_ms = now;
                    info!(exercise = %self.config.id, count = self.count, "repetition completed");
                }
            }
        }

        self.state()
    }

    /// Magnitude driving the state machine for this sample.
    fn sample_magnitude(&self, sample: &ImuSample) -> f64 {
        match self.config.movement {
            MovementClass::Angular => {
                f64::from(sample.gyroscope.component(self.config.primary_axis)).abs()
            }
            MovementClass::Linear => {
                let axis = f64::from(sample.accelerometer.component(self.config.primary_axis)).abs();
                if axis < LINEAR_AXIS_FLOOR {
                    sample.accelerometer.magnitude()
                } else {
                    axis
                }
            }
        }
    }

    pub fn state(&self) -> RepetitionState {
        RepetitionState {
            count: self.count,
            phase: self.phase,
            last_transition_ms: self.last_transition_ms,
        }
    }

    /// Force the machine back to Rest with a zero count. Valid in any phase.
    pub fn reset(&mut self) {
        self.count = 0;
        self.phase = RepetitionPhase::Rest;
        self.rep_started_ms = 0;
        self.last_transition_ms = 0;
        self.buffer.clear();
        debug!(exercise = %self.config.id, "repetition counter reset");
    }

    /// Diagnostic aggregates over the last [`BUFFER_SIZE`] samples.
    pub fn buffer_stats(&self) -> BufferStats {
        if self.buffer.is_empty() {
            return BufferStats::default();
        }

        let mut acc_sum = 0.0;
        let mut gyro_sum = 0.0;
        let mut peak = 0.0f64;
        for sample in &self.buffer {
            let acc = sample.accelerometer.magnitude();
            acc_sum += acc;
            gyro_sum += sample.gyroscope.magnitude();
            peak = peak.max(acc);
        }

        let n = self.buffer.len() as f64;
        BufferStats {
            avg_acceleration: acc_sum / n,
            avg_angular_velocity: gyro_sum / n,
            peak_acceleration: peak,
        }
    }
}
