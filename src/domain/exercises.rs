//! Exercise catalog and per-exercise repetition-detection parameters.
//!
//! Thresholds were tuned against recorded squat/deadlift sessions; linear
//! exercises are in m/s², angular exercises in deg/s.

use crate::domain::models::Axis;
use serde::{Deserialize, Serialize};

/// Whether repetitions are detected from linear acceleration or from
/// angular velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementClass {
    Linear,
    Angular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseCategory {
    Lower,
    Upper,
}

/// Detection thresholds for one exercise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Magnitude that starts a repetition (m/s² or deg/s).
    pub threshold: f64,
    /// Minimum duration of one full repetition in milliseconds.
    pub min_duration_ms: u64,
    /// Magnitude below which the athlete is considered at rest between reps.
    pub rest_threshold: f64,
}

/// Typical joint range of motion in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RomBounds {
    pub min_deg: f64,
    pub max_deg: f64,
}

/// Immutable configuration for one collection run. Owned exclusively by the
/// repetition engine created for that run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseConfig {
    pub id: String,
    pub name: String,
    pub category: ExerciseCategory,
    pub movement: MovementClass,
    /// Axis the primary movement happens on.
    pub primary_axis: Axis,
    pub detection: DetectionParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rom: Option<RomBounds>,
}

pub fn squat() -> ExerciseConfig {
    ExerciseConfig {
        id: "squat".into(),
        name: "Squat".into(),
        category: ExerciseCategory::Lower,
        movement: MovementClass::Linear,
        primary_axis: Axis::Z,
        detection: DetectionParams {
            threshold: 1.5,
            min_duration_ms: 600,
            rest_threshold: 0.8,
        },
        rom: Some(RomBounds {
            min_deg: 90.0,
            max_deg: 180.0,
        }),
    }
}

pub fn hip_thrust() -> ExerciseConfig {
    ExerciseConfig {
        id: "hip_thrust".into(),
        name: "Hip Thrust".into(),
        category: ExerciseCategory::Lower,
        movement: MovementClass::Angular,
        primary_axis: Axis::Y,
        detection: DetectionParams {
            threshold: 45.0,
            min_duration_ms: 800,
            rest_threshold: 10.0,
        },
        rom: Some(RomBounds {
            min_deg: 0.0,
            max_deg: 180.0,
        }),
    }
}

pub fn deadlift() -> ExerciseConfig {
    ExerciseConfig {
        id: "deadlift".into(),
        name: "Deadlift".into(),
        category: ExerciseCategory::Lower,
        movement: MovementClass::Linear,
        primary_axis: Axis::Z,
        detection: DetectionParams {
            threshold: 3.0,
            min_duration_ms: 1000,
            rest_threshold: 1.2,
        },
        rom: Some(RomBounds {
            min_deg: 0.0,
            max_deg: 180.0,
        }),
    }
}

pub fn romanian_deadlift() -> ExerciseConfig {
    ExerciseConfig {
        id: "romanian_deadlift".into(),
        name: "Romanian Deadlift".into(),
        category: ExerciseCategory::Lower,
        movement: MovementClass::Angular,
        primary_axis: Axis::Y,
        detection: DetectionParams {
            threshold: 20.0,
            min_duration_ms: 900,
            rest_threshold: 8.0,
        },
        rom: Some(RomBounds {
            min_deg: 45.0,
            max_deg: 180.0,
        }),
    }
}

pub fn bench_press() -> ExerciseConfig {
    ExerciseConfig {
        id: "bench_press".into(),
        name: "Bench Press".into(),
        category: ExerciseCategory::Upper,
        movement: MovementClass::Linear,
        primary_axis: Axis::Z,
        detection: DetectionParams {
            threshold: 2.5,
            min_duration_ms: 700,
            rest_threshold: 1.0,
        },
        rom: Some(RomBounds {
            min_deg: 90.0,
            max_deg: 180.0,
        }),
    }
}

pub fn shoulder_press() -> ExerciseConfig {
    ExerciseConfig {
        id: "shoulder_press".into(),
        name: "Shoulder Press".into(),
        category: ExerciseCategory::Upper,
        movement: MovementClass::Linear,
        primary_axis: Axis::Z,
        detection: DetectionParams {
            threshold: 2.5,
            min_duration_ms: 800,
            rest_threshold: 1.0,
        },
        rom: Some(RomBounds {
            min_deg: 90.0,
            max_deg: 180.0,
        }),
    }
}

/// Every built-in exercise.
pub fn all_exercises() -> Vec<ExerciseConfig> {
    vec![
        squat(),
        hip_thrust(),
        deadlift(),
        romanian_deadlift(),
        bench_press(),
        shoulder_press(),
    ]
}

pub fn by_id(id: &str) -> Option<ExerciseConfig> {
    all_exercises().into_iter().find(|e| e.id == id)
}

/// Case- and whitespace-insensitive name lookup ("bench press", "BenchPress").
pub fn by_name(name: &str) -> Option<ExerciseConfig> {
    let wanted = normalize(name);
    all_exercises()
        .into_iter()
        .find(|e| normalize(&e.name) == wanted || normalize(&e.id) == wanted)
}

pub fn by_category(category: ExerciseCategory) -> Vec<ExerciseConfig> {
    all_exercises()
        .into_iter()
        .filter(|e| e.category == category)
        .collect()
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}
