//! Clinician console operations
//!
//! The quick generator here predates the KNN engine and uses a cruder
//! policy: a flat sample count for confidence, a plain average over other
//! users' exercises, and the user's first exercise as fallback. It is kept
//! because clinicians rely on it, and `admin.strategy = "knn"` routes admin
//! generation through [`RecommendationEngine`] instead.

use crate::error::{PersistenceError, RehabError, Result};
use crate::metrics::round_to;
use crate::models::{WorkoutPlan, WorkoutRecommendation};
use crate::recommendation::{
    load_target, persist_candidate, RecommendationCandidate, RecommendationEngine, RecommendationOutcome,
    RecommendationSource,
};
use crate::store::{ExerciseQuery, RehabStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

/// Confidence shown for clinician-authored plans, which carry no evidence score
pub const MANUAL_CONFIDENCE_PERCENT: u8 = 65;

/// Algorithm behind the admin "generate" button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminStrategy {
    #[default]
    Quick,
    Knn,
}

impl FromStr for AdminStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(AdminStrategy::Quick),
            "knn" => Ok(AdminStrategy::Knn),
            _ => Err(format!("Invalid admin strategy: {}", s)),
        }
    }
}

impl fmt::Display for AdminStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminStrategy::Quick => write!(f, "quick"),
            AdminStrategy::Knn => write!(f, "knn"),
        }
    }
}

/// Quick-path parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub strategy: AdminStrategy,

    /// Most peer exercises sampled
    pub sample_limit: usize,

    /// Sample count that yields 100% confidence
    pub full_confidence_samples: usize,

    pub confidence_threshold: u8,

    pub peer_velocity_factor: f64,
    pub peer_work_seconds: u32,
    pub peer_rest_seconds: u32,
    pub peer_repetitions: u32,

    pub first_exercise_velocity_factor: f64,
    pub first_exercise_work_seconds: u32,
    pub first_exercise_rest_seconds: u32,
    pub first_exercise_repetitions: u32,
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            strategy: AdminStrategy::Quick,
            sample_limit: 100,
            full_confidence_samples: 10,
            confidence_threshold: 70,
            peer_velocity_factor: 0.80,
            peer_work_seconds: 30,
            peer_rest_seconds: 30,
            peer_repetitions: 8,
            first_exercise_velocity_factor: 0.75,
            first_exercise_work_seconds: 25,
            first_exercise_rest_seconds: 35,
            first_exercise_repetitions: 6,
        }
    }
}

/// Quick-path confidence: linear in the sample count, saturating at 100
pub fn quick_confidence(sample_count: usize, full_confidence_samples: usize) -> u8 {
    let share = (sample_count as f64 / full_confidence_samples as f64).min(1.0);
    (share * 100.0).round().clamp(0.0, 100.0) as u8
}

fn quick_candidate(
    plan: WorkoutPlan,
    confidence_percent: u8,
    source: RecommendationSource,
) -> RecommendationCandidate {
    let target_distance_km = round_to(plan.target_velocity_ms * f64::from(plan.work_seconds) / 1000.0, 2);
    RecommendationCandidate {
        plan,
        confidence_percent,
        source,
        target_distance_km,
        target_acceleration_ms2: 0.5,
        similar_profiles: Vec::new(),
    }
}

/// Recommendation operations available to clinicians
#[derive(Debug, Clone, Default)]
pub struct AdminConsole {
    config: AdminConfig,
    engine: RecommendationEngine,
}

impl AdminConsole {
    pub fn new(config: AdminConfig, engine: RecommendationEngine) -> Self {
        AdminConsole { config, engine }
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// Generate and store a recommendation regardless of the current one
    ///
    /// Fails with [`RehabError::InsufficientData`] when nothing can be
    /// derived, so the clinician can enter the plan manually.
    pub fn admin_generate<S: RehabStore + ?Sized>(
        &self,
        store: &mut S,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RecommendationOutcome> {
        let target = load_target(store, user_id)?;

        let candidate = match self.config.strategy {
            AdminStrategy::Quick => self.quick_generate(store, user_id)?,
            AdminStrategy::Knn => {
                let history = store.exercises_for_user(user_id, &ExerciseQuery::all())?;
                self.engine
                    .generate(store, &target, &history, now)?
                    .ok_or_else(|| {
                        RehabError::insufficient("admin_generate", "no stable peers and no exercises for this user")
                    })?
            }
        };

        persist_candidate(
            store,
            user_id,
            candidate,
            now,
            self.engine.config().confidence_threshold,
        )
    }

    fn quick_generate<S: RehabStore + ?Sized>(&self, store: &S, user_id: &str) -> Result<RecommendationCandidate> {
        let cfg = &self.config;
        let sample = store.peer_exercise_sample(user_id, cfg.sample_limit)?;
        let confidence = quick_confidence(sample.len(), cfg.full_confidence_samples);

        warn!(
            user_id,
            samples = sample.len(),
            confidence,
            "Admin quick path in use; its policy differs from the KNN recommendation engine"
        );

        if confidence >= cfg.confidence_threshold {
            let velocities: Vec<f64> = sample
                .iter()
                .map(|e| e.avg_velocity_ms)
                .filter(|v| *v > 0.0)
                .collect();
            if velocities.is_empty() {
                return Err(RehabError::insufficient(
                    "admin_generate",
                    "peer exercises have no recorded velocity",
                ));
            }

            let mean = velocities.iter().sum::<f64>() / velocities.len() as f64;
            info!(samples = sample.len(), mean_velocity_ms = mean, "Quick path using peer average");

            let plan = WorkoutPlan {
                target_velocity_ms: round_to(mean * cfg.peer_velocity_factor, 1),
                work_seconds: cfg.peer_work_seconds,
                rest_seconds: cfg.peer_rest_seconds,
                repetitions: cfg.peer_repetitions,
                notes: Some(format!(
                    "Generated from {} exercises of other users (confidence {}%).",
                    sample.len(),
                    confidence
                )),
            };
            return Ok(quick_candidate(plan, confidence, RecommendationSource::AdminPeerAverage));
        }

        let first = store
            .first_exercise(user_id)?
            .filter(|e| e.avg_velocity_ms > 0.0)
            .ok_or_else(|| {
                RehabError::insufficient(
                    "admin_generate",
                    "not enough peer data and no recorded exercise for this user",
                )
            })?;

        info!(exercise_id = %first.id, "Quick path using first exercise");

        let plan = WorkoutPlan {
            target_velocity_ms: round_to(first.avg_velocity_ms * cfg.first_exercise_velocity_factor, 1),
            work_seconds: cfg.first_exercise_work_seconds,
            rest_seconds: cfg.first_exercise_rest_seconds,
            repetitions: cfg.first_exercise_repetitions,
            notes: Some(format!(
                "Generated from the user's first exercise (confidence {}%, not enough data from other users).",
                confidence
            )),
        };
        Ok(quick_candidate(plan, confidence, RecommendationSource::AdminFirstExercise))
    }

    /// Store a clinician-authored plan as the user's active recommendation
    pub fn create_manual<S: RehabStore + ?Sized>(
        &self,
        store: &mut S,
        user_id: &str,
        plan: WorkoutPlan,
        now: DateTime<Utc>,
    ) -> Result<WorkoutRecommendation> {
        load_target(store, user_id)?;
        plan.validate().map_err(RehabError::Validation)?;

        let recommendation = WorkoutRecommendation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            target_velocity_ms: plan.target_velocity_ms,
            work_seconds: plan.work_seconds,
            rest_seconds: plan.rest_seconds,
            repetitions: plan.repetitions,
            notes: plan.notes,
            confidence_percent: MANUAL_CONFIDENCE_PERCENT,
            generated_by_ai: false,
            manually_adjusted: false,
            adjusted_by_admin: true,
            active: true,
            updated_at: now,
        };
        store.replace_active_recommendation(&recommendation)?;

        info!(user_id, recommendation_id = %recommendation.id, "Clinician created recommendation");
        Ok(recommendation)
    }

    /// Overwrite the plan of an existing recommendation
    pub fn adjust<S: RehabStore + ?Sized>(
        &self,
        store: &mut S,
        recommendation_id: &str,
        plan: WorkoutPlan,
        now: DateTime<Utc>,
    ) -> Result<WorkoutRecommendation> {
        plan.validate().map_err(RehabError::Validation)?;

        let mut recommendation =
            store
                .get_recommendation(recommendation_id)?
                .ok_or_else(|| PersistenceError::NotFound {
                    table: "recommendations".to_string(),
                    id: recommendation_id.to_string(),
                })?;

        recommendation.apply_plan(plan);
        recommendation.generated_by_ai = false;
        recommendation.manually_adjusted = true;
        recommendation.adjusted_by_admin = true;
        recommendation.updated_at = now;
        store.update_recommendation(&recommendation)?;

        info!(recommendation_id, "Clinician adjusted recommendation");
        Ok(recommendation)
    }

    /// Whether the console should warn that the user's plan is due for regeneration
    pub fn needs_regeneration<S: RehabStore + ?Sized>(
        &self,
        store: &S,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let active = store.active_recommendation(user_id)?;
        Ok(self.engine.needs_regeneration(active.as_ref(), now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_confidence() {
        assert_eq!(quick_confidence(0, 10), 0);
        assert_eq!(quick_confidence(6, 10), 60);
        assert_eq!(quick_confidence(7, 10), 70);
        assert_eq!(quick_confidence(100, 10), 100);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("quick".parse::<AdminStrategy>().unwrap(), AdminStrategy::Quick);
        assert_eq!("KNN".parse::<AdminStrategy>().unwrap(), AdminStrategy::Knn);
        assert!("nearest".parse::<AdminStrategy>().is_err());
        assert_eq!(AdminStrategy::Knn.to_string(), "knn");
    }
}
