//! Persistence boundary
//!
//! The recommendation core only talks to storage through [`RehabStore`].
//! [`crate::database::SqliteStore`] is the durable implementation;
//! [`MemoryStore`] keeps everything in process and is what tests and the
//! benchmarks run against.

use crate::error::{PersistenceError, RehabError, Result};
use crate::models::{Exercise, UserProfile, WorkoutRecommendation};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Exercise query filters; results are always newest first
#[derive(Debug, Default, Clone)]
pub struct ExerciseQuery {
    /// Only exercises started at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ExerciseQuery {
    /// Every exercise of the user
    pub fn all() -> Self {
        Self::default()
    }

    /// At most `limit` exercises started at or after `since`
    pub fn recent(since: DateTime<Utc>, limit: usize) -> Self {
        ExerciseQuery {
            since: Some(since),
            limit: Some(limit),
        }
    }
}

/// Typed store operations over users, exercises and recommendations
pub trait RehabStore {
    // Exercises

    /// Exercises of one user matching the query, newest first
    fn exercises_for_user(&self, user_id: &str, query: &ExerciseQuery) -> Result<Vec<Exercise>>;

    /// Earliest recorded exercise of a user
    fn first_exercise(&self, user_id: &str) -> Result<Option<Exercise>>;

    /// Finished exercises of non-admin users other than `excluded_user_id`,
    /// newest first, at most `limit`
    fn peer_exercise_sample(&self, excluded_user_id: &str, limit: usize) -> Result<Vec<Exercise>>;

    fn insert_exercise(&mut self, exercise: &Exercise) -> Result<()>;

    fn update_exercise(&mut self, exercise: &Exercise) -> Result<()>;

    /// Remove every exercise of a user, returning how many were deleted
    fn delete_exercises_for_user(&mut self, user_id: &str) -> Result<usize>;

    // Users

    fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>>;

    /// All non-admin users
    fn non_admin_users(&self) -> Result<Vec<UserProfile>>;

    /// Insert or update a user after boundary validation
    fn upsert_user(&mut self, user: &UserProfile) -> Result<()>;

    // Recommendations

    /// The user's active recommendation, most recently updated first
    fn active_recommendation(&self, user_id: &str) -> Result<Option<WorkoutRecommendation>>;

    fn get_recommendation(&self, recommendation_id: &str) -> Result<Option<WorkoutRecommendation>>;

    fn insert_recommendation(&mut self, recommendation: &WorkoutRecommendation) -> Result<()>;

    fn update_recommendation(&mut self, recommendation: &WorkoutRecommendation) -> Result<()>;

    /// Mark every active recommendation of the user inactive
    fn deactivate_recommendations(&mut self, user_id: &str) -> Result<usize>;

    /// Deactivate prior recommendations, then insert the new active one
    ///
    /// The default runs the two writes in sequence: if the insert fails the
    /// user is left with no active recommendation and the error is returned.
    fn replace_active_recommendation(&mut self, recommendation: &WorkoutRecommendation) -> Result<()> {
        self.deactivate_recommendations(&recommendation.user_id)?;
        self.insert_recommendation(recommendation)
    }
}

/// Validate and normalise a user at the boundary
pub(crate) fn checked_user(user: &UserProfile) -> Result<UserProfile> {
    let user = user.clone().normalized();
    user.validate().map_err(RehabError::Validation)?;
    Ok(user)
}

pub(crate) fn check_recommendation(recommendation: &WorkoutRecommendation) -> Result<()> {
    if recommendation.user_id.trim().is_empty() {
        return Err(RehabError::Validation("recommendation has no user".to_string()));
    }
    if !recommendation.target_velocity_ms.is_finite() || recommendation.target_velocity_ms < 0.0 {
        return Err(RehabError::Validation(format!(
            "invalid target velocity {}",
            recommendation.target_velocity_ms
        )));
    }
    if recommendation.confidence_percent > 100 {
        return Err(RehabError::Validation(format!(
            "confidence {} above 100",
            recommendation.confidence_percent
        )));
    }
    Ok(())
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: BTreeMap<String, UserProfile>,
    exercises: Vec<Exercise>,
    recommendations: Vec<WorkoutRecommendation>,
    fail_recommendation_inserts: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent recommendation insert fail with a write error
    pub fn fail_recommendation_inserts(&mut self, fail: bool) {
        self.fail_recommendation_inserts = fail;
    }

    /// Every stored recommendation, active or not
    pub fn recommendations(&self) -> &[WorkoutRecommendation] {
        &self.recommendations
    }

    fn newest_first(mut exercises: Vec<Exercise>) -> Vec<Exercise> {
        exercises.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        exercises
    }

    fn is_admin(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|u| u.is_admin)
    }
}

impl RehabStore for MemoryStore {
    fn exercises_for_user(&self, user_id: &str, query: &ExerciseQuery) -> Result<Vec<Exercise>> {
        let matching = self
            .exercises
            .iter()
            .filter(|e| e.user_id == user_id)
            .filter(|e| query.since.map_or(true, |since| e.started_at >= since))
            .cloned()
            .collect();

        let mut exercises = Self::newest_first(matching);
        if let Some(limit) = query.limit {
            exercises.truncate(limit);
        }
        Ok(exercises)
    }

    fn first_exercise(&self, user_id: &str) -> Result<Option<Exercise>> {
        Ok(self
            .exercises
            .iter()
            .filter(|e| e.user_id == user_id)
            .min_by_key(|e| e.started_at)
            .cloned())
    }

    fn peer_exercise_sample(&self, excluded_user_id: &str, limit: usize) -> Result<Vec<Exercise>> {
        let matching = self
            .exercises
            .iter()
            .filter(|e| e.user_id != excluded_user_id && e.duration_seconds > 0)
            .filter(|e| !self.is_admin(&e.user_id))
            .cloned()
            .collect();

        let mut exercises = Self::newest_first(matching);
        exercises.truncate(limit);
        Ok(exercises)
    }

    fn insert_exercise(&mut self, exercise: &Exercise) -> Result<()> {
        if self.exercises.iter().any(|e| e.id == exercise.id) {
            return Err(PersistenceError::ConstraintViolation {
                constraint: format!("exercises.id {}", exercise.id),
            }
            .into());
        }
        self.exercises.push(exercise.clone());
        Ok(())
    }

    fn update_exercise(&mut self, exercise: &Exercise) -> Result<()> {
        let slot = self
            .exercises
            .iter_mut()
            .find(|e| e.id == exercise.id)
            .ok_or_else(|| PersistenceError::NotFound {
                table: "exercises".to_string(),
                id: exercise.id.clone(),
            })?;
        *slot = exercise.clone();
        Ok(())
    }

    fn delete_exercises_for_user(&mut self, user_id: &str) -> Result<usize> {
        let before = self.exercises.len();
        self.exercises.retain(|e| e.user_id != user_id);
        Ok(before - self.exercises.len())
    }

    fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.users.get(user_id).cloned())
    }

    fn non_admin_users(&self) -> Result<Vec<UserProfile>> {
        Ok(self.users.values().filter(|u| !u.is_admin).cloned().collect())
    }

    fn upsert_user(&mut self, user: &UserProfile) -> Result<()> {
        let user = checked_user(user)?;
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    fn active_recommendation(&self, user_id: &str) -> Result<Option<WorkoutRecommendation>> {
        Ok(self
            .recommendations
            .iter()
            .filter(|r| r.user_id == user_id && r.active)
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    fn get_recommendation(&self, recommendation_id: &str) -> Result<Option<WorkoutRecommendation>> {
        Ok(self
            .recommendations
            .iter()
            .find(|r| r.id == recommendation_id)
            .cloned())
    }

    fn insert_recommendation(&mut self, recommendation: &WorkoutRecommendation) -> Result<()> {
        check_recommendation(recommendation)?;
        if self.fail_recommendation_inserts {
            return Err(PersistenceError::QueryFailed {
                operation: "insert_recommendation".to_string(),
                reason: "write rejected".to_string(),
            }
            .into());
        }
        self.recommendations.push(recommendation.clone());
        Ok(())
    }

    fn update_recommendation(&mut self, recommendation: &WorkoutRecommendation) -> Result<()> {
        check_recommendation(recommendation)?;
        let slot = self
            .recommendations
            .iter_mut()
            .find(|r| r.id == recommendation.id)
            .ok_or_else(|| PersistenceError::NotFound {
                table: "recommendations".to_string(),
                id: recommendation.id.clone(),
            })?;
        *slot = recommendation.clone();
        Ok(())
    }

    fn deactivate_recommendations(&mut self, user_id: &str) -> Result<usize> {
        let mut count = 0;
        for rec in self
            .recommendations
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.active)
        {
            rec.active = false;
            count += 1;
        }
        Ok(count)
    }
}
