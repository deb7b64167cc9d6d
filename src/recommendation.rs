//! Adaptive workout recommendation
//!
//! Decision procedure per request:
//!
//! 1. an active recommendation younger than the validity period is returned as is
//! 2. a user with no exercises gets nothing
//! 3. non-admin peers with enough recent, stable history are collected
//! 4. the nearest peers are pooled into a KNN candidate
//! 5. below the confidence threshold the user's own best exercise is used
//! 6. the chosen plan replaces the user's active recommendation

use crate::error::{PersistenceError, RehabError, Result};
use crate::metrics::round_to;
use crate::models::{Exercise, UserProfile, WorkoutPlan, WorkoutRecommendation};
use crate::similarity::{SimilarityModel, SimilarityWeights};
use crate::stability::{months_before, StabilityAnalyzer};
use crate::store::{ExerciseQuery, RehabStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt;
use tracing::{debug, info, span, Level};

/// Target acceleration shown for stored recommendations, in m/s²
const DEFAULT_TARGET_ACCELERATION_MS2: f64 = 0.5;

/// Tunables of the recommendation procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Age after which an active recommendation is regenerated
    pub validity_months: u32,

    /// Trailing window for peer history and stability
    pub peer_window_months: u32,

    /// Most recent exercises fetched per peer
    pub peer_exercise_limit: usize,

    /// Peers with fewer recent exercises are ignored
    pub min_peer_exercises: usize,

    /// Velocity change between history halves tolerated as stable
    pub stability_threshold_percent: f64,

    /// Nearest peers pooled by KNN
    pub max_neighbours: usize,

    /// KNN results below this fall through to the self-best heuristic
    pub confidence_threshold: u8,

    pub full_confidence_peers: usize,
    pub full_confidence_exercises: usize,
    pub peer_confidence_weight: f64,
    pub exercise_confidence_weight: f64,

    pub knn_velocity_factor: f64,
    pub knn_interval_factor: f64,
    pub knn_repetitions: u32,

    pub self_best_velocity_factor: f64,
    pub self_best_interval_factor: f64,
    pub self_best_repetitions: u32,
    pub self_best_confidence: u8,

    /// Used when the best exercise has no recorded velocity
    pub default_velocity_ms: f64,

    /// Used when the best exercise has no recorded duration
    pub default_duration_seconds: u32,

    pub similarity: SimilarityWeights,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        RecommendationConfig {
            validity_months: 3,
            peer_window_months: 3,
            peer_exercise_limit: 10,
            min_peer_exercises: 3,
            stability_threshold_percent: 10.0,
            max_neighbours: 5,
            confidence_threshold: 70,
            full_confidence_peers: 5,
            full_confidence_exercises: 20,
            peer_confidence_weight: 40.0,
            exercise_confidence_weight: 60.0,
            knn_velocity_factor: 0.80,
            knn_interval_factor: 0.30,
            knn_repetitions: 8,
            self_best_velocity_factor: 0.85,
            self_best_interval_factor: 0.25,
            self_best_repetitions: 6,
            self_best_confidence: 65,
            default_velocity_ms: 8.0,
            default_duration_seconds: 600,
            similarity: SimilarityWeights::default(),
        }
    }
}

/// Where a returned recommendation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    /// Active recommendation edited by a clinician
    Manual,
    /// Active recommendation still inside its validity period
    Existing,
    Knn,
    BestExercise,
    /// Clinician quick path, averaged over other users' exercises
    AdminPeerAverage,
    /// Clinician quick path, derived from the user's first exercise
    AdminFirstExercise,
}

impl RecommendationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationSource::Manual => "manual",
            RecommendationSource::Existing => "existing",
            RecommendationSource::Knn => "knn",
            RecommendationSource::BestExercise => "best_exercise",
            RecommendationSource::AdminPeerAverage => "admin_peer_average",
            RecommendationSource::AdminFirstExercise => "admin_first_exercise",
        }
    }

    /// User-facing explanation for a recommendation of this source
    pub fn message(&self, confidence_percent: u8, confidence_threshold: u8) -> &'static str {
        match self {
            RecommendationSource::Manual => "This workout was adjusted manually by a professional.",
            RecommendationSource::Existing => {
                "Your current workout is still valid and personalized for you."
            }
            RecommendationSource::Knn if confidence_percent >= confidence_threshold => {
                "Recommendation based on similar users with high reliability."
            }
            RecommendationSource::Knn => "Recommendation based on similar users, but with limited data.",
            RecommendationSource::BestExercise => {
                "Recommendation based on your best previous performance."
            }
            _ => "Personalized recommendation generated.",
        }
    }
}

impl fmt::Display for RecommendationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer that contributed to a KNN recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMatch {
    pub user_id: String,
    pub name: String,
    pub age: Option<u32>,
    pub sci_category: Option<String>,
    pub sci_level: Option<String>,
    pub exercise_count: usize,
    pub distance: f64,
}

/// A non-admin user with enough stable recent history to serve as a reference
#[derive(Debug, Clone)]
pub struct PeerHistory {
    pub profile: UserProfile,
    /// Recent exercises, newest first
    pub exercises: Vec<Exercise>,
}

/// A plan that has been derived but not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationCandidate {
    pub plan: WorkoutPlan,
    pub confidence_percent: u8,
    pub source: RecommendationSource,
    pub target_distance_km: f64,
    pub target_acceleration_ms2: f64,
    pub similar_profiles: Vec<PeerMatch>,
}

/// A recommendation together with its presentation fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationOutcome {
    pub recommendation: WorkoutRecommendation,
    pub source: RecommendationSource,
    pub message: String,
    /// `(work + rest) × repetitions`
    pub session_duration_seconds: u32,
    pub target_distance_km: f64,
    pub target_acceleration_ms2: f64,
    pub similar_profiles: Vec<PeerMatch>,
}

impl RecommendationOutcome {
    fn build(
        recommendation: WorkoutRecommendation,
        source: RecommendationSource,
        target_distance_km: f64,
        target_acceleration_ms2: f64,
        similar_profiles: Vec<PeerMatch>,
        confidence_threshold: u8,
    ) -> Self {
        RecommendationOutcome {
            message: source
                .message(recommendation.confidence_percent, confidence_threshold)
                .to_string(),
            session_duration_seconds: recommendation.session_duration_seconds(),
            recommendation,
            source,
            target_distance_km,
            target_acceleration_ms2,
            similar_profiles,
        }
    }

    /// Wrap a stored recommendation, deriving distance from the work interval
    pub fn from_stored(
        recommendation: WorkoutRecommendation,
        source: RecommendationSource,
        confidence_threshold: u8,
    ) -> Self {
        let distance_km = round_to(
            recommendation.target_velocity_ms * f64::from(recommendation.work_seconds) / 1000.0,
            2,
        );
        Self::build(
            recommendation,
            source,
            distance_km,
            DEFAULT_TARGET_ACCELERATION_MS2,
            Vec::new(),
            confidence_threshold,
        )
    }
}

/// True when no recommendation exists or it is at least `validity_months` old
pub fn needs_regeneration(
    recommendation: Option<&WorkoutRecommendation>,
    now: DateTime<Utc>,
    validity_months: u32,
) -> bool {
    recommendation.map_or(true, |rec| rec.updated_at <= months_before(now, validity_months))
}

/// KNN confidence score in `[0, 100]`
///
/// Peer coverage and pooled exercise coverage each saturate independently,
/// so adding peers or exercises never lowers the score.
pub fn knn_confidence(peer_count: usize, pooled_exercises: usize, config: &RecommendationConfig) -> u8 {
    let peer_share = (peer_count as f64 / config.full_confidence_peers as f64).min(1.0);
    let exercise_share = (pooled_exercises as f64 / config.full_confidence_exercises as f64).min(1.0);
    let score = peer_share * config.peer_confidence_weight + exercise_share * config.exercise_confidence_weight;
    score.round().clamp(0.0, 100.0) as u8
}

fn mean_of(exercises: &[&Exercise], field: impl Fn(&Exercise) -> f64) -> f64 {
    exercises.iter().map(|e| field(e)).collect::<Vec<f64>>().mean()
}

fn interval_seconds(duration_seconds: f64, factor: f64) -> u32 {
    (duration_seconds * factor).round().max(0.0) as u32
}

/// Deactivate prior recommendations and store the candidate as the active one
pub(crate) fn persist_candidate<S: RehabStore + ?Sized>(
    store: &mut S,
    user_id: &str,
    candidate: RecommendationCandidate,
    now: DateTime<Utc>,
    confidence_threshold: u8,
) -> Result<RecommendationOutcome> {
    candidate.plan.validate().map_err(RehabError::Validation)?;

    let recommendation =
        WorkoutRecommendation::generated(user_id, candidate.plan, candidate.confidence_percent, now);
    store.replace_active_recommendation(&recommendation)?;

    info!(
        user_id,
        source = %candidate.source,
        confidence = recommendation.confidence_percent,
        target_velocity_ms = recommendation.target_velocity_ms,
        "Stored new active recommendation"
    );

    Ok(RecommendationOutcome::build(
        recommendation,
        candidate.source,
        candidate.target_distance_km,
        candidate.target_acceleration_ms2,
        candidate.similar_profiles,
        confidence_threshold,
    ))
}

/// Load the target profile, rejecting unknown users and admins
pub(crate) fn load_target<S: RehabStore + ?Sized>(store: &S, user_id: &str) -> Result<UserProfile> {
    let user = store.get_user(user_id)?.ok_or_else(|| PersistenceError::NotFound {
        table: "users".to_string(),
        id: user_id.to_string(),
    })?;

    if user.is_admin {
        return Err(RehabError::Validation(format!(
            "user {} is an admin account and cannot receive workout recommendations",
            user_id
        )));
    }
    Ok(user)
}

/// Orchestrates peer search, KNN and the self-best fallback
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    config: RecommendationConfig,
    similarity: SimilarityModel,
    stability: StabilityAnalyzer,
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommendationEngine {
    pub fn new() -> Self {
        Self::with_config(RecommendationConfig::default())
    }

    pub fn with_config(config: RecommendationConfig) -> Self {
        let similarity = SimilarityModel::with_weights(config.similarity.clone());
        let stability = StabilityAnalyzer::with_params(
            config.peer_window_months,
            config.min_peer_exercises,
            config.stability_threshold_percent,
        );
        RecommendationEngine {
            config,
            similarity,
            stability,
        }
    }

    pub fn config(&self) -> &RecommendationConfig {
        &self.config
    }

    /// Whether the user's active recommendation is due for regeneration
    pub fn needs_regeneration(&self, recommendation: Option<&WorkoutRecommendation>, now: DateTime<Utc>) -> bool {
        needs_regeneration(recommendation, now, self.config.validity_months)
    }

    /// Return the user's valid recommendation or generate and store a new one
    ///
    /// `Ok(None)` means the user has no exercises yet and a clinician should
    /// create the plan manually.
    pub fn get_recommendation<S: RehabStore + ?Sized>(
        &self,
        store: &mut S,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RecommendationOutcome>> {
        let span = span!(Level::DEBUG, "recommendation", user_id = %user_id);
        let _guard = span.enter();

        let target = load_target(store, user_id)?;

        if let Some(active) = store.active_recommendation(user_id)? {
            if !self.needs_regeneration(Some(&active), now) {
                let source = if active.manually_adjusted {
                    RecommendationSource::Manual
                } else {
                    RecommendationSource::Existing
                };
                info!(user_id, source = %source, "Active recommendation still valid");
                return Ok(Some(RecommendationOutcome::from_stored(
                    active,
                    source,
                    self.config.confidence_threshold,
                )));
            }
            debug!(updated_at = %active.updated_at, "Active recommendation expired");
        }

        let history = store.exercises_for_user(user_id, &ExerciseQuery::all())?;
        if history.is_empty() {
            info!(user_id, "No exercises recorded, nothing to recommend");
            return Ok(None);
        }
        debug!(exercises = history.len(), "Loaded user history");

        match self.generate(store, &target, &history, now)? {
            Some(candidate) => persist_candidate(
                store,
                user_id,
                candidate,
                now,
                self.config.confidence_threshold,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    /// Peer search, KNN and self-best without touching the active recommendation
    pub fn generate<S: RehabStore + ?Sized>(
        &self,
        store: &S,
        target: &UserProfile,
        history: &[Exercise],
        now: DateTime<Utc>,
    ) -> Result<Option<RecommendationCandidate>> {
        let peers = self.stable_peers(store, &target.id, now)?;

        let mut fallback = None;
        if let Some(knn) = self.knn_candidate(target, &peers) {
            if knn.confidence_percent >= self.config.confidence_threshold {
                info!(
                    confidence = knn.confidence_percent,
                    neighbours = knn.similar_profiles.len(),
                    "Using KNN recommendation"
                );
                return Ok(Some(knn));
            }
            info!(
                confidence = knn.confidence_percent,
                threshold = self.config.confidence_threshold,
                "KNN confidence too low, trying best exercise"
            );
            fallback = Some(knn);
        }

        Ok(self.self_best_candidate(history).or(fallback))
    }

    /// Non-admin users other than the target whose recent history is stable
    pub fn stable_peers<S: RehabStore + ?Sized>(
        &self,
        store: &S,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PeerHistory>> {
        let since = months_before(now, self.config.peer_window_months);
        let query = ExerciseQuery::recent(since, self.config.peer_exercise_limit);

        let mut peers = Vec::new();
        for profile in store.non_admin_users()? {
            if profile.id == target_id {
                continue;
            }

            let exercises = store.exercises_for_user(&profile.id, &query)?;
            if exercises.len() < self.config.min_peer_exercises {
                debug!(peer = %profile.id, exercises = exercises.len(), "Peer skipped: too few recent exercises");
                continue;
            }

            let assessment = self.stability.assess(&exercises, now);
            if !assessment.is_stable() {
                debug!(peer = %profile.id, trend = ?assessment.trend, "Peer skipped: unstable progress");
                continue;
            }

            peers.push(PeerHistory { profile, exercises });
        }

        debug!(stable_peers = peers.len(), "Peer search finished");
        Ok(peers)
    }

    /// Pool the nearest peers into a plan; `None` when there are no peers
    pub fn knn_candidate(&self, target: &UserProfile, peers: &[PeerHistory]) -> Option<RecommendationCandidate> {
        let mut ranked: Vec<(f64, &PeerHistory)> = peers
            .iter()
            .map(|peer| (self.similarity.distance(target, &peer.profile), peer))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.profile.id.cmp(&b.1.profile.id)));
        ranked.truncate(self.config.max_neighbours);

        if ranked.is_empty() {
            return None;
        }

        let pooled: Vec<&Exercise> = ranked.iter().flat_map(|(_, peer)| peer.exercises.iter()).collect();
        if pooled.is_empty() {
            return None;
        }

        let avg_velocity = mean_of(&pooled, |e| e.avg_velocity_ms);
        let avg_duration = mean_of(&pooled, |e| f64::from(e.duration_seconds));
        let avg_distance = mean_of(&pooled, |e| e.total_distance_meters);
        let avg_acceleration = mean_of(&pooled, |e| e.avg_acceleration_ms2);

        let confidence = knn_confidence(ranked.len(), pooled.len(), &self.config);
        let interval = interval_seconds(avg_duration, self.config.knn_interval_factor);

        let similar_profiles = ranked
            .iter()
            .map(|(distance, peer)| PeerMatch {
                user_id: peer.profile.id.clone(),
                name: peer.profile.name.clone(),
                age: peer.profile.demographic.age,
                sci_category: peer.profile.clinical.sci_category.clone(),
                sci_level: peer.profile.clinical.sci_level.clone(),
                exercise_count: peer.exercises.len(),
                distance: *distance,
            })
            .collect();

        Some(RecommendationCandidate {
            plan: WorkoutPlan {
                target_velocity_ms: round_to(avg_velocity * self.config.knn_velocity_factor, 2),
                work_seconds: interval,
                rest_seconds: interval,
                repetitions: self.config.knn_repetitions,
                notes: Some(format!(
                    "Based on {} similar user(s) with {} exercise(s).",
                    ranked.len(),
                    pooled.len()
                )),
            },
            confidence_percent: confidence,
            source: RecommendationSource::Knn,
            target_distance_km: round_to(avg_distance / 1000.0, 2),
            target_acceleration_ms2: round_to(avg_acceleration, 2),
            similar_profiles,
        })
    }

    /// Plan derived from the user's best exercise; `None` for an empty history
    ///
    /// `history` is expected newest first; on equal scores the first one
    /// encountered wins.
    pub fn self_best_candidate(&self, history: &[Exercise]) -> Option<RecommendationCandidate> {
        let best = history.iter().fold(None::<&Exercise>, |best, current| match best {
            Some(b) if current.performance_score() <= b.performance_score() => Some(b),
            _ => Some(current),
        })?;

        let velocity = if best.avg_velocity_ms > 0.0 {
            best.avg_velocity_ms
        } else {
            self.config.default_velocity_ms
        };
        let duration = if best.duration_seconds > 0 {
            best.duration_seconds
        } else {
            self.config.default_duration_seconds
        };

        let interval = interval_seconds(f64::from(duration), self.config.self_best_interval_factor);
        let factor = self.config.self_best_velocity_factor;

        Some(RecommendationCandidate {
            plan: WorkoutPlan {
                target_velocity_ms: round_to(velocity * factor, 2),
                work_seconds: interval,
                rest_seconds: interval,
                repetitions: self.config.self_best_repetitions,
                notes: Some(format!(
                    "Based on your best exercise on {}.",
                    best.started_at.format("%Y-%m-%d")
                )),
            },
            confidence_percent: self.config.self_best_confidence,
            source: RecommendationSource::BestExercise,
            target_distance_km: round_to(best.total_distance_meters / 1000.0 * factor, 2),
            target_acceleration_ms2: round_to(best.avg_acceleration_ms2 * factor, 2),
            similar_profiles: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap()
    }

    fn exercise(user: &str, days_ago: i64, velocity: f64, duration: u32, distance: f64) -> Exercise {
        let mut e = Exercise::begin(user, now() - Duration::days(days_ago));
        e.avg_velocity_ms = velocity;
        e.duration_seconds = duration;
        e.total_distance_meters = distance;
        e
    }

    fn peer(id: &str, level: &str, count: usize) -> PeerHistory {
        let mut profile = UserProfile::new(id, id);
        profile.clinical.sci_level = Some(level.to_string());
        PeerHistory {
            profile,
            exercises: (0..count).map(|i| exercise(id, 1 + i as i64, 12.0, 400, 2000.0)).collect(),
        }
    }

    #[test]
    fn test_confidence_formula() {
        let config = RecommendationConfig::default();
        assert_eq!(knn_confidence(5, 20, &config), 100);
        assert_eq!(knn_confidence(6, 30, &config), 100);
        assert_eq!(knn_confidence(1, 3, &config), 17); // 8 + 9
        assert_eq!(knn_confidence(2, 10, &config), 46); // 16 + 30
        assert_eq!(knn_confidence(0, 0, &config), 0);
    }

    #[test]
    fn test_self_best_from_single_exercise() {
        let engine = RecommendationEngine::new();
        let candidate = engine
            .self_best_candidate(&[exercise("u", 3, 10.0, 600, 6000.0)])
            .unwrap();

        assert_eq!(candidate.plan.target_velocity_ms, 8.5);
        assert_eq!(candidate.plan.work_seconds, 150);
        assert_eq!(candidate.plan.rest_seconds, 150);
        assert_eq!(candidate.plan.repetitions, 6);
        assert_eq!(candidate.confidence_percent, 65);
        assert_eq!(candidate.target_distance_km, 5.1);
    }

    #[test]
    fn test_self_best_tie_keeps_first_encountered() {
        let engine = RecommendationEngine::new();
        let newer = exercise("u", 1, 2.0, 300, 100.0);
        let older = exercise("u", 9, 4.0, 900, 50.0);

        let candidate = engine.self_best_candidate(&[newer, older]).unwrap();
        assert_eq!(candidate.plan.work_seconds, 75);
    }

    #[test]
    fn test_self_best_zero_metrics_use_defaults() {
        let engine = RecommendationEngine::new();
        let candidate = engine
            .self_best_candidate(&[exercise("u", 1, 0.0, 0, 0.0)])
            .unwrap();

        assert_eq!(candidate.plan.target_velocity_ms, 6.8);
        assert_eq!(candidate.plan.work_seconds, 150);
        assert!(engine.self_best_candidate(&[]).is_none());
    }

    #[test]
    fn test_knn_takes_nearest_five() {
        let engine = RecommendationEngine::new();
        let mut target = UserProfile::new("target", "Target");
        target.clinical.sci_level = Some("T6".to_string());

        let mut peers: Vec<PeerHistory> = ["a", "b", "c", "d", "e"].iter().map(|id| peer(id, "T6", 5)).collect();
        peers.push(peer("far", "C4", 5));

        let candidate = engine.knn_candidate(&target, &peers).unwrap();
        assert_eq!(candidate.similar_profiles.len(), 5);
        assert!(candidate.similar_profiles.iter().all(|p| p.distance == 0.0));
        assert!(candidate.similar_profiles.iter().all(|p| p.user_id != "far"));
        assert_eq!(candidate.confidence_percent, 100);
        assert_eq!(candidate.plan.target_velocity_ms, 9.6);
        assert_eq!(candidate.plan.work_seconds, 120);
        assert_eq!(candidate.plan.repetitions, 8);
        assert_eq!(candidate.target_distance_km, 2.0);
    }

    #[test]
    fn test_knn_ties_broken_by_user_id() {
        let engine = RecommendationEngine::with_config(RecommendationConfig {
            max_neighbours: 2,
            ..RecommendationConfig::default()
        });
        let target = UserProfile::new("target", "Target");
        let peers = vec![peer("zed", "T6", 3), peer("amy", "T6", 3), peer("bob", "T6", 3)];

        let candidate = engine.knn_candidate(&target, &peers).unwrap();
        let ids: Vec<_> = candidate.similar_profiles.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(ids, vec!["amy", "bob"]);
        assert!(engine.knn_candidate(&target, &[]).is_none());
    }

    #[test]
    fn test_needs_regeneration() {
        let plan = WorkoutPlan {
            target_velocity_ms: 2.0,
            work_seconds: 60,
            rest_seconds: 60,
            repetitions: 6,
            notes: None,
        };
        let fresh = WorkoutRecommendation::generated("u", plan.clone(), 65, now() - Duration::days(60));
        let stale = WorkoutRecommendation::generated("u", plan, 65, now() - Duration::days(100));

        assert!(!needs_regeneration(Some(&fresh), now(), 3));
        assert!(needs_regeneration(Some(&stale), now(), 3));
        assert!(needs_regeneration(None, now(), 3));
    }

    #[test]
    fn test_messages_by_source() {
        let stored = WorkoutRecommendation::generated(
            "u",
            WorkoutPlan {
                target_velocity_ms: 2.0,
                work_seconds: 100,
                rest_seconds: 50,
                repetitions: 4,
                notes: None,
            },
            40,
            now(),
        );
        let outcome = RecommendationOutcome::from_stored(stored, RecommendationSource::Existing, 70);

        assert_eq!(outcome.session_duration_seconds, 600);
        assert_eq!(outcome.target_distance_km, 0.2);
        assert_eq!(outcome.target_acceleration_ms2, 0.5);
        assert!(outcome.message.contains("still valid"));
        assert!(RecommendationSource::Knn.message(40, 70).contains("limited data"));
        assert!(RecommendationSource::Knn.message(85, 70).contains("high reliability"));
    }

    proptest! {
        #[test]
        fn test_confidence_monotone(peers in 0usize..20, extra_peers in 0usize..10, exercises in 0usize..60, extra_exercises in 0usize..30) {
            let config = RecommendationConfig::default();
            let base = knn_confidence(peers, exercises, &config);

            prop_assert!(base <= 100);
            prop_assert!(knn_confidence(peers + extra_peers, exercises, &config) >= base);
            prop_assert!(knn_confidence(peers, exercises + extra_exercises, &config) >= base);
        }
    }
}
