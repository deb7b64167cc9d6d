use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kilometres per hour in one metre per second
pub const KMH_PER_MS: f64 = 3.6;

/// Single wheel-sensor reading, nominally one per second
///
/// Serialized with the field names of the sensor wire format
/// (`{"timestamp": 12, "velocity": 7.4}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocitySample {
    /// Seconds elapsed since the exercise started
    #[serde(rename = "timestamp")]
    pub timestamp_seconds: u32,

    /// Wheel velocity in km/h
    #[serde(rename = "velocity")]
    pub velocity_kmh: f64,
}

impl VelocitySample {
    pub fn new(timestamp_seconds: u32, velocity_kmh: f64) -> Self {
        Self {
            timestamp_seconds,
            velocity_kmh,
        }
    }

    /// Velocity in metres per second
    pub fn velocity_ms(&self) -> f64 {
        self.velocity_kmh / KMH_PER_MS
    }
}

/// A recorded exercise session and its derived metrics
///
/// Created at session start with no samples and zeroed metrics, then written
/// once when the session finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    /// Unique identifier for the exercise
    pub id: String,

    /// Owner of the exercise
    pub user_id: String,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Whole seconds between start and end
    pub duration_seconds: u32,

    /// Rectangular integration of velocity at 1 Hz
    pub total_distance_meters: f64,

    /// Trimmed average velocity in m/s
    pub avg_velocity_ms: f64,

    /// Trimmed maximum velocity in m/s
    pub max_velocity_ms: f64,

    /// Trimmed minimum non-zero velocity in m/s
    pub min_velocity_ms: f64,

    /// Trimmed average acceleration in m/s²
    pub avg_acceleration_ms2: f64,

    /// Raw sensor readings
    pub samples: Vec<VelocitySample>,
}

impl Exercise {
    /// Fresh exercise row for a session that is about to start
    pub fn begin(user_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Exercise {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            started_at,
            duration_seconds: 0,
            total_distance_meters: 0.0,
            avg_velocity_ms: 0.0,
            max_velocity_ms: 0.0,
            min_velocity_ms: 0.0,
            avg_acceleration_ms2: 0.0,
            samples: Vec::new(),
        }
    }

    /// Ranking used to pick a user's best exercise
    pub fn performance_score(&self) -> f64 {
        self.avg_velocity_ms * self.total_distance_meters
    }
}

/// Demographic attributes used for peer matching
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
    pub age: Option<u32>,
    pub gender: Option<String>,
}

/// Spinal cord injury classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalProfile {
    /// Cause of injury (traumatic, non-traumatic, ...)
    pub sci_cause: Option<String>,

    /// Neurological level of injury
    pub sci_level: Option<String>,

    /// Tetraplegia / paraplegia
    pub sci_category: Option<String>,

    /// Complete / incomplete
    pub sci_severity: Option<String>,

    /// ASIA impairment scale grade
    pub sci_class: Option<String>,
}

/// Patient or clinician account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub demographic: Demographics,
    pub clinical: ClinicalProfile,
    pub is_admin: bool,
    pub is_active: bool,
}

/// Youngest and oldest accepted age, as enforced at registration
pub const MIN_AGE: u32 = 1;
pub const MAX_AGE: u32 = 150;

impl UserProfile {
    /// Active, non-admin profile with no attributes set
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        UserProfile {
            id: id.into(),
            name: name.into(),
            demographic: Demographics::default(),
            clinical: ClinicalProfile::default(),
            is_admin: false,
            is_active: true,
        }
    }

    /// Blank strings become absent attributes
    pub fn normalized(mut self) -> Self {
        fn clean(value: &mut Option<String>) {
            if value.as_deref().map(str::trim).is_some_and(str::is_empty) {
                *value = None;
            }
        }

        clean(&mut self.demographic.gender);
        clean(&mut self.clinical.sci_cause);
        clean(&mut self.clinical.sci_level);
        clean(&mut self.clinical.sci_category);
        clean(&mut self.clinical.sci_severity);
        clean(&mut self.clinical.sci_class);
        self
    }

    /// Check the record invariants enforced at the store boundary
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("user id is empty".to_string());
        }
        if let Some(age) = self.demographic.age {
            if !(MIN_AGE..=MAX_AGE).contains(&age) {
                return Err(format!("age {} outside {}..={}", age, MIN_AGE, MAX_AGE));
            }
        }
        Ok(())
    }
}

/// Interval workout prescription without lifecycle flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutPlan {
    /// Target velocity in m/s
    pub target_velocity_ms: f64,
    pub work_seconds: u32,
    pub rest_seconds: u32,
    pub repetitions: u32,
    pub notes: Option<String>,
}

impl WorkoutPlan {
    pub fn validate(&self) -> Result<(), String> {
        if !self.target_velocity_ms.is_finite() || self.target_velocity_ms < 0.0 {
            return Err(format!("invalid target velocity {}", self.target_velocity_ms));
        }
        if self.repetitions == 0 {
            return Err("repetitions must be positive".to_string());
        }
        Ok(())
    }
}

/// Persisted workout recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecommendation {
    pub id: String,
    pub user_id: String,

    /// Target velocity in m/s, same unit as the exercise averages it derives from
    pub target_velocity_ms: f64,

    pub work_seconds: u32,
    pub rest_seconds: u32,
    pub repetitions: u32,
    pub notes: Option<String>,

    /// Heuristic evidence score, 0-100
    pub confidence_percent: u8,

    pub generated_by_ai: bool,

    /// Set when a clinician edited the generated plan
    pub manually_adjusted: bool,

    /// Set when a clinician created or edited the plan
    pub adjusted_by_admin: bool,

    /// Only one active recommendation per user
    pub active: bool,

    pub updated_at: DateTime<Utc>,
}

impl WorkoutRecommendation {
    /// Active AI-generated recommendation built from a plan
    pub fn generated(
        user_id: impl Into<String>,
        plan: WorkoutPlan,
        confidence_percent: u8,
        now: DateTime<Utc>,
    ) -> Self {
        WorkoutRecommendation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            target_velocity_ms: plan.target_velocity_ms,
            work_seconds: plan.work_seconds,
            rest_seconds: plan.rest_seconds,
            repetitions: plan.repetitions,
            notes: plan.notes,
            confidence_percent: confidence_percent.min(100),
            generated_by_ai: true,
            manually_adjusted: false,
            adjusted_by_admin: false,
            active: true,
            updated_at: now,
        }
    }

    /// Copy the prescription fields of a plan onto this recommendation
    pub fn apply_plan(&mut self, plan: WorkoutPlan) {
        self.target_velocity_ms = plan.target_velocity_ms;
        self.work_seconds = plan.work_seconds;
        self.rest_seconds = plan.rest_seconds;
        self.repetitions = plan.repetitions;
        self.notes = plan.notes;
    }

    pub fn target_velocity_kmh(&self) -> f64 {
        self.target_velocity_ms * KMH_PER_MS
    }

    /// Total prescribed session length, saturating at `u32::MAX`
    pub fn session_duration_seconds(&self) -> u32 {
        self.work_seconds
            .saturating_add(self.rest_seconds)
            .saturating_mul(self.repetitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sample_wire_format() {
        let sample = VelocitySample::new(12, 7.2);
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"timestamp":12,"velocity":7.2}"#);

        let parsed: VelocitySample = serde_json::from_str(r#"{"timestamp":3,"velocity":18}"#).unwrap();
        assert_eq!(parsed.timestamp_seconds, 3);
        assert!((parsed.velocity_ms() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_exercise_begin_is_zeroed() {
        let started = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let exercise = Exercise::begin("patient-1", started);

        assert_eq!(exercise.user_id, "patient-1");
        assert_eq!(exercise.duration_seconds, 0);
        assert!(exercise.samples.is_empty());
        assert_eq!(exercise.performance_score(), 0.0);
    }

    #[test]
    fn test_profile_normalization() {
        let mut profile = UserProfile::new("u1", "Ana");
        profile.demographic.gender = Some("  ".to_string());
        profile.clinical.sci_level = Some("T6".to_string());
        profile.clinical.sci_class = Some(String::new());

        let profile = profile.normalized();
        assert_eq!(profile.demographic.gender, None);
        assert_eq!(profile.clinical.sci_level.as_deref(), Some("T6"));
        assert_eq!(profile.clinical.sci_class, None);
    }

    #[test]
    fn test_profile_age_validation() {
        let mut profile = UserProfile::new("u1", "Ana");
        assert!(profile.validate().is_ok());

        profile.demographic.age = Some(0);
        assert!(profile.validate().is_err());

        profile.demographic.age = Some(42);
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_recommendation_duration() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let plan = WorkoutPlan {
            target_velocity_ms: 2.5,
            work_seconds: 30,
            rest_seconds: 30,
            repetitions: 8,
            notes: None,
        };
        let rec = WorkoutRecommendation::generated("u1", plan, 120, now);

        assert_eq!(rec.session_duration_seconds(), 480);
        assert_eq!(rec.confidence_percent, 100);
        assert!((rec.target_velocity_kmh() - 9.0).abs() < 1e-9);
        assert!(rec.active && rec.generated_by_ai && !rec.manually_adjusted);
    }

    #[test]
    fn test_recommendation_duration_saturates() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let plan = WorkoutPlan {
            target_velocity_ms: 2.5,
            work_seconds: 3_000_000_000,
            rest_seconds: 3_000_000_000,
            repetitions: 6,
            notes: None,
        };
        let rec = WorkoutRecommendation::generated("u1", plan, 65, now);

        assert_eq!(rec.session_duration_seconds(), u32::MAX);
    }
}
