use crate::models::Exercise;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Start of a trailing window of whole calendar months
pub fn months_before(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Direction of a user's recent velocity trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressTrend {
    Improving,
    Stable,
    Declining,
    /// Fewer exercises in the window than the analyzer requires
    InsufficientData,
}

/// Result of a stability check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityAssessment {
    /// Exercises inside the trailing window
    pub exercise_count: usize,
    pub first_half_mean: Option<f64>,
    pub second_half_mean: Option<f64>,
    /// `None` when the first-half mean is zero or data is insufficient
    pub change_percent: Option<f64>,
    pub trend: ProgressTrend,
}

impl StabilityAssessment {
    /// Stable or improving users qualify as peer references
    pub fn is_stable(&self) -> bool {
        matches!(self.trend, ProgressTrend::Stable | ProgressTrend::Improving)
    }

    fn insufficient(exercise_count: usize) -> Self {
        StabilityAssessment {
            exercise_count,
            first_half_mean: None,
            second_half_mean: None,
            change_percent: None,
            trend: ProgressTrend::InsufficientData,
        }
    }
}

/// Decides whether a user's recent history is stable or improving
#[derive(Debug, Clone)]
pub struct StabilityAnalyzer {
    window_months: u32,
    min_exercises: usize,
    max_change_percent: f64,
}

impl Default for StabilityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityAnalyzer {
    /// Three-month window, at least three exercises, 10% change tolerance
    pub fn new() -> Self {
        StabilityAnalyzer {
            window_months: 3,
            min_exercises: 3,
            max_change_percent: 10.0,
        }
    }

    pub fn with_params(window_months: u32, min_exercises: usize, max_change_percent: f64) -> Self {
        StabilityAnalyzer {
            window_months,
            min_exercises,
            max_change_percent,
        }
    }

    /// Assess the exercises that fall inside the trailing window ending at `now`
    ///
    /// Exercises are put in chronological order here, whatever order the
    /// caller fetched them in.
    pub fn assess(&self, exercises: &[Exercise], now: DateTime<Utc>) -> StabilityAssessment {
        let window_start = months_before(now, self.window_months);

        let mut recent: Vec<&Exercise> = exercises
            .iter()
            .filter(|e| e.started_at >= window_start)
            .collect();
        recent.sort_by_key(|e| e.started_at);

        let count = recent.len();
        if count < self.min_exercises.max(2) {
            return StabilityAssessment::insufficient(count);
        }

        let velocities: Vec<f64> = recent.iter().map(|e| e.avg_velocity_ms).collect();
        let (first, second) = velocities.split_at(count / 2);
        let first_mean = first.mean();
        let second_mean = second.mean();

        let change_percent = if first_mean > 0.0 {
            Some((second_mean - first_mean).abs() / first_mean * 100.0)
        } else {
            None
        };

        let significant = change_percent.map_or(second_mean > first_mean, |c| c >= self.max_change_percent);
        let trend = if !significant || second_mean == first_mean {
            ProgressTrend::Stable
        } else if second_mean > first_mean {
            ProgressTrend::Improving
        } else {
            ProgressTrend::Declining
        };

        StabilityAssessment {
            exercise_count: count,
            first_half_mean: Some(first_mean),
            second_half_mean: Some(second_mean),
            change_percent,
            trend,
        }
    }

    pub fn is_stable(&self, exercises: &[Exercise], now: DateTime<Utc>) -> bool {
        self.assess(exercises, now).is_stable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    /// Exercises one week apart, oldest first, ending a day before `now`
    fn history(velocities: &[f64]) -> Vec<Exercise> {
        let n = velocities.len() as i64;
        velocities
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let started = now() - Duration::days(1 + 7 * (n - 1 - i as i64));
                let mut exercise = Exercise::begin("peer", started);
                exercise.avg_velocity_ms = *v;
                exercise
            })
            .collect()
    }

    #[test]
    fn test_requires_three_exercises() {
        let analyzer = StabilityAnalyzer::new();
        let assessment = analyzer.assess(&history(&[2.0, 2.1]), now());

        assert_eq!(assessment.trend, ProgressTrend::InsufficientData);
        assert!(!assessment.is_stable());
    }

    #[test]
    fn test_improving_history_is_stable() {
        let analyzer = StabilityAnalyzer::new();
        let assessment = analyzer.assess(&history(&[2.0, 2.5, 3.0, 3.5]), now());

        assert_eq!(assessment.trend, ProgressTrend::Improving);
        assert!(assessment.is_stable());
    }

    #[test]
    fn test_small_decline_is_stable() {
        // first half [3.0], second half [2.9, 2.8] -> 5% drop
        let assessment = StabilityAnalyzer::new().assess(&history(&[3.0, 2.9, 2.8]), now());

        assert_eq!(assessment.trend, ProgressTrend::Stable);
        assert!((assessment.change_percent.unwrap() - 5.0).abs() < 1e-9);
        assert!(assessment.is_stable());
    }

    #[test]
    fn test_large_decline_is_not_stable() {
        let assessment = StabilityAnalyzer::new().assess(&history(&[4.0, 4.0, 3.0, 3.0]), now());

        assert_eq!(assessment.trend, ProgressTrend::Declining);
        assert!(!assessment.is_stable());
    }

    #[test]
    fn test_caller_order_does_not_matter() {
        let mut exercises = history(&[4.0, 4.0, 3.0, 3.0]);
        exercises.reverse();

        assert!(!StabilityAnalyzer::new().is_stable(&exercises, now()));
    }

    #[test]
    fn test_old_exercises_outside_window_are_ignored() {
        let mut exercises = history(&[2.0, 2.0, 2.0]);
        exercises[0].started_at = now() - Duration::days(120);

        let assessment = StabilityAnalyzer::new().assess(&exercises, now());
        assert_eq!(assessment.exercise_count, 2);
        assert!(!assessment.is_stable());
    }

    #[test]
    fn test_zero_first_half_counts_as_improving_or_flat() {
        let analyzer = StabilityAnalyzer::new();

        let rising = analyzer.assess(&history(&[0.0, 1.0, 1.0]), now());
        assert_eq!(rising.change_percent, None);
        assert_eq!(rising.trend, ProgressTrend::Improving);

        let flat = analyzer.assess(&history(&[0.0, 0.0, 0.0]), now());
        assert_eq!(flat.trend, ProgressTrend::Stable);
        assert!(flat.is_stable());
    }

    #[test]
    fn test_months_before() {
        let start = months_before(now(), 3);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap());
    }
}
