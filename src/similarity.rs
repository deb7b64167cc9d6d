//! Weighted profile distance used for peer matching
//!
//! Each attribute contributes only when it is present on both profiles, and
//! the weighted sum is normalised by the weight actually used. Two profiles
//! with nothing in common to compare are treated as maximally dissimilar.

use crate::models::UserProfile;
use serde::{Deserialize, Serialize};

/// Per-attribute weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    /// Applied to `|age1 - age2| / 100`
    pub age: f64,
    pub gender: f64,
    pub sci_level: f64,
    pub sci_category: f64,
    pub sci_severity: f64,
    pub sci_class: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        SimilarityWeights {
            age: 0.2,
            gender: 0.1,
            sci_level: 0.3,
            sci_category: 0.25,
            sci_severity: 0.1,
            sci_class: 0.05,
        }
    }
}

/// Ages this far apart count as a full mismatch
const AGE_SPAN_YEARS: f64 = 100.0;

#[derive(Debug, Clone, Default)]
pub struct SimilarityModel {
    weights: SimilarityWeights,
}

#[derive(Default)]
struct Accumulator {
    distance: f64,
    weight: f64,
}

impl Accumulator {
    fn add(&mut self, weight: f64, mismatch: f64) {
        self.distance += weight * mismatch;
        self.weight += weight;
    }

    fn categorical(&mut self, weight: f64, a: Option<&str>, b: Option<&str>) {
        if let (Some(a), Some(b)) = (a, b) {
            self.add(weight, if a == b { 0.0 } else { 1.0 });
        }
    }
}

impl SimilarityModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: SimilarityWeights) -> Self {
        SimilarityModel { weights }
    }

    pub fn weights(&self) -> &SimilarityWeights {
        &self.weights
    }

    /// Distance in `[0, 1]`, 0 meaning identical on every comparable attribute
    pub fn distance(&self, a: &UserProfile, b: &UserProfile) -> f64 {
        let w = &self.weights;
        let mut acc = Accumulator::default();

        if let (Some(age_a), Some(age_b)) = (a.demographic.age, b.demographic.age) {
            let diff = (f64::from(age_a) - f64::from(age_b)).abs() / AGE_SPAN_YEARS;
            acc.add(w.age, diff.min(1.0));
        }

        acc.categorical(
            w.gender,
            a.demographic.gender.as_deref(),
            b.demographic.gender.as_deref(),
        );
        acc.categorical(
            w.sci_level,
            a.clinical.sci_level.as_deref(),
            b.clinical.sci_level.as_deref(),
        );
        acc.categorical(
            w.sci_category,
            a.clinical.sci_category.as_deref(),
            b.clinical.sci_category.as_deref(),
        );
        acc.categorical(
            w.sci_severity,
            a.clinical.sci_severity.as_deref(),
            b.clinical.sci_severity.as_deref(),
        );
        acc.categorical(
            w.sci_class,
            a.clinical.sci_class.as_deref(),
            b.clinical.sci_class.as_deref(),
        );

        if acc.weight > 0.0 {
            acc.distance / acc.weight
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn profile(age: Option<u32>, gender: Option<&str>, level: Option<&str>, category: Option<&str>) -> UserProfile {
        let mut p = UserProfile::new("u", "name");
        p.demographic.age = age;
        p.demographic.gender = gender.map(String::from);
        p.clinical.sci_level = level.map(String::from);
        p.clinical.sci_category = category.map(String::from);
        p
    }

    #[test]
    fn test_identical_profiles() {
        let a = profile(Some(40), Some("F"), Some("T6"), Some("paraplegia"));
        assert_eq!(SimilarityModel::new().distance(&a, &a.clone()), 0.0);
    }

    #[test]
    fn test_no_comparable_attributes() {
        let a = profile(Some(40), None, None, None);
        let b = profile(None, Some("M"), Some("C5"), None);
        assert_eq!(SimilarityModel::new().distance(&a, &b), 1.0);
    }

    #[test]
    fn test_weighted_mismatch() {
        // age diff 20 -> 0.2 * 0.2 = 0.04, level mismatch 0.3, gender match 0
        let a = profile(Some(30), Some("M"), Some("T6"), None);
        let b = profile(Some(50), Some("M"), Some("C5"), None);
        let expected = (0.04 + 0.3) / (0.2 + 0.1 + 0.3);

        assert!((SimilarityModel::new().distance(&a, &b) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_only_shared_attributes_count() {
        let a = profile(None, None, Some("T6"), Some("paraplegia"));
        let b = profile(None, None, None, Some("tetraplegia"));
        assert_eq!(SimilarityModel::new().distance(&a, &b), 1.0);

        let c = profile(None, None, None, Some("paraplegia"));
        assert_eq!(SimilarityModel::new().distance(&a, &c), 0.0);
    }

    #[test]
    fn test_large_age_gap_is_capped() {
        let a = profile(Some(1), None, None, None);
        let b = profile(Some(150), None, None, None);
        assert_eq!(SimilarityModel::new().distance(&a, &b), 1.0);
    }

    fn arb_attr() -> impl Strategy<Value = Option<String>> {
        prop::option::of(prop::sample::select(vec!["A".to_string(), "B".to_string(), "C".to_string()]))
    }

    fn arb_profile() -> impl Strategy<Value = UserProfile> {
        (
            prop::option::of(1u32..=150),
            arb_attr(),
            arb_attr(),
            arb_attr(),
            arb_attr(),
            arb_attr(),
        )
            .prop_map(|(age, gender, level, category, severity, class)| {
                let mut p = UserProfile::new("p", "peer");
                p.demographic.age = age;
                p.demographic.gender = gender;
                p.clinical.sci_level = level;
                p.clinical.sci_category = category;
                p.clinical.sci_severity = severity;
                p.clinical.sci_class = class;
                p
            })
    }

    proptest! {
        #[test]
        fn test_distance_symmetric_and_bounded(a in arb_profile(), b in arb_profile()) {
            let model = SimilarityModel::new();
            let ab = model.distance(&a, &b);
            let ba = model.distance(&b, &a);

            prop_assert_eq!(ab, ba);
            prop_assert!((0.0..=1.0).contains(&ab));
        }
    }
}
