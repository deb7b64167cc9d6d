//! Live exercise session
//!
//! A session owns one exercise row from start to finish. Sensor readings
//! arrive on a bounded channel; the receiving half is a
//! [`SensorSubscription`] that closes itself when dropped, so the sensor
//! side observes the end of the session however the consume step exits.

use crate::error::{PersistenceError, RehabError, Result};
use crate::metrics::{elapsed_seconds, ExerciseMetrics, MetricsEngine};
use crate::models::{Exercise, VelocitySample};
use crate::store::RehabStore;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Sending half of a sensor feed
#[derive(Debug, Clone)]
pub struct SensorFeed {
    tx: mpsc::Sender<VelocitySample>,
}

impl SensorFeed {
    /// Push a reading, waiting while the channel is full
    pub async fn send(&self, sample: VelocitySample) -> Result<()> {
        self.tx
            .send(sample)
            .await
            .map_err(|_| RehabError::Internal("sensor subscription closed".to_string()))
    }

    /// True once the session side has closed its subscription
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a sensor feed, closed on drop
#[derive(Debug)]
pub struct SensorSubscription {
    rx: mpsc::Receiver<VelocitySample>,
}

impl SensorSubscription {
    async fn recv(&mut self) -> Option<VelocitySample> {
        self.rx.recv().await
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        self.rx.close();
        debug!("Sensor subscription closed");
    }
}

/// Bounded channel between a sensor source and a session
pub fn sensor_channel(capacity: usize) -> (SensorFeed, SensorSubscription) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SensorFeed { tx }, SensorSubscription { rx })
}

/// Why [`ExerciseSession::consume`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop signal fired or its sender went away
    Stopped,
    /// Every feed handle was dropped
    FeedClosed,
}

/// Recording context for one exercise
#[derive(Debug)]
pub struct ExerciseSession {
    exercise: Exercise,
    samples: Vec<VelocitySample>,
    engine: MetricsEngine,
}

impl ExerciseSession {
    /// Insert an empty exercise row and begin recording
    ///
    /// Admin accounts cannot record exercises.
    pub fn start<S: RehabStore + ?Sized>(
        store: &mut S,
        user_id: &str,
        started_at: DateTime<Utc>,
        engine: MetricsEngine,
    ) -> Result<Self> {
        let user = store.get_user(user_id)?.ok_or_else(|| PersistenceError::NotFound {
            table: "users".to_string(),
            id: user_id.to_string(),
        })?;
        if user.is_admin {
            return Err(RehabError::Validation(format!(
                "user {} is an admin account and cannot record exercises",
                user_id
            )));
        }

        let exercise = Exercise::begin(user_id, started_at);
        store.insert_exercise(&exercise)?;
        info!(user_id, exercise_id = %exercise.id, "Exercise session started");

        Ok(ExerciseSession {
            exercise,
            samples: Vec::new(),
            engine,
        })
    }

    pub fn exercise_id(&self) -> &str {
        &self.exercise.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.exercise.started_at
    }

    /// Readings kept so far
    pub fn samples(&self) -> &[VelocitySample] {
        &self.samples
    }

    /// Keep a reading if the wheel is moving; returns whether it was kept
    pub fn record(&mut self, sample: VelocitySample) -> bool {
        if sample.velocity_kmh.is_finite() && sample.velocity_kmh > 0.0 {
            self.samples.push(sample);
            true
        } else {
            false
        }
    }

    /// Metrics over the readings so far, as if the session ended at `now`
    pub fn live_metrics(&self, now: DateTime<Utc>) -> ExerciseMetrics {
        self.engine
            .motion_statistics(&self.samples, elapsed_seconds(self.exercise.started_at, now))
    }

    /// Record readings until `stop` fires or the feed ends
    ///
    /// The subscription is dropped, and therefore closed, before this returns.
    pub async fn consume(&mut self, mut subscription: SensorSubscription, mut stop: oneshot::Receiver<()>) -> StopReason {
        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut stop => break StopReason::Stopped,
                next = subscription.recv() => match next {
                    Some(sample) => {
                        if !self.record(sample) {
                            debug!(timestamp = sample.timestamp_seconds, "Dropped stationary reading");
                        }
                    }
                    None => break StopReason::FeedClosed,
                },
            }
        };

        drop(subscription);
        debug!(?reason, samples = self.samples.len(), "Stopped consuming sensor feed");
        reason
    }

    /// Compute final metrics and write them, with the samples, to the exercise row
    pub fn finish<S: RehabStore + ?Sized>(self, store: &mut S, ended_at: DateTime<Utc>) -> Result<Exercise> {
        let ExerciseSession {
            mut exercise,
            samples,
            engine,
        } = self;

        let metrics = engine.compute(&samples, exercise.started_at, ended_at);
        metrics.apply_to(&mut exercise);
        exercise.samples = samples;
        store.update_exercise(&exercise)?;

        info!(
            exercise_id = %exercise.id,
            duration_seconds = exercise.duration_seconds,
            samples = exercise.samples.len(),
            avg_velocity_ms = exercise.avg_velocity_ms,
            "Exercise session finished"
        );
        Ok(exercise)
    }

    /// Give up on the session, leaving the zero-metric row in place
    pub fn abort(self) -> Exercise {
        warn!(
            exercise_id = %self.exercise.id,
            discarded_samples = self.samples.len(),
            "Exercise session aborted"
        );
        self.exercise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;
    use crate::store::{ExerciseQuery, MemoryStore};
    use chrono::TimeZone;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 15, 0, 0).unwrap()
    }

    fn store_with_user() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.upsert_user(&UserProfile::new("u1", "Ana")).unwrap();
        store
    }

    #[test]
    fn test_record_drops_stationary_readings() {
        let mut store = store_with_user();
        let mut session = ExerciseSession::start(&mut store, "u1", started(), MetricsEngine::new()).unwrap();

        assert!(session.record(VelocitySample::new(0, 3.6)));
        assert!(!session.record(VelocitySample::new(1, 0.0)));
        assert!(!session.record(VelocitySample::new(2, f64::NAN)));
        assert_eq!(session.samples().len(), 1);
    }

    #[test]
    fn test_start_inserts_empty_row() {
        let mut store = store_with_user();
        let session = ExerciseSession::start(&mut store, "u1", started(), MetricsEngine::new()).unwrap();

        let rows = store.exercises_for_user("u1", &ExerciseQuery::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, session.exercise_id());
        assert_eq!(rows[0].duration_seconds, 0);
    }

    #[test]
    fn test_unknown_user_cannot_start() {
        let mut store = MemoryStore::new();
        let result = ExerciseSession::start(&mut store, "ghost", started(), MetricsEngine::new());
        assert!(matches!(
            result,
            Err(RehabError::Persistence(PersistenceError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_subscription_closed_after_stop() {
        let mut store = store_with_user();
        let mut session = ExerciseSession::start(&mut store, "u1", started(), MetricsEngine::new()).unwrap();
        let (feed, subscription) = sensor_channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();

        feed.send(VelocitySample::new(0, 7.2)).await.unwrap();
        stop_tx.send(()).unwrap();

        let reason = session.consume(subscription, stop_rx).await;
        assert_eq!(reason, StopReason::Stopped);
        assert!(feed.is_closed());
        assert!(feed.send(VelocitySample::new(1, 7.2)).await.is_err());
    }
}
