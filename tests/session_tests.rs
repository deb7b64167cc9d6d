use chrono::{DateTime, Duration, TimeZone, Utc};
use rehabrs::metrics::encode_samples;
use rehabrs::{
    sensor_channel, ExerciseQuery, ExerciseSession, MemoryStore, MetricsEngine, RehabError, RehabStore,
    SqliteStore, StopReason, UserProfile, VelocitySample,
};
use tempfile::TempDir;
use tokio::sync::oneshot;

fn started() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 9, 30, 0).unwrap()
}

fn patient_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.upsert_user(&UserProfile::new("patient", "Patient")).unwrap();
    let mut admin = UserProfile::new("clinician", "Clinician");
    admin.is_admin = true;
    store.upsert_user(&admin).unwrap();
    store
}

/// Ramp up to cruising speed, hold, then coast with a few stationary readings
fn ride(seconds: u32) -> Vec<VelocitySample> {
    (0..seconds)
        .map(|t| {
            let kmh = match t {
                0..=9 => f64::from(t) * 1.2,
                _ if t + 5 >= seconds => 0.0,
                _ => 12.0 + f64::from(t % 3) * 0.4,
            };
            VelocitySample::new(t, kmh)
        })
        .collect()
}

#[tokio::test]
async fn test_session_records_until_feed_closes() {
    let mut store = patient_store();
    let mut session = ExerciseSession::start(&mut store, "patient", started(), MetricsEngine::new()).unwrap();

    let (feed, subscription) = sensor_channel(8);
    let (_stop_tx, stop_rx) = oneshot::channel();

    let producer = tokio::spawn(async move {
        for sample in ride(120) {
            feed.send(sample).await.unwrap();
        }
    });

    let reason = session.consume(subscription, stop_rx).await;
    producer.await.unwrap();

    assert_eq!(reason, StopReason::FeedClosed);
    // t = 0 and the five trailing stationary readings are dropped
    assert_eq!(session.samples().len(), 114);

    let ended = started() + Duration::milliseconds(120_900);
    let live = session.live_metrics(ended);
    let exercise = session.finish(&mut store, ended).unwrap();

    assert_eq!(exercise.duration_seconds, 120);
    assert_eq!(exercise.avg_velocity_ms, live.avg_velocity_ms);
    assert!(exercise.avg_velocity_ms > 3.0 && exercise.avg_velocity_ms < 3.6);
    assert!(exercise.min_velocity_ms > 0.0);

    let stored = store
        .exercises_for_user("patient", &ExerciseQuery::all())
        .unwrap()
        .remove(0);
    assert_eq!(stored, exercise);
    assert_eq!(MetricsEngine::new().recompute(&stored), live);
}

#[tokio::test]
async fn test_stop_signal_closes_subscription() {
    let mut store = patient_store();
    let mut session = ExerciseSession::start(&mut store, "patient", started(), MetricsEngine::new()).unwrap();

    let (feed, subscription) = sensor_channel(4);
    let (stop_tx, stop_rx) = oneshot::channel();

    feed.send(VelocitySample::new(1, 6.0)).await.unwrap();
    stop_tx.send(()).unwrap();

    let reason = session.consume(subscription, stop_rx).await;
    assert_eq!(reason, StopReason::Stopped);
    assert!(feed.is_closed());
    assert!(feed.send(VelocitySample::new(2, 6.0)).await.is_err());
}

#[tokio::test]
async fn test_cancelled_consume_still_closes_subscription() {
    let mut store = patient_store();
    let mut session = ExerciseSession::start(&mut store, "patient", started(), MetricsEngine::new()).unwrap();

    let (feed, subscription) = sensor_channel(4);
    let (_stop_tx, stop_rx) = oneshot::channel();

    let timed_out = tokio::time::timeout(
        std::time::Duration::from_millis(20),
        session.consume(subscription, stop_rx),
    )
    .await;

    assert!(timed_out.is_err());
    assert!(feed.is_closed());
}

#[test]
fn test_admin_and_unknown_users_cannot_start() {
    let mut store = patient_store();

    let admin = ExerciseSession::start(&mut store, "clinician", started(), MetricsEngine::new());
    assert!(matches!(admin, Err(RehabError::Validation(_))));

    let unknown = ExerciseSession::start(&mut store, "nobody", started(), MetricsEngine::new());
    assert!(matches!(unknown, Err(RehabError::Persistence(_))));

    assert!(store
        .exercises_for_user("clinician", &ExerciseQuery::all())
        .unwrap()
        .is_empty());
}

#[test]
fn test_aborted_session_leaves_zero_row() {
    let mut store = patient_store();
    let mut session = ExerciseSession::start(&mut store, "patient", started(), MetricsEngine::new()).unwrap();
    session.record(VelocitySample::new(1, 8.0));

    let exercise = session.abort();
    let stored = store.first_exercise("patient").unwrap().unwrap();

    assert_eq!(stored.id, exercise.id);
    assert_eq!(stored.duration_seconds, 0);
    assert!(stored.samples.is_empty());
}

#[test]
fn test_finished_session_on_sqlite_recomputes_identically() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rehab.db");
    let mut store = SqliteStore::open(&path, std::time::Duration::from_secs(1)).unwrap();
    store.upsert_user(&UserProfile::new("patient", "Patient")).unwrap();

    let mut session = ExerciseSession::start(&mut store, "patient", started(), MetricsEngine::new()).unwrap();
    for sample in ride(300) {
        session.record(sample);
    }
    let ended = started() + Duration::seconds(300);
    let finished = session.finish(&mut store, ended).unwrap();

    drop(store);
    let store = SqliteStore::open(&path, std::time::Duration::from_secs(1)).unwrap();
    let stored = store.first_exercise("patient").unwrap().unwrap();

    assert_eq!(stored.samples, finished.samples);
    let engine = MetricsEngine::new();
    let recomputed = engine.recompute(&stored);
    assert_eq!(recomputed.avg_velocity_ms, finished.avg_velocity_ms);
    assert_eq!(recomputed.total_distance_meters, finished.total_distance_meters);
    assert_eq!(
        engine.recompute_from_payload(&encode_samples(&stored.samples), stored.duration_seconds),
        recomputed
    );
}
