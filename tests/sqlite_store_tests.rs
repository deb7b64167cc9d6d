use chrono::{DateTime, Duration, TimeZone, Utc};
use rehabrs::{
    AdminConsole, Exercise, ExerciseQuery, PersistenceError, RecommendationEngine, RecommendationSource,
    RehabError, RehabStore, SqliteStore, UserProfile, WorkoutPlan,
};
use std::path::Path;
use tempfile::TempDir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
}

fn open(path: &Path) -> SqliteStore {
    SqliteStore::open(path, std::time::Duration::from_millis(50)).unwrap()
}

fn seed(store: &mut SqliteStore, peers: usize) {
    let mut target = UserProfile::new("target", "Target");
    target.demographic.age = Some(35);
    target.clinical.sci_level = Some("T10".to_string());
    store.upsert_user(&target).unwrap();

    let mut first = Exercise::begin("target", now() - Duration::days(20));
    first.duration_seconds = 800;
    first.avg_velocity_ms = 2.0;
    first.total_distance_meters = 1600.0;
    store.insert_exercise(&first).unwrap();

    for i in 0..peers {
        let id = format!("peer-{:02}", i);
        let mut peer = UserProfile::new(&id, format!("Peer {}", i));
        peer.demographic.age = Some(35);
        peer.clinical.sci_level = Some("T10".to_string());
        store.upsert_user(&peer).unwrap();

        for day in 1..=4 {
            let mut e = Exercise::begin(&id, now() - Duration::days(day * 7));
            e.duration_seconds = 500;
            e.avg_velocity_ms = 3.0;
            e.total_distance_meters = 1500.0;
            store.insert_exercise(&e).unwrap();
        }
    }
}

#[test]
fn test_recommendation_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rehab.db");

    let generated = {
        let mut store = open(&path);
        seed(&mut store, 6);
        RecommendationEngine::new()
            .get_recommendation(&mut store, "target", now())
            .unwrap()
            .unwrap()
    };
    assert_eq!(generated.source, RecommendationSource::Knn);
    assert_eq!(generated.recommendation.target_velocity_ms, 2.4);
    assert_eq!(generated.recommendation.work_seconds, 150);

    let mut store = open(&path);
    let again = RecommendationEngine::new()
        .get_recommendation(&mut store, "target", now() + Duration::days(7))
        .unwrap()
        .unwrap();

    assert_eq!(again.source, RecommendationSource::Existing);
    assert_eq!(again.recommendation.id, generated.recommendation.id);
    assert_eq!(again.recommendation.updated_at, generated.recommendation.updated_at);
}

#[test]
fn test_repeated_admin_generation_keeps_one_active() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir.path().join("rehab.db"));
    seed(&mut store, 3);
    let console = AdminConsole::default();

    // 12 peer samples: the quick path averages them
    let first = console.admin_generate(&mut store, "target", now()).unwrap();
    let second = console
        .admin_generate(&mut store, "target", now() + Duration::hours(1))
        .unwrap();

    assert_eq!(first.source, RecommendationSource::AdminPeerAverage);
    assert_eq!(second.recommendation.target_velocity_ms, 2.4);

    let active = store.active_recommendation("target").unwrap().unwrap();
    assert_eq!(active.id, second.recommendation.id);
    assert!(!store.get_recommendation(&first.recommendation.id).unwrap().unwrap().active);
}

#[test]
fn test_manual_adjustment_is_persisted() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir.path().join("rehab.db"));
    seed(&mut store, 0);
    let console = AdminConsole::default();

    let plan = WorkoutPlan {
        target_velocity_ms: 1.5,
        work_seconds: 45,
        rest_seconds: 90,
        repetitions: 4,
        notes: Some("Short intervals after shoulder pain".to_string()),
    };
    let created = console.create_manual(&mut store, "target", plan.clone(), now()).unwrap();
    console
        .adjust(
            &mut store,
            &created.id,
            WorkoutPlan {
                repetitions: 5,
                ..plan
            },
            now() + Duration::days(1),
        )
        .unwrap();

    let outcome = RecommendationEngine::new()
        .get_recommendation(&mut store, "target", now() + Duration::days(2))
        .unwrap()
        .unwrap();
    assert_eq!(outcome.source, RecommendationSource::Manual);
    assert_eq!(outcome.recommendation.repetitions, 5);
    assert_eq!(outcome.session_duration_seconds, 675);
    assert_eq!(
        outcome.recommendation.notes.as_deref(),
        Some("Short intervals after shoulder pain")
    );
}

#[test]
fn test_locked_database_reports_busy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rehab.db");
    let mut store = open(&path);
    seed(&mut store, 0);

    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let plan = WorkoutPlan {
        target_velocity_ms: 2.0,
        work_seconds: 60,
        rest_seconds: 60,
        repetitions: 6,
        notes: None,
    };
    let err = AdminConsole::default()
        .create_manual(&mut store, "target", plan.clone(), now())
        .unwrap_err();
    assert!(matches!(err, RehabError::Persistence(PersistenceError::Busy { .. })));
    assert!(err.is_retryable());

    blocker.execute_batch("COMMIT;").unwrap();
    AdminConsole::default()
        .create_manual(&mut store, "target", plan, now())
        .unwrap();
    assert!(store.active_recommendation("target").unwrap().is_some());
}

#[test]
fn test_delete_exercises_for_user() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir.path().join("rehab.db"));
    seed(&mut store, 2);

    assert_eq!(store.delete_exercises_for_user("peer-00").unwrap(), 4);
    assert!(store
        .exercises_for_user("peer-00", &ExerciseQuery::all())
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .exercises_for_user("peer-01", &ExerciseQuery::all())
            .unwrap()
            .len(),
        4
    );
}
