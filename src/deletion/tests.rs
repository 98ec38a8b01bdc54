//! Engine tests against a seeded in-memory SQLite catalogue.
//!
//! Every location in the fixture is backed by a recording store so the tests
//! can assert exactly which keys reached a backend.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::{
    db::{sqlite::SqliteCatalogueRepo, tests::harness::create_seeded_sqlite_pool},
    models::ObjectKey,
    services::{ObjectStore, ObjectStoreError, ObjectStoreResult, StorageBackends},
};

/// Records every `bulk_delete` call. A call touching a marked key is still
/// recorded but reports a partial failure for that key.
#[derive(Default)]
struct RecordingObjectStore {
    calls: Mutex<Vec<Vec<ObjectKey>>>,
    fail_keys_containing: Option<String>,
}

impl RecordingObjectStore {
    fn failing_on(fragment: &str) -> Self {
        Self {
            fail_keys_containing: Some(fragment.to_string()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Vec<ObjectKey>> {
        self.calls.lock().unwrap().clone()
    }

    fn requested_keys(&self) -> Vec<String> {
        self.calls().into_iter().flatten().map(|k| k.key).collect()
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn bulk_delete(&self, keys: &[ObjectKey]) -> ObjectStoreResult<()> {
        self.calls.lock().unwrap().push(keys.to_vec());

        if let Some(fragment) = &self.fail_keys_containing
            && let Some(failed) = keys.iter().find(|k| k.key.contains(fragment.as_str()))
        {
            return Err(ObjectStoreError::PartialFailure {
                bucket: failed.bucket.clone(),
                failed: 1,
                first_key: failed.key.clone(),
                reason: "simulated outage".to_string(),
            });
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        batch_size: 1000,
        dry_run: false,
        protected_file_types: vec![14],
        force: false,
    }
}

fn backends(store: &Arc<RecordingObjectStore>, locations: &[i32]) -> StorageBackends {
    let mut backends = StorageBackends::new();
    for &code in locations {
        backends.insert(
            code,
            format!("location-{code}"),
            store.clone() as Arc<dyn ObjectStore>,
            Duration::ZERO,
        );
    }
    backends
}

fn engine_with(
    pool: &SqlitePool,
    store: &Arc<RecordingObjectStore>,
    settings: EngineSettings,
) -> DeletionEngine {
    DeletionEngine::new(
        Arc::new(SqliteCatalogueRepo::new(pool.clone())),
        backends(store, &[2, 3, 4]),
        settings,
    )
}

async fn setup() -> (SqlitePool, Arc<RecordingObjectStore>) {
    (
        create_seeded_sqlite_pool().await,
        Arc::new(RecordingObjectStore::default()),
    )
}

async fn deleted_files(pool: &SqlitePool, observation_id: i64) -> Vec<String> {
    sqlx::query_scalar(
        "SELECT filename FROM data_files \
         WHERE observation_id = ? AND deleted_at IS NOT NULL ORDER BY filename",
    )
    .bind(observation_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn total_deleted_files(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM data_files WHERE deleted_at IS NOT NULL")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn observation_deleted(pool: &SqlitePool, id: i64) -> bool {
    sqlx::query_scalar::<_, Option<String>>("SELECT deleted_at FROM observations WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
        .is_some()
}

async fn request_actioned(pool: &SqlitePool, id: i64) -> bool {
    sqlx::query_scalar::<_, Option<String>>(
        "SELECT actioned_at FROM deletion_requests WHERE id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .unwrap()
    .is_some()
}

fn outcome(summary: &RunSummary, request_id: i64) -> &RequestOutcome {
    &summary
        .requests
        .iter()
        .find(|r| r.request_id == request_id)
        .unwrap_or_else(|| panic!("request {request_id} missing from summary"))
        .outcome
}

#[tokio::test]
async fn run_processes_every_pending_request() {
    let (pool, store) = setup().await;
    let summary = engine_with(&pool, &store, settings()).run(None).await.unwrap();

    let order: Vec<i64> = summary.requests.iter().map(|r| r.request_id).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    assert_eq!(summary.count("actioned"), 3);
    assert_eq!(summary.count("incomplete"), 1);
    assert!(!summary.has_failures());
    assert_eq!(summary.files_deleted(), 35);
    assert_eq!(summary.bytes_deleted(), 35 * 1_048_576);

    for id in [1, 2, 3] {
        assert!(request_actioned(&pool, id).await, "request {id}");
    }
    assert!(!request_actioned(&pool, 4).await);

    // Request 7 was never approved
    assert!(!request_actioned(&pool, 7).await);
    assert!(deleted_files(&pool, 9000000071).await.is_empty());

    // One batch per observation and location
    assert_eq!(store.calls().len(), 11);
}

#[tokio::test]
async fn whole_observation_request_keeps_protected_and_local_files() {
    let (pool, store) = setup().await;
    engine_with(&pool, &store, settings())
        .run(Some(&[1]))
        .await
        .unwrap();

    for obs in [9000000011, 9000000012, 9000000013] {
        assert!(observation_deleted(&pool, obs).await, "observation {obs}");
    }
    assert_eq!(deleted_files(&pool, 9000000011).await.len(), 6);
    assert_eq!(deleted_files(&pool, 9000000012).await.len(), 6);

    let keys = store.requested_keys();
    assert!(!keys.contains(&"9000000011_metafits_ppds.fits".to_string()));
    assert!(!keys.contains(&"9000000012_local.fits".to_string()));
}

#[tokio::test]
async fn second_run_touches_nothing() {
    let (pool, store) = setup().await;
    engine_with(&pool, &store, settings()).run(None).await.unwrap();
    let deleted_after_first = total_deleted_files(&pool).await;

    let store = Arc::new(RecordingObjectStore::default());
    let summary = engine_with(&pool, &store, settings()).run(None).await.unwrap();

    assert!(store.calls().is_empty());
    assert_eq!(total_deleted_files(&pool).await, deleted_after_first);
    assert_eq!(summary.requests.len(), 1);
    assert_eq!(
        outcome(&summary, 4),
        &RequestOutcome::Incomplete {
            retained: vec![9000000041, 9000000042]
        }
    );
}

#[tokio::test]
async fn filtered_request_deletes_only_matching_file_type() {
    let (pool, store) = setup().await;
    let summary = engine_with(&pool, &store, settings())
        .run(Some(&[4]))
        .await
        .unwrap();

    assert_eq!(
        deleted_files(&pool, 9000000041).await,
        vec!["9000000041_3.sub", "9000000041_4.sub"]
    );
    assert!(deleted_files(&pool, 9000000042).await.is_empty());
    assert!(!observation_deleted(&pool, 9000000041).await);
    assert!(!observation_deleted(&pool, 9000000042).await);
    assert!(!request_actioned(&pool, 4).await);
    assert_eq!(summary.requests[0].files_deleted, 2);
}

#[tokio::test]
async fn object_keys_join_folder_and_filename() {
    let (pool, store) = setup().await;
    engine_with(&pool, &store, settings())
        .run(Some(&[3]))
        .await
        .unwrap();

    let keys: Vec<ObjectKey> = store.calls().into_iter().flatten().collect();
    assert!(keys.contains(&ObjectKey {
        bucket: "mwaingest-90000".to_string(),
        key: "mwa/ngas_data_volume/2024/9000000031_01.fits".to_string(),
    }));
    assert!(keys.contains(&ObjectKey {
        bucket: "mwa-90000".to_string(),
        key: "9000000033_03.fits".to_string(),
    }));
}

#[tokio::test]
async fn batches_never_mix_locations() {
    let (pool, store) = setup().await;
    engine_with(&pool, &store, settings())
        .run(Some(&[3]))
        .await
        .unwrap();

    let calls = store.calls();
    assert_eq!(calls.len(), 4);
    for call in calls {
        let buckets: Vec<&str> = call.iter().map(|k| k.bucket.as_str()).collect();
        let first = buckets[0];
        let same_location = |b: &str| (b == "mwa-90000") == (first == "mwa-90000");
        assert!(buckets.iter().all(|b| same_location(b)));
    }
}

#[tokio::test]
async fn batch_size_splits_observation_files() {
    let (pool, store) = setup().await;
    let summary = engine_with(
        &pool,
        &store,
        EngineSettings {
            batch_size: 2,
            ..settings()
        },
    )
    .run(Some(&[1]))
    .await
    .unwrap();

    let calls = store.calls();
    assert_eq!(calls.len(), 9);
    assert!(calls.iter().all(|c| c.len() == 2));
    assert_eq!(outcome(&summary, 1), &RequestOutcome::Actioned);
}

#[tokio::test]
async fn backend_failure_rolls_back_the_batch_and_continues() {
    let (pool, _) = setup().await;
    let failing = Arc::new(RecordingObjectStore::failing_on("9000000012_"));
    let summary = engine_with(&pool, &failing, settings())
        .run(Some(&[1, 2]))
        .await
        .unwrap();

    match outcome(&summary, 1) {
        RequestOutcome::Failed(report) => {
            assert_eq!(report.observation_id, Some(9000000012));
            assert_eq!(report.location, Some(2));
            assert_eq!(report.batch_index, Some(0));
            assert!(report.error.contains("simulated outage"), "{}", report.error);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(summary.has_failures());

    // The batch before the failure stays committed
    assert!(observation_deleted(&pool, 9000000011).await);
    assert!(deleted_files(&pool, 9000000012).await.is_empty());
    assert!(!observation_deleted(&pool, 9000000012).await);
    assert!(deleted_files(&pool, 9000000013).await.is_empty());
    assert!(!request_actioned(&pool, 1).await);

    assert_eq!(outcome(&summary, 2), &RequestOutcome::Actioned);
}

#[tokio::test]
async fn rerun_after_failure_resumes_where_it_stopped() {
    let (pool, _) = setup().await;
    let failing = Arc::new(RecordingObjectStore::failing_on("9000000012_"));
    engine_with(&pool, &failing, settings())
        .run(Some(&[1]))
        .await
        .unwrap();

    let healthy = Arc::new(RecordingObjectStore::default());
    let summary = engine_with(&pool, &healthy, settings())
        .run(Some(&[1]))
        .await
        .unwrap();

    assert_eq!(outcome(&summary, 1), &RequestOutcome::Actioned);
    assert_eq!(summary.requests[0].observations_deleted, vec![9000000012, 9000000013]);
    let keys = healthy.requested_keys();
    assert_eq!(keys.len(), 12);
    assert!(keys.iter().all(|k| !k.starts_with("9000000011")));
    assert!(request_actioned(&pool, 1).await);
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    let (pool, store) = setup().await;
    let summary = engine_with(
        &pool,
        &store,
        EngineSettings {
            dry_run: true,
            ..settings()
        },
    )
    .run(None)
    .await
    .unwrap();

    assert!(summary.dry_run);
    assert!(store.calls().is_empty());
    assert_eq!(total_deleted_files(&pool).await, 1);
    for id in [1, 2, 3, 4] {
        assert!(!request_actioned(&pool, id).await, "request {id}");
    }
    assert!(!observation_deleted(&pool, 9000000011).await);

    // The report still describes what a real run would do
    assert_eq!(outcome(&summary, 1), &RequestOutcome::Actioned);
    assert_eq!(summary.files_deleted(), 35);
}

/// Cancels request 1 while its first batch is being checked.
struct CancelRequestDuringRun {
    pool: SqlitePool,
    done: AtomicBool,
}

#[async_trait]
impl PreDeleteCheck for CancelRequestDuringRun {
    async fn check(&self, _batch: &Batch) -> Result<(), String> {
        if !self.done.swap(true, Ordering::SeqCst) {
            sqlx::query(
                "UPDATE deletion_requests SET cancelled_at = '2024-02-01T00:00:00Z' WHERE id = 1",
            )
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn cancellation_during_run_stops_the_request() {
    let (pool, store) = setup().await;
    let guard = Arc::new(CancelRequestDuringRun {
        pool: pool.clone(),
        done: AtomicBool::new(false),
    });
    let summary = engine_with(&pool, &store, settings())
        .with_guard(guard)
        .run(Some(&[1, 2]))
        .await
        .unwrap();

    assert_eq!(outcome(&summary, 1), &RequestOutcome::Cancelled);
    assert!(observation_deleted(&pool, 9000000011).await);
    assert!(!observation_deleted(&pool, 9000000012).await);
    assert!(deleted_files(&pool, 9000000012).await.is_empty());
    assert!(!request_actioned(&pool, 1).await);

    assert_eq!(outcome(&summary, 2), &RequestOutcome::Actioned);
}

#[tokio::test]
async fn ids_filter_skips_unknown_and_ineligible_requests() {
    let (pool, store) = setup().await;
    let summary = engine_with(&pool, &store, settings())
        .run(Some(&[2, 5, 6, 99]))
        .await
        .unwrap();

    assert_eq!(summary.requests.len(), 1);
    assert_eq!(outcome(&summary, 2), &RequestOutcome::Actioned);
    assert!(!request_actioned(&pool, 1).await);
}

#[tokio::test]
async fn rejected_batch_is_not_deleted() {
    let (pool, store) = setup().await;
    let summary = engine_with(&pool, &store, settings())
        .with_guard(Arc::new(DenyFiles::new(["9000000021_02.fits"])))
        .run(Some(&[2]))
        .await
        .unwrap();

    match outcome(&summary, 2) {
        RequestOutcome::Failed(report) => {
            assert_eq!(report.observation_id, Some(9000000021));
            assert!(report.error.contains("flagged incomplete"), "{}", report.error);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(store.calls().is_empty());
    assert!(deleted_files(&pool, 9000000021).await.is_empty());
}

#[tokio::test]
async fn unknown_location_fails_the_request() {
    let (pool, store) = setup().await;
    let engine = DeletionEngine::new(
        Arc::new(SqliteCatalogueRepo::new(pool.clone())),
        backends(&store, &[2]),
        settings(),
    );
    let summary = engine.run(Some(&[3])).await.unwrap();

    match outcome(&summary, 3) {
        RequestOutcome::Failed(report) => {
            assert_eq!(report.location, Some(3));
            assert!(report.error.contains("location 3"), "{}", report.error);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn cancelled_shutdown_starts_no_requests() {
    let (pool, store) = setup().await;
    let token = CancellationToken::new();
    token.cancel();

    let summary = engine_with(&pool, &store, settings())
        .with_shutdown(token)
        .run(None)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert!(summary.requests.is_empty());
    assert!(store.calls().is_empty());
}

/// Requests shutdown while the first batch is being checked.
struct ShutdownDuringRun(CancellationToken);

#[async_trait]
impl PreDeleteCheck for ShutdownDuringRun {
    async fn check(&self, _batch: &Batch) -> Result<(), String> {
        self.0.cancel();
        Ok(())
    }
}

#[tokio::test]
async fn shutdown_finishes_the_current_batch_then_stops() {
    let (pool, store) = setup().await;
    let token = CancellationToken::new();

    let summary = engine_with(&pool, &store, settings())
        .with_guard(Arc::new(ShutdownDuringRun(token.clone())))
        .with_shutdown(token)
        .run(None)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.requests.len(), 1);
    assert!(matches!(outcome(&summary, 1), RequestOutcome::Failed(_)));
    assert_eq!(store.calls().len(), 1);
    assert!(observation_deleted(&pool, 9000000011).await);
    assert!(!observation_deleted(&pool, 9000000012).await);
}

#[tokio::test]
async fn single_file_deletion() {
    let (pool, store) = setup().await;
    let engine = engine_with(&pool, &store, settings());

    assert_eq!(
        engine
            .delete_single_file(9000000021, "9000000021_01.fits")
            .await
            .unwrap(),
        SingleFileOutcome::Deleted
    );
    assert_eq!(
        store.calls(),
        vec![vec![ObjectKey {
            bucket: "mwa01fs".to_string(),
            key: "9000000021_01.fits".to_string(),
        }]]
    );
    assert_eq!(
        deleted_files(&pool, 9000000021).await,
        vec!["9000000021_01.fits"]
    );
    assert!(!observation_deleted(&pool, 9000000021).await);

    assert_eq!(
        engine
            .delete_single_file(9000000021, "9000000021_01.fits")
            .await
            .unwrap(),
        SingleFileOutcome::AlreadyDeleted
    );
    assert_eq!(
        engine.delete_single_file(9000000021, "missing.fits").await.unwrap(),
        SingleFileOutcome::NotFound
    );
    assert_eq!(
        engine
            .delete_single_file(9000000012, "9000000012_local.fits")
            .await
            .unwrap(),
        SingleFileOutcome::NotRemoteArchived
    );
    assert_eq!(store.calls().len(), 1);
}

#[tokio::test]
async fn single_file_backend_failure_leaves_file_pending() {
    let (pool, _) = setup().await;
    let failing = Arc::new(RecordingObjectStore::failing_on("9000000021_01"));
    let err = engine_with(&pool, &failing, settings())
        .delete_single_file(9000000021, "9000000021_01.fits")
        .await
        .unwrap_err();

    assert!(matches!(err, DeletionError::Backend { location: 2, .. }));
    assert!(deleted_files(&pool, 9000000021).await.is_empty());
}

#[tokio::test]
async fn single_observation_deletion() {
    let (pool, store) = setup().await;
    let engine = engine_with(&pool, &store, settings());

    assert_eq!(
        engine.delete_single_observation(9000000011).await.unwrap(),
        SingleObservationOutcome::Deleted { files: 6 }
    );
    assert!(observation_deleted(&pool, 9000000011).await);
    assert!(
        !deleted_files(&pool, 9000000011)
            .await
            .contains(&"9000000011_metafits_ppds.fits".to_string())
    );
    assert_eq!(
        engine.delete_single_observation(9000000011).await.unwrap(),
        SingleObservationOutcome::AlreadyDeleted
    );
    assert_eq!(
        engine.delete_single_observation(1).await.unwrap(),
        SingleObservationOutcome::NotFound
    );

    // The request run skips the observation that is already gone
    let summary = engine.run(Some(&[1])).await.unwrap();
    assert_eq!(outcome(&summary, 1), &RequestOutcome::Actioned);
    assert_eq!(store.calls().len(), 3);
}

#[tokio::test]
async fn single_item_dry_run_changes_nothing() {
    let (pool, store) = setup().await;
    let engine = engine_with(
        &pool,
        &store,
        EngineSettings {
            dry_run: true,
            ..settings()
        },
    );

    assert_eq!(
        engine
            .delete_single_file(9000000021, "9000000021_01.fits")
            .await
            .unwrap(),
        SingleFileOutcome::Deleted
    );
    assert!(deleted_files(&pool, 9000000021).await.is_empty());

    assert_eq!(
        engine.delete_single_observation(9000000011).await.unwrap(),
        SingleObservationOutcome::Deleted { files: 6 }
    );
    assert!(deleted_files(&pool, 9000000011).await.is_empty());
    assert!(!observation_deleted(&pool, 9000000011).await);

    assert!(store.calls().is_empty());
    assert_eq!(total_deleted_files(&pool).await, 1);
}

/// Makes the catalogue refuse to mark anything of one observation deleted.
async fn refuse_file_marks(pool: &SqlitePool, observation_id: i64) {
    sqlx::raw_sql(&format!(
        "CREATE TRIGGER refuse_file_marks BEFORE UPDATE OF deleted_at ON data_files \
         WHEN OLD.observation_id = {observation_id} \
         BEGIN SELECT RAISE(ABORT, 'catalogue write refused'); END;"
    ))
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn catalogue_failure_fails_only_the_current_request() {
    let (pool, store) = setup().await;
    refuse_file_marks(&pool, 9000000012).await;

    let summary = engine_with(&pool, &store, settings())
        .run(Some(&[1, 2]))
        .await
        .unwrap();

    match outcome(&summary, 1) {
        RequestOutcome::Failed(report) => {
            assert_eq!(report.observation_id, Some(9000000012));
            assert_eq!(report.location, Some(2));
            assert_eq!(report.batch_index, Some(0));
            assert!(
                report.error.contains("catalogue write refused"),
                "{}",
                report.error
            );
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // Files are marked before the backend is called, so nothing of 12 was sent
    assert!(
        store
            .requested_keys()
            .iter()
            .all(|k| !k.starts_with("9000000012"))
    );
    assert!(observation_deleted(&pool, 9000000011).await);
    assert!(deleted_files(&pool, 9000000012).await.is_empty());
    assert!(!observation_deleted(&pool, 9000000012).await);
    assert!(deleted_files(&pool, 9000000013).await.is_empty());
    assert!(!request_actioned(&pool, 1).await);

    assert_eq!(outcome(&summary, 2), &RequestOutcome::Actioned);
    assert!(request_actioned(&pool, 2).await);
}

#[tokio::test]
async fn observation_mark_failure_keeps_committed_batches() {
    let (pool, store) = setup().await;
    sqlx::raw_sql(
        "CREATE TRIGGER refuse_observation_mark BEFORE UPDATE OF deleted_at ON observations \
         WHEN OLD.id = 9000000022 \
         BEGIN SELECT RAISE(ABORT, 'catalogue write refused'); END;",
    )
    .execute(&pool)
    .await
    .unwrap();

    let summary = engine_with(&pool, &store, settings())
        .run(Some(&[2, 3]))
        .await
        .unwrap();

    match outcome(&summary, 2) {
        RequestOutcome::Failed(report) => {
            assert_eq!(report.observation_id, Some(9000000022));
            assert_eq!(report.batch_index, None);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(deleted_files(&pool, 9000000022).await.len(), 3);
    assert!(!observation_deleted(&pool, 9000000022).await);
    assert!(!request_actioned(&pool, 2).await);

    assert_eq!(outcome(&summary, 3), &RequestOutcome::Actioned);
}

/// Flags a fixed set of observation ids.
struct ProtectedObservations(Vec<i64>);

#[async_trait]
impl ObservationValidator for ProtectedObservations {
    async fn invalid_observations(&self, observation_ids: &[i64]) -> Result<Vec<i64>, String> {
        Ok(observation_ids
            .iter()
            .copied()
            .filter(|id| self.0.contains(id))
            .collect())
    }
}

struct ValidatorDown;

#[async_trait]
impl ObservationValidator for ValidatorDown {
    async fn invalid_observations(&self, _observation_ids: &[i64]) -> Result<Vec<i64>, String> {
        Err("connection refused".to_string())
    }
}

#[tokio::test]
async fn protected_observation_fails_the_request() {
    let (pool, store) = setup().await;
    let summary = engine_with(&pool, &store, settings())
        .with_validator(Arc::new(ProtectedObservations(vec![9000000022])))
        .run(Some(&[1, 2]))
        .await
        .unwrap();

    match outcome(&summary, 2) {
        RequestOutcome::Failed(report) => {
            assert_eq!(report.observation_id, None);
            assert!(report.error.contains("9000000022"), "{}", report.error);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    // Nothing of the request is touched, not even its unprotected observations
    assert!(
        store
            .requested_keys()
            .iter()
            .all(|k| !k.starts_with("900000002"))
    );
    assert!(deleted_files(&pool, 9000000021).await.is_empty());
    assert!(!request_actioned(&pool, 2).await);

    assert_eq!(outcome(&summary, 1), &RequestOutcome::Actioned);
}

#[tokio::test]
async fn force_deletes_protected_observations() {
    let (pool, store) = setup().await;
    let summary = engine_with(
        &pool,
        &store,
        EngineSettings {
            force: true,
            ..settings()
        },
    )
    .with_validator(Arc::new(ProtectedObservations(vec![9000000022])))
    .run(Some(&[2]))
    .await
    .unwrap();

    assert_eq!(outcome(&summary, 2), &RequestOutcome::Actioned);
    assert!(observation_deleted(&pool, 9000000022).await);
    assert_eq!(deleted_files(&pool, 9000000022).await.len(), 3);
}

#[tokio::test]
async fn unavailable_validator_fails_every_request() {
    let (pool, store) = setup().await;
    let summary = engine_with(&pool, &store, settings())
        .with_validator(Arc::new(ValidatorDown))
        .run(Some(&[1, 2]))
        .await
        .unwrap();

    assert_eq!(summary.count("failed"), 2);
    match outcome(&summary, 1) {
        RequestOutcome::Failed(report) => {
            assert!(report.error.contains("connection refused"), "{}", report.error);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(store.calls().is_empty());
    assert_eq!(total_deleted_files(&pool).await, 1);
}
