//! Integration tests for the database-backed Single-Flight Mutex.

use std::time::Duration;

use provost_core::ProvostError;
use provost_db::{AdvisoryLock, UPDATE_LOCK_ID};
use surrealdb::engine::local::Mem;
use surrealdb::Surreal;

async fn setup() -> Surreal<surrealdb::engine::local::Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    provost_db::run_migrations(&db).await.unwrap();
    db
}

#[tokio::test]
async fn lock_is_exclusive_until_released() {
    let db = setup().await;
    let locks = AdvisoryLock::new(db);

    let guard = locks
        .lock(UPDATE_LOCK_ID, Duration::from_millis(200))
        .await
        .unwrap();

    // A second caller times out with Busy while the lock is held.
    let contender = locks.lock(UPDATE_LOCK_ID, Duration::from_millis(200)).await;
    match contender {
        Err(e) => {
            let err: ProvostError = e.into();
            assert!(matches!(err, ProvostError::Busy(_)));
        }
        Ok(_) => panic!("second lock acquisition must not succeed"),
    }

    guard.release().await.unwrap();

    // After release the lock is free again.
    let guard = locks
        .lock(UPDATE_LOCK_ID, Duration::from_millis(200))
        .await
        .unwrap();
    guard.release().await.unwrap();
}

#[tokio::test]
async fn independent_lock_ids_do_not_contend() {
    let db = setup().await;
    let locks = AdvisoryLock::new(db);

    let first = locks.lock("one", Duration::from_millis(200)).await.unwrap();
    let second = locks.lock("two", Duration::from_millis(200)).await.unwrap();
    first.release().await.unwrap();
    second.release().await.unwrap();
}

#[tokio::test]
async fn stale_holder_is_evicted() {
    let db = setup().await;
    // Zero staleness window: any existing holder counts as dead.
    let locks = AdvisoryLock::new(db).with_stale_after(chrono::Duration::zero());

    let _abandoned = locks
        .lock(UPDATE_LOCK_ID, Duration::from_millis(200))
        .await
        .unwrap();

    // The takeover path kicks in instead of Busy.
    let guard = locks
        .lock(UPDATE_LOCK_ID, Duration::from_millis(500))
        .await
        .unwrap();
    guard.release().await.unwrap();
}
