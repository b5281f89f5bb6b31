mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{upsert_binlog, TestEnv, DATABASE, DEST_HOST, SRC_HOST};
use syncer::cluster::ClusterFactory;
use syncer::job::Job;
use syncer::manager::JobManager;
use syncer::storage::Store;

#[tokio::test]
async fn manager_runs_the_admin_lifecycle() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;

    let manager = JobManager::new(
        Arc::new(env.store.clone()),
        env.factory.clone() as Arc<dyn ClusterFactory>,
        env.config.clone(),
    );

    manager
        .create_job(
            "m1",
            env.spec(SRC_HOST, "orders"),
            env.spec(DEST_HOST, "orders"),
            false,
        )
        .await
        .expect("job created");

    // The worker bootstraps on its own ticks.
    let mut bootstrapped = false;
    for _ in 0..300 {
        let status = manager.job_status("m1").await.expect("status");
        if status.progress_state == "table_incremental_sync" {
            bootstrapped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bootstrapped, "worker finished the bootstrap by itself");

    assert_eq!(manager.get_lag("m1").await.expect("lag"), 0);

    // Paused jobs tick but do no work.
    manager.pause_job("m1").await.expect("pause");
    assert_eq!(manager.job_status("m1").await.expect("status").state, "paused");

    env.src.push_binlog(DATABASE, upsert_binlog(600, &[100])).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(env.dest.applied_writes().await.is_empty());

    manager.resume_job("m1").await.expect("resume");
    let mut applied = false;
    for _ in 0..300 {
        if !env.dest.applied_writes().await.is_empty() {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(applied, "resumed worker caught up on the stream");

    manager.update_skip_error("m1", true).await.expect("update skip error");
    assert!(env.definition("m1").await.skip_error);

    // Deleting removes the stored rows once the worker observes it.
    manager.delete_job("m1").await.expect("delete");
    assert!(!env.store.job_exists("m1").await.expect("exists query"));
    assert!(manager.get_job("m1").await.is_err());
}

#[tokio::test]
async fn create_rejects_mixed_scope_and_duplicate_names() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;

    let manager = JobManager::new(
        Arc::new(env.store.clone()),
        env.factory.clone() as Arc<dyn ClusterFactory>,
        env.config.clone(),
    );

    let err = manager
        .create_job(
            "bad",
            env.spec(SRC_HOST, "orders"),
            env.spec(DEST_HOST, ""),
            false,
        )
        .await
        .expect_err("mixed scope is rejected");
    assert!(err.to_string().contains("both db or table"));

    manager
        .create_job(
            "m2",
            env.spec(SRC_HOST, "orders"),
            env.spec(DEST_HOST, "orders"),
            false,
        )
        .await
        .expect("first job created");

    let err = manager
        .create_job(
            "m2",
            env.spec(SRC_HOST, "orders"),
            env.spec(DEST_HOST, "orders"),
            false,
        )
        .await
        .expect_err("duplicate name is rejected");
    assert!(err.to_string().contains("already exists"));

    manager.stop_all().await;
}

#[tokio::test]
async fn first_run_rejects_an_existing_destination_table() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    env.dest.add_database(DATABASE, 2000, true).await;
    env.dest.add_table(DATABASE, "orders", 900, 0).await;

    let job = Job::new(
        "m3",
        env.spec(SRC_HOST, "orders"),
        env.spec(DEST_HOST, "orders"),
        false,
        Arc::new(env.store.clone()),
        env.factory.clone() as Arc<dyn ClusterFactory>,
        env.config.clone(),
    )
    .await
    .expect("job definition is valid");

    let err = job.first_run().await.expect_err("dest table must not exist");
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn first_run_requires_binlog_on_the_source_table() {
    let env = TestEnv::new().await;
    // No source table at all.
    let job = Job::new(
        "m4",
        env.spec(SRC_HOST, "orders"),
        env.spec(DEST_HOST, "orders"),
        false,
        Arc::new(env.store.clone()),
        env.factory.clone() as Arc<dyn ClusterFactory>,
        env.config.clone(),
    )
    .await
    .expect("job definition is valid");

    let err = job.first_run().await.expect_err("missing source table");
    assert!(err.to_string().contains("not exists"));
}
