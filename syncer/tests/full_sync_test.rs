mod common;

use std::collections::HashMap;

use common::{upsert_binlog, TestEnv, DATABASE};
use syncer::progress::{SyncPhase, SyncState};

#[tokio::test]
async fn table_sync_bootstrap_reaches_incremental() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;

    let job = env.create_table_job("t1", false).await;

    // A fresh job enters the bootstrap at its first phase with a zero cursor.
    let record = env.progress("t1").await;
    assert_eq!(record.sync_state, SyncState::TableFullSync);
    assert_eq!(record.sub_sync_state.phase, SyncPhase::BeginCreateSnapshot);
    assert_eq!(record.commit_seq, 0);

    job.sync_once().await.expect("bootstrap tick");

    // The whole pipeline ran within one tick: snapshot, restore, handoff.
    let record = env.progress("t1").await;
    assert_eq!(record.sync_state, SyncState::TableIncrementalSync);
    assert_eq!(record.sub_sync_state.phase, SyncPhase::Done);
    assert_eq!(record.commit_seq, 500);
    assert!(record.table_commit_seq_map.is_none());

    // The destination table id was discovered after restore and persisted
    // into the job definition.
    let dest_table_id = env
        .dest
        .table_id_of(DATABASE, "orders")
        .await
        .expect("restored table exists");
    let definition = env.definition("t1").await;
    assert_eq!(definition.dest.table_id, dest_table_id);

    // The restored snapshot carried the injected backend map and token.
    let job_infos = env.dest.restored_job_infos().await;
    assert_eq!(job_infos.len(), 1);
    assert!(job_infos[0].contains("extra_info"));
    assert!(job_infos[0].contains("be_network_map"));
    assert!(job_infos[0].contains("token"));
}

#[tokio::test]
async fn table_sync_restores_under_destination_name() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 42).await;

    let job = syncer::job::Job::new(
        "t2",
        env.spec(common::SRC_HOST, "orders"),
        env.spec(common::DEST_HOST, "orders_copy"),
        false,
        std::sync::Arc::new(env.store.clone()),
        env.factory.clone() as std::sync::Arc<dyn syncer::cluster::ClusterFactory>,
        env.config.clone(),
    )
    .await
    .expect("job is valid");
    job.first_run().await.expect("first run checks pass");
    job.persist().await.expect("job persists");
    job.start().await.expect("job starts");

    job.sync_once().await.expect("bootstrap tick");

    assert!(env.dest.table_id_of(DATABASE, "orders_copy").await.is_some());
    assert!(env.dest.table_id_of(DATABASE, "orders").await.is_none());
}

#[tokio::test]
async fn db_sync_bootstrap_then_floor_filtering_and_promotion() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "a", 1, 120).await;
    env.src.add_table(DATABASE, "b", 2, 80).await;

    let job = env.create_db_job("d1", false).await;
    job.sync_once().await.expect("bootstrap tick");

    // Baseline is the minimum floor; both floors and the identity mapping
    // are persisted.
    let record = env.progress("d1").await;
    assert_eq!(record.sync_state, SyncState::DbTablesIncrementalSync);
    assert_eq!(record.commit_seq, 80);
    assert_eq!(
        record.table_commit_seq_map,
        Some(HashMap::from([(1, 120), (2, 80)]))
    );

    let dest_a = env.dest.table_id_of(DATABASE, "a").await.expect("a restored");
    let dest_b = env.dest.table_id_of(DATABASE, "b").await.expect("b restored");
    assert_eq!(
        record.table_mapping,
        Some(HashMap::from([(1, dest_a), (2, dest_b)]))
    );

    // Stream: 85 touches b (above its floor of 80), 100 touches a (still
    // below its floor of 120), then 125 and 130 are past both floors.
    env.src.push_binlog(DATABASE, upsert_binlog(85, &[2])).await;
    env.src.push_binlog(DATABASE, upsert_binlog(100, &[1])).await;
    env.src.push_binlog(DATABASE, upsert_binlog(125, &[1])).await;
    env.src.push_binlog(DATABASE, upsert_binlog(130, &[2])).await;

    job.sync_once().await.expect("incremental tick");

    let applied = env.dest.applied_writes().await;
    let applied_tables: Vec<Vec<i64>> = applied
        .iter()
        .map(|write| write.dest_table_ids.clone())
        .collect();
    assert_eq!(applied_tables, vec![vec![dest_b], vec![dest_a], vec![dest_b]]);

    // Record 100 was suppressed by its table's floor and never applied.
    assert!(applied.iter().any(|write| write.label.ends_with(":85")));
    assert!(!applied.iter().any(|write| write.label.ends_with(":100")));
    assert!(applied.iter().any(|write| write.label.ends_with(":125")));
    assert!(applied.iter().any(|write| write.label.ends_with(":130")));

    // Once every floor is surpassed the suppression map is gone for good and
    // the job is in plain incremental sync, within the same tick.
    let record = env.progress("d1").await;
    assert_eq!(record.sync_state, SyncState::DbIncrementalSync);
    assert!(record.table_commit_seq_map.is_none());
    assert_eq!(record.commit_seq, 130);
    assert_eq!(record.sub_sync_state.phase, SyncPhase::Done);
}

#[tokio::test]
async fn restore_polling_retries_until_finished() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 7).await;
    // The restore reports unfinished twice before completing; the bounded
    // poll absorbs that within one tick.
    env.dest.set_restore_delay_polls(2).await;

    let job = env.create_table_job("t3", false).await;
    job.sync_once().await.expect("bootstrap tick");

    let record = env.progress("t3").await;
    assert_eq!(record.sync_state, SyncState::TableIncrementalSync);
    assert_eq!(record.commit_seq, 7);
}

#[tokio::test]
async fn restore_polling_gives_up_and_retries_next_tick() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 7).await;
    // More unfinished polls than the retry budget: the tick fails, the next
    // tick re-submits the restore and succeeds.
    env.dest.set_restore_delay_polls(10).await;

    let job = env.create_table_job("t4", false).await;
    let err = job.sync_once().await.expect_err("restore poll exhausted");
    assert!(err.to_string().contains("not finished"));

    let record = env.progress("t4").await;
    assert_eq!(record.sub_sync_state.phase, SyncPhase::RestoreSnapshot);

    env.dest.set_restore_delay_polls(0).await;
    job.sync_once().await.expect("second tick completes");

    let record = env.progress("t4").await;
    assert_eq!(record.sync_state, SyncState::TableIncrementalSync);
}
