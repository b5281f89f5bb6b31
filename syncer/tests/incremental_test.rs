mod common;

use common::{ddl_binlog, upsert_binlog, TestEnv, DATABASE};
use serde_json::json;
use syncer::progress::{SyncPhase, SyncState};
use syncer::rpc::{BinlogType, StatusCode};

#[tokio::test]
async fn empty_stream_is_a_noop_tick() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    let job = env.create_table_job("i1", false).await;
    job.sync_once().await.expect("bootstrap tick");

    // Nothing newer than the cursor exists: the tick does no work.
    job.sync_once().await.expect("idle tick");

    let record = env.progress("i1").await;
    assert_eq!(record.commit_seq, 500);
    assert_eq!(record.sub_sync_state.phase, SyncPhase::Done);
    assert!(env.dest.applied_writes().await.is_empty());
}

#[tokio::test]
async fn publish_timeout_converges_without_rollback() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    let job = env.create_table_job("i2", false).await;
    job.sync_once().await.expect("bootstrap tick");

    env.src.push_binlog(DATABASE, upsert_binlog(700, &[100])).await;
    env.dest.push_commit_outcome(StatusCode::PublishTimeout).await;

    job.sync_once().await.expect("incremental tick");

    // The slow publish was waited out and the record still landed exactly
    // once.
    let applied = env.dest.applied_writes().await;
    assert_eq!(applied.len(), 1);
    assert!(applied[0].label.ends_with(":700"));

    let record = env.progress("i2").await;
    assert_eq!(record.commit_seq, 700);
    assert_eq!(record.sub_sync_state.phase, SyncPhase::Done);
}

#[tokio::test]
async fn skip_error_abandons_the_poison_record() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    let job = env.create_table_job("i3", true).await;
    job.sync_once().await.expect("bootstrap tick");

    env.src.push_binlog(DATABASE, upsert_binlog(701, &[100])).await;
    env.dest.fail_next_ingests(1).await;

    job.sync_once().await.expect("failed record is rolled back");

    // The cursor stays on the failed record, so the next fetch skips it.
    let record = env.progress("i3").await;
    assert_eq!(record.commit_seq, 701);
    assert_eq!(record.sub_sync_state.phase, SyncPhase::Done);
    assert!(env.dest.applied_writes().await.is_empty());

    env.src.push_binlog(DATABASE, upsert_binlog(702, &[100])).await;
    job.sync_once().await.expect("next record applies");

    let applied = env.dest.applied_writes().await;
    assert_eq!(applied.len(), 1);
    assert!(applied[0].label.ends_with(":702"));
    assert!(!applied.iter().any(|write| write.label.ends_with(":701")));
    assert_eq!(env.progress("i3").await.commit_seq, 702);
}

#[tokio::test]
async fn without_skip_error_the_record_is_retried_until_it_applies() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    let job = env.create_table_job("i4", false).await;
    job.sync_once().await.expect("bootstrap tick");

    env.src.push_binlog(DATABASE, upsert_binlog(701, &[100])).await;
    env.dest.fail_next_ingests(2).await;

    // Each failed attempt rolls back and rewinds the cursor onto the same
    // record; the fetch loop re-reads it until it finally lands. The record
    // is never lost and never applied twice.
    job.sync_once().await.expect("tick retries the record");

    let applied = env.dest.applied_writes().await;
    assert_eq!(applied.len(), 1);
    assert!(applied[0].label.ends_with(":701"));
    assert_eq!(env.progress("i4").await.commit_seq, 701);

    // Two attempts were rolled back before the third one succeeded.
    assert_eq!(env.dest.transaction_count().await, 3);
}

#[tokio::test]
async fn partition_and_truncate_ddl_replay_on_destination() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    let job = env.create_table_job("i5", false).await;
    job.sync_once().await.expect("bootstrap tick");

    env.src
        .push_binlog(
            DATABASE,
            ddl_binlog(
                BinlogType::AddPartition,
                600,
                json!({"tableId": 100, "sql": "ADD PARTITION p2 VALUES LESS THAN (\"2024\")"}),
            ),
        )
        .await;
    env.src
        .push_binlog(
            DATABASE,
            ddl_binlog(
                BinlogType::TruncateTable,
                610,
                json!({"tableId": 100, "tableName": "orders", "rawSql": ""}),
            ),
        )
        .await;

    job.sync_once().await.expect("ddl tick");

    let executed = env.dest.executed_sql().await;
    assert!(executed
        .iter()
        .any(|sql| sql == "ALTER TABLE orders ADD PARTITION p2 VALUES LESS THAN (\"2024\")"));
    assert!(executed.iter().any(|sql| sql == "TRUNCATE TABLE orders"));
    assert_eq!(env.progress("i5").await.commit_seq, 610);
}

#[tokio::test]
async fn create_and_drop_table_maintain_the_mapping() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "a", 1, 5).await;
    let job = env.create_db_job("i6", false).await;
    job.sync_once().await.expect("bootstrap tick");

    // A later write promotes the job out of the bootstrap floor phase.
    env.src.push_binlog(DATABASE, upsert_binlog(6, &[1])).await;
    // The source gained a table after the snapshot.
    env.src.add_table(DATABASE, "c", 3, 0).await;
    env.src
        .push_binlog(
            DATABASE,
            ddl_binlog(
                BinlogType::CreateTable,
                10,
                json!({"tableId": 3, "sql": "CREATE TABLE c (id int)"}),
            ),
        )
        .await;
    env.src.push_binlog(DATABASE, upsert_binlog(12, &[3])).await;
    env.src
        .push_binlog(
            DATABASE,
            ddl_binlog(
                BinlogType::DropTable,
                15,
                json!({"tableId": 3, "tableName": "c"}),
            ),
        )
        .await;

    job.sync_once().await.expect("incremental tick");

    // The new table reached the destination, received writes through the
    // lazily-maintained mapping, and disappeared again.
    assert!(env.dest.table_id_of(DATABASE, "c").await.is_none());
    let executed = env.dest.executed_sql().await;
    assert!(executed.iter().any(|sql| sql == "CREATE TABLE c (id int)"));
    assert!(executed.iter().any(|sql| sql == "DROP TABLE c FORCE"));

    let applied = env.dest.applied_writes().await;
    assert!(applied.iter().any(|write| write.label.ends_with(":12")));

    let record = env.progress("i6").await;
    assert_eq!(record.sync_state, SyncState::DbIncrementalSync);
    assert_eq!(record.commit_seq, 15);
    assert_eq!(record.table_mapping.as_ref().map(|m| m.contains_key(&3)), Some(false));
}

#[tokio::test]
async fn finished_alter_job_forces_a_table_rebuild() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "a", 1, 10).await;
    env.src.add_table(DATABASE, "b", 2, 20).await;
    let job = env.create_db_job("i7", false).await;
    job.sync_once().await.expect("bootstrap tick");

    // Surpass both floors first so the job sits in plain incremental sync.
    env.src.push_binlog(DATABASE, upsert_binlog(25, &[1, 2])).await;
    job.sync_once().await.expect("promotion tick");
    assert_eq!(
        env.progress("i7").await.sync_state,
        SyncState::DbIncrementalSync
    );

    env.src
        .push_binlog(
            DATABASE,
            ddl_binlog(
                BinlogType::AlterJob,
                30,
                json!({"tableId": 1, "tableName": "a", "jobState": "FINISHED"}),
            ),
        )
        .await;

    job.sync_once().await.expect("alter job tick");

    // The schema-changed table was dropped on the destination and the job
    // fell back into a database bootstrap.
    let executed = env.dest.executed_sql().await;
    assert!(executed.iter().any(|sql| sql == "DROP TABLE a FORCE"));
    let record = env.progress("i7").await;
    assert_eq!(record.sync_state, SyncState::DbFullSync);
    assert_eq!(record.commit_seq, 30);

    job.sync_once().await.expect("re-bootstrap tick");
    let record = env.progress("i7").await;
    assert_eq!(record.sync_state, SyncState::DbTablesIncrementalSync);
    assert_eq!(env.dest.snapshot_count().await, 0);
    assert_eq!(env.src.snapshot_count().await, 2);
}

#[tokio::test]
async fn unfinished_alter_job_is_ignored() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    let job = env.create_table_job("i8", false).await;
    job.sync_once().await.expect("bootstrap tick");

    env.src
        .push_binlog(
            DATABASE,
            ddl_binlog(
                BinlogType::AlterJob,
                600,
                json!({"tableId": 100, "tableName": "orders", "jobState": "RUNNING"}),
            ),
        )
        .await;

    job.sync_once().await.expect("ignored alter tick");

    let record = env.progress("i8").await;
    assert_eq!(record.sync_state, SyncState::TableIncrementalSync);
    assert_eq!(record.commit_seq, 600);
    assert!(!env
        .dest
        .executed_sql()
        .await
        .iter()
        .any(|sql| sql.starts_with("DROP TABLE")));
}

#[tokio::test]
async fn dummy_record_forces_a_full_rebootstrap() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    let job = env.create_table_job("i9", false).await;
    job.sync_once().await.expect("bootstrap tick");

    // The source dropped history: the fetch answers too-old and hands back a
    // dummy record.
    env.src.add_table(DATABASE, "orders", 100, 650).await;
    env.src
        .push_binlog(
            DATABASE,
            ddl_binlog(BinlogType::Dummy, 600, json!({"commitSeq": 600})),
        )
        .await;
    env.src
        .set_next_binlog_status(StatusCode::TooOldCommitSeq)
        .await;

    job.sync_once().await.expect("dummy tick");

    let record = env.progress("i9").await;
    assert_eq!(record.sync_state, SyncState::TableFullSync);
    assert_eq!(record.commit_seq, 600);

    job.sync_once().await.expect("re-bootstrap tick");

    let record = env.progress("i9").await;
    assert_eq!(record.sync_state, SyncState::TableIncrementalSync);
    assert_eq!(record.commit_seq, 650);
    assert_eq!(env.src.snapshot_count().await, 2);
}

#[tokio::test]
async fn schema_change_strips_the_source_qualifier() {
    let env = TestEnv::new().await;
    env.src.add_table(DATABASE, "orders", 100, 500).await;
    let job = env.create_table_job("i10", false).await;
    job.sync_once().await.expect("bootstrap tick");

    env.src
        .push_binlog(
            DATABASE,
            ddl_binlog(
                BinlogType::ModifyTableAddOrDropColumns,
                600,
                json!({
                    "tableId": 100,
                    "rawSql": format!("ALTER TABLE `default_cluster:{DATABASE}`.`orders` ADD COLUMN `nid` int(11) NULL"),
                }),
            ),
        )
        .await;

    job.sync_once().await.expect("schema change tick");

    let executed = env.dest.executed_sql().await;
    assert!(executed
        .iter()
        .any(|sql| sql == "ALTER TABLE `orders` ADD COLUMN `nid` int(11) NULL"));
}
