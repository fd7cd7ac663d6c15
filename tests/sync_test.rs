mod common;

use common::*;
use pddikti_sync::db::{self, SqliteRecords};
use pddikti_sync::model::{EntityKind, EntitySnapshot, SyncStatus};
use pddikti_sync::registry::SendMethod;
use pddikti_sync::sync::{Orchestrator, NON_FINAL_GRADE_MESSAGE};
use serde_json::json;
use std::sync::Arc;

async fn student_snapshot(store: &SqliteRecords, id: i64) -> EntitySnapshot {
    EntitySnapshot::Student(store.student_by_id(id).await.unwrap().unwrap())
}

#[tokio::test]
async fn accepted_student_records_external_id() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    insert_student(&pool, 1, "2024001", "laki-laki").await;
    let store = SqliteRecords::new(pool.clone());

    let registry = RecordingRegistry::with_responses(vec![ok(json!({"id_pddikti": "P1"}))]);
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(registry.clone()));

    let outcome = orchestrator.sync_one(&student_snapshot(&store, 1).await).await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.external_id.as_deref(), Some("P1"));
    assert_eq!(outcome.message, "synchronized");

    let entry = db::find_ledger_entry(&pool, EntityKind::Student, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, SyncStatus::SyncSucceeded);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(entry.external_id.as_deref(), Some("P1"));
    assert_eq!(entry.last_response, Some(json!({"id_pddikti": "P1"})));

    let calls = registry.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].endpoint, "mahasiswa");
    assert_eq!(calls[0].method, SendMethod::Create);
    assert_eq!(calls[0].payload["jenis_kelamin"], json!("M"));
    assert_eq!(calls[0].payload["status_mahasiswa"], json!("ACTIVE"));
    assert_eq!(
        entry.last_payload_sent,
        Some(serde_json::Value::Object(calls[0].payload.clone()))
    );
}

#[tokio::test]
async fn rejected_student_keeps_raw_body() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    insert_student(&pool, 1, "2024001", "laki-laki").await;
    let store = SqliteRecords::new(pool.clone());

    let body = r#"{"error":"bad format"}"#;
    let registry = RecordingRegistry::with_responses(vec![rejected(400, body)]);
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(registry));

    let outcome = orchestrator.sync_one(&student_snapshot(&store, 1).await).await;
    assert!(!outcome.succeeded);
    assert!(outcome.external_id.is_none());
    assert_eq!(outcome.message, format!("synchronization failed: {}", body));

    let entry = db::find_ledger_entry(&pool, EntityKind::Student, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, SyncStatus::SyncFailed);
    assert_eq!(entry.attempt_count, 1);
    assert!(entry.last_error_message.unwrap().contains("bad format"));
    assert!(entry.last_payload_sent.is_none());
}

#[tokio::test]
async fn second_attempt_routes_to_update_and_keeps_external_id() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    insert_course(&pool, 1, "IF101").await;
    let store = SqliteRecords::new(pool.clone());
    let snapshot = EntitySnapshot::Course(store.course_by_id(1).await.unwrap().unwrap());

    let registry = RecordingRegistry::with_responses(vec![
        ok(json!({"id_pddikti": "X123"})),
        ok(json!({"status": "updated"})),
    ]);
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(registry.clone()));

    orchestrator.sync_one(&snapshot).await;
    let outcome = orchestrator.sync_one(&snapshot).await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.external_id.as_deref(), Some("X123"));

    let entry = db::find_ledger_entry(&pool, EntityKind::Course, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.external_id.as_deref(), Some("X123"));
    assert_eq!(entry.attempt_count, 2);

    let methods: Vec<_> = registry.calls().await.iter().map(|c| c.method).collect();
    assert_eq!(methods, vec![SendMethod::Create, SendMethod::Update]);
}

#[tokio::test]
async fn lecturer_goes_to_dosen_and_updates_on_resync() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    insert_lecturer(&pool, 1, Some("0011223344"), "lektor", r#"["AI","Data"]"#).await;
    let store = SqliteRecords::new(pool.clone());

    let registry = RecordingRegistry::with_responses(vec![
        ok(json!({"id_pddikti": "D1"})),
        ok(json!({"status": "updated"})),
    ]);
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(registry.clone()));

    let first = orchestrator
        .sync_entity(&store, EntityKind::Lecturer, 1)
        .await
        .unwrap()
        .unwrap();
    assert!(first.succeeded);
    assert_eq!(first.external_id.as_deref(), Some("D1"));
    let second = orchestrator
        .sync_entity(&store, EntityKind::Lecturer, 1)
        .await
        .unwrap()
        .unwrap();
    assert!(second.succeeded);
    assert_eq!(second.external_id.as_deref(), Some("D1"));

    let calls = registry.calls().await;
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.endpoint == "dosen"));
    assert_eq!(calls[0].method, SendMethod::Create);
    assert_eq!(calls[1].method, SendMethod::Update);

    let payload = &calls[0].payload;
    assert_eq!(payload["nidn"], json!("0011223344"));
    assert_eq!(payload["nama_dosen"], json!("Dosen 1"));
    assert_eq!(payload["jenis_kelamin"], json!("F"));
    assert_eq!(payload["jabatan_fungsional"], json!("LEKTOR"));
    assert_eq!(payload["status_kepegawaian"], json!("TETAP"));
    assert_eq!(payload["fakultas"], json!("FT"));
    assert_eq!(payload["pendidikan_terakhir"], json!("S3"));
    assert_eq!(payload["bidang_keahlian"], json!("AI,Data"));

    let entry = db::find_ledger_entry(&pool, EntityKind::Lecturer, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, SyncStatus::SyncSucceeded);
    assert_eq!(entry.attempt_count, 2);
    assert_eq!(entry.external_id.as_deref(), Some("D1"));
}

#[tokio::test]
async fn draft_grade_is_refused_without_io() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    insert_student(&pool, 1, "2024001", "perempuan").await;
    insert_course(&pool, 1, "IF101").await;
    insert_grade(&pool, 1, 1, 1, 1, "draft").await;
    let store = SqliteRecords::new(pool.clone());

    let registry = RecordingRegistry::default();
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(registry.clone()));

    let outcome = orchestrator
        .sync_entity(&store, EntityKind::Grade, 1)
        .await
        .unwrap()
        .unwrap();
    assert!(!outcome.succeeded);
    assert_eq!(outcome.message, NON_FINAL_GRADE_MESSAGE);
    assert!(registry.calls().await.is_empty());
    assert_eq!(ledger_rows(&pool).await, 0);
}

#[tokio::test]
async fn final_grade_uses_period_fields() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    insert_student(&pool, 1, "2024001", "perempuan").await;
    insert_course(&pool, 1, "IF101").await;
    insert_grade(&pool, 1, 1, 1, 1, "final").await;
    let store = SqliteRecords::new(pool.clone());

    let registry = RecordingRegistry::default();
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(registry.clone()));
    let outcome = orchestrator
        .sync_entity(&store, EntityKind::Grade, 1)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.succeeded);

    let calls = registry.calls().await;
    assert_eq!(calls[0].endpoint, "nilai");
    assert_eq!(calls[0].payload["nim"], json!("2024001"));
    assert_eq!(calls[0].payload["tahun_akademik"], json!("2024/2025"));
    assert_eq!(calls[0].payload["semester"], json!("ganjil"));
    assert_eq!(calls[0].payload["status_lulus"], json!("LULUS"));
}

#[tokio::test]
async fn unmapped_sex_is_an_unexpected_error() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    insert_student(&pool, 1, "2024001", "x").await;
    let store = SqliteRecords::new(pool.clone());

    let registry = RecordingRegistry::default();
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(registry.clone()));
    let outcome = orchestrator.sync_one(&student_snapshot(&store, 1).await).await;

    assert!(!outcome.succeeded);
    assert!(outcome.message.starts_with("unexpected error: "));
    assert!(outcome.message.contains("unmapped sex"));
    assert!(registry.calls().await.is_empty());
}

#[tokio::test]
async fn closed_pool_becomes_failure_outcome() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    insert_student(&pool, 1, "2024001", "laki-laki").await;
    let store = SqliteRecords::new(pool.clone());
    let snapshot = student_snapshot(&store, 1).await;

    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(RecordingRegistry::default()));
    pool.close().await;

    let outcome = orchestrator.sync_one(&snapshot).await;
    assert!(!outcome.succeeded);
    assert!(outcome.message.starts_with("unexpected error: "));
}

#[tokio::test]
async fn unknown_id_resolves_to_none() {
    let pool = setup_pool().await;
    seed_reference_data(&pool).await;
    let store = SqliteRecords::new(pool.clone());
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(RecordingRegistry::default()));

    let outcome = orchestrator
        .sync_entity(&store, EntityKind::Student, 404)
        .await
        .unwrap();
    assert!(outcome.is_none());
}
