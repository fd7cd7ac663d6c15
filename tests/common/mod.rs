#![allow(dead_code)]

use async_trait::async_trait;
use pddikti_sync::mapper::ExternalPayload;
use pddikti_sync::registry::{ClientResult, RegistryClient, SendMethod};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Single connection so concurrent batches queue on one in-memory database.
pub async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// One faculty, one study program and two academic periods (one planned).
pub async fn seed_reference_data(pool: &SqlitePool) {
    sqlx::query("INSERT INTO faculties (id, code, name) VALUES (1, 'FT', 'Teknik')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO study_programs (id, faculty_id, code, name, degree_level) \
         VALUES (1, 1, 'IF', 'Informatika', 'S1')",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO academic_periods (id, code, name, term_kind, start_date, end_date, status) VALUES \
         (1, '20241', 'Ganjil 2024', 'ganjil', '2024-09-01', '2025-01-31', 'aktif'), \
         (2, '20252', 'Genap 2025', 'genap', '2025-02-01', '2025-06-30', 'rencana')",
    )
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_student(pool: &SqlitePool, id: i64, registration_number: &str, sex: &str) {
    let personal = json!({
        "nama_lengkap": format!("Mahasiswa {}", id),
        "jenis_kelamin": sex,
        "tanggal_lahir": "2005-01-02",
        "tempat_lahir": "Bandung",
        "agama": "islam",
        "kewarganegaraan": "WNI",
    });
    sqlx::query(
        "INSERT INTO students (id, program_id, registration_number, status, entry_date, \
         active_term, gpa, personal_data, contact_data) \
         VALUES (?, 1, ?, 'aktif', '2024-08-15', 1, 3.25, ?, '{}')",
    )
    .bind(id)
    .bind(registration_number)
    .bind(personal.to_string())
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_lecturer(
    pool: &SqlitePool,
    id: i64,
    national_id: Option<&str>,
    functional_rank: &str,
    expertise: &str,
) {
    let personal = json!({
        "nama_lengkap": format!("Dosen {}", id),
        "jenis_kelamin": "perempuan",
        "tanggal_lahir": "1980-05-15",
        "tempat_lahir": "Bandung",
        "agama": "kristen",
    });
    sqlx::query(
        "INSERT INTO lecturers (id, faculty_id, national_id, functional_rank, employment_status, \
         status, personal_data, credentials, expertise) \
         VALUES (?, 1, ?, ?, 'tetap', 'aktif', ?, '{\"pendidikan_terakhir\":\"S3\"}', ?)",
    )
    .bind(id)
    .bind(national_id)
    .bind(functional_rank)
    .bind(personal.to_string())
    .bind(expertise)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_course(pool: &SqlitePool, id: i64, code: &str) {
    sqlx::query(
        "INSERT INTO courses (id, program_id, code, name, credits, kind, recommended_term, status) \
         VALUES (?, 1, ?, 'Algoritma', 3, 'wajib', 1, 'aktif')",
    )
    .bind(id)
    .bind(code)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_grade(
    pool: &SqlitePool,
    id: i64,
    student_id: i64,
    course_id: i64,
    period_id: i64,
    status: &str,
) {
    sqlx::query(
        "INSERT INTO grades (id, student_id, course_id, period_id, numeric_score, \
         letter_grade, grade_index, status, passed) VALUES (?, ?, ?, ?, 85.0, 'A', 4.0, ?, 1)",
    )
    .bind(id)
    .bind(student_id)
    .bind(course_id)
    .bind(period_id)
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn ledger_rows(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM integration_ledger")
        .fetch_one(pool)
        .await
        .unwrap()
}

pub fn ok(body: Value) -> ClientResult {
    ClientResult::accepted(200, body)
}

pub fn rejected(status: u16, body: &str) -> ClientResult {
    ClientResult::rejected(status, body)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub method: SendMethod,
    pub payload: ExternalPayload,
}

/// Registry fake answering from a queue; an empty queue accepts with `{}`.
#[derive(Clone, Default)]
pub struct RecordingRegistry {
    responses: Arc<Mutex<VecDeque<ClientResult>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl RecordingRegistry {
    pub fn with_responses(responses: Vec<ClientResult>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub async fn push_response(&self, response: ClientResult) {
        self.responses.lock().await.push_back(response);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RegistryClient for RecordingRegistry {
    async fn send(
        &self,
        endpoint: &str,
        payload: &ExternalPayload,
        method: SendMethod,
    ) -> ClientResult {
        self.calls.lock().await.push(RecordedCall {
            endpoint: endpoint.to_string(),
            method,
            payload: payload.clone(),
        });
        let mut guard = self.responses.lock().await;
        guard.pop_front().unwrap_or_else(|| ok(json!({})))
    }
}
