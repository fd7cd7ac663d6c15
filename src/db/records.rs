//! Academic records store: turns local rows into typed entity snapshots.
//!
//! Free-form JSON bags (personal, contact and credential data) are decoded
//! here, at the storage boundary. Missing keys become empty values so the
//! mapper never sees a partially-shaped record; a bag that is not valid JSON
//! is logged and treated as empty.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{instrument, warn};

use super::repo::Pool;
use crate::model::{
    CourseRecord, EntityKind, EntitySnapshot, GradeRecord, LecturerRecord, PeriodRef, ProgramRef,
    Selector, StudentRecord, FINAL_GRADE_STATUS,
};

const ACTIVE_STATUS: &str = "aktif";
const PLANNED_PERIOD_STATUS: &str = "rencana";

/// Source of entity snapshots for the sync engine.
#[async_trait]
pub trait RecordsStore: Send + Sync {
    /// Resolve one entity by local id; `None` when it no longer exists.
    async fn get_snapshot(&self, kind: EntityKind, id: i64) -> Result<Option<EntitySnapshot>>;

    /// Resolve a selector into snapshots ordered by local id. Grade filters
    /// on any other kind are an error.
    async fn list_snapshots(
        &self,
        kind: EntityKind,
        selector: &Selector,
    ) -> Result<Vec<EntitySnapshot>>;

    /// Denominator for status percentages: every row of the kind, or every
    /// final grade.
    async fn count_total(&self, kind: EntityKind) -> Result<i64>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PersonalData {
    #[serde(alias = "nama_lengkap")]
    full_name: Option<String>,
    #[serde(alias = "jenis_kelamin")]
    sex: Option<String>,
    #[serde(alias = "tanggal_lahir")]
    birth_date: Option<String>,
    #[serde(alias = "tempat_lahir")]
    birth_place: Option<String>,
    #[serde(alias = "agama")]
    religion: Option<String>,
    #[serde(alias = "kewarganegaraan")]
    citizenship: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContactData {
    #[serde(alias = "alamat")]
    address: Option<String>,
    #[serde(alias = "telepon")]
    phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Credentials {
    #[serde(alias = "pendidikan_terakhir")]
    highest_degree: Option<String>,
}

fn decode_bag<T: DeserializeOwned + Default>(raw: Option<String>, column: &str, id: i64) -> T {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return T::default();
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(?err, column, id, "malformed JSON column; using defaults");
            T::default()
        }
    }
}

/// Filter for final-grade listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GradeFilter {
    pub id: Option<i64>,
    pub period_id: Option<i64>,
    pub student_id: Option<i64>,
    /// When false, non-final grades are included (single-id lookups).
    pub final_only: bool,
    /// Skip grades whose period is still being planned.
    pub exclude_planned_periods: bool,
}

/// [`RecordsStore`] over the local SQLite tables.
#[derive(Debug, Clone)]
pub struct SqliteRecords {
    pool: Pool,
}

impl SqliteRecords {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn query_students(
        &self,
        id: Option<i64>,
        program_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<StudentRecord>> {
        let rows = sqlx::query(
            "SELECT s.id, s.registration_number, s.status, s.entry_date, s.active_term, s.gpa, \
                    s.personal_data, s.contact_data, p.code AS program_code, p.degree_level \
             FROM students s JOIN study_programs p ON p.id = s.program_id \
             WHERE (? IS NULL OR s.id = ?) AND (? IS NULL OR s.program_id = ?) \
               AND (? = 0 OR s.status = ?) \
             ORDER BY s.id",
        )
        .bind(id)
        .bind(id)
        .bind(program_id)
        .bind(program_id)
        .bind(active_only)
        .bind(ACTIVE_STATUS)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_student).collect()
    }

    async fn query_lecturers(
        &self,
        id: Option<i64>,
        faculty_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<LecturerRecord>> {
        let rows = sqlx::query(
            "SELECT l.id, l.national_id, l.functional_rank, l.employment_status, l.status, \
                    l.personal_data, l.credentials, l.expertise, f.code AS faculty_code \
             FROM lecturers l JOIN faculties f ON f.id = l.faculty_id \
             WHERE (? IS NULL OR l.id = ?) AND (? IS NULL OR l.faculty_id = ?) \
               AND (? = 0 OR l.status = ?) \
             ORDER BY l.id",
        )
        .bind(id)
        .bind(id)
        .bind(faculty_id)
        .bind(faculty_id)
        .bind(active_only)
        .bind(ACTIVE_STATUS)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_lecturer).collect()
    }

    async fn query_courses(
        &self,
        id: Option<i64>,
        program_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<CourseRecord>> {
        let rows = sqlx::query(
            "SELECT c.id, c.code, c.name, c.credits, c.kind, c.recommended_term, c.status, \
                    p.code AS program_code \
             FROM courses c JOIN study_programs p ON p.id = c.program_id \
             WHERE (? IS NULL OR c.id = ?) AND (? IS NULL OR c.program_id = ?) \
               AND (? = 0 OR c.status = ?) \
             ORDER BY c.id",
        )
        .bind(id)
        .bind(id)
        .bind(program_id)
        .bind(program_id)
        .bind(active_only)
        .bind(ACTIVE_STATUS)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_course).collect()
    }

    async fn query_grades(&self, filter: GradeFilter) -> Result<Vec<GradeRecord>> {
        let rows = sqlx::query(
            "SELECT g.id, g.numeric_score, g.letter_grade, g.grade_index, g.status, g.passed, \
                    s.registration_number, c.code AS course_code, \
                    ap.term_kind, ap.start_date, ap.end_date \
             FROM grades g \
             JOIN students s ON s.id = g.student_id \
             JOIN courses c ON c.id = g.course_id \
             JOIN academic_periods ap ON ap.id = g.period_id \
             WHERE (? IS NULL OR g.id = ?) \
               AND (? IS NULL OR g.period_id = ?) \
               AND (? IS NULL OR g.student_id = ?) \
               AND (? = 0 OR g.status = ?) \
               AND (? = 0 OR ap.status != ?) \
             ORDER BY g.id",
        )
        .bind(filter.id)
        .bind(filter.id)
        .bind(filter.period_id)
        .bind(filter.period_id)
        .bind(filter.student_id)
        .bind(filter.student_id)
        .bind(filter.final_only)
        .bind(FINAL_GRADE_STATUS)
        .bind(filter.exclude_planned_periods)
        .bind(PLANNED_PERIOD_STATUS)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_grade).collect()
    }

    #[instrument(skip(self))]
    pub async fn student_by_id(&self, id: i64) -> Result<Option<StudentRecord>> {
        Ok(self.query_students(Some(id), None, false).await?.pop())
    }

    #[instrument(skip(self))]
    pub async fn lecturer_by_id(&self, id: i64) -> Result<Option<LecturerRecord>> {
        Ok(self.query_lecturers(Some(id), None, false).await?.pop())
    }

    #[instrument(skip(self))]
    pub async fn course_by_id(&self, id: i64) -> Result<Option<CourseRecord>> {
        Ok(self.query_courses(Some(id), None, false).await?.pop())
    }

    #[instrument(skip(self))]
    pub async fn grade_by_id(&self, id: i64) -> Result<Option<GradeRecord>> {
        let filter = GradeFilter {
            id: Some(id),
            ..GradeFilter::default()
        };
        Ok(self.query_grades(filter).await?.pop())
    }

    /// Active students, optionally within one study program.
    #[instrument(skip(self))]
    pub async fn list_active_students(&self, program_id: Option<i64>) -> Result<Vec<StudentRecord>> {
        self.query_students(None, program_id, true).await
    }

    /// Active lecturers, optionally within one faculty.
    #[instrument(skip(self))]
    pub async fn list_active_lecturers(&self, faculty_id: Option<i64>) -> Result<Vec<LecturerRecord>> {
        self.query_lecturers(None, faculty_id, true).await
    }

    /// Active courses, optionally within one study program.
    #[instrument(skip(self))]
    pub async fn list_active_courses(&self, program_id: Option<i64>) -> Result<Vec<CourseRecord>> {
        self.query_courses(None, program_id, true).await
    }

    /// Final grades. Without a period filter, grades of planned periods are
    /// left out.
    #[instrument(skip(self))]
    pub async fn list_final_grades(
        &self,
        period_id: Option<i64>,
        student_id: Option<i64>,
    ) -> Result<Vec<GradeRecord>> {
        self.query_grades(GradeFilter {
            id: None,
            period_id,
            student_id,
            final_only: true,
            exclude_planned_periods: period_id.is_none(),
        })
        .await
    }
}

fn row_to_student(row: &SqliteRow) -> Result<StudentRecord> {
    let id: i64 = row.try_get("id")?;
    let personal: PersonalData = decode_bag(row.try_get("personal_data")?, "personal_data", id);
    let contact: ContactData = decode_bag(row.try_get("contact_data")?, "contact_data", id);
    Ok(StudentRecord {
        id,
        registration_number: row.try_get("registration_number")?,
        full_name: personal.full_name.unwrap_or_default(),
        sex: personal.sex.unwrap_or_default(),
        birth_date: personal.birth_date.unwrap_or_default(),
        birth_place: personal.birth_place.unwrap_or_default(),
        religion: personal.religion.unwrap_or_default(),
        citizenship: personal.citizenship.unwrap_or_default(),
        program: ProgramRef {
            code: row.try_get("program_code")?,
            degree_level: row.try_get("degree_level")?,
        },
        status: row.try_get("status")?,
        entry_date: row.try_get("entry_date")?,
        active_term: row.try_get("active_term")?,
        gpa: row.try_get("gpa")?,
        address: contact.address,
        phone: contact.phone,
    })
}

fn row_to_lecturer(row: &SqliteRow) -> Result<LecturerRecord> {
    let id: i64 = row.try_get("id")?;
    let personal: PersonalData = decode_bag(row.try_get("personal_data")?, "personal_data", id);
    let credentials: Credentials = decode_bag(row.try_get("credentials")?, "credentials", id);
    let expertise: Vec<String> = decode_bag(row.try_get("expertise")?, "expertise", id);
    Ok(LecturerRecord {
        id,
        national_id: row
            .try_get::<Option<String>, _>("national_id")?
            .filter(|s| !s.trim().is_empty()),
        full_name: personal.full_name.unwrap_or_default(),
        sex: personal.sex.unwrap_or_default(),
        birth_date: personal.birth_date.unwrap_or_default(),
        birth_place: personal.birth_place.unwrap_or_default(),
        religion: personal.religion.unwrap_or_default(),
        functional_rank: row.try_get("functional_rank")?,
        employment_status: row.try_get("employment_status")?,
        faculty_code: row.try_get("faculty_code")?,
        highest_degree: credentials.highest_degree,
        expertise,
        status: row.try_get("status")?,
    })
}

fn row_to_course(row: &SqliteRow) -> Result<CourseRecord> {
    Ok(CourseRecord {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        credits: row.try_get("credits")?,
        recommended_term: row.try_get("recommended_term")?,
        course_kind: row.try_get("kind")?,
        program_code: row.try_get("program_code")?,
        status: row.try_get("status")?,
    })
}

fn row_to_grade(row: &SqliteRow) -> Result<GradeRecord> {
    Ok(GradeRecord {
        id: row.try_get("id")?,
        student_registration_number: row.try_get("registration_number")?,
        course_code: row.try_get("course_code")?,
        numeric_score: row.try_get("numeric_score")?,
        letter_grade: row.try_get("letter_grade")?,
        grade_index: row.try_get("grade_index")?,
        status: row.try_get("status")?,
        passed: row.try_get("passed")?,
        period: PeriodRef {
            term_kind: row.try_get("term_kind")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
        },
    })
}

#[async_trait]
impl RecordsStore for SqliteRecords {
    async fn get_snapshot(&self, kind: EntityKind, id: i64) -> Result<Option<EntitySnapshot>> {
        Ok(match kind {
            EntityKind::Student => self.student_by_id(id).await?.map(EntitySnapshot::Student),
            EntityKind::Lecturer => self.lecturer_by_id(id).await?.map(EntitySnapshot::Lecturer),
            EntityKind::Course => self.course_by_id(id).await?.map(EntitySnapshot::Course),
            EntityKind::Grade => self.grade_by_id(id).await?.map(EntitySnapshot::Grade),
        })
    }

    async fn list_snapshots(
        &self,
        kind: EntityKind,
        selector: &Selector,
    ) -> Result<Vec<EntitySnapshot>> {
        let snapshots = match (kind, *selector) {
            (_, Selector::Id(id)) => self.get_snapshot(kind, id).await?.into_iter().collect(),
            (EntityKind::Student, Selector::Group(program_id)) => self
                .query_students(None, Some(program_id), false)
                .await?
                .into_iter()
                .map(EntitySnapshot::Student)
                .collect(),
            (EntityKind::Student, Selector::AllEligible) => self
                .list_active_students(None)
                .await?
                .into_iter()
                .map(EntitySnapshot::Student)
                .collect(),
            (EntityKind::Lecturer, Selector::Group(faculty_id)) => self
                .query_lecturers(None, Some(faculty_id), false)
                .await?
                .into_iter()
                .map(EntitySnapshot::Lecturer)
                .collect(),
            (EntityKind::Lecturer, Selector::AllEligible) => self
                .list_active_lecturers(None)
                .await?
                .into_iter()
                .map(EntitySnapshot::Lecturer)
                .collect(),
            (EntityKind::Course, Selector::Group(program_id)) => self
                .query_courses(None, Some(program_id), false)
                .await?
                .into_iter()
                .map(EntitySnapshot::Course)
                .collect(),
            (EntityKind::Course, Selector::AllEligible) => self
                .list_active_courses(None)
                .await?
                .into_iter()
                .map(EntitySnapshot::Course)
                .collect(),
            (EntityKind::Grade, Selector::Group(period_id)) => self
                .list_final_grades(Some(period_id), None)
                .await?
                .into_iter()
                .map(EntitySnapshot::Grade)
                .collect(),
            (
                EntityKind::Grade,
                Selector::Grades {
                    period_id,
                    student_id,
                },
            ) => self
                .list_final_grades(period_id, student_id)
                .await?
                .into_iter()
                .map(EntitySnapshot::Grade)
                .collect(),
            (EntityKind::Grade, Selector::AllEligible) => self
                .list_final_grades(None, None)
                .await?
                .into_iter()
                .map(EntitySnapshot::Grade)
                .collect(),
            (_, Selector::Grades { .. }) => {
                bail!("grade filters only apply to grades, not {kind}")
            }
        };
        Ok(snapshots)
    }

    #[instrument(skip(self))]
    async fn count_total(&self, kind: EntityKind) -> Result<i64> {
        let sql = match kind {
            EntityKind::Student => "SELECT COUNT(*) FROM students",
            EntityKind::Lecturer => "SELECT COUNT(*) FROM lecturers",
            EntityKind::Course => "SELECT COUNT(*) FROM courses",
            EntityKind::Grade => "SELECT COUNT(*) FROM grades WHERE status = 'final'",
        };
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count)
    }
}
