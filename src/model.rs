use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {what}: {value}")]
pub struct ParseKindError {
    what: &'static str,
    value: String,
}

/// The four local entity kinds that share one integration ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Student,
    Lecturer,
    Course,
    Grade,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Student,
        EntityKind::Lecturer,
        EntityKind::Course,
        EntityKind::Grade,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Student => "student",
            EntityKind::Lecturer => "lecturer",
            EntityKind::Course => "course",
            EntityKind::Grade => "grade",
        }
    }

    /// Accepts the ledger tag as well as the registry's own names for the kind.
    pub fn parse_kind(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" | "mahasiswa" => Some(EntityKind::Student),
            "lecturer" | "dosen" => Some(EntityKind::Lecturer),
            "course" | "mata_kuliah" | "mata-kuliah" => Some(EntityKind::Course),
            "grade" | "nilai" => Some(EntityKind::Grade),
            _ => None,
        }
    }

    /// Registry endpoint path, relative to the configured base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::Student => "mahasiswa",
            EntityKind::Lecturer => "dosen",
            EntityKind::Course => "mata-kuliah",
            EntityKind::Grade => "nilai",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_kind(s).ok_or_else(|| ParseKindError {
            what: "entity kind",
            value: s.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NotSynced,
    SyncSucceeded,
    SyncFailed,
    /// Reserved for manual classification; never produced by a sync attempt.
    NeedsUpdate,
    /// Reserved for manual classification; never produced by a sync attempt.
    DataConflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NotSynced => "not_synced",
            SyncStatus::SyncSucceeded => "sync_succeeded",
            SyncStatus::SyncFailed => "sync_failed",
            SyncStatus::NeedsUpdate => "needs_update",
            SyncStatus::DataConflict => "data_conflict",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s.trim() {
            "not_synced" => Some(SyncStatus::NotSynced),
            "sync_succeeded" => Some(SyncStatus::SyncSucceeded),
            "sync_failed" => Some(SyncStatus::SyncFailed),
            "needs_update" => Some(SyncStatus::NeedsUpdate),
            "data_conflict" => Some(SyncStatus::DataConflict),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_status(s).ok_or_else(|| ParseKindError {
            what: "sync status",
            value: s.to_string(),
        })
    }
}

/// Study program a student or course belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRef {
    pub code: String,
    pub degree_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: i64,
    pub registration_number: String,
    pub full_name: String,
    pub sex: String,
    pub birth_date: String,
    pub birth_place: String,
    pub religion: String,
    pub citizenship: String,
    pub program: ProgramRef,
    pub status: String,
    pub entry_date: NaiveDate,
    pub active_term: i64,
    pub gpa: f64,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LecturerRecord {
    pub id: i64,
    pub national_id: Option<String>,
    pub full_name: String,
    pub sex: String,
    pub birth_date: String,
    pub birth_place: String,
    pub religion: String,
    pub functional_rank: String,
    pub employment_status: String,
    pub faculty_code: String,
    pub highest_degree: Option<String>,
    pub expertise: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub credits: i64,
    pub recommended_term: i64,
    pub course_kind: String,
    pub program_code: String,
    pub status: String,
}

/// Academic period a grade was awarded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRef {
    pub term_kind: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl PeriodRef {
    /// `2024` for a period inside one calendar year, `2024/2025` otherwise.
    pub fn academic_year_label(&self) -> String {
        let start = self.start_date.year();
        let end = self.end_date.year();
        if start == end {
            start.to_string()
        } else {
            format!("{}/{}", start, end)
        }
    }
}

pub const FINAL_GRADE_STATUS: &str = "final";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub id: i64,
    pub student_registration_number: String,
    pub course_code: String,
    pub numeric_score: Option<f64>,
    pub letter_grade: Option<String>,
    pub grade_index: Option<f64>,
    pub status: String,
    pub passed: bool,
    pub period: PeriodRef,
}

impl GradeRecord {
    pub fn is_final(&self) -> bool {
        self.status == FINAL_GRADE_STATUS
    }
}

/// Read-only view of one local entity at sync time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitySnapshot {
    Student(StudentRecord),
    Lecturer(LecturerRecord),
    Course(CourseRecord),
    Grade(GradeRecord),
}

impl EntitySnapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntitySnapshot::Student(_) => EntityKind::Student,
            EntitySnapshot::Lecturer(_) => EntityKind::Lecturer,
            EntitySnapshot::Course(_) => EntityKind::Course,
            EntitySnapshot::Grade(_) => EntityKind::Grade,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            EntitySnapshot::Student(s) => s.id,
            EntitySnapshot::Lecturer(l) => l.id,
            EntitySnapshot::Course(c) => c.id,
            EntitySnapshot::Grade(g) => g.id,
        }
    }

    /// Natural key shown to operators in batch reports.
    pub fn identity(&self) -> String {
        match self {
            EntitySnapshot::Student(s) => s.registration_number.clone(),
            EntitySnapshot::Lecturer(l) => l
                .national_id
                .clone()
                .unwrap_or_else(|| format!("lecturer#{}", l.id)),
            EntitySnapshot::Course(c) => c.code.clone(),
            EntitySnapshot::Grade(g) => {
                format!("{}/{}", g.student_registration_number, g.course_code)
            }
        }
    }
}

/// Result of one sync attempt for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub succeeded: bool,
    pub external_id: Option<String>,
    pub message: String,
}

impl SyncOutcome {
    pub fn success(external_id: Option<String>) -> Self {
        Self {
            succeeded: true,
            external_id,
            message: "synchronized".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            external_id: None,
            message: message.into(),
        }
    }
}

/// How a batch picks which local entities to synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// One entity by local id.
    Id(i64),
    /// Owning group: study program for students and courses, faculty for
    /// lecturers, academic period for grades.
    Group(i64),
    /// Final grades narrowed by academic period and/or student.
    Grades {
        period_id: Option<i64>,
        student_id: Option<i64>,
    },
    /// Every entity currently eligible for its kind.
    AllEligible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub kind: EntityKind,
    pub entity_id: i64,
    pub identity: String,
    pub status_label: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub total_processed: usize,
    pub total_succeeded: usize,
    pub total_failed: usize,
    pub items: Vec<BatchItem>,
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            total_processed: 0,
            total_succeeded: 0,
            total_failed: 0,
            items: Vec::new(),
        }
    }

    pub fn record(&mut self, snapshot: &EntitySnapshot, outcome: &SyncOutcome) {
        self.total_processed += 1;
        if outcome.succeeded {
            self.total_succeeded += 1;
        } else {
            self.total_failed += 1;
        }
        self.items.push(BatchItem {
            kind: snapshot.kind(),
            entity_id: snapshot.id(),
            identity: snapshot.identity(),
            status_label: if outcome.succeeded { "succeeded" } else { "failed" }.to_string(),
            message: outcome.message.clone(),
        });
    }

    /// Fold another report's counts and items into this one.
    pub fn merge(&mut self, other: BatchReport) {
        self.total_processed += other.total_processed;
        self.total_succeeded += other.total_succeeded;
        self.total_failed += other.total_failed;
        self.items.extend(other.items);
    }

    pub fn summary(&self) -> String {
        format!(
            "synchronization finished. succeeded: {}, failed: {}",
            self.total_succeeded, self.total_failed
        )
    }
}
