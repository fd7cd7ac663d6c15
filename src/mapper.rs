//! Pure mapping from local snapshots to the registry's field set.
//!
//! Every function here is deterministic and free of I/O. Enumeration tables
//! accept both the local vocabulary stored by the records store and the
//! English aliases, matched case-insensitively.

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use crate::model::{CourseRecord, EntitySnapshot, GradeRecord, LecturerRecord, StudentRecord};

/// One outbound request body: registry field name to primitive value.
pub type ExternalPayload = Map<String, Value>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("unmapped sex value: {0:?}")]
    UnmappedSex(String),
    #[error("grade {0} is not final")]
    NonFinalGrade(i64),
}

const DEFAULT_STUDENT_STATUS: &str = "ACTIVE";
const DEFAULT_FUNCTIONAL_RANK: &str = "TIDAK_ADA";
const DEFAULT_HIGHEST_DEGREE: &str = "S2";

static STUDENT_STATUS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("aktif", "ACTIVE"),
        ("active", "ACTIVE"),
        ("tidak_aktif", "INACTIVE"),
        ("inactive", "INACTIVE"),
        ("lulus", "GRADUATED"),
        ("graduated", "GRADUATED"),
        ("do", "DROPPED_OUT"),
        ("dismissed", "DROPPED_OUT"),
        ("skorsing", "SUSPENDED"),
        ("suspended", "SUSPENDED"),
        ("cuti", "ON_LEAVE"),
        ("leave", "ON_LEAVE"),
    ])
});

static FUNCTIONAL_RANK: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("asisten_ahli", "ASISTEN_AHLI"),
        ("junior", "ASISTEN_AHLI"),
        ("lektor", "LEKTOR"),
        ("associate", "LEKTOR"),
        ("lektor_kepala", "LEKTOR_KEPALA"),
        ("senior_associate", "LEKTOR_KEPALA"),
        ("guru_besar", "GURU_BESAR"),
        ("professor", "GURU_BESAR"),
        ("tidak_ada", "TIDAK_ADA"),
        ("none", "TIDAK_ADA"),
    ])
});

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// `M` / `F`. There is no fallback: anything else is rejected.
pub fn map_sex(value: &str) -> Result<&'static str, MapError> {
    match normalize(value).as_str() {
        "laki-laki" | "male" => Ok("M"),
        "perempuan" | "female" => Ok("F"),
        _ => Err(MapError::UnmappedSex(value.to_string())),
    }
}

/// Unknown statuses fall back to `ACTIVE`.
pub fn map_student_status(value: &str) -> &'static str {
    STUDENT_STATUS
        .get(normalize(value).as_str())
        .copied()
        .unwrap_or(DEFAULT_STUDENT_STATUS)
}

/// Unknown ranks fall back to `TIDAK_ADA`.
pub fn map_functional_rank(value: &str) -> &'static str {
    FUNCTIONAL_RANK
        .get(normalize(value).as_str())
        .copied()
        .unwrap_or(DEFAULT_FUNCTIONAL_RANK)
}

pub fn map_course_status(value: &str) -> &'static str {
    match normalize(value).as_str() {
        "aktif" | "active" => "AKTIF",
        _ => "TIDAK_AKTIF",
    }
}

pub fn map_pass_flag(passed: bool) -> &'static str {
    if passed {
        "LULUS"
    } else {
        "TIDAK_LULUS"
    }
}

fn into_payload(value: Value) -> ExternalPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn build_student_payload(s: &StudentRecord) -> Result<ExternalPayload, MapError> {
    let sex = map_sex(&s.sex)?;
    Ok(into_payload(json!({
        "nim": s.registration_number,
        "nama_mahasiswa": s.full_name,
        "jenis_kelamin": sex,
        "tanggal_lahir": s.birth_date,
        "tempat_lahir": s.birth_place,
        "agama": s.religion.to_uppercase(),
        "kewarganegaraan": s.citizenship,
        "program_studi": s.program.code,
        "jenjang": s.program.degree_level,
        "status_mahasiswa": map_student_status(&s.status),
        "tanggal_masuk": s.entry_date.format("%Y-%m-%d").to_string(),
        "semester_berjalan": s.active_term,
        "ipk": s.gpa,
        "alamat": s.address.clone().unwrap_or_default(),
        "telepon": s.phone.clone().unwrap_or_default(),
    })))
}

pub fn build_lecturer_payload(l: &LecturerRecord) -> Result<ExternalPayload, MapError> {
    let sex = map_sex(&l.sex)?;
    Ok(into_payload(json!({
        "nidn": l.national_id,
        "nama_dosen": l.full_name,
        "jenis_kelamin": sex,
        "tanggal_lahir": l.birth_date,
        "tempat_lahir": l.birth_place,
        "agama": l.religion.to_uppercase(),
        "jabatan_fungsional": map_functional_rank(&l.functional_rank),
        "status_kepegawaian": l.employment_status.to_uppercase(),
        "fakultas": l.faculty_code,
        "pendidikan_terakhir": l
            .highest_degree
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_HIGHEST_DEGREE),
        "bidang_keahlian": l.expertise.join(","),
    })))
}

pub fn build_course_payload(c: &CourseRecord) -> ExternalPayload {
    into_payload(json!({
        "kode_mata_kuliah": c.code,
        "nama_mata_kuliah": c.name,
        "sks": c.credits,
        "semester": c.recommended_term,
        "jenis_mata_kuliah": c.course_kind.to_uppercase(),
        "program_studi": c.program_code,
        "status": map_course_status(&c.status),
    }))
}

/// Callers must check [`GradeRecord::is_final`] first; a draft grade here is
/// a programming error and comes back as [`MapError::NonFinalGrade`].
pub fn build_grade_payload(g: &GradeRecord) -> Result<ExternalPayload, MapError> {
    if !g.is_final() {
        return Err(MapError::NonFinalGrade(g.id));
    }
    Ok(into_payload(json!({
        "nim": g.student_registration_number,
        "kode_mata_kuliah": g.course_code,
        "nilai_angka": g.numeric_score,
        "nilai_huruf": g.letter_grade,
        "nilai_indeks": g.grade_index,
        "semester": g.period.term_kind,
        "tahun_akademik": g.period.academic_year_label(),
        "status_lulus": map_pass_flag(g.passed),
    })))
}

pub fn build_payload(snapshot: &EntitySnapshot) -> Result<ExternalPayload, MapError> {
    match snapshot {
        EntitySnapshot::Student(s) => build_student_payload(s),
        EntitySnapshot::Lecturer(l) => build_lecturer_payload(l),
        EntitySnapshot::Course(c) => Ok(build_course_payload(c)),
        EntitySnapshot::Grade(g) => build_grade_payload(g),
    }
}
