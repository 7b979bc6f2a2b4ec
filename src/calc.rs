use crate::error::GradeError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Internal and external marks are each out of 100; `total` is out of 200.
pub const COMBINED_SCALE: f64 = 200.0;
pub const MARK_MAX: f64 = 100.0;
pub const CREDITS_MAX: f64 = 5.0;
pub const DEFAULT_SGPA_DROP_THRESHOLD: f64 = 0.4;
pub const DEFAULT_ATTENDANCE_THRESHOLD: f64 = 75.0;

const IA_WEIGHT: f64 = 0.4;
const LAB_WEIGHT: f64 = 0.3;
const OTHER_WEIGHT: f64 = 0.3;

/// Numeric course fields, in edit-table column order.
pub const MARK_FIELDS: [&str; 7] = [
    "attendancePercent",
    "ia1",
    "ia2",
    "ia3",
    "labMarks",
    "otherMarks",
    "externalMarks",
];

/// Round-half-up to an integer: `floor(x + 0.5)`.
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

pub fn round_2_decimals(x: f64) -> f64 {
    round_half_up(x * 100.0) / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LetterGrade {
    S,
    A,
    B,
    C,
    D,
    E,
    F,
}

impl LetterGrade {
    /// Highest threshold first; the first band the percentage reaches wins.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 90.0 {
            LetterGrade::S
        } else if percentage >= 80.0 {
            LetterGrade::A
        } else if percentage >= 70.0 {
            LetterGrade::B
        } else if percentage >= 60.0 {
            LetterGrade::C
        } else if percentage >= 50.0 {
            LetterGrade::D
        } else if percentage >= 40.0 {
            LetterGrade::E
        } else {
            LetterGrade::F
        }
    }

    pub fn grade_points(self) -> i64 {
        match self {
            LetterGrade::S => 10,
            LetterGrade::A => 9,
            LetterGrade::B => 8,
            LetterGrade::C => 7,
            LetterGrade::D => 6,
            LetterGrade::E => 5,
            LetterGrade::F => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LetterGrade::S => "S",
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::E => "E",
            LetterGrade::F => "F",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    #[serde(default)]
    pub sl_no: i64,
    #[serde(default)]
    pub course_code: String,
    #[serde(default)]
    pub course_name: String,
    #[serde(default)]
    pub attendance_percent: f64,
    #[serde(default)]
    pub ia1: f64,
    #[serde(default)]
    pub ia2: f64,
    #[serde(default)]
    pub ia3: f64,
    #[serde(default)]
    pub lab_marks: f64,
    #[serde(default)]
    pub other_marks: f64,
    #[serde(default)]
    pub external_marks: f64,
    #[serde(default)]
    pub credits: f64,

    // Derived.
    #[serde(default)]
    pub total_internal: i64,
    #[serde(default)]
    pub total: i64,
    /// `None` until the row is first recomputed.
    #[serde(default)]
    pub letter_grade: Option<LetterGrade>,
    #[serde(default)]
    pub grade_points: i64,
}

impl CourseRecord {
    /// Build a record from loosely typed JSON (strings, numbers, nulls).
    ///
    /// Marks that are missing, blank or non-numeric become 0 unless `strict`
    /// is set, in which case a non-numeric value is an `InvalidMark` error.
    /// Derived fields in the input are ignored and recomputed.
    pub fn from_json(raw: &Value, strict: bool) -> Result<CourseRecord, GradeError> {
        let mut course = CourseRecord::default();
        let empty = Map::new();
        let obj = raw.as_object().unwrap_or(&empty);
        course.sl_no = obj.get("slNo").and_then(|v| v.as_i64()).unwrap_or(0);
        for (k, v) in obj {
            match k.as_str() {
                "courseCode" | "courseName" => course.set_text(k, v),
                "credits" => course.credits = coerce_mark(k, Some(v), strict)?,
                f if MARK_FIELDS.contains(&f) => {
                    let n = coerce_mark(k, Some(v), strict)?;
                    course.set_mark(k, n);
                }
                _ => {}
            }
        }
        Ok(recompute_course(&course))
    }

    /// Apply a field patch the way the semester edit table does: text fields
    /// are stored as-is, numeric fields are coerced, then derived fields are
    /// recomputed.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>, strict: bool) -> Result<(), GradeError> {
        let mut next = self.clone();
        for (k, v) in patch {
            match k.as_str() {
                "courseCode" | "courseName" => next.set_text(k, v),
                "credits" => next.credits = coerce_mark(k, Some(v), strict)?,
                f if MARK_FIELDS.contains(&f) => {
                    let n = coerce_mark(k, Some(v), strict)?;
                    next.set_mark(k, n);
                }
                _ => return Err(GradeError::UnknownField(k.clone())),
            }
        }
        *self = recompute_course(&next);
        Ok(())
    }

    fn set_text(&mut self, field: &str, v: &Value) {
        let s = match v {
            Value::String(s) => s.trim().to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if field == "courseCode" {
            self.course_code = s;
        } else {
            self.course_name = s;
        }
    }

    fn set_mark(&mut self, field: &str, n: f64) {
        match field {
            "attendancePercent" => self.attendance_percent = n,
            "ia1" => self.ia1 = n,
            "ia2" => self.ia2 = n,
            "ia3" => self.ia3 = n,
            "labMarks" => self.lab_marks = n,
            "otherMarks" => self.other_marks = n,
            "externalMarks" => self.external_marks = n,
            _ => {}
        }
    }

    fn mark(&self, field: &str) -> f64 {
        match field {
            "attendancePercent" => self.attendance_percent,
            "ia1" => self.ia1,
            "ia2" => self.ia2,
            "ia3" => self.ia3,
            "labMarks" => self.lab_marks,
            "otherMarks" => self.other_marks,
            "externalMarks" => self.external_marks,
            _ => 0.0,
        }
    }

    pub fn percentage(&self) -> f64 {
        self.total as f64 / COMBINED_SCALE * 100.0
    }

    /// Advisory range flags keyed by field name. Never blocks a recompute.
    pub fn field_errors(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for f in MARK_FIELDS {
            let v = self.mark(f);
            if !(0.0..=MARK_MAX).contains(&v) {
                out.insert(f.to_string(), "Must be 0-100".to_string());
            }
        }
        if !(0.0..=CREDITS_MAX).contains(&self.credits) {
            out.insert("credits".to_string(), "Must be 0-5".to_string());
        }
        out
    }
}

/// Parse one raw mark. Numbers pass through; numeric strings are parsed;
/// null, blank strings and (outside strict mode) anything else become 0.
pub fn coerce_mark(field: &str, raw: Option<&Value>, strict: bool) -> Result<f64, GradeError> {
    let parsed = match raw {
        None | Some(Value::Null) => return Ok(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(0.0);
            }
            t.parse::<f64>().ok()
        }
        Some(_) => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ if strict => Err(GradeError::InvalidMark {
            field: field.to_string(),
            raw: raw.map(value_text).unwrap_or_default(),
        }),
        _ => Ok(0.0),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Mean of the best two of three internal assessments.
pub fn top_two_ia_average(ia1: f64, ia2: f64, ia3: f64) -> f64 {
    let mut scores = [ia1, ia2, ia3];
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    (scores[0] + scores[1]) / 2.0
}

pub fn recompute_course(course: &CourseRecord) -> CourseRecord {
    let mut out = course.clone();
    let avg_ia = top_two_ia_average(course.ia1, course.ia2, course.ia3);
    let internal =
        avg_ia * IA_WEIGHT + course.lab_marks * LAB_WEIGHT + course.other_marks * OTHER_WEIGHT;
    out.total_internal = round_half_up(internal) as i64;
    // Fractional external marks round into the integer total.
    out.total = round_half_up(out.total_internal as f64 + course.external_marks) as i64;

    let grade = LetterGrade::from_percentage(out.percentage());
    out.letter_grade = Some(grade);
    out.grade_points = grade.grade_points();
    out
}

/// Credit-weighted grade point average, two decimals. Zero when there are
/// no credits to weight by.
pub fn recompute_sgpa(courses: &[CourseRecord]) -> f64 {
    let mut total_credits = 0.0_f64;
    let mut weighted_sum = 0.0_f64;
    for c in courses {
        total_credits += c.credits;
        weighted_sum += c.grade_points as f64 * c.credits;
    }
    if total_credits <= 0.0 {
        return 0.0;
    }
    round_2_decimals(weighted_sum / total_credits)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterRecord {
    pub student_id: String,
    pub semester: i64,
    pub academic_year: String,
    pub courses: Vec<CourseRecord>,
    pub sgpa: f64,
    /// Mean course attendance, rounded to a whole percent.
    #[serde(default)]
    pub overall_attendance: i64,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LowAttendance {
    pub sl_no: i64,
    pub course_code: String,
    pub course_name: String,
    pub attendance_percent: f64,
    pub deficit: f64,
}

/// Mean of `attendancePercent` over every row, 0 for an empty semester.
pub fn overall_attendance(courses: &[CourseRecord]) -> i64 {
    if courses.is_empty() {
        return 0;
    }
    let sum: f64 = courses.iter().map(|c| c.attendance_percent).sum();
    round_half_up(sum / courses.len() as f64) as i64
}

impl SemesterRecord {
    pub fn empty(student_id: &str, semester: i64, academic_year: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            semester,
            academic_year: academic_year.to_string(),
            courses: Vec::new(),
            sgpa: 0.0,
            overall_attendance: 0,
            updated_at: None,
        }
    }

    pub fn total_credits(&self) -> f64 {
        self.courses.iter().map(|c| c.credits).sum()
    }

    /// Recompute every course, renumber rows and refresh the SGPA.
    pub fn recompute_all(&mut self) {
        for (i, c) in self.courses.iter_mut().enumerate() {
            *c = recompute_course(c);
            c.sl_no = i as i64 + 1;
        }
        self.refresh_totals();
    }

    fn refresh_totals(&mut self) {
        self.sgpa = recompute_sgpa(&self.courses);
        self.overall_attendance = overall_attendance(&self.courses);
    }

    /// Append an empty, not yet graded row. Returns its index.
    pub fn add_course(&mut self) -> usize {
        self.courses.push(CourseRecord {
            sl_no: self.courses.len() as i64 + 1,
            ..CourseRecord::default()
        });
        self.refresh_totals();
        self.courses.len() - 1
    }

    pub fn update_course(
        &mut self,
        index: usize,
        patch: &Map<String, Value>,
        strict: bool,
    ) -> Result<&CourseRecord, GradeError> {
        let Some(course) = self.courses.get_mut(index) else {
            return Err(GradeError::NoSuchCourse { index });
        };
        course.apply_patch(patch, strict)?;
        self.refresh_totals();
        Ok(&self.courses[index])
    }

    pub fn remove_course(&mut self, index: usize) -> Result<CourseRecord, GradeError> {
        if index >= self.courses.len() {
            return Err(GradeError::NoSuchCourse { index });
        }
        let removed = self.courses.remove(index);
        for (i, c) in self.courses.iter_mut().enumerate() {
            c.sl_no = i as i64 + 1;
        }
        self.refresh_totals();
        Ok(removed)
    }

    /// Graded rows whose attendance is below `threshold`. Rows added but
    /// never filled in are skipped.
    pub fn low_attendance_courses(&self, threshold: f64) -> Vec<LowAttendance> {
        self.courses
            .iter()
            .filter(|c| c.letter_grade.is_some() && c.attendance_percent < threshold)
            .map(|c| LowAttendance {
                sl_no: c.sl_no,
                course_code: c.course_code.clone(),
                course_name: c.course_name.clone(),
                attendance_percent: c.attendance_percent,
                deficit: threshold - c.attendance_percent,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CgpaSummary {
    pub cgpa: f64,
    pub total_credits: f64,
    pub semester_count: usize,
}

/// Cumulative GPA weighted by course credits across all semesters.
pub fn compute_cgpa(semesters: &[SemesterRecord]) -> CgpaSummary {
    let mut total_credits = 0.0_f64;
    let mut weighted_sum = 0.0_f64;
    for s in semesters {
        for c in &s.courses {
            total_credits += c.credits;
            weighted_sum += c.grade_points as f64 * c.credits;
        }
    }
    let cgpa = if total_credits > 0.0 {
        round_2_decimals(weighted_sum / total_credits)
    } else {
        0.0
    };
    CgpaSummary {
        cgpa,
        total_credits,
        semester_count: semesters.len(),
    }
}

/// True when the latest semester's SGPA fell by at least `threshold`
/// relative to the semester before it.
pub fn detect_sgpa_drop(semesters: &[SemesterRecord], threshold: f64) -> bool {
    if semesters.len() < 2 {
        return false;
    }
    let mut ordered: Vec<&SemesterRecord> = semesters.iter().collect();
    ordered.sort_by(|a, b| b.semester.cmp(&a.semester));
    let drop = ordered[1].sgpa - ordered[0].sgpa;
    drop >= threshold
}

/// Academic years start in July: `2024-2025` runs Jul 2024 .. Jun 2025.
pub fn academic_year_for(date: NaiveDate) -> String {
    let y = date.year();
    if date.month() >= 7 {
        format!("{}-{}", y, y + 1)
    } else {
        format!("{}-{}", y - 1, y)
    }
}

pub fn is_academic_year(s: &str) -> bool {
    let Some((a, b)) = s.split_once('-') else {
        return false;
    };
    a.len() == 4
        && b.len() == 4
        && a.chars().all(|c| c.is_ascii_digit())
        && b.chars().all(|c| c.is_ascii_digit())
}
