use crate::db;
use crate::ipc::handlers::grades::strict_marks;
use crate::ipc::handlers::setup::grading_settings;
use crate::ipc::helpers::{
    db_err, get_index, get_required_str, get_semester, require_db, require_db_mut, respond,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use academicsd::calc::{
    academic_year_for, compute_cgpa, detect_sgpa_drop, is_academic_year, CourseRecord,
    SemesterRecord,
};
use rusqlite::Connection;
use serde_json::{json, Value};

fn current_academic_year() -> String {
    academic_year_for(chrono::Local::now().date_naive())
}

fn load(conn: &Connection, student_id: &str, semester: i64) -> Result<Option<SemesterRecord>, HandlerErr> {
    db::semester_load(conn, student_id, semester).map_err(|e| db_err("db_query_failed", e))
}

fn load_existing(conn: &Connection, student_id: &str, semester: i64) -> Result<SemesterRecord, HandlerErr> {
    load(conn, student_id, semester)?.ok_or_else(|| {
        HandlerErr::new("not_found", "semester not found")
            .with_details(json!({ "studentId": student_id, "semester": semester }))
    })
}

fn store(conn: &mut Connection, record: &mut SemesterRecord) -> Result<(), HandlerErr> {
    db::semester_store(conn, record).map_err(|e| db_err("db_update_failed", e))?;
    tracing::debug!(
        student_id = %record.student_id,
        semester = record.semester,
        sgpa = record.sgpa,
        courses = record.courses.len(),
        "semester stored"
    );
    Ok(())
}

fn field_errors(record: &SemesterRecord) -> Vec<Value> {
    record
        .courses
        .iter()
        .map(|c| json!(c.field_errors()))
        .collect()
}

fn semesters_get(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let semester = get_semester(params)?;
    let (record, exists) = match load(conn, &student_id, semester)? {
        Some(r) => (r, true),
        None => (
            SemesterRecord::empty(&student_id, semester, &current_academic_year()),
            false,
        ),
    };
    Ok(json!({ "semester": record, "exists": exists }))
}

fn semesters_save(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let strict = strict_marks(state, params);
    let conn = require_db_mut(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let semester = get_semester(params)?;
    let Some(raw_courses) = params.get("courses").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "courses must be an array"));
    };

    let existing = load(conn, &student_id, semester)?;
    let academic_year = match params.get("academicYear").and_then(|v| v.as_str()) {
        Some(y) if is_academic_year(y.trim()) => y.trim().to_string(),
        Some(y) => {
            return Err(HandlerErr::new("bad_params", "academicYear must look like YYYY-YYYY")
                .with_details(json!({ "academicYear": y })))
        }
        None => existing
            .map(|r| r.academic_year)
            .unwrap_or_else(current_academic_year),
    };

    let courses = raw_courses
        .iter()
        .map(|c| CourseRecord::from_json(c, strict))
        .collect::<Result<Vec<_>, _>>()?;
    let mut record = SemesterRecord {
        courses,
        ..SemesterRecord::empty(&student_id, semester, &academic_year)
    };
    record.recompute_all();
    store(conn, &mut record)?;

    Ok(json!({ "semester": record, "fieldErrors": field_errors(&record) }))
}

fn semesters_list(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let settings = grading_settings(state.db.as_ref());
    let conn = require_db(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let semesters =
        db::semesters_for_student(conn, &student_id).map_err(|e| db_err("db_query_failed", e))?;
    let summary = compute_cgpa(&semesters);
    let sgpa_drop = detect_sgpa_drop(&semesters, settings.sgpa_drop_threshold);
    let low_attendance: Vec<Value> = semesters
        .iter()
        .filter_map(|s| {
            let courses = s.low_attendance_courses(settings.attendance_threshold);
            (!courses.is_empty()).then(|| json!({ "semester": s.semester, "courses": courses }))
        })
        .collect();
    Ok(json!({
        "semesters": semesters,
        "summary": summary,
        "sgpaDrop": sgpa_drop,
        "attendanceThreshold": settings.attendance_threshold,
        "lowAttendance": low_attendance,
    }))
}

fn semesters_delete(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let semester = get_semester(params)?;
    let deleted = db::semester_delete(conn, &student_id, semester)
        .map_err(|e| db_err("db_update_failed", e))?;
    if !deleted {
        return Err(HandlerErr::new("not_found", "semester not found")
            .with_details(json!({ "studentId": student_id, "semester": semester })));
    }
    tracing::info!(student_id = %student_id, semester, "semester deleted");

    let remaining =
        db::semesters_for_student(conn, &student_id).map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "deleted": true, "summary": compute_cgpa(&remaining) }))
}

fn course_add(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db_mut(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let semester = get_semester(params)?;
    let mut record = load(conn, &student_id, semester)?.unwrap_or_else(|| {
        SemesterRecord::empty(&student_id, semester, &current_academic_year())
    });
    let index = record.add_course();
    store(conn, &mut record)?;
    Ok(json!({ "index": index, "semester": record }))
}

fn course_update(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let strict = strict_marks(state, params);
    let conn = require_db_mut(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let semester = get_semester(params)?;
    let index = get_index(params, "index")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "patch must be an object"));
    };

    let mut record = load_existing(conn, &student_id, semester)?;
    let course = record.update_course(index, patch, strict)?.clone();
    store(conn, &mut record)?;
    Ok(json!({
        "course": course,
        "fieldErrors": course.field_errors(),
        "sgpa": record.sgpa,
        "totalCredits": record.total_credits(),
    }))
}

fn course_remove(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db_mut(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let semester = get_semester(params)?;
    let index = get_index(params, "index")?;

    let mut record = load_existing(conn, &student_id, semester)?;
    let removed = record.remove_course(index)?;
    store(conn, &mut record)?;
    Ok(json!({ "removed": removed, "semester": record }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "semesters.get" => semesters_get(state, &req.params),
        "semesters.save" => semesters_save(state, &req.params),
        "semesters.list" => semesters_list(state, &req.params),
        "semesters.delete" => semesters_delete(state, &req.params),
        "semesters.courseAdd" => course_add(state, &req.params),
        "semesters.courseUpdate" => course_update(state, &req.params),
        "semesters.courseRemove" => course_remove(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
