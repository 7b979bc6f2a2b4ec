use crate::ipc::handlers::setup::grading_settings;
use crate::ipc::helpers::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use academicsd::calc::{recompute_sgpa, CourseRecord};
use serde_json::{json, Value};

/// Per-request `strict` wins over the workspace `grading.strictMarks` setting.
pub fn strict_marks(state: &AppState, params: &Value) -> bool {
    params
        .get("strict")
        .and_then(|v| v.as_bool())
        .unwrap_or_else(|| grading_settings(state.db.as_ref()).strict_marks)
}

fn recompute_course(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(raw) = params.get("course").filter(|v| v.is_object()) else {
        return Err(HandlerErr::new("bad_params", "course must be an object"));
    };
    let course = CourseRecord::from_json(raw, strict_marks(state, params))?;
    Ok(json!({
        "course": course,
        "percentage": course.percentage(),
        "fieldErrors": course.field_errors(),
    }))
}

fn recompute_semester_sgpa(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(raw) = params.get("courses").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "courses must be an array"));
    };
    let strict = strict_marks(state, params);
    let courses = raw
        .iter()
        .map(|c| CourseRecord::from_json(c, strict))
        .collect::<Result<Vec<_>, _>>()?;
    let total_credits: f64 = courses.iter().map(|c| c.credits).sum();
    Ok(json!({
        "sgpa": recompute_sgpa(&courses),
        "totalCredits": total_credits,
        "courses": courses,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.recomputeCourse" => Some(respond(req, recompute_course(state, &req.params))),
        "grades.recomputeSgpa" => Some(respond(req, recompute_semester_sgpa(state, &req.params))),
        _ => None,
    }
}
