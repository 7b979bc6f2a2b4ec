use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

pub const SEMESTER_MIN: i64 = 1;
pub const SEMESTER_MAX: i64 = 8;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<academicsd::error::GradeError> for HandlerErr {
    fn from(e: academicsd::error::GradeError) -> Self {
        let details = match &e {
            academicsd::error::GradeError::InvalidMark { field, raw } => {
                Some(json!({ "field": field, "raw": raw }))
            }
            academicsd::error::GradeError::NoSuchCourse { index } => {
                Some(json!({ "index": index }))
            }
            academicsd::error::GradeError::UnknownField(f) => Some(json!({ "field": f })),
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<academicsd::error::UploadError> for HandlerErr {
    fn from(e: academicsd::error::UploadError) -> Self {
        let details = match &e {
            academicsd::error::UploadError::MalformedFile { non_blank_lines } => {
                json!({ "nonBlankLines": non_blank_lines })
            }
            academicsd::error::UploadError::UnsupportedFileType { mime_type } => {
                json!({ "mimeType": mime_type })
            }
            academicsd::error::UploadError::FileTooLarge {
                size_bytes,
                max_bytes,
            } => json!({ "sizeBytes": size_bytes, "maxBytes": max_bytes }),
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: Some(details),
        }
    }
}

pub fn require_db<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_db_mut<'a>(state: &'a mut AppState) -> Result<&'a mut Connection, HandlerErr> {
    state
        .db
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_semester(params: &Value) -> Result<i64, HandlerErr> {
    let n = params
        .get("semester")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing/invalid semester"))?;
    if !(SEMESTER_MIN..=SEMESTER_MAX).contains(&n) {
        return Err(HandlerErr::new(
            "bad_params",
            format!("semester must be in {}..={}", SEMESTER_MIN, SEMESTER_MAX),
        )
        .with_details(json!({ "semester": n })));
    }
    Ok(n)
}

pub fn get_index(params: &Value, key: &str) -> Result<usize, HandlerErr> {
    match params.get(key).and_then(|v| v.as_u64()) {
        Some(v) => Ok(v as usize),
        None => Err(HandlerErr::new("bad_params", format!("missing/invalid {}", key))),
    }
}

pub fn db_err(code: &'static str, e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new(code, e.to_string())
}

/// Unwrap a handler body into the response envelope.
pub fn respond(req: &Request, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => crate::ipc::error::ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}
