use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use academicsd::calc::{DEFAULT_ATTENDANCE_THRESHOLD, DEFAULT_SGPA_DROP_THRESHOLD};
use academicsd::upload::{FileLimits, DEFAULT_ALLOWED_MIME_TYPES, DEFAULT_MAX_FILE_BYTES};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const MAX_FILE_BYTES_CEILING: i64 = 50 * 1024 * 1024;

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Upload,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Upload => "setup.upload",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "strictMarks": false,
            "sgpaDropThreshold": DEFAULT_SGPA_DROP_THRESHOLD,
            "attendanceThreshold": DEFAULT_ATTENDANCE_THRESHOLD
        }),
        SetupSection::Upload => json!({
            "maxFileBytes": DEFAULT_MAX_FILE_BYTES,
            "allowedMimeTypes": DEFAULT_ALLOWED_MIME_TYPES
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_mime_list(v: &Value, key: &str) -> Result<Vec<String>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .map(|s| s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("{} must be an array of strings", key))?;
        if s.is_empty() || s.len() > 128 {
            return Err(format!("{} entries must be 1..=128 characters", key));
        }
        out.push(s);
    }
    if out.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(out)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "strictMarks" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "sgpaDropThreshold" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, 10.0)?));
                }
                "attendanceThreshold" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Upload => match k.as_str() {
                "maxFileBytes" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, MAX_FILE_BYTES_CEILING)?),
                    );
                }
                "allowedMimeTypes" => {
                    obj.insert(k.clone(), json!(parse_mime_list(v, k)?));
                }
                _ => return Err(format!("unknown upload field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// Load a section, or its defaults when no workspace is open or the stored
/// value can't be read.
fn section_or_default(conn: Option<&Connection>, section: SetupSection) -> Value {
    let Some(conn) = conn else {
        return default_section(section);
    };
    match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(section = section.key(), error = %e, "settings unreadable, using defaults");
            default_section(section)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradingSettings {
    pub strict_marks: bool,
    pub sgpa_drop_threshold: f64,
    pub attendance_threshold: f64,
}

pub fn grading_settings(conn: Option<&Connection>) -> GradingSettings {
    let v = section_or_default(conn, SetupSection::Grading);
    GradingSettings {
        strict_marks: v.get("strictMarks").and_then(|b| b.as_bool()).unwrap_or(false),
        sgpa_drop_threshold: v
            .get("sgpaDropThreshold")
            .and_then(|n| n.as_f64())
            .unwrap_or(DEFAULT_SGPA_DROP_THRESHOLD),
        attendance_threshold: v
            .get("attendanceThreshold")
            .and_then(|n| n.as_f64())
            .unwrap_or(DEFAULT_ATTENDANCE_THRESHOLD),
    }
}

pub fn upload_limits(conn: Option<&Connection>) -> FileLimits {
    let v = section_or_default(conn, SetupSection::Upload);
    let mut limits = FileLimits::default();
    if let Some(n) = v.get("maxFileBytes").and_then(|n| n.as_u64()) {
        limits.max_bytes = n;
    }
    if let Some(arr) = v.get("allowedMimeTypes").and_then(|a| a.as_array()) {
        limits.allowed_mime_types = arr
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect();
    }
    limits
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let upload = match load_section(conn, SetupSection::Upload) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "grading": grading,
            "upload": upload
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "settings updated");
    ok(&req.id, json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
