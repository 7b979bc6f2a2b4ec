use crate::db;
use crate::ipc::handlers::setup::upload_limits;
use crate::ipc::helpers::{db_err, get_required_str, require_db_mut, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use academicsd::upload::{
    check_file, duplicate_usns, fingerprint, parse_csv, template, validate, ParsedUpload,
    ValidationResult, TEMPLATE_FILENAME,
};
use serde_json::{json, Value};

fn get_text(params: &Value) -> Result<&str, HandlerErr> {
    params
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing text"))
}

fn parse_and_validate(text: &str) -> Result<(ParsedUpload, ValidationResult), HandlerErr> {
    let parsed = parse_csv(text)?;
    let validation = validate(&parsed.rows, &parsed.headers);
    Ok((parsed, validation))
}

fn upload_template() -> Result<Value, HandlerErr> {
    Ok(json!({ "filename": TEMPLATE_FILENAME, "text": template() }))
}

fn upload_check_file(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let mime_type = get_required_str(params, "mimeType")?;
    let Some(size_bytes) = params.get("sizeBytes").and_then(|v| v.as_u64()) else {
        return Err(HandlerErr::new("bad_params", "missing/invalid sizeBytes"));
    };
    let limits = upload_limits(state.db.as_ref());
    check_file(&mime_type, size_bytes, &limits)?;
    Ok(json!({ "ok": true, "maxBytes": limits.max_bytes }))
}

fn upload_validate(params: &Value) -> Result<Value, HandlerErr> {
    let text = get_text(params)?;
    let (parsed, validation) = parse_and_validate(text)?;
    Ok(json!({
        "headers": parsed.headers,
        "rows": parsed.rows,
        "validation": validation,
        "duplicateUsns": duplicate_usns(&parsed.rows),
        "fingerprint": fingerprint(text),
    }))
}

fn upload_import(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let text = get_text(params)?;
    if let Some(mime_type) = params.get("mimeType").and_then(|v| v.as_str()) {
        let size_bytes = params
            .get("sizeBytes")
            .and_then(|v| v.as_u64())
            .unwrap_or(text.len() as u64);
        check_file(mime_type, size_bytes, &upload_limits(state.db.as_ref()))?;
    }
    let conn = require_db_mut(state)?;

    let (parsed, validation) = parse_and_validate(text)?;
    if !validation.is_clean() {
        return Err(
            HandlerErr::new("validation_failed", "Please fix all errors before uploading")
                .with_details(json!({ "validation": validation })),
        );
    }

    let digest = fingerprint(text);
    let duplicate_of =
        db::upload_batch_find(conn, &digest).map_err(|e| db_err("db_query_failed", e))?;
    let repeated = duplicate_usns(&parsed.rows);
    let outcome = db::import_students(conn, &parsed.rows, &digest)
        .map_err(|e| db_err("db_update_failed", e))?;
    tracing::info!(
        batch_id = %outcome.batch_id,
        rows = parsed.rows.len(),
        students = outcome.students,
        duplicate = duplicate_of.is_some(),
        "students imported"
    );

    Ok(json!({
        "imported": outcome.students,
        "rowCount": parsed.rows.len(),
        "duplicateUsns": repeated,
        "batchId": outcome.batch_id,
        "duplicateOf": duplicate_of,
        "warnings": validation.warnings,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "upload.template" => upload_template(),
        "upload.checkFile" => upload_check_file(state, &req.params),
        "upload.validate" => upload_validate(&req.params),
        "upload.import" => upload_import(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
