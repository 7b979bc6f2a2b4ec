use crate::db;
use crate::ipc::helpers::{db_err, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn students_list(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let students = db::students_list(conn).map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(respond(req, students_list(state))),
        _ => None,
    }
}
