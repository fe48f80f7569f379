use rusqlite::Connection;

use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent, null, and blank strings all read as `None`.
pub fn opt_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
        },
    }
}

/// Accepts integers and integer-valued strings (`"3"`), as form inputs send.
pub fn opt_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    let bad = || HandlerErr::bad_params(format!("{} must be an integer", key));
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            if let Some(n) = v.as_i64() {
                return Ok(Some(n));
            }
            if let Some(f) = v.as_f64() {
                if f.fract() == 0.0 {
                    return Ok(Some(f as i64));
                }
                return Err(bad());
            }
            match v.as_str().map(str::trim) {
                Some("") => Ok(None),
                Some(s) => s.parse::<i64>().map(Some).map_err(|_| bad()),
                None => Err(bad()),
            }
        }
    }
}

pub fn opt_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    let bad = || HandlerErr::bad_params(format!("{} must be a number", key));
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            if let Some(f) = v.as_f64() {
                return Ok(Some(f));
            }
            match v.as_str().map(str::trim) {
                Some("") => Ok(None),
                Some(s) => s.parse::<f64>().map(Some).map_err(|_| bad()),
                None => Err(bad()),
            }
        }
    }
}

/// The `patch` object of an update request. Keys absent from it are left
/// untouched.
pub fn patch_obj(req: &Request) -> Result<&serde_json::Value, HandlerErr> {
    req.params
        .get("patch")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch"))
}
