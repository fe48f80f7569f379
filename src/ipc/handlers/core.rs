use crate::db;
use crate::ipc::error::{respond, HandlerErr, HandlerResult};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Opens (creating if needed) the workspace database and makes it current.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    tracing::info!(workspace = %path.display(), "workspace opened");
    Ok(())
}

fn handle_health(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(json!({
        "message": "Learning Progress Monitor API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
    }))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let path = PathBuf::from(required_str(&req.params, "path")?);
    open_workspace(state, &path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(&req.id, outcome))
}
