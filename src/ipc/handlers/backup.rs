use crate::backup;
use crate::ipc::error::{respond, HandlerErr, HandlerResult};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    opt_str(&req.params, "workspacePath")?
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn handle_export_workspace(state: &mut AppState, req: &Request) -> HandlerResult {
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);
    let workspace = target_workspace(state, req)?;

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!(error = %e, "checkpoint before export failed");
        }
    }

    let export = backup::export_workspace_bundle(&workspace, &out_path).map_err(|e| {
        HandlerErr::new("backup_failed", format!("{e:#}"))
            .with_details(json!({ "path": out_path.to_string_lossy() }))
    })?;
    tracing::info!(
        path = %out_path.display(),
        sha256 = %export.db_sha256,
        "workspace exported"
    );
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256,
    }))
}

fn handle_import_workspace(state: &mut AppState, req: &Request) -> HandlerResult {
    let in_path = PathBuf::from(required_str(&req.params, "inPath")?);
    let workspace = target_workspace(state, req)?;
    if !in_path.is_file() {
        return Err(HandlerErr::not_found("backup file")
            .with_details(json!({ "path": in_path.to_string_lossy() })));
    }

    // The open handle must go before its file is replaced.
    let replacing_current = state.workspace.as_deref() == Some(workspace.as_path());
    if replacing_current {
        state.db = None;
    }

    let import = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(import) => import,
        Err(e) => {
            // Keep serving whatever db is still on disk.
            if replacing_current {
                if let Err(reopen) = open_workspace(state, &workspace) {
                    tracing::error!(error = %reopen, "reopen after failed import failed");
                }
            }
            return Err(HandlerErr::new("backup_failed", format!("{e:#}"))
                .with_details(json!({ "path": in_path.to_string_lossy() })));
        }
    };
    open_workspace(state, &workspace)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;

    tracing::info!(
        workspace = %workspace.display(),
        format = %import.bundle_format_detected,
        "workspace imported"
    );
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "backup.exportWorkspace" => handle_export_workspace(state, req),
        "backup.importWorkspace" => handle_import_workspace(state, req),
        _ => return None,
    };
    Some(respond(&req.id, outcome))
}
