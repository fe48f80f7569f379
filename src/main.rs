mod backup;
mod config;
mod db;
mod grading;
mod ipc;
mod logging;
mod model;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    let cfg = match config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging is not up yet; the subscriber needs the level from the config.
            eprintln!("progressd: {e:#}; using default config");
            config::Config::default()
        }
    };
    logging::init(&cfg.log_level);

    let startup_workspace = cfg.workspace.clone();
    let mut state = ipc::AppState::new(cfg);
    if let Some(ws) = startup_workspace {
        if let Err(e) = ipc::open_workspace(&mut state, &ws) {
            tracing::error!(workspace = %ws.display(), "failed to open configured workspace: {e:#}");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "progressd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No id to answer to.
                tracing::warn!("unparseable request: {e}");
                json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, shutting down");
}
