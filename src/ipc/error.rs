use serde_json::json;

use crate::model::ValidationError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Error carried out of a handler body and rendered once at the family
/// boundary.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn validation(errors: &[ValidationError]) -> Self {
        let mut fields = serde_json::Map::new();
        for e in errors {
            fields.insert(e.field().to_string(), json!(e.to_string()));
        }
        let message = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Self::new("validation_failed", message).with_details(json!({ "fields": fields }))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        if self.code.starts_with("db_") || self.code == "io_failed" || self.code == "backup_failed"
        {
            tracing::error!(request = id, code = self.code, "{}", self.message);
        } else {
            tracing::warn!(request = id, code = self.code, "{}", self.message);
        }
        err(id, self.code, self.message, self.details)
    }
}

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

/// Renders a handler outcome as a response line.
pub fn respond(id: &str, outcome: HandlerResult) -> serde_json::Value {
    match outcome {
        Ok(result) => ok(id, result),
        Err(e) => e.response(id),
    }
}
