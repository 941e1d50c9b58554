use serde::Serialize;
use thiserror::Error;

/// Errors that abort an entire reconciliation pass.
///
/// Everything else (classification failures, rejected submissions, one bad
/// receipt) is handled inside the per-receipt processing boundary and never
/// surfaces here.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("associate request rejected: {reason}")]
    AssociationFailed { reason: String },

    #[error("fiscalization service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    #[error("database error: {0}")]
    Database(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(anyhow::Error),

    #[error("lock error: {0}")]
    Lock(#[from] std::io::Error),
}

impl PassError {
    /// Error kind as the invoking panel protocol names it.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AssociationFailed { .. } => "failed_associate",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Database(_) => "database_error",
            Self::Config(_) => "config_error",
            Self::Lock(_) => "lock_error",
        }
    }

    /// Renders the structured error document the panel reads from stdout.
    pub fn to_document(&self) -> ErrorDocument {
        let mut params = serde_json::Map::new();
        let reason = match self {
            Self::AssociationFailed { reason } | Self::ServiceUnavailable { reason } => {
                reason.clone()
            }
            Self::Database(err) | Self::Config(err) => err.to_string(),
            Self::Lock(err) => err.to_string(),
        };
        params.insert("reason".to_string(), serde_json::Value::String(reason));

        ErrorDocument {
            error: ErrorBody {
                kind: self.kind().to_string(),
                params,
            },
        }
    }
}

/// Structured error document for pass-level failures.
#[derive(Debug, Serialize)]
pub struct ErrorDocument {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ErrorDocument {
    pub fn render(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!(r#"{{"error":{{"type":"{}"}}}}"#, self.error.kind))
    }
}
