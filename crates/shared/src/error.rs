use serde::{Deserialize, Serialize};

/// Machine-readable error class in backend error bodies. Older backend
/// revisions omit the field, hence the `Unknown` default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[default]
    Unknown,
    Unauthorized,
    InsufficientCredits,
    Validation,
    NotFound,
    Internal,
}

/// Error body the phone backend returns on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
