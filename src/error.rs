//! Error surface of the diagnosis core.
//!
//! Validation failures reject the whole request; the caller maps
//! [`DiagnoseError::code`] and [`DiagnoseError::details`] to its transport.

use serde::Serialize;
use thiserror::Error;

/// Errors returned by the diagnose entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiagnoseError {
    #[error("minimum {minimum} points required, received {received}")]
    TooFewPoints { received: usize, minimum: usize },

    #[error("maximum {limit} points per request, received {received}")]
    TooManyPoints { received: usize, limit: usize },

    #[error("invalid points at indices {indices:?} (check lat, lon, time ranges)")]
    InvalidPoints { indices: Vec<usize> },

    #[error("diagnosis cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Structured error details for the caller's error response.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalid_indices: Vec<usize>,
}

impl DiagnoseError {
    /// Stable snake_case error code.
    pub fn code(&self) -> &'static str {
        match self {
            DiagnoseError::TooFewPoints { .. } => "too_few_points",
            DiagnoseError::TooManyPoints { .. } => "too_many_points",
            DiagnoseError::InvalidPoints { .. } => "invalid_points",
            DiagnoseError::Cancelled => "cancelled",
            DiagnoseError::Internal(_) => "internal_error",
        }
    }

    pub fn details(&self) -> ErrorDetails {
        let message = self.to_string();
        match self {
            DiagnoseError::TooFewPoints { received, minimum } => ErrorDetails {
                field: Some("points".to_string()),
                message,
                limit: Some(*minimum),
                received: Some(*received),
                ..Default::default()
            },
            DiagnoseError::TooManyPoints { received, limit } => ErrorDetails {
                field: Some("points".to_string()),
                message,
                limit: Some(*limit),
                received: Some(*received),
                ..Default::default()
            },
            DiagnoseError::InvalidPoints { indices } => ErrorDetails {
                field: Some("points".to_string()),
                message,
                invalid_indices: indices.clone(),
                ..Default::default()
            },
            DiagnoseError::Cancelled | DiagnoseError::Internal(_) => ErrorDetails {
                message,
                ..Default::default()
            },
        }
    }
}
