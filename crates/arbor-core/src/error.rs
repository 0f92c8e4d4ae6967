use thiserror::Error;

use crate::group::AppendError;

#[derive(Debug, Error)]
pub enum ArborError {
    #[error("invalid assignment '{0}': expected KEY=VALUE")]
    InvalidAssignment(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("unsupported config file '{0}': expected .json, .yaml or .yml")]
    UnsupportedFormat(String),

    #[error("config file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    #[error("configuration root must be an object")]
    NotAnObject,

    #[error("no plan configured")]
    NoPlan,

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Append(#[from] AppendError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ArborError>;
