//! Error types for the control crate

use thiserror::Error;

/// Control crate errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("DMX error: {0}")]
    Dmx(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown fixture: {0}")]
    UnknownFixture(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;
