//! Application-wide error types.

use thiserror::Error;

use crate::detector::DetectorError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("image error: {0}")]
    Image(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
