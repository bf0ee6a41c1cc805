//! Error types for TPC pad processing

use thiserror::Error;

use crate::calibration::CalibrationKind;

/// Core error type
#[derive(Error, Debug)]
pub enum TpcError {
    #[error("Input length mismatch: values {values}, coupling {coupling}, pedestals {pedestals}")]
    InvalidInput {
        values: usize,
        coupling: usize,
        pedestals: usize,
    },

    #[error("Missing {kind} calibration for sector {sector}, row {row}, pad {pad}")]
    MissingCalibration {
        kind: CalibrationKind,
        sector: u8,
        row: u8,
        pad: u8,
    },

    #[error("Malformed injected common mode word: lower {lower:#05x}, upper {upper:#05x}")]
    MalformedInjectedWord { lower: u32, upper: u32 },

    #[error("Time bin ordering violation in chip group {group}: {current} after {previous}")]
    TimebinOrderingViolation {
        group: u16,
        previous: u32,
        current: u32,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type TpcResult<T> = Result<T, TpcError>;
