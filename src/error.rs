//! Crate-level error types.
//!
//! Each module keeps a narrow `thiserror` enum for the failures it can
//! produce; `GatewayError` unifies them at the boundaries that need to
//! report across module lines (store <-> server, adapters <-> store).

use thiserror::Error;

/// Errors raised while constructing or reading a [`crate::point::Point`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PointError {
    #[error("type mismatch: requested {requested}, value is {actual}")]
    TypeMismatch {
        requested: &'static str,
        actual: &'static str,
    },

    #[error("ioa must be non-zero")]
    ZeroIoa,
}

/// Errors raised while encoding a [`crate::point::Point`] into an ASDU.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsduError {
    #[error("unsupported ASDU type {0:?}")]
    UnsupportedType(crate::asdu::TypeId),

    #[error("value {0} out of range for encoding")]
    OutOfRange(String),
}

/// Errors raised by the point store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("point rejected: {0}")]
    Rejected(#[from] PointError),
}

/// Errors raised by the 104 server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("bind failed: {0}")]
    BindFailed(std::io::Error),

    #[error("server already active")]
    AlreadyActive,

    #[error("connection i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide error, used where a caller needs to unify module errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Point(#[from] PointError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Asdu(#[from] AsduError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
