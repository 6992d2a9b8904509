//! Error types shared across the sync workflows.

use thiserror::Error;

/// Failures surfaced by the mapping, resolution, insert and copy paths.
///
/// Workflow errors are a closed set; infrastructure failures from the
/// underlying drivers are carried as their message text.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{label}: required column '{field}' is missing from the payload")]
    MissingRequiredField { label: String, field: String },

    #[error("{label}: field '{key}' does not match any column of the target table")]
    UnknownField { label: String, key: String },

    #[error("{label}: column '{column}' does not accept direct values")]
    NotInsertable { label: String, column: String },

    #[error("field '{field}': value has {length} characters but the column allows {max}")]
    ValueTooLong {
        field: String,
        length: usize,
        max: usize,
    },

    #[error("field '{field}': '{raw}' is not a finite number")]
    NotANumber { field: String, raw: String },

    #[error("{role} address: postal code and city are required to create a location")]
    MissingAddressField { role: String },

    #[error("address id '{id}' exceeds the maximum length of {max}")]
    AddressTooLong { id: String, max: usize },

    #[error("ambiguous payload: {0}")]
    AmbiguousPayload(String),

    #[error("{role} address: payload supplies '{supplied}' but resolution produced '{resolved}'")]
    AddressReferenceMismatch {
        role: String,
        supplied: String,
        resolved: String,
    },

    #[error("template project row not found ({0})")]
    TemplateNotFound(String),

    #[error("catalog: {0}")]
    Catalog(String),

    #[error("database error: {0}")]
    Db(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("payload is not valid: {0}")]
    Payload(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl From<tiberius::error::Error> for SyncError {
    fn from(err: tiberius::error::Error) -> Self {
        SyncError::Db(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Db(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Payload(err.to_string())
    }
}
