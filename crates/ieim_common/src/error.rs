//! Shared error-kind taxonomy (kinds, not exception types). Stage crates
//! wrap this in their own `thiserror` enums via `#[from]`; this enum is
//! the shared vocabulary the CLI and API map to exit codes / HTTP statuses.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConfigInvalid,
    NormalizationInvalid,
    AvFailed,
    LlmProviderError,
    LlmContractViolation,
    LlmCapExceeded,
    RulesInvalid,
    ImmutabilityViolation,
    AuditChainBroken,
    EtagMismatch,
    IdempotencyReplay,
    PermissionDenied,
    NotFound,
    AdapterUnavailable,
    ArtifactAmbiguous,
}

impl ErrorKind {
    /// CLI process exit code for this error kind.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::ConfigInvalid | ErrorKind::NormalizationInvalid => 10,
            ErrorKind::ImmutabilityViolation
            | ErrorKind::AuditChainBroken
            | ErrorKind::RulesInvalid => 60,
            ErrorKind::AdapterUnavailable | ErrorKind::LlmProviderError => 40,
            _ => 1,
        }
    }

    /// HTTP status code for this error kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::ArtifactAmbiguous => 409,
            ErrorKind::EtagMismatch => 412,
            ErrorKind::NormalizationInvalid | ErrorKind::ConfigInvalid => 400,
            _ => 500,
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct KindedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl KindedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
