//! Error types for the fingerprint shield
//!
//! Every failure the engine can hit falls into one of three classes:
//! - a property refused redefinition (recovered by the template fallback)
//! - a sanitizer faulted (recovered by returning the real API result)
//! - a targeted API does not exist in this host (skipped)
//!
//! None of them ever reach page code. The types here exist so the
//! bootstrap can log, count and report them to the host.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasm_bindgen::JsValue;

pub type Result<T> = std::result::Result<T, FingerprintError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Redefinition errors (1xx)
    RedefinitionRefused = 100,

    // Sanitizer errors (2xx)
    SanitizerFault = 200,

    // Missing API (3xx)
    MissingApi = 300,

    // Configuration errors (4xx)
    InvalidSettings = 400,

    // Host errors (9xx)
    HostError = 900,
}

/// Recovery class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The property could not be overridden where it was asked to be.
    RedefinitionRefusal,
    /// A sanitizer's own logic failed; the real result is used instead.
    SanitizerFault,
    /// The surface does not exist in this host.
    MissingApi,
}

/// Main error type for the fingerprint shield
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FingerprintError {
    #[error("property `{property}` refused redefinition")]
    RedefinitionRefused { property: String },

    #[error("sanitizer `{sanitizer}` failed: {reason}")]
    SanitizerFault { sanitizer: String, reason: String },

    #[error("API not available: {0}")]
    MissingApi(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("host error: {0}")]
    Host(String),
}

impl FingerprintError {
    pub fn refused(property: impl Into<String>) -> Self {
        FingerprintError::RedefinitionRefused {
            property: property.into(),
        }
    }

    pub fn missing(api: impl Into<String>) -> Self {
        FingerprintError::MissingApi(api.into())
    }

    pub fn sanitizer(sanitizer: impl Into<String>, reason: impl Into<String>) -> Self {
        FingerprintError::SanitizerFault {
            sanitizer: sanitizer.into(),
            reason: reason.into(),
        }
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            FingerprintError::RedefinitionRefused { .. } => ErrorCode::RedefinitionRefused,
            FingerprintError::SanitizerFault { .. } => ErrorCode::SanitizerFault,
            FingerprintError::MissingApi(_) => ErrorCode::MissingApi,
            FingerprintError::InvalidSettings(_) => ErrorCode::InvalidSettings,
            FingerprintError::Host(_) => ErrorCode::HostError,
        }
    }

    /// Map onto the three recovery classes.
    ///
    /// Host exceptions surface while a sanitizer is doing its work, so they
    /// recover the same way. Bad settings fall back to defaults, which is
    /// the same as the settings surface being absent.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FingerprintError::RedefinitionRefused { .. } => ErrorKind::RedefinitionRefusal,
            FingerprintError::SanitizerFault { .. } | FingerprintError::Host(_) => {
                ErrorKind::SanitizerFault
            }
            FingerprintError::MissingApi(_) | FingerprintError::InvalidSettings(_) => {
                ErrorKind::MissingApi
            }
        }
    }

    /// Missing APIs are expected on most hosts and are not worth a log line
    /// above trace level.
    pub fn is_expected(&self) -> bool {
        matches!(self, FingerprintError::MissingApi(_))
    }
}

impl From<JsValue> for FingerprintError {
    fn from(value: JsValue) -> Self {
        let message = value
            .as_string()
            .or_else(|| {
                js_sys::Reflect::get(&value, &JsValue::from_str("message"))
                    .ok()
                    .and_then(|m| m.as_string())
            })
            .unwrap_or_else(|| "non-string exception".to_string());
        FingerprintError::Host(message)
    }
}

impl From<FingerprintError> for JsValue {
    fn from(err: FingerprintError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

impl From<serde_json::Error> for FingerprintError {
    fn from(err: serde_json::Error) -> Self {
        FingerprintError::InvalidSettings(err.to_string())
    }
}

/// Error information for host diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: u32,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&FingerprintError> for ErrorInfo {
    fn from(err: &FingerprintError) -> Self {
        ErrorInfo {
            code: err.code() as u32,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Run one patch step, logging any failure and handing it back.
pub(crate) fn attempt<F>(step: &str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let outcome = f();
    match &outcome {
        Ok(()) => {}
        Err(err) if err.is_expected() => log::trace!("{}: {}", step, err),
        Err(err) => log::debug!("{} skipped: {}", step, err),
    }
    outcome
}

/// Run one patch step, swallowing and logging any failure.
///
/// Returns whether the step completed.
pub(crate) fn isolated<F>(step: &str, f: F) -> bool
where
    F: FnOnce() -> Result<()>,
{
    attempt(step, f).is_ok()
}
