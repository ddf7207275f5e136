//! Error types shared by every stage of the push pipeline.
//!
//! Failures keep their structure (status codes, paths, server messages) all the
//! way up to the caller so retryable conditions (5xx, transport) can be told
//! apart from ones that need user action (4xx, empty files, bad sheet names).

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::flow::FlowError;
use crate::package::PackageError;

/// A non-200 answer from any DataHub API endpoint other than `/auth/authorize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    pub status: u16,
    pub status_text: String,
    /// Server-provided message; only extracted for 4xx responses.
    pub message: Option<String>,
    /// True for 4xx responses.
    pub user_error: bool,
}

impl ResponseError {
    /// Build from a status and the raw response body.
    ///
    /// 4xx bodies are parsed as `{"error": {"message": ...}}`, falling back to
    /// the raw text. Bodies of other statuses are never inspected, so callers
    /// pass `None` for them.
    pub fn new(status: u16, status_text: impl Into<String>, body: Option<&str>) -> Self {
        let user_error = (400..500).contains(&status);
        let message = if user_error {
            body.and_then(extract_message)
        } else {
            None
        };
        ResponseError {
            status,
            status_text: status_text.into(),
            message,
            user_error,
        }
    }
}

fn extract_message(body: &str) -> Option<String> {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_owned),
        Err(_) => Some(body.to_owned()).filter(|text| !text.is_empty()),
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(
                f,
                "Response error - no information. Status code: {} - {}",
                self.status, self.status_text
            ),
        }
    }
}

impl std::error::Error for ResponseError {}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SheetSelectionError {
    #[error("sheet index {index} is out of range: please, provide existing sheet index or use sheet name.")]
    IndexOutOfRange { index: usize, sheet_count: usize },

    #[error("sheet name {name} does not exist in the given file.")]
    NameNotFound { name: String },
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("Authz server: {status_text}")]
    Authorization { status: u16, status_text: String },

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error("Error uploading to rawstore for {path} with code {status} reason {body}")]
    Upload {
        path: String,
        status: u16,
        body: String,
    },

    #[error("> You can not push empty files, please add some data and try again:\n{path}")]
    EmptyResource { path: String },

    #[error(transparent)]
    SheetSelection(#[from] SheetSelectionError),

    #[error("You cannot push an empty sheet. Please, add some data and try again. ({resource}, sheet {sheet})")]
    EmptySheet { resource: String, sheet: usize },

    #[error("Could not read workbook {resource}: {reason}")]
    Workbook { resource: String, reason: String },

    #[error("Remote resource {url} is not reachable: {reason}")]
    RemoteResourceUnreachable {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Rawstore did not return upload credentials for {path}")]
    MissingCredential { path: String },

    #[error("{}", .errors.join("\n"))]
    SubmissionRejected { errors: Vec<String> },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Push cancelled")]
    Cancelled,
}

impl PushError {
    /// Whether retrying the whole push might succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::Transport(_) => true,
            PushError::Authorization { status, .. } => *status >= 500,
            PushError::Response(e) => e.status >= 500,
            PushError::Upload { status, .. } => *status >= 500,
            PushError::RemoteResourceUnreachable { status, .. } => {
                status.map_or(true, |s| s >= 500)
            }
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            PushError::Authorization { status, .. } | PushError::Upload { status, .. } => {
                Some(*status)
            }
            PushError::Response(e) => Some(e.status),
            PushError::RemoteResourceUnreachable { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_uses_json_message() {
        let err = ResponseError::new(403, "Forbidden", Some(r#"{"error":{"message":"no quota"}}"#));
        assert!(err.user_error);
        assert_eq!(err.to_string(), "no quota");
    }

    #[test]
    fn client_error_falls_back_to_raw_text() {
        let err = ResponseError::new(400, "Bad Request", Some("plain failure"));
        assert_eq!(err.message.as_deref(), Some("plain failure"));
    }

    #[test]
    fn server_error_has_no_message() {
        let err = ResponseError::new(502, "Bad Gateway", Some("ignored"));
        assert!(!err.user_error);
        assert_eq!(
            err.to_string(),
            "Response error - no information. Status code: 502 - Bad Gateway"
        );
        assert!(PushError::from(err).is_retryable());
    }

    #[test]
    fn rejected_submission_joins_errors() {
        let err = PushError::SubmissionRejected {
            errors: vec!["first".into(), "second".into()],
        };
        assert_eq!(err.to_string(), "first\nsecond");
        assert!(!err.is_retryable());
    }
}
