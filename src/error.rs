//! Error types shared by the walker, the capturer and the pipeline.

use crate::config::ConfigError;
use crate::pipeline::SinkError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("file to walk must be a directory: {0:?}")]
    NotADirectory(String),
    #[error("this walkway is already walked")]
    WalkerReused,
    #[error("no bundle header to attach {0:?} to")]
    MissingBundleHeader(String),
    #[error("capture cancelled")]
    Cancelled,
    #[error("page consumer panicked")]
    ConsumerPanicked,
    #[error("failed to build {path:?}: {source}")]
    Sink {
        path: String,
        #[source]
        source: SinkError,
    },
    #[error("page consumer failed: {0}")]
    Fatal(#[source] SinkError),
    #[error("{} file(s) failed to build: {}", .0.len(), summarize(.0))]
    Partial(Vec<CaptureError>),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

fn summarize(errors: &[CaptureError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CaptureError {
    /// Wrap an I/O error with the path it happened at.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        CaptureError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for I/O errors caused by a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CaptureError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_path_annotated() {
        let err = CaptureError::io(
            "content/blog",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "IO error at \"content/blog\": denied");
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_detected() {
        let err = CaptureError::io("x", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(!CaptureError::Cancelled.is_not_found());
    }

    #[test]
    fn partial_lists_every_failure() {
        let err = CaptureError::Partial(vec![
            CaptureError::MissingBundleHeader("a.md".into()),
            CaptureError::Cancelled,
        ]);
        assert_eq!(
            err.to_string(),
            "2 file(s) failed to build: no bundle header to attach \"a.md\" to; capture cancelled"
        );
    }
}
