//! Error handling for moolib.

use std::fmt;

use crate::schema::Modifier;

/// The main error type for moolib operations.
#[derive(Debug)]
pub enum Error {
    /// The OpenAPI schema could not be fetched or parsed.
    SchemaFetch(String),
    /// A path or operation in the schema does not have the expected shape.
    ///
    /// Recovered locally during registry building (the offending path is
    /// skipped); carried here so the skip can be logged uniformly.
    SchemaShape(String),
    /// A command was requested for a `(section, modifier)` pair the schema
    /// never declared.
    UnknownOperation { section: String, modifier: Modifier },
    /// Configuration file problem.
    Config(String),
    /// The server answered with a non-success status.
    Api { status: u16, message: String },
    /// Transport-level failure.
    Http(reqwest::Error),
    /// IO error wrapper.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SchemaFetch(msg) => write!(f, "failed to load OpenAPI schema: {}", msg),
            Error::SchemaShape(msg) => write!(f, "unexpected schema shape: {}", msg),
            Error::UnknownOperation { section, modifier } => {
                write!(f, "no such operation: {} {}", modifier, section)
            }
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Api { status, message } => {
                write!(f, "API request failed with status {}: {}", status, message)
            }
            Error::Http(err) => write!(f, "HTTP request failed: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

/// A Result type alias for moolib operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_schema_fetch_display() {
        let err = Error::SchemaFetch("connection refused".to_string());
        assert_eq!(
            format!("{}", err),
            "failed to load OpenAPI schema: connection refused"
        );
    }

    #[test]
    fn test_error_unknown_operation_display() {
        let err = Error::UnknownOperation {
            section: "alias".to_string(),
            modifier: Modifier::Edit,
        };
        assert_eq!(format!("{}", err), "no such operation: edit alias");
    }

    #[test]
    fn test_error_api_display() {
        let err = Error::Api {
            status: 401,
            message: "authentication failed".to_string(),
        };
        let rendered = format!("{}", err);
        assert!(rendered.contains("401"));
        assert!(rendered.contains("authentication failed"));
    }

    #[test]
    fn test_error_io_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(format!("{}", err).contains("IO error"));
    }

    #[test]
    fn test_error_source_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_source_config() {
        let err = Error::Config("missing file".to_string());
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_debug() {
        let err = Error::SchemaShape("path too short".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("SchemaShape"));
        assert!(debug_str.contains("path too short"));
    }
}
