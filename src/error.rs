//! Error types for MARC operations.
//!
//! This module provides the [`MarcError`] type for all codec operations
//! and the [`Result`] convenience type. Recoverable defects found by the
//! permissive reader are not errors; they are reported through
//! [`ErrorHandler`](crate::ErrorHandler) instead.

use thiserror::Error;

/// Error type for all MARC codec operations.
///
/// Represents the conditions that abort parsing, writing, or character
/// conversion of a record.
#[derive(Error, Debug)]
pub enum MarcError {
    /// Error indicating an invalid or malformed MARC record.
    #[error("Invalid MARC record: {0}")]
    InvalidRecord(String),

    /// Error indicating an invalid leader (24-byte header).
    #[error("Invalid leader: {0}")]
    InvalidLeader(String),

    /// Error indicating an invalid field structure.
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Error related to character encoding conversion.
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Error during parsing of MARC data.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Error indicating a truncated or incomplete record.
    #[error("Truncated record: {0}")]
    TruncatedRecord(String),

    /// A record or field exceeds the ISO 2709 size limits.
    #[error("Record too long: {0}")]
    RecordTooLong(String),

    /// A character code table definition could not be loaded.
    #[error("Code table error: {0}")]
    CodeTable(String),

    /// Malformed or unreadable MARCXML.
    #[error("XML error: {0}")]
    XmlError(String),

    /// Unrecoverable defect found in permissive mode.
    ///
    /// The same message is logged at FATAL severity on the reader's
    /// error handler. The stream is left at the start of the next record.
    #[error("Fatal record error: {0}")]
    Fatal(String),

    /// IO error from the underlying source/destination.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<quick_xml::Error> for MarcError {
    fn from(err: quick_xml::Error) -> Self {
        MarcError::XmlError(err.to_string())
    }
}

/// Convenience type alias for [`std::result::Result`] with [`MarcError`].
pub type Result<T> = std::result::Result<T, MarcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let err = MarcError::RecordTooLong("length 100000".to_string());
        assert_eq!(err.to_string(), "Record too long: length 100000");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: MarcError = io.into();
        assert!(matches!(err, MarcError::IoError(_)));
    }
}
