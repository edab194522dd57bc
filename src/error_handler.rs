//! Diagnostics collected while recovering damaged records.
//!
//! Permissive components never abort on a recoverable defect. They log a
//! [`Diagnostic`] on an [`ErrorHandler`] and keep going; the caller inspects
//! the handler after each record. Strict components do not use a handler
//! and return [`MarcError`](crate::MarcError) instead.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used until the record's control number is known.
pub const UNKNOWN_RECORD_ID: &str = "unknown";

/// Placeholder used for an unset field or subfield location.
pub const NO_LOCATION: &str = "n/a";

/// Diagnostic severity, ordered from harmless to unrecoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Severity {
    /// Rationale for a heuristic decision; no defect
    #[default]
    Info,
    /// Cosmetic, non-conforming but harmless
    Typo,
    /// Data-affecting, corrected with a low-risk fix
    Minor,
    /// Structural defect recovered by guessing
    Major,
    /// Unrecoverable
    Fatal,
}

impl Severity {
    /// Fixed-width label used in diagnostic listings
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Fatal => "FATAL       ",
            Severity::Major => "Major Error ",
            Severity::Minor => "Minor Error ",
            Severity::Typo => "Typo        ",
            Severity::Info => "Info        ",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().trim_end())
    }
}

/// One logged defect with its location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Control number of the record, or `"unknown"`
    pub record_id: String,
    /// Field tag, or `"n/a"`
    pub field: String,
    /// Subfield code, or `"n/a"`
    pub subfield: String,
    /// How bad it is
    pub severity: Severity,
    /// What was found and what was done about it
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {} --- [ {} : {} ]",
            self.severity.as_str(),
            self.message,
            self.field,
            self.subfield
        )
    }
}

/// Per-record diagnostic sink.
///
/// Location setters (`set_record_id`, `set_field`, `set_subfield`) fill in
/// the coordinates used by [`ErrorHandler::add_error`]. Diagnostics logged
/// before the control number was known are backfilled once it is set.
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    errors: Vec<Diagnostic>,
    record_id: String,
    field: String,
    subfield: String,
    has_missing_id: bool,
    max_severity: Severity,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        ErrorHandler {
            errors: Vec::new(),
            record_id: UNKNOWN_RECORD_ID.to_string(),
            field: NO_LOCATION.to_string(),
            subfield: NO_LOCATION.to_string(),
            has_missing_id: false,
            max_severity: Severity::Info,
        }
    }
}

impl ErrorHandler {
    /// Create an empty handler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all diagnostics and locations; called at the start of each record
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Log a diagnostic at the current location
    pub fn add_error(&mut self, severity: Severity, message: impl Into<String>) {
        let record_id = self.record_id.clone();
        let field = self.field.clone();
        let subfield = self.subfield.clone();
        self.add_error_at(&record_id, &field, &subfield, severity, message);
    }

    /// Log a diagnostic at an explicit location
    pub fn add_error_at(
        &mut self,
        record_id: &str,
        field: &str,
        subfield: &str,
        severity: Severity,
        message: impl Into<String>,
    ) {
        let message = message.into();
        tracing::debug!(record_id, field, subfield, severity = %severity, "{message}");
        if record_id == UNKNOWN_RECORD_ID {
            self.has_missing_id = true;
        } else if self.has_missing_id {
            self.backfill_record_id(record_id);
        }
        self.max_severity = self.max_severity.max(severity);
        self.errors.push(Diagnostic {
            record_id: record_id.to_string(),
            field: field.to_string(),
            subfield: subfield.to_string(),
            severity,
            message,
        });
    }

    /// Append diagnostics collected elsewhere, keeping their locations
    pub fn add_errors(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.max_severity = self.max_severity.max(diagnostic.severity);
            self.errors.push(diagnostic);
        }
    }

    /// True if anything worse than [`Severity::Info`] was logged
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() && self.max_severity > Severity::Info
    }

    /// Highest severity logged since the last reset
    #[must_use]
    pub fn max_severity(&self) -> Severity {
        self.max_severity
    }

    /// All diagnostics in the order they were logged
    #[must_use]
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    /// Move the diagnostics out, leaving the handler empty
    pub fn take_errors(&mut self) -> Vec<Diagnostic> {
        self.max_severity = Severity::Info;
        std::mem::take(&mut self.errors)
    }

    /// Current record id
    #[must_use]
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Set the record id; earlier `"unknown"` diagnostics take it over
    pub fn set_record_id(&mut self, id: impl Into<String>) {
        self.record_id = id.into();
        if self.has_missing_id && self.record_id != UNKNOWN_RECORD_ID {
            let id = self.record_id.clone();
            self.backfill_record_id(&id);
        }
    }

    /// Set the current field location
    pub fn set_field(&mut self, field: impl Into<String>) {
        self.field = field.into();
    }

    /// Set the current subfield location
    pub fn set_subfield(&mut self, subfield: impl Into<String>) {
        self.subfield = subfield.into();
    }

    fn backfill_record_id(&mut self, id: &str) {
        for diagnostic in &mut self.errors {
            if diagnostic.record_id == UNKNOWN_RECORD_ID {
                diagnostic.record_id = id.to_string();
            }
        }
        self.has_missing_id = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Typo);
        assert!(Severity::Typo < Severity::Minor);
        assert!(Severity::Minor < Severity::Major);
        assert!(Severity::Major < Severity::Fatal);
    }

    #[test]
    fn test_handler_default() {
        let handler = ErrorHandler::new();
        assert!(!handler.has_errors());
        assert_eq!(handler.max_severity(), Severity::Info);
        assert!(handler.errors().is_empty());
    }

    #[test]
    fn test_info_only_is_not_an_error() {
        let mut handler = ErrorHandler::new();
        handler.add_error(Severity::Info, "guessed MARC-8");
        assert!(!handler.has_errors());
        assert_eq!(handler.errors().len(), 1);
    }

    #[test]
    fn test_max_severity_and_reset() {
        let mut handler = ErrorHandler::new();
        handler.add_error(Severity::Minor, "a");
        handler.add_error(Severity::Major, "b");
        handler.add_error(Severity::Typo, "c");
        assert!(handler.has_errors());
        assert_eq!(handler.max_severity(), Severity::Major);

        handler.reset();
        assert!(!handler.has_errors());
        assert!(handler.errors().is_empty());
    }

    #[test]
    fn test_record_id_backfill() {
        let mut handler = ErrorHandler::new();
        handler.add_error(Severity::Typo, "early");
        handler.set_record_id("ocm123");
        handler.add_error(Severity::Minor, "late");

        assert!(handler.errors().iter().all(|d| d.record_id == "ocm123"));
    }

    #[test]
    fn test_diagnostic_display() {
        let mut handler = ErrorHandler::new();
        handler.set_field("245");
        handler.set_subfield("a");
        handler.add_error(Severity::Major, "bad code");
        assert_eq!(
            handler.errors()[0].to_string(),
            "Major Error  : bad code --- [ 245 : a ]"
        );
    }

    #[test]
    fn test_add_errors_merges_severity() {
        let mut source = ErrorHandler::new();
        source.add_error(Severity::Fatal, "gone");
        let mut target = ErrorHandler::new();
        target.add_errors(source.take_errors());
        assert_eq!(target.max_severity(), Severity::Fatal);
        assert!(source.errors().is_empty());
    }
}
