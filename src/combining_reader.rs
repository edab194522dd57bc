//! Merging of continuation records.
//!
//! A record too large for the binary format is often split into several
//! consecutive records sharing a control number. [`CombiningReader`] wraps
//! another reader and folds such runs back into one record: while the next
//! record's key equals the current record's key, the next record's fields
//! whose tag matches [`CombineOptions::merge_pattern`] are added to the
//! current record and the rest of it is dropped.

use crate::error::{MarcError, Result};
use crate::error_handler::{Diagnostic, ErrorHandler};
use crate::formats::FormatReader;
use crate::record::{is_control_tag, Record, CONTROL_NUMBER_TAG};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DATA_FIELD_TAGS: Regex = Regex::new("^(?:0[1-9]|[1-9].).$").expect("valid regex");
}

/// Settings for [`CombiningReader`]
#[derive(Debug, Clone)]
pub struct CombineOptions {
    /// Tags of the fields taken over from a continuation record; every
    /// data field by default
    pub merge_pattern: Regex,
    /// Merged fields go before the current record's fields with a tag
    /// matching this pattern, instead of at the end
    pub insert_before: Option<Regex>,
    /// Key of the current record: a control tag such as `"001"`, or
    /// `"tag$code"` for a data field subfield (code `a` if omitted)
    pub left_key: String,
    /// Key of the following record, in the same form
    pub right_key: String,
}

impl Default for CombineOptions {
    fn default() -> Self {
        CombineOptions {
            merge_pattern: DATA_FIELD_TAGS.clone(),
            insert_before: None,
            left_key: CONTROL_NUMBER_TAG.to_string(),
            right_key: CONTROL_NUMBER_TAG.to_string(),
        }
    }
}

impl CombineOptions {
    /// Options merging the fields whose tag matches `pattern`, keyed on
    /// the control number.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::ParseError`] if the pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(CombineOptions {
            merge_pattern: compile(pattern)?,
            ..CombineOptions::default()
        })
    }

    /// Insert merged fields before the first field matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::ParseError`] if the pattern is invalid.
    pub fn with_insert_before(mut self, pattern: &str) -> Result<Self> {
        self.insert_before = Some(compile(pattern)?);
        Ok(self)
    }

    /// Match records on other keys than the control number
    #[must_use]
    pub fn with_keys(mut self, left: &str, right: &str) -> Self {
        self.left_key = left.to_string();
        self.right_key = right.to_string();
        self
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| MarcError::ParseError(format!("invalid tag pattern: {e}")))
}

/// Reader that merges runs of records with the same key.
///
/// A record is returned only once the following record is known not to
/// continue it, so the wrapped reader is always one record ahead.
///
/// When the wrapped reader keeps diagnostics
/// ([`FormatReader::error_handler`]), those of every merged part are
/// gathered in [`CombiningReader::errors`].
///
/// ```
/// use marc_codec::{CombineOptions, CombiningReader, DataField, Leader, Record, Result};
/// use marc_codec::formats::FormatReader;
///
/// #[derive(Debug)]
/// struct Parts(std::vec::IntoIter<Record>);
///
/// impl FormatReader for Parts {
///     fn read_record(&mut self) -> Result<Option<Record>> {
///         Ok(self.0.next())
///     }
/// }
///
/// let part = |id: &str, copy: &str| {
///     let mut record = Record::new(Leader::default());
///     record.add_control_field("001", id);
///     let mut field = DataField::new("852", ' ', ' ');
///     field.add_subfield('a', copy);
///     record.insert_data_field(field);
///     record
/// };
/// let inner = Parts(vec![part("1", "a"), part("1", "b"), part("2", "c")].into_iter());
///
/// let mut reader = CombiningReader::new(inner, CombineOptions::new("852")?);
/// assert_eq!(reader.read_record()?.unwrap().get_fields("852").count(), 2);
/// assert_eq!(reader.read_record()?.unwrap().control_number(), Some("2"));
/// assert!(reader.read_record()?.is_none());
/// # Ok::<(), marc_codec::MarcError>(())
/// ```
#[derive(Debug)]
pub struct CombiningReader<R: FormatReader> {
    inner: R,
    options: CombineOptions,
    next: Option<(Record, Vec<Diagnostic>)>,
    next_error: Option<MarcError>,
    errors: ErrorHandler,
    records_read: usize,
}

impl<R: FormatReader> CombiningReader<R> {
    /// Wrap `inner`
    pub fn new(inner: R, options: CombineOptions) -> Self {
        CombiningReader {
            inner,
            options,
            next: None,
            next_error: None,
            errors: ErrorHandler::new(),
            records_read: 0,
        }
    }

    /// Diagnostics of all parts of the record last returned
    #[must_use]
    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    /// Unwrap the inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next merged record.
    ///
    /// # Errors
    ///
    /// Returns the wrapped reader's error. An error met while looking
    /// ahead is returned after the record already collected, so no
    /// record is lost; reading may then continue as far as the wrapped
    /// reader allows.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if let Some(err) = self.next_error.take() {
            return Err(err);
        }

        let (mut current, diagnostics) = match self.next.take() {
            Some(pending) => pending,
            None => match self.pull()? {
                Some(pending) => pending,
                None => return Ok(None),
            },
        };
        self.errors.reset();
        self.errors.add_errors(diagnostics);

        loop {
            match self.pull() {
                Ok(Some((next, diagnostics))) => {
                    if self.records_match(&current, &next) {
                        tracing::debug!(
                            key = self.left_key(&current).unwrap_or_default(),
                            "merging continuation record"
                        );
                        self.combine(&mut current, &next);
                        self.errors.add_errors(diagnostics);
                    } else {
                        self.next = Some((next, diagnostics));
                        break;
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(
                        after = current.control_number().unwrap_or_default(),
                        "couldn't read the record following this one: {err}"
                    );
                    self.next_error = Some(err);
                    break;
                },
            }
        }

        self.records_read += 1;
        Ok(Some(current))
    }

    fn pull(&mut self) -> Result<Option<(Record, Vec<Diagnostic>)>> {
        let record = self.inner.read_record()?;
        Ok(record.map(|record| {
            let diagnostics = self
                .inner
                .error_handler()
                .map(|handler| handler.errors().to_vec())
                .unwrap_or_default();
            (record, diagnostics)
        }))
    }

    fn left_key<'a>(&self, record: &'a Record) -> Option<&'a str> {
        find_key(record, &self.options.left_key)
    }

    fn records_match(&self, left: &Record, right: &Record) -> bool {
        match (self.left_key(left), find_key(right, &self.options.right_key)) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        }
    }

    fn combine(&self, current: &mut Record, next: &Record) {
        let moved = match &self.options.insert_before {
            Some(anchor) => {
                let moved = current.variable_fields_matching(anchor);
                for field in &moved {
                    current.remove_field(field);
                }
                moved
            },
            None => Vec::new(),
        };
        for field in next.variable_fields_matching(&self.options.merge_pattern) {
            current.add_field(field);
        }
        for field in moved {
            current.add_field(field);
        }
    }
}

/// Value of a `"tag"` or `"tag$code"` key in `record`.
fn find_key<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    let tag = key.get(..3)?;
    if is_control_tag(tag) {
        return record.get_control_field(tag);
    }
    let code = key.chars().nth(4).unwrap_or('a');
    record
        .data_fields()
        .iter()
        .filter(|field| field.tag == tag)
        .find_map(|field| field.get_subfield(code))
}

impl<R: FormatReader> Iterator for CombiningReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

impl<R: FormatReader> FormatReader for CombiningReader<R> {
    fn read_record(&mut self) -> Result<Option<Record>> {
        CombiningReader::read_record(self)
    }

    fn records_read(&self) -> Option<usize> {
        Some(self.records_read)
    }

    fn error_handler(&self) -> Option<&ErrorHandler> {
        Some(&self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::Severity;
    use crate::leader::Leader;
    use crate::record::DataField;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Scripted {
        items: std::vec::IntoIter<Result<Record>>,
        errors: ErrorHandler,
    }

    impl Scripted {
        fn new(items: Vec<Result<Record>>) -> Self {
            Scripted {
                items: items.into_iter(),
                errors: ErrorHandler::new(),
            }
        }
    }

    impl FormatReader for Scripted {
        fn read_record(&mut self) -> Result<Option<Record>> {
            self.errors.reset();
            let item = self.items.next().transpose()?;
            if let Some(record) = &item {
                if let Some(note) = record.get_control_field("009") {
                    self.errors.add_error(Severity::Minor, note);
                }
            }
            Ok(item)
        }

        fn error_handler(&self) -> Option<&ErrorHandler> {
            Some(&self.errors)
        }
    }

    fn part(id: &str, tags: &[(&str, &str)]) -> Record {
        let mut record = Record::new(Leader::default());
        record.add_control_field("001", id);
        for (tag, value) in tags {
            let mut field = DataField::new(*tag, ' ', ' ');
            field.add_subfield('a', *value);
            record.insert_data_field(field);
        }
        record
    }

    fn values(record: &Record) -> Vec<String> {
        record
            .data_fields()
            .iter()
            .map(|f| format!("{}:{}", f.tag, f.get_subfield('a').unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_merges_matching_run() {
        let inner = Scripted::new(vec![
            Ok(part("1", &[("245", "T"), ("852", "a")])),
            Ok(part("1", &[("245", "T"), ("852", "b")])),
            Ok(part("1", &[("852", "c")])),
            Ok(part("2", &[("852", "d")])),
        ]);
        let mut reader = CombiningReader::new(inner, CombineOptions::new("852").unwrap());
        let first = reader.read_record().unwrap().unwrap();
        assert_eq!(values(&first), vec!["245:T", "852:a", "852:b", "852:c"]);
        let second = reader.read_record().unwrap().unwrap();
        assert_eq!(values(&second), vec!["852:d"]);
        assert!(reader.read_record().unwrap().is_none());
        assert_eq!(reader.records_read, 2);
    }

    #[test]
    fn test_insert_before_anchor() {
        let inner = Scripted::new(vec![
            Ok(part("1", &[("852", "a"), ("999", "local")])),
            Ok(part("1", &[("852", "b")])),
        ]);
        let options = CombineOptions::new("852")
            .unwrap()
            .with_insert_before("999")
            .unwrap();
        let record = CombiningReader::new(inner, options).read_record().unwrap().unwrap();
        assert_eq!(values(&record), vec!["852:a", "852:b", "999:local"]);
    }

    #[test]
    fn test_data_field_keys() {
        let inner = Scripted::new(vec![
            Ok(part("1", &[("035", "(OCoLC)9")])),
            Ok(part("2", &[("904", "(OCoLC)9"), ("852", "x")])),
        ]);
        let options = CombineOptions::new("852").unwrap().with_keys("035$a", "904");
        let mut reader = CombiningReader::new(inner, options);
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(values(&record), vec!["035:(OCoLC)9", "852:x"]);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_missing_key_never_matches() {
        let mut anonymous = part("x", &[("852", "a")]);
        anonymous.clear_fields();
        let inner = Scripted::new(vec![Ok(anonymous.clone()), Ok(anonymous)]);
        let reader = CombiningReader::new(inner, CombineOptions::default());
        assert_eq!(reader.count(), 2);
    }

    #[test]
    fn test_diagnostics_are_gathered() {
        let mut first = part("1", &[]);
        first.add_control_field("009", "first part");
        let mut second = part("1", &[]);
        second.add_control_field("009", "second part");
        let inner = Scripted::new(vec![Ok(first), Ok(second), Ok(part("2", &[]))]);

        let mut reader = CombiningReader::new(inner, CombineOptions::default());
        reader.read_record().unwrap();
        let messages: Vec<&str> = reader.errors().errors().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first part", "second part"]);

        reader.read_record().unwrap();
        assert!(reader.errors().errors().is_empty());
    }

    #[test]
    fn test_lookahead_error_comes_after_record() {
        let inner = Scripted::new(vec![
            Ok(part("1", &[("852", "a")])),
            Err(MarcError::Fatal("broken".to_string())),
            Ok(part("2", &[])),
        ]);
        let mut reader = CombiningReader::new(inner, CombineOptions::default());
        assert_eq!(reader.read_record().unwrap().unwrap().control_number(), Some("1"));
        assert!(matches!(reader.read_record(), Err(MarcError::Fatal(_))));
        assert_eq!(reader.read_record().unwrap().unwrap().control_number(), Some("2"));
        assert!(reader.read_record().unwrap().is_none());
    }
}
