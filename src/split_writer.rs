//! Binary writer that splits large records into continuation records.
//!
//! Instead of failing on a record longer than the binary format allows,
//! [`SplitWriter`] spreads the repeatable fields matching
//! [`SplitOptions::split_fields`] over several output records. Every output
//! record carries the leader, the control fields and all non-matching data
//! fields; matching fields are added to each one until its data area passes
//! [`SplitOptions::split_threshold`] bytes, and the rest go into the next
//! record. Readers can merge the parts again with
//! [`CombiningReader`](crate::CombiningReader).

use crate::error::{MarcError, Result};
use crate::formats::FormatWriter;
use crate::record::Record;
use crate::writer::{FieldEncoder, RecordImage, WriterOptions};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::Write;

/// Default data-area size after which a new part is started
pub const DEFAULT_SPLIT_THRESHOLD: usize = 70_000;

lazy_static! {
    static ref NO_FIELDS: Regex = Regex::new("^$").expect("valid regex");
}

/// Settings for [`SplitWriter`]
#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Data-area size in bytes after which matching fields move on to the
    /// next part
    pub split_threshold: usize,
    /// Tags of the fields that may be spread over several parts
    pub split_fields: Regex,
}

impl Default for SplitOptions {
    fn default() -> Self {
        SplitOptions {
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            split_fields: NO_FIELDS.clone(),
        }
    }
}

impl SplitOptions {
    /// Options splitting the fields whose tag matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::ParseError`] if the pattern is not a valid
    /// regular expression.
    pub fn new(split_threshold: usize, pattern: &str) -> Result<Self> {
        let split_fields = Regex::new(pattern)
            .map_err(|e| MarcError::ParseError(format!("invalid split field pattern: {e}")))?;
        Ok(SplitOptions {
            split_threshold,
            split_fields,
        })
    }
}

/// ISO 2709 writer that splits oversized records.
///
/// ```
/// use marc_codec::{DataField, Leader, MarcReader, Record, SplitOptions, SplitWriter};
/// use std::io::Cursor;
///
/// # fn main() -> marc_codec::Result<()> {
/// let mut record = Record::new(Leader::default());
/// record.add_control_field("001", "big");
/// for i in 0..4 {
///     let mut field = DataField::new("852", ' ', ' ');
///     field.add_subfield('a', format!("copy {i}"));
///     record.insert_data_field(field);
/// }
///
/// let mut out = Vec::new();
/// let mut writer = SplitWriter::new(&mut out, SplitOptions::new(20, "^852$")?);
/// writer.write_record(&record)?;
/// writer.finish()?;
///
/// let parts: Vec<_> = MarcReader::new(Cursor::new(out)).collect::<Result<_, _>>()?;
/// assert_eq!(parts.len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SplitWriter<W: Write> {
    writer: W,
    encoder: FieldEncoder,
    options: SplitOptions,
    records_written: usize,
    finished: bool,
}

impl<W: Write> SplitWriter<W> {
    /// Create a splitting writer producing UTF-8 records
    pub fn new(writer: W, options: SplitOptions) -> Self {
        SplitWriter {
            writer,
            encoder: FieldEncoder::default(),
            options,
            records_written: 0,
            finished: false,
        }
    }

    /// Create a splitting writer with explicit output options.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::EncodingError`] if the output encoding is not
    /// UTF-8, MARC-8 or ISO-8859-1.
    pub fn with_writer_options(writer: W, options: SplitOptions, writer_options: WriterOptions) -> Result<Self> {
        Ok(SplitWriter {
            writer,
            encoder: FieldEncoder::new(writer_options)?,
            options,
            records_written: 0,
            finished: false,
        })
    }

    /// Write one record as one or more parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is finished, a part still breaks the
    /// size limits, or the output fails.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if self.finished {
            return Err(MarcError::InvalidRecord(
                "Cannot write to a finished writer".to_string(),
            ));
        }

        let mut fixed = Vec::new();
        for field in record.control_fields() {
            fixed.push((field.tag.as_str(), self.encoder.control_field(field)?));
        }
        let mut split = Vec::new();
        for field in record.data_fields() {
            let bytes = self.encoder.data_field(field)?;
            if self.options.split_fields.is_match(&field.tag) {
                split.push((field.tag.as_str(), bytes));
            } else {
                fixed.push((field.tag.as_str(), bytes));
            }
        }

        let coding = self.encoder.leader_coding();
        let allow_oversize = self.encoder.options().allow_oversize;
        let mut next = 0;
        let mut parts = 0;
        loop {
            let mut image = RecordImage::default();
            for (tag, bytes) in &fixed {
                image.push(tag, bytes);
            }
            let first = next;
            while next < split.len()
                && (next == first || image.data_len() < self.options.split_threshold)
            {
                let (tag, bytes) = &split[next];
                image.push(tag, bytes);
                next += 1;
            }

            let bytes = image.finish(record, coding, allow_oversize)?;
            self.writer.write_all(&bytes)?;
            self.records_written += 1;
            parts += 1;
            if next >= split.len() {
                break;
            }
        }

        if parts > 1 {
            tracing::debug!(
                control_number = record.control_number().unwrap_or_default(),
                parts,
                "record split into continuation records"
            );
        }
        Ok(())
    }

    /// Flush the output; no records can be written afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Number of binary records written, counting every part
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }
}

impl<W: Write + std::fmt::Debug> FormatWriter for SplitWriter<W> {
    fn write_record(&mut self, record: &Record) -> Result<()> {
        SplitWriter::write_record(self, record)
    }

    fn finish(&mut self) -> Result<()> {
        SplitWriter::finish(self)
    }

    fn records_written(&self) -> Option<usize> {
        Some(self.records_written)
    }
}
