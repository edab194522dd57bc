//! Writing MARC records to binary format.
//!
//! This module provides [`MarcWriter`] for serializing [`Record`] instances
//! to ISO 2709 binary format on any destination implementing
//! [`std::io::Write`].
//!
//! The field data is built first, then the directory from the cumulative
//! offsets, then the leader with the recomputed record length and base
//! address. A record longer than 99999 bytes, or holding a field longer
//! than 9999 bytes, is rejected with [`MarcError::RecordTooLong`] unless
//! [`WriterOptions::allow_oversize`] is set.
//!
//! # Examples
//!
//! ```
//! use marc_codec::{DataField, Leader, MarcWriter, Record};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut record = Record::new(Leader::default());
//! let mut field = DataField::new("245", '1', '0');
//! field.add_subfield('a', "Title");
//! record.insert_data_field(field);
//!
//! let mut buffer = Vec::new();
//! let mut writer = MarcWriter::new(&mut buffer);
//! writer.write_record(&record)?;
//! writer.finish()?;
//! assert_eq!(buffer.last(), Some(&0x1D));
//! # Ok(())
//! # }
//! ```

use crate::converter::{CharEncoder, Latin1Encoder, UnicodeToMarc8};
use crate::encoding::Encoding;
use crate::error::{MarcError, Result};
use crate::formats::FormatWriter;
use crate::leader::{LEADER_LENGTH, MAX_RECORD_LENGTH};
use crate::reader::{FIELD_TERMINATOR, RECORD_TERMINATOR, SUBFIELD_DELIMITER};
use crate::record::{ControlField, DataField, Record};
use serde::{Deserialize, Serialize};
use std::io::Write;
use unicode_normalization::UnicodeNormalization;

/// Largest field length a 4-digit directory entry can state
pub const MAX_FIELD_LENGTH: usize = 9999;

/// Settings for [`MarcWriter`] and [`SplitWriter`](crate::SplitWriter).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Write records that break the ISO 2709 size limits instead of failing
    pub allow_oversize: bool,
    /// Output encoding: UTF-8, MARC-8 or ISO-8859-1
    pub encoding: Encoding,
    /// Compose text to NFC before encoding
    pub normalize: bool,
}

/// Encodes field text for output.
#[derive(Debug, Default)]
pub(crate) struct FieldEncoder {
    options: WriterOptions,
    marc8: Option<UnicodeToMarc8>,
}

impl FieldEncoder {
    pub(crate) fn new(options: WriterOptions) -> Result<Self> {
        match options.encoding {
            Encoding::Utf8 | Encoding::Marc8 | Encoding::Latin1 => {},
            other => {
                return Err(MarcError::EncodingError(format!(
                    "{other} is not an output encoding"
                )))
            },
        }
        Ok(FieldEncoder {
            options,
            marc8: None,
        })
    }

    pub(crate) fn options(&self) -> &WriterOptions {
        &self.options
    }

    fn text(&mut self, text: &str) -> Result<Vec<u8>> {
        let normalized;
        let text = if self.options.normalize {
            normalized = text.nfc().collect::<String>();
            normalized.as_str()
        } else {
            text
        };
        match self.options.encoding {
            Encoding::Marc8 => {
                if self.marc8.is_none() {
                    self.marc8 = Some(UnicodeToMarc8::new()?);
                }
                match &self.marc8 {
                    Some(encoder) => encoder.encode(text),
                    None => Ok(Vec::new()),
                }
            },
            Encoding::Latin1 => Latin1Encoder.encode(text),
            _ => Ok(text.as_bytes().to_vec()),
        }
    }

    /// Control field payload plus its field terminator
    pub(crate) fn control_field(&mut self, field: &ControlField) -> Result<Vec<u8>> {
        let mut out = self.text(&field.data)?;
        out.push(FIELD_TERMINATOR);
        Ok(out)
    }

    /// Indicators, subfields and the field terminator
    pub(crate) fn data_field(&mut self, field: &DataField) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(16);
        out.push(ascii_byte(field.indicator1));
        out.push(ascii_byte(field.indicator2));
        for subfield in &field.subfields {
            out.push(SUBFIELD_DELIMITER);
            out.push(ascii_byte(subfield.code));
            out.extend(self.text(&subfield.value)?);
        }
        out.push(FIELD_TERMINATOR);
        Ok(out)
    }

    pub(crate) fn leader_coding(&self) -> char {
        if self.options.encoding == Encoding::Utf8 {
            'a'
        } else {
            ' '
        }
    }
}

fn ascii_byte(c: char) -> u8 {
    u8::try_from(u32::from(c)).ok().filter(u8::is_ascii).unwrap_or(b' ')
}

/// Directory and data area of one output record.
#[derive(Debug, Default)]
pub(crate) struct RecordImage {
    directory: Vec<u8>,
    data: Vec<u8>,
    oversize_field: Option<(String, usize)>,
    oversize_offset: bool,
}

impl RecordImage {
    pub(crate) fn push(&mut self, tag: &str, field: &[u8]) {
        let start = self.data.len();
        let length = field.len();
        if length > MAX_FIELD_LENGTH && self.oversize_field.is_none() {
            self.oversize_field = Some((tag.to_string(), length));
        }
        if start > MAX_RECORD_LENGTH as usize {
            self.oversize_offset = true;
        }
        self.directory
            .extend_from_slice(format!("{tag:0>3}{length:04}{start:05}").as_bytes());
        self.data.extend_from_slice(field);
    }

    /// Bytes of field data so far
    pub(crate) fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Serialize with a copy of `record`'s leader, checking size limits.
    pub(crate) fn finish(self, record: &Record, coding: char, allow_oversize: bool) -> Result<Vec<u8>> {
        let base_address = LEADER_LENGTH + self.directory.len() + 1;
        let record_length = base_address + self.data.len() + 1;

        if !allow_oversize {
            if record_length > MAX_RECORD_LENGTH as usize || self.oversize_offset {
                return Err(MarcError::RecordTooLong(format!(
                    "Record is too long to be a valid MARC binary record, it's length would be {record_length} which is more than 99999 bytes"
                )));
            }
            if let Some((tag, length)) = &self.oversize_field {
                return Err(MarcError::RecordTooLong(format!(
                    "Field {tag} is {length} bytes long; the maximum length for a field counting all of the subfields is 9999 bytes"
                )));
            }
        }

        let mut leader = record.leader.clone();
        leader.record_length = u32::try_from(record_length)
            .map_err(|_| MarcError::RecordTooLong("Record length exceeds 4GB limit".to_string()))?;
        leader.base_address_of_data = u32::try_from(base_address)
            .map_err(|_| MarcError::RecordTooLong("Base address exceeds 4GB limit".to_string()))?;
        leader.char_coding_scheme = coding;

        let mut out = Vec::with_capacity(record_length);
        out.extend(leader.as_bytes());
        out.extend(self.directory);
        out.push(FIELD_TERMINATOR);
        out.extend(self.data);
        out.push(RECORD_TERMINATOR);
        Ok(out)
    }
}

/// Writer for ISO 2709 binary MARC format.
///
/// Records are written one at a time. Control fields come first, then data
/// fields, each in record order.
#[derive(Debug)]
pub struct MarcWriter<W: Write> {
    writer: W,
    encoder: FieldEncoder,
    records_written: usize,
    finished: bool,
}

impl<W: Write> MarcWriter<W> {
    /// Create a writer producing UTF-8 records.
    ///
    /// ```
    /// use marc_codec::MarcWriter;
    /// let writer = MarcWriter::new(Vec::new());
    /// assert_eq!(writer.records_written(), 0);
    /// ```
    pub fn new(writer: W) -> Self {
        MarcWriter {
            writer,
            encoder: FieldEncoder::default(),
            records_written: 0,
            finished: false,
        }
    }

    /// Create a writer with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::EncodingError`] if the output encoding is not
    /// UTF-8, MARC-8 or ISO-8859-1.
    pub fn with_options(writer: W, options: WriterOptions) -> Result<Self> {
        Ok(MarcWriter {
            writer,
            encoder: FieldEncoder::new(options)?,
            records_written: 0,
            finished: false,
        })
    }

    /// Permit records beyond the ISO 2709 size limits
    #[must_use]
    pub fn with_allow_oversize(mut self, allow: bool) -> Self {
        self.encoder.options.allow_oversize = allow;
        self
    }

    /// Compose text to NFC before encoding
    #[must_use]
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.encoder.options.normalize = normalize;
        self
    }

    /// Current options
    #[must_use]
    pub fn options(&self) -> &WriterOptions {
        self.encoder.options()
    }

    /// Write a single MARC record.
    ///
    /// Leader/09 is set to `'a'` for UTF-8 output and `' '` otherwise; the
    /// record itself is not modified.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the writer was already finished
    /// - the record or one of its fields is too long and oversize records
    ///   are not allowed
    /// - an I/O error occurs during writing
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if self.finished {
            return Err(MarcError::InvalidRecord(
                "Cannot write to a finished writer".to_string(),
            ));
        }

        let mut image = RecordImage::default();
        for field in record.control_fields() {
            image.push(&field.tag, &self.encoder.control_field(field)?);
        }
        for field in record.data_fields() {
            image.push(&field.tag, &self.encoder.data_field(field)?);
        }
        let bytes = image.finish(
            record,
            self.encoder.leader_coding(),
            self.encoder.options.allow_oversize,
        )?;
        self.writer.write_all(&bytes)?;

        self.records_written += 1;
        Ok(())
    }

    /// Flush the writer and mark it as finished.
    ///
    /// After calling `finish`, no more records can be written.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing the underlying writer fails.
    pub fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Returns the number of records written so far.
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Consume the writer, returning the destination
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + std::fmt::Debug> FormatWriter for MarcWriter<W> {
    fn write_record(&mut self, record: &Record) -> Result<()> {
        MarcWriter::write_record(self, record)
    }

    fn finish(&mut self) -> Result<()> {
        MarcWriter::finish(self)
    }

    fn records_written(&self) -> Option<usize> {
        Some(self.records_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::Leader;
    use crate::reader::MarcReader;
    use std::io::Cursor;

    fn make_test_leader() -> Leader {
        Leader {
            char_coding_scheme: 'a',
            ..Leader::default()
        }
    }

    fn title_record(title: &str) -> Record {
        let mut record = Record::new(make_test_leader());
        let mut field = DataField::new("245", '1', '0');
        field.add_subfield('a', title);
        record.insert_data_field(field);
        record
    }

    fn write_one(record: &Record, options: WriterOptions) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        MarcWriter::with_options(&mut buffer, options)?.write_record(record)?;
        Ok(buffer)
    }

    #[test]
    fn test_write_simple_record() {
        let buffer = write_one(&title_record("Test title"), WriterOptions::default()).unwrap();

        // 24 leader + 13 directory + 15 field data + 1 record terminator
        assert_eq!(&buffer[0..5], b"00053");
        assert_eq!(&buffer[12..17], b"00037");
        assert_eq!(&buffer[24..36], b"245001500000");
        assert_eq!(buffer[36], FIELD_TERMINATOR);
        assert_eq!(buffer[52], RECORD_TERMINATOR);
    }

    #[test]
    fn test_write_and_read_back() {
        let record = Record::builder(make_test_leader())
            .control_field("001", "12345")
            .data_field(
                DataField::builder("245", '1', '0')
                    .subfield('a', "Test title")
                    .subfield('c', "Author")
                    .build(),
            )
            .build();

        let buffer = write_one(&record, WriterOptions::default()).unwrap();
        let read = MarcReader::new(Cursor::new(buffer)).read_record().unwrap().unwrap();

        assert_eq!(read.get_control_field("001"), Some("12345"));
        let field = read.get_field("245").unwrap();
        assert_eq!(field.indicator1, '1');
        assert_eq!(field.indicator2, '0');
        assert_eq!(field.get_subfield('a'), Some("Test title"));
        assert_eq!(field.get_subfield('c'), Some("Author"));
    }

    #[test]
    fn test_record_too_long() {
        let mut record = Record::new(make_test_leader());
        for _ in 0..12 {
            let mut field = DataField::new("500", ' ', ' ');
            field.add_subfield('a', "x".repeat(9000));
            record.insert_data_field(field);
        }
        let err = write_one(&record, WriterOptions::default()).unwrap_err();
        assert!(matches!(err, MarcError::RecordTooLong(_)), "{err}");

        let options = WriterOptions {
            allow_oversize: true,
            ..WriterOptions::default()
        };
        let buffer = write_one(&record, options).unwrap();
        assert_eq!(&buffer[0..5], b"99999");
        assert_eq!(buffer.last(), Some(&RECORD_TERMINATOR));
    }

    #[test]
    fn test_field_too_long() {
        let record = title_record(&"y".repeat(10_000));
        let err = write_one(&record, WriterOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Field 245"), "{err}");

        let options = WriterOptions {
            allow_oversize: true,
            ..WriterOptions::default()
        };
        let buffer = write_one(&record, options).unwrap();
        // the length no longer fits its four digits
        assert_eq!(&buffer[24..32], b"24510005");
    }

    #[test]
    fn test_marc8_output() {
        let options = WriterOptions {
            encoding: Encoding::Marc8,
            ..WriterOptions::default()
        };
        let buffer = write_one(&title_record("Caf\u{e9}"), options).unwrap();
        assert_eq!(buffer[9], b' ');
        let data = &buffer[39..];
        assert!(data.starts_with(b"\x1FaCaf\xE2e\x1E"), "{data:?}");

        let read = MarcReader::new(Cursor::new(buffer)).read_record().unwrap().unwrap();
        assert_eq!(
            read.get_field("245").unwrap().get_subfield('a'),
            Some("Cafe\u{0301}")
        );
    }

    #[test]
    fn test_latin1_output_with_normalization() {
        let options = WriterOptions {
            encoding: Encoding::Latin1,
            normalize: true,
            ..WriterOptions::default()
        };
        let buffer = write_one(&title_record("Cafe\u{0301}"), options).unwrap();
        assert_eq!(buffer[9], b' ');
        assert!(buffer.windows(4).any(|w| w == b"Caf\xE9"));
    }

    #[test]
    fn test_detection_modes_are_not_output_encodings() {
        let options = WriterOptions {
            encoding: Encoding::BestGuess,
            ..WriterOptions::default()
        };
        assert!(MarcWriter::with_options(Vec::new(), options).is_err());
    }

    #[test]
    fn test_format_writer_trait() {
        let records: Vec<Record> = (0..3).map(|i| title_record(&format!("Title {i}"))).collect();

        let mut buffer = Vec::new();
        {
            let mut writer = MarcWriter::new(&mut buffer);
            FormatWriter::write_batch(&mut writer, &records).unwrap();
            assert_eq!(writer.records_written(), 3);
            writer.finish().unwrap();
            assert!(writer.write_record(&records[0]).is_err());
        }

        let mut reader = MarcReader::new(Cursor::new(buffer));
        for i in 0..3 {
            let record = reader.read_record().unwrap().unwrap();
            assert_eq!(
                record.get_field("245").unwrap().get_subfield('a'),
                Some(format!("Title {i}").as_str())
            );
        }
        assert!(reader.read_record().unwrap().is_none());
    }
}
