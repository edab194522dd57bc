//! Strict reading of ISO 2709 binary MARC records.
//!
//! [`MarcReader`] stops at the first structural defect in a record and
//! returns an error for it. Use [`PermissiveReader`](crate::PermissiveReader)
//! for damaged input.
//!
//! # Examples
//!
//! ```no_run
//! use marc_codec::MarcReader;
//! use std::fs::File;
//!
//! let file = File::open("records.mrc")?;
//! let mut reader = MarcReader::new(file);
//!
//! while let Some(record) = reader.read_record()? {
//!     println!("{:?}", record.control_number());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::converter::{latin1_to_string, Iso5426ToUnicode, Marc8ToUnicode};
use crate::encoding::Encoding;
use crate::error::{MarcError, Result};
use crate::formats::FormatReader;
use crate::leader::{parse_digits, Leader, LEADER_LENGTH};
use crate::record::{is_control_tag, ControlField, DataField, Record};
use nom::bytes::complete::take;
use nom::combinator::map_res;
use nom::multi::count;
use nom::IResult;
use std::io::{ErrorKind, Read};

/// Ends the directory and every field
pub const FIELD_TERMINATOR: u8 = 0x1E;
/// Introduces each subfield code
pub const SUBFIELD_DELIMITER: u8 = 0x1F;
/// Ends a record
pub const RECORD_TERMINATOR: u8 = 0x1D;

/// Bytes per directory entry: tag (3), length (4), start (5)
pub(crate) const DIRECTORY_ENTRY_LENGTH: usize = 12;

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirectoryEntry {
    pub tag: String,
    pub length: usize,
    pub start: usize,
}

fn number(bytes: &[u8]) -> Result<usize> {
    parse_digits(bytes).map(|n| n as usize)
}

pub(crate) fn directory_entry(input: &[u8]) -> IResult<&[u8], DirectoryEntry> {
    let (input, tag) = take(3usize)(input)?;
    let (input, length) = map_res(take(4usize), number)(input)?;
    let (input, start) = map_res(take(5usize), number)(input)?;
    Ok((
        input,
        DirectoryEntry {
            tag: latin1_to_string(tag),
            length,
            start,
        },
    ))
}

/// Reader for well-formed ISO 2709 records.
///
/// Field text is decoded according to leader/09 (`'a'` is UTF-8, anything
/// else MARC-8) unless an encoding is forced with
/// [`MarcReader::with_encoding`]. Records whose data was converted from a
/// legacy encoding come back with leader/09 set to `'a'`.
#[derive(Debug)]
pub struct MarcReader<R: Read> {
    reader: R,
    encoding: Option<Encoding>,
    marc8: Option<Marc8ToUnicode>,
    records_read: usize,
}

impl<R: Read> MarcReader<R> {
    /// Create a new reader over any byte source.
    ///
    /// ```
    /// use marc_codec::MarcReader;
    /// use std::io::Cursor;
    ///
    /// let mut reader = MarcReader::new(Cursor::new(Vec::new()));
    /// assert!(reader.read_record().unwrap().is_none());
    /// ```
    pub fn new(reader: R) -> Self {
        MarcReader {
            reader,
            encoding: None,
            marc8: None,
            records_read: 0,
        }
    }

    /// Decode every record in `encoding`, whatever its leader says.
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at a clean end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is truncated, its leader or directory
    /// is malformed, a terminator is missing, or field text cannot be
    /// decoded. No partial record is returned.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let mut leader_bytes = [0u8; LEADER_LENGTH];
        let got = read_fully(&mut self.reader, &mut leader_bytes)?;
        if got == 0 {
            return Ok(None);
        }
        if got < LEADER_LENGTH {
            return Err(MarcError::TruncatedRecord(format!(
                "Premature end of file encountered: {got} leader bytes"
            )));
        }

        let mut leader = Leader::from_bytes(&leader_bytes)?;
        leader.validate_for_reading()?;

        let record_length = leader.record_length as usize;
        let base_address = leader.base_address_of_data as usize;
        if base_address >= record_length {
            return Err(MarcError::InvalidLeader(format!(
                "Base address of data {base_address} is not inside a record of length {record_length}"
            )));
        }

        let mut body = vec![0u8; record_length - LEADER_LENGTH];
        let got = read_fully(&mut self.reader, &mut body)?;
        if got < body.len() {
            return Err(MarcError::TruncatedRecord(format!(
                "Premature end of file encountered: expected {} bytes, got {got}",
                body.len()
            )));
        }

        let encoding = self
            .encoding
            .unwrap_or_else(|| Encoding::from_leader_char(leader.char_coding_scheme));
        if encoding != Encoding::Utf8 {
            leader.char_coding_scheme = 'a';
        }

        let record = self.parse_body(leader, &body, base_address, encoding)?;
        self.records_read += 1;
        Ok(Some(record))
    }

    fn parse_body(
        &mut self,
        leader: Leader,
        body: &[u8],
        base_address: usize,
        encoding: Encoding,
    ) -> Result<Record> {
        let Some(directory_length) = base_address.checked_sub(LEADER_LENGTH + 1) else {
            return Err(MarcError::InvalidLeader(format!(
                "Base address of data {base_address} leaves no room for the directory terminator"
            )));
        };
        if directory_length % DIRECTORY_ENTRY_LENGTH != 0 {
            return Err(MarcError::InvalidRecord(format!(
                "invalid directory: length {directory_length} is not a multiple of 12"
            )));
        }
        let entries = directory_length / DIRECTORY_ENTRY_LENGTH;
        let (_, directory) = count(directory_entry, entries)(&body[..directory_length])
            .map_err(|e| MarcError::InvalidRecord(format!("invalid directory entry: {e:?}")))?;

        if body[directory_length] != FIELD_TERMINATOR {
            return Err(MarcError::InvalidRecord(
                "expected field terminator at end of directory".to_string(),
            ));
        }
        if body.last() != Some(&RECORD_TERMINATOR) {
            return Err(MarcError::InvalidRecord(
                "expected record terminator".to_string(),
            ));
        }

        let data = &body[directory_length + 1..body.len() - 1];
        let mut record = Record::new(leader);

        for entry in directory {
            let end = entry.start + entry.length;
            if entry.length == 0 || end > data.len() {
                return Err(MarcError::InvalidField(format!(
                    "Field {} (start {}, length {}) exceeds data area of {} bytes",
                    entry.tag,
                    entry.start,
                    entry.length,
                    data.len()
                )));
            }
            let raw = &data[entry.start..end];
            let Some((&FIELD_TERMINATOR, content)) = raw.split_last() else {
                return Err(MarcError::InvalidField(format!(
                    "expected field terminator at end of field {}",
                    entry.tag
                )));
            };

            if is_control_tag(&entry.tag) {
                let text = self.decode(content, encoding)?;
                record.insert_control_field(ControlField::new(entry.tag, text));
            } else {
                let field = self.parse_data_field(&entry.tag, content, encoding).map_err(|e| {
                    MarcError::InvalidField(format!(
                        "error parsing data field for tag: {} with data: {}: {e}",
                        entry.tag,
                        latin1_to_string(content)
                    ))
                })?;
                record.insert_data_field(field);
            }
        }
        Ok(record)
    }

    fn parse_data_field(&mut self, tag: &str, content: &[u8], encoding: Encoding) -> Result<DataField> {
        let [ind1, ind2, rest @ ..] = content else {
            return Err(MarcError::InvalidField(
                "Data field too short (needs indicators)".to_string(),
            ));
        };
        let mut field = DataField::new(tag, char::from(*ind1), char::from(*ind2));

        let mut chunks = rest.split(|b| *b == SUBFIELD_DELIMITER);
        if chunks.next().is_some_and(|lead| !lead.is_empty()) {
            return Err(MarcError::InvalidField(
                "Expected subfield delimiter".to_string(),
            ));
        }
        for chunk in chunks {
            let Some((&code, value)) = chunk.split_first() else {
                continue;
            };
            let value = self.decode(value, encoding)?;
            field.add_subfield(char::from(code), value);
        }
        Ok(field)
    }

    fn decode(&mut self, bytes: &[u8], encoding: Encoding) -> Result<String> {
        match encoding {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| MarcError::EncodingError(format!("Invalid UTF-8: {e}"))),
            Encoding::Latin1 => Ok(latin1_to_string(bytes)),
            Encoding::Iso5426 => Ok(Iso5426ToUnicode::new().convert(bytes)),
            Encoding::Marc8 => {
                if self.marc8.is_none() {
                    self.marc8 = Some(Marc8ToUnicode::new()?);
                }
                match &self.marc8 {
                    Some(converter) => converter.convert(bytes),
                    None => Ok(latin1_to_string(bytes)),
                }
            },
            other => Err(MarcError::EncodingError(format!(
                "{other} is only available to the permissive reader"
            ))),
        }
    }
}

/// Read until `buf` is full or the source ends; returns the byte count.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => return Err(MarcError::IoError(e)),
        }
    }
    Ok(filled)
}

impl<R: Read> Iterator for MarcReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

impl<R: Read + std::fmt::Debug> FormatReader for MarcReader<R> {
    fn read_record(&mut self) -> Result<Option<Record>> {
        MarcReader::read_record(self)
    }

    fn records_read(&self) -> Option<usize> {
        Some(self.records_read)
    }
}

/// Assemble a raw record from field bodies given without their
/// terminators. Lengths above 99999 are written as `99999`.
#[cfg(test)]
pub(crate) fn build_raw_record(coding: u8, fields: &[(&str, &[u8])]) -> Vec<u8> {
    let mut directory = Vec::new();
    let mut data = Vec::new();
    for (tag, body) in fields {
        let length = body.len() + 1;
        directory.extend_from_slice(format!("{tag}{length:04}{:05}", data.len() % 100_000).as_bytes());
        data.extend_from_slice(body);
        data.push(FIELD_TERMINATOR);
    }
    directory.push(FIELD_TERMINATOR);
    let base = LEADER_LENGTH + directory.len();
    let total = (base + data.len() + 1).min(99_999);

    let mut out = format!("{total:05}nam a22{base:05} a 4500").into_bytes();
    out[9] = coding;
    out.extend_from_slice(&directory);
    out.extend_from_slice(&data);
    out.push(RECORD_TERMINATOR);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_record(coding: u8, fields: &[(&str, &[u8])]) -> Vec<u8> {
        build_raw_record(coding, fields)
    }

    fn title_record(title: &[u8]) -> Vec<u8> {
        let mut field = b"10\x1Fa".to_vec();
        field.extend_from_slice(title);
        build_record(b'a', &[("001", b"ocm0001"), ("245", &field)])
    }

    #[test]
    fn test_read_simple_record() {
        let mut reader = MarcReader::new(Cursor::new(title_record(b"Test title")));
        let record = reader.read_record().unwrap().unwrap();

        assert_eq!(record.leader.type_of_record, 'a');
        assert_eq!(record.control_number(), Some("ocm0001"));
        let field = record.get_field("245").unwrap();
        assert_eq!(field.indicator1, '1');
        assert_eq!(field.indicator2, '0');
        assert_eq!(field.get_subfield('a'), Some("Test title"));
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_directory_entry_parser() {
        let (rest, entry) = directory_entry(b"245001200034xyz").unwrap();
        assert_eq!(rest, b"xyz");
        assert_eq!(
            entry,
            DirectoryEntry {
                tag: "245".to_string(),
                length: 12,
                start: 34
            }
        );
        assert!(directory_entry(b"24500x200034").is_err());
    }

    #[test]
    fn test_marc8_data_is_converted() {
        let raw = build_record(b' ', &[("245", b"10\x1FaMa\xE4nana")]);
        let record = MarcReader::new(Cursor::new(raw)).read_record().unwrap().unwrap();
        assert_eq!(record.get_field("245").unwrap().get_subfield('a'), Some("Man\u{0303}ana"));
        assert_eq!(record.leader.char_coding_scheme, 'a');
    }

    #[test]
    fn test_encoding_override() {
        let raw = build_record(b' ', &[("245", b"10\x1Facaf\xE9")]);
        let record = MarcReader::new(Cursor::new(raw))
            .with_encoding(Encoding::Latin1)
            .read_record()
            .unwrap()
            .unwrap();
        assert_eq!(record.get_field("245").unwrap().get_subfield('a'), Some("caf\u{00E9}"));
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let mut reader = MarcReader::new(Cursor::new(title_record(b"caf\xE9")));
        assert!(matches!(reader.read_record(), Err(MarcError::InvalidField(_))));
    }

    #[test]
    fn test_truncated_record() {
        let mut raw = title_record(b"Test title");
        raw.truncate(raw.len() - 5);
        let err = MarcReader::new(Cursor::new(raw)).read_record().unwrap_err();
        assert!(matches!(err, MarcError::TruncatedRecord(_)), "{err}");

        let err = MarcReader::new(Cursor::new(b"00714cam".to_vec()))
            .read_record()
            .unwrap_err();
        assert!(matches!(err, MarcError::TruncatedRecord(_)), "{err}");
    }

    #[test]
    fn test_directory_length_must_be_multiple_of_twelve() {
        let mut raw = title_record(b"Test title");
        // claim the base address one byte later than it is
        let base = parse_digits(&raw[12..17]).unwrap() + 1;
        raw[12..17].copy_from_slice(format!("{base:05}").as_bytes());
        let err = MarcReader::new(Cursor::new(raw)).read_record().unwrap_err();
        assert!(err.to_string().contains("invalid directory"), "{err}");
    }

    #[test]
    fn test_base_address_without_directory_terminator() {
        let mut raw = b"00030nam a2200024 a 4500".to_vec();
        raw.extend_from_slice(b"\x1Eabcd\x1E\x1D");
        let mut reader = MarcReader::new(Cursor::new(raw));
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, MarcError::InvalidLeader(_)), "{err}");
    }

    #[test]
    fn test_missing_record_terminator() {
        let mut raw = title_record(b"Test title");
        let last = raw.len() - 1;
        raw[last] = b'x';
        let err = MarcReader::new(Cursor::new(raw)).read_record().unwrap_err();
        assert!(err.to_string().contains("expected record terminator"), "{err}");
    }

    #[test]
    fn test_missing_subfield_delimiter() {
        let raw = build_record(b'a', &[("245", b"10abc")]);
        let err = MarcReader::new(Cursor::new(raw)).read_record().unwrap_err();
        assert!(err.to_string().contains("Expected subfield delimiter"), "{err}");
    }

    #[test]
    fn test_malformed_leader_record_length_too_small() {
        let leader = b"00010nam a2200025 i 4500";
        let err = MarcReader::new(Cursor::new(leader.to_vec()))
            .read_record()
            .unwrap_err();
        assert!(err.to_string().contains("Record length must be at least 24"), "{err}");
    }

    #[test]
    fn test_malformed_leader_base_address_too_small() {
        let leader = b"00050nam a2200010 i 4500";
        let err = MarcReader::new(Cursor::new(leader.to_vec()))
            .read_record()
            .unwrap_err();
        assert!(
            err.to_string().contains("Base address of data must be at least 24"),
            "{err}"
        );
    }

    #[test]
    fn test_iterator_and_format_reader() {
        use crate::formats::FormatReaderExt;

        let mut raw = title_record(b"One");
        raw.extend(title_record(b"Two"));
        raw.extend(title_record(b"Three"));

        let titles: Vec<String> = MarcReader::new(Cursor::new(raw.clone()))
            .map(|r| r.unwrap().get_field("245").unwrap().get_subfield('a').unwrap().to_string())
            .collect();
        assert_eq!(titles, ["One", "Two", "Three"]);

        let mut reader = MarcReader::new(Cursor::new(raw));
        assert_eq!(FormatReader::records_read(&reader), Some(0));
        assert_eq!(reader.records().count(), 3);
        assert_eq!(FormatReader::records_read(&reader), Some(3));
    }
}
