//! Permissive reading of damaged ISO 2709 records.
//!
//! [`PermissiveReader`] reads the same framing as
//! [`MarcReader`](crate::MarcReader) but repairs what it can instead of
//! failing: misplaced record terminators, shifted leaders, directories that
//! are a byte short or long, field lengths that disagree with the data,
//! invalid subfield codes and text in an encoding other than the one the
//! leader claims. Every repair is logged on the reader's [`ErrorHandler`],
//! which is reset at the start of each record.
//!
//! A defect that cannot be repaired is logged at [`Severity::Fatal`] and
//! returned as [`MarcError::Fatal`]. The stream is then positioned at the
//! next record, so reading can simply continue.
//!
//! ```
//! use marc_codec::{MarcError, PermissiveReader};
//! use std::io::Cursor;
//!
//! let mut reader = PermissiveReader::new(Cursor::new(Vec::new()));
//! loop {
//!     match reader.read_record() {
//!         Ok(Some(record)) => println!("{:?}", record.control_number()),
//!         Ok(None) => break,
//!         Err(MarcError::Fatal(message)) => eprintln!("skipped: {message}"),
//!         Err(other) => return Err(other),
//!     }
//! }
//! # Ok::<(), MarcError>(())
//! ```

use crate::byte_stream::ByteStream;
use crate::converter::{latin1_bytes, latin1_to_string, Iso5426ToUnicode, Marc8ToUnicode};
use crate::encoding::Encoding;
use crate::error::{MarcError, Result};
use crate::error_handler::{ErrorHandler, Severity, NO_LOCATION};
use crate::formats::FormatReader;
use crate::leader::{parse_digits, Leader, LEADER_LENGTH};
use crate::reader::{DIRECTORY_ENTRY_LENGTH, FIELD_TERMINATOR, RECORD_TERMINATOR, SUBFIELD_DELIMITER};
use crate::record::{is_control_tag, ControlField, DataField, Record, CONTROL_NUMBER_TAG};
use lazy_static::lazy_static;
use memchr::memmem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Read;
use unicode_normalization::UnicodeNormalization;

const DEFAULT_LOOKAHEAD: usize = 200_000;
const MAX_LENGTH_REPAIRS: usize = 5;
const MAX_FIELD_LENGTH: usize = 9999;
const VALID_SUBFIELD_CODES: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ESC: u8 = 0x1B;
const VERTICAL_BAR: u8 = 0x7C;
const OVERBAR: u8 = 0xAF;

/// Joins the three candidate decodings of a subfield until one is chosen
const GUESS_SEPARATOR: &str = "%%@%%";
/// Separates subfields in the per-record decoding samples
const SAMPLE_SEPARATOR: &str = "|>";
const GUESS_NAMES: [&str; 3] = ["MARC8", "Unimarc", "ISO-8859-1"];

lazy_static! {
    static ref HTML_ENTITY: Regex = Regex::new("&[a-z]*;").expect("valid regex");
    static ref LOOSE_NCR: Regex =
        Regex::new("&#x([0-9A-Fa-f]{4})(%x)?;?").expect("valid regex");
    static ref UNICODE_PLACEHOLDER: Regex =
        Regex::new(r"<U\+([0-9A-Fa-f]{4})>").expect("valid regex");
    static ref MISSING_MULTIBYTE_ESCAPE: Regex = Regex::new(r"\$1(.)").expect("valid regex");
    static ref SCRIPT_RESET: regex::bytes::Regex =
        regex::bytes::Regex::new(r"(?-u)\x1Bb-\x1Bs([psb$()])").expect("valid regex");
}

/// Settings for [`PermissiveReader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissiveOptions {
    /// Repair defects and log them; when off, the first defect is an error
    pub permissive: bool,
    /// Decode legacy encodings to Unicode and set leader/09 to `'a'`.
    /// When off, text under a blank leader/09 is read as ISO-8859-1.
    pub convert_to_utf8: bool,
    /// Encoding assumed for a blank leader/09 when converting
    pub default_encoding: Encoding,
    /// Keep uppercase subfield codes instead of lowercasing them
    pub uppercase_subfields: bool,
    /// Turn `&#xHHHH;` references in MARC-8 text into characters
    pub translate_ncr: bool,
    /// Bytes to search past the stated record length for a terminator
    /// before the search window is doubled
    pub lookahead: usize,
}

impl Default for PermissiveOptions {
    fn default() -> Self {
        PermissiveOptions {
            permissive: true,
            convert_to_utf8: true,
            default_encoding: Encoding::BestGuess,
            uppercase_subfields: false,
            translate_ncr: true,
            lookahead: DEFAULT_LOOKAHEAD,
        }
    }
}

/// Reader that recovers records from damaged ISO 2709 input.
#[derive(Debug)]
pub struct PermissiveReader<R: Read> {
    stream: ByteStream<R>,
    options: PermissiveOptions,
    errors: ErrorHandler,
    marc8: Option<Marc8ToUnicode>,
    lookahead: usize,
    records_read: usize,
}

impl<R: Read> PermissiveReader<R> {
    /// Create a reader with [`PermissiveOptions::default`]
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, PermissiveOptions::default())
    }

    /// Create a reader with explicit options
    pub fn with_options(reader: R, options: PermissiveOptions) -> Self {
        PermissiveReader {
            stream: ByteStream::new(reader),
            lookahead: options.lookahead.max(LEADER_LENGTH + 1),
            options,
            errors: ErrorHandler::new(),
            marc8: None,
            records_read: 0,
        }
    }

    /// Turn recovery on or off
    #[must_use]
    pub fn with_permissive(mut self, permissive: bool) -> Self {
        self.options.permissive = permissive;
        self
    }

    /// Convert legacy encodings to Unicode
    #[must_use]
    pub fn with_convert_to_utf8(mut self, convert: bool) -> Self {
        self.options.convert_to_utf8 = convert;
        self
    }

    /// Encoding assumed for a blank leader/09
    #[must_use]
    pub fn with_default_encoding(mut self, encoding: Encoding) -> Self {
        self.options.default_encoding = encoding;
        self
    }

    /// Keep uppercase subfield codes
    #[must_use]
    pub fn with_uppercase_subfields(mut self, keep: bool) -> Self {
        self.options.uppercase_subfields = keep;
        self
    }

    /// Translate numeric character references in MARC-8 text
    #[must_use]
    pub fn with_translate_ncr(mut self, translate: bool) -> Self {
        self.options.translate_ncr = translate;
        self
    }

    /// Initial terminator search window
    #[must_use]
    pub fn with_lookahead(mut self, bytes: usize) -> Self {
        self.options.lookahead = bytes;
        self.lookahead = bytes.max(LEADER_LENGTH + 1);
        self
    }

    /// Current options
    #[must_use]
    pub fn options(&self) -> &PermissiveOptions {
        &self.options
    }

    /// Diagnostics for the record last read (or failed)
    #[must_use]
    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    /// Read the next record, repairing it where possible.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::Fatal`] for a record that cannot be recovered;
    /// the next call reads the following record. With recovery turned off,
    /// any defect is returned as an ordinary error. I/O failures are
    /// returned as [`MarcError::IoError`].
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        self.errors.reset();
        if !self.skip_to_leader()? {
            return Ok(None);
        }

        let result = self.read_next();
        match &result {
            Ok(_) => self.records_read += 1,
            Err(MarcError::Fatal(message)) => {
                tracing::warn!(
                    record_id = self.errors.record_id(),
                    position = self.stream.position(),
                    "skipping unrecoverable record: {message}"
                );
            },
            Err(_) => {},
        }
        result.map(Some)
    }

    fn read_next(&mut self) -> Result<Record> {
        let leader_bytes = self.stream.read(LEADER_LENGTH)?;
        if leader_bytes.len() < LEADER_LENGTH {
            return Err(fatal(
                &mut self.errors,
                self.options.permissive,
                format!(
                    "Premature end of file encountered: only {} leader bytes",
                    leader_bytes.len()
                ),
            ));
        }

        let Ok(stated_length) = parse_digits(&leader_bytes[0..5]) else {
            let err = fatal(
                &mut self.errors,
                self.options.permissive,
                "Unable to parse record length, Unable to Continue",
            );
            self.skip_past_terminator()?;
            return Err(err);
        };

        let body = self.read_body(stated_length as usize)?;
        let marc8 = self.marc8()?;
        let parse = RecordParse {
            options: &self.options,
            errors: &mut self.errors,
            marc8,
            unimarc: Iso5426ToUnicode::new(),
            encoding: Encoding::Latin1,
            samples: Default::default(),
        };
        let mut record = parse.run(&leader_bytes, body)?;
        if self.options.convert_to_utf8 {
            record.leader.char_coding_scheme = 'a';
        }
        Ok(record)
    }

    fn marc8(&mut self) -> Result<Marc8ToUnicode> {
        if let Some(converter) = &self.marc8 {
            return Ok(converter.clone());
        }
        let converter = Marc8ToUnicode::with_multibyte()?;
        self.marc8 = Some(converter.clone());
        Ok(converter)
    }

    /// Skip any non-digit bytes in front of the next leader. Returns false
    /// at end of input.
    fn skip_to_leader(&mut self) -> Result<bool> {
        self.stream.mark(LEADER_LENGTH);
        let mut skipped = 0usize;
        loop {
            match self.stream.read_byte()? {
                None => return Ok(false),
                Some(byte) if byte.is_ascii_digit() => break,
                Some(_) => skipped += 1,
            }
        }
        self.stream.reset()?;
        if skipped > 0 {
            self.stream.read(skipped)?;
            tracing::debug!(skipped, "skipped non-numeric bytes before leader");
        }
        Ok(true)
    }

    fn skip_past_terminator(&mut self) -> Result<()> {
        while let Some(byte) = self.stream.read_byte()? {
            if byte == RECORD_TERMINATOR {
                break;
            }
        }
        Ok(())
    }

    /// Read the record body after the leader, finding the real record
    /// terminator when it is not where the stated length puts it.
    fn read_body(&mut self, stated_length: usize) -> Result<Vec<u8>> {
        let wanted = stated_length.saturating_sub(LEADER_LENGTH);
        if !self.options.permissive {
            return self.stream.read_exact_vec(wanted);
        }

        self.stream.mark(self.lookahead);
        let body = self.stream.read(wanted)?;
        if body.len() == wanted && body.last() == Some(&RECORD_TERMINATOR) {
            return Ok(body);
        }
        self.errors.add_error(
            Severity::Major,
            "Record terminator character not found at end of record length",
        );

        if let Some(at) = memchr::memchr(RECORD_TERMINATOR, &body) {
            self.errors.add_error(
                Severity::Major,
                "Record terminator appears before stated record length, using shorter record",
            );
            self.stream.reset()?;
            return self.stream.read(at + 1);
        }

        let mut consumed = body.len();
        loop {
            match self.stream.read_byte()? {
                Some(RECORD_TERMINATOR) => {
                    self.errors.add_error(
                        Severity::Major,
                        "Record terminator appears after stated record length, reading extra bytes",
                    );
                    self.stream.reset()?;
                    return self.stream.read(consumed + 1);
                },
                Some(_) => {
                    consumed += 1;
                    if consumed + LEADER_LENGTH >= self.lookahead {
                        self.errors.add_error(
                            Severity::Major,
                            format!(
                                "No Record terminator found within {} bytes of start of record, getting desperate.",
                                self.lookahead
                            ),
                        );
                        self.lookahead = self.lookahead.saturating_mul(2);
                    }
                },
                None => {
                    self.errors.add_error(
                        Severity::Major,
                        "No Record terminator found, end of file reached, Terminator appended",
                    );
                    self.stream.reset()?;
                    let mut body = self.stream.read(consumed)?;
                    body.push(RECORD_TERMINATOR);
                    return Ok(body);
                },
            }
        }
    }
}

impl<R: Read> Iterator for PermissiveReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

impl<R: Read + std::fmt::Debug> FormatReader for PermissiveReader<R> {
    fn read_record(&mut self) -> Result<Option<Record>> {
        PermissiveReader::read_record(self)
    }

    fn records_read(&self) -> Option<usize> {
        Some(self.records_read)
    }

    fn error_handler(&self) -> Option<&ErrorHandler> {
        Some(&self.errors)
    }
}

/// Log an unrecoverable defect and build the error for it.
fn fatal(errors: &mut ErrorHandler, permissive: bool, message: impl Into<String>) -> MarcError {
    let message = message.into();
    if permissive {
        errors.add_error(Severity::Fatal, message.clone());
        MarcError::Fatal(message)
    } else {
        MarcError::InvalidRecord(message)
    }
}

/// How the directory has to be read after length repairs
#[derive(Debug, Clone, Copy)]
struct DirectoryLayout {
    length: usize,
    discard_first: bool,
    oversized_entry: bool,
}

/// State for parsing one record body
struct RecordParse<'a> {
    options: &'a PermissiveOptions,
    errors: &'a mut ErrorHandler,
    marc8: Marc8ToUnicode,
    unimarc: Iso5426ToUnicode,
    encoding: Encoding,
    /// Subfield text decoded as MARC-8, ISO 5426 and ISO-8859-1, for
    /// records whose encoding is still undecided
    samples: [String; 3],
}

impl RecordParse<'_> {
    fn permissive(&self) -> bool {
        self.options.permissive
    }

    fn note(&mut self, severity: Severity, message: impl Into<String>) {
        if self.options.permissive {
            self.errors.add_error(severity, message);
        }
    }

    fn fatal(&mut self, message: impl Into<String>) -> MarcError {
        fatal(self.errors, self.options.permissive, message)
    }

    fn run(mut self, leader_bytes: &[u8], mut body: Vec<u8>) -> Result<Record> {
        let record_length = body.len() + LEADER_LENGTH;
        let (mut leader, directory_length) = self.parse_leader(leader_bytes, &mut body)?;
        leader.record_length = u32::try_from(record_length).unwrap_or(u32::MAX);
        self.check_entry_map(&mut leader);
        self.select_encoding(leader.char_coding_scheme, &body);

        let layout = self.check_directory_length(directory_length, record_length, &mut body)?;
        let (entries, data_start) = self.read_directory(&body, layout)?;

        let mut record = Record::new(leader);
        let mut pos = data_start;
        let mut repaired_lengths = 0;
        let mut total_length = 0;

        for (tag, stated) in entries {
            self.errors.set_field(tag.clone());
            self.errors.set_subfield(NO_LOCATION);
            let found = self.field_length(&body, pos)?;
            let mut length = stated;
            if found + 1 != length && self.permissive() && repaired_lengths < MAX_LENGTH_REPAIRS
                && total_length + found < record_length + 26
            {
                let stated_end_is_terminator =
                    length > 0 && body.get(pos + length - 1) == Some(&FIELD_TERMINATOR);
                if found + 1 < length && stated_end_is_terminator {
                    self.note(
                        Severity::Minor,
                        "Field Terminator character found in the middle of a field.",
                    );
                } else {
                    repaired_lengths += 1;
                    length = found + 1;
                    self.note(
                        Severity::Minor,
                        "Field length found in record different from length stated in the directory.",
                    );
                    if length > MAX_FIELD_LENGTH {
                        self.note(
                            Severity::Major,
                            "Field length is greater than 9999, record cannot be represented as a binary Marc record.",
                        );
                    }
                }
            }
            total_length += length;

            if self.is_control(&tag) {
                let content = length
                    .checked_sub(1)
                    .and_then(|n| body.get(pos..pos + n))
                    .filter(|_| body.get(pos + length - 1) == Some(&FIELD_TERMINATOR));
                let Some(content) = content else {
                    return Err(self.fatal(
                        "Expected field terminator at end of field. Unable to continue.",
                    ));
                };
                let text = self.data_as_string(content)?;
                if tag == CONTROL_NUMBER_TAG {
                    self.errors.set_record_id(text.clone());
                }
                record.insert_control_field(ControlField::new(tag, text));
            } else {
                let end = (pos + length).min(body.len());
                let mut raw = body.get(pos..end).unwrap_or_default().to_vec();
                let field = self.parse_data_field(&tag, &mut raw)?;
                record.insert_data_field(field);
            }
            pos += length;
        }

        if self.samples.iter().all(|s| s.chars().count() > 1) {
            self.choose_guessed_encoding(&mut record);
        }

        if body.get(pos) != Some(&RECORD_TERMINATOR) {
            return Err(self.fatal(
                "Expected record terminator at end of record. Unable to continue.",
            ));
        }
        Ok(record)
    }

    fn parse_leader(&mut self, bytes: &[u8], body: &mut Vec<u8>) -> Result<(Leader, usize)> {
        let mut leader = Leader::unmarshal_bytes(bytes)?;
        for (pos, what) in [(10, "indicator count"), (11, "subfield count")] {
            if !bytes[pos].is_ascii_digit() {
                if !self.permissive() {
                    return Err(MarcError::InvalidLeader(format!("unable to parse {what}")));
                }
                self.note(
                    Severity::Typo,
                    format!("bogus {what} - byte value = {:X}", bytes[pos]),
                );
            }
        }

        match parse_digits(&bytes[12..17]) {
            Ok(base) => {
                leader.base_address_of_data = base;
                match (base as usize).checked_sub(LEADER_LENGTH + 1) {
                    Some(directory_length) => Ok((leader, directory_length)),
                    None => Err(self.fatal(format!(
                        "Base address of data {base} falls inside the leader. Unable to continue."
                    ))),
                }
            },
            Err(_) => self.shift_leader(bytes, leader, body),
        }
    }

    /// Recover from a leader that is one byte too short or too long by
    /// moving a byte between the leader and the body.
    fn shift_leader(&mut self, bytes: &[u8], mut leader: Leader, body: &mut Vec<u8>) -> Result<(Leader, usize)> {
        let described = latin1_to_string(bytes);
        if !self.permissive() {
            return Err(MarcError::InvalidLeader(format!(
                "error parsing leader with data: {described}"
            )));
        }
        if !body.ends_with(&[FIELD_TERMINATOR, RECORD_TERMINATOR]) {
            return Err(self.fatal(format!("error parsing leader with data: {described}")));
        }
        self.note(
            Severity::Major,
            "Error parsing leader, trying to re-read leader either shorter or longer",
        );

        let offset = memchr::memchr(FIELD_TERMINATOR, body).unwrap_or(body.len());
        let ch = |i: usize| char::from(bytes[i]);
        let directory_length = match offset % DIRECTORY_ENTRY_LENGTH {
            1 => {
                self.note(
                    Severity::Major,
                    "Leader appears to be too short, moving one byte from record body to leader, and trying again",
                );
                body.remove(0);
                leader.impl_defined2 = [ch(18), ch(19), ch(20)];
                offset - 1
            },
            11 => {
                self.note(
                    Severity::Major,
                    "Leader appears to be too long, moving one byte from leader to record body, and trying again",
                );
                body.insert(0, b'0');
                leader.impl_defined2 = [ch(16), ch(17), ch(18)];
                offset + 1
            },
            _ => return Err(self.fatal(format!("error parsing leader with data: {described}"))),
        };

        leader.impl_defined1 = [ch(7), ' '];
        leader.indicator_count = 2;
        leader.subfield_code_length = 2;
        leader.entry_map = ['4', '5', '0', '0'];
        if bytes[10] == b' ' || bytes[10] == b'a' {
            leader.char_coding_scheme = ch(10);
        }
        leader.base_address_of_data =
            u32::try_from(directory_length + LEADER_LENGTH + 1).unwrap_or(u32::MAX);
        Ok((leader, directory_length))
    }

    fn check_entry_map(&mut self, leader: &mut Leader) {
        if !self.permissive() || leader.has_standard_entry_map() {
            return;
        }
        let shown: String = leader.entry_map.iter().collect();
        if leader.entry_map.iter().all(char::is_ascii_digit) {
            self.note(
                Severity::Typo,
                format!("Unusual character found at end of leader [ {shown} ]"),
            );
        } else {
            self.note(
                Severity::Minor,
                format!(
                    "Erroneous character found at end of leader [ {shown} ]; changing them to the standard \"4500\""
                ),
            );
            leader.entry_map = ['4', '5', '0', '0'];
        }
    }

    /// Decide how field text is decoded, checking the leader's claim
    /// against the bytes.
    fn select_encoding(&mut self, coding: char, body: &[u8]) {
        let convert = self.options.convert_to_utf8;
        self.encoding = match coding {
            'a' => Encoding::Utf8,
            ' ' if convert => self.options.default_encoding,
            _ if !convert => Encoding::Latin1,
            other if self.permissive() => {
                self.note(
                    Severity::Minor,
                    format!(
                        "Record character encoding should be 'a' or ' ' in this record it is '{other}'. Attempting to guess the correct encoding."
                    ),
                );
                Encoding::BestGuess
            },
            _ => self.options.default_encoding,
        };

        if self.encoding == Encoding::BestGuess {
            self.encoding = guess_from_bytes(body);
        } else if self.permissive() && self.encoding == Encoding::Utf8 {
            if std::str::from_utf8(body).is_err() {
                if body.contains(&ESC) {
                    self.note(
                        Severity::Minor,
                        "Record claims to be UTF-8, but it's not. It's probably MARC8.",
                    );
                } else {
                    self.note(
                        Severity::Minor,
                        "Record claims to be UTF-8, but it's not. It may be MARC8, or maybe UNIMARC, or maybe raw ISO-8859-1",
                    );
                }
                self.encoding = Encoding::Marc8Maybe;
            }
            if memmem::find(body, b"a$1!").is_some() {
                self.encoding = Encoding::Marc8Broken;
                self.note(
                    Severity::Major,
                    "Record claims to be UTF-8, but it's not. It seems to be MARC8-encoded but with missing escape codes.",
                );
            }
        } else if self.permissive() && convert && self.encoding != Encoding::Utf8 {
            if body.iter().any(|b| *b >= 0x80) && std::str::from_utf8(body).is_ok() {
                self.note(
                    Severity::Minor,
                    "Record claims not to be UTF-8, but it seems to be.",
                );
                self.encoding = Encoding::Utf8Maybe;
            }
        }
        tracing::trace!(encoding = %self.encoding, "field encoding selected");
    }

    fn check_directory_length(
        &mut self,
        directory_length: usize,
        record_length: usize,
        body: &mut Vec<u8>,
    ) -> Result<DirectoryLayout> {
        let mut layout = DirectoryLayout {
            length: directory_length,
            discard_first: false,
            oversized_entry: false,
        };
        if directory_length % DIRECTORY_ENTRY_LENGTH == 0 {
            return Ok(layout);
        }

        let remainder = directory_length % DIRECTORY_ENTRY_LENGTH;
        let permissive = self.permissive();

        if permissive && directory_length == 99_974 && record_length > 200_000 {
            // the base address was capped; find where the directory really ends
            let end = (DIRECTORY_ENTRY_LENGTH..body.len())
                .step_by(DIRECTORY_ENTRY_LENGTH)
                .find(|&i| body[i] == FIELD_TERMINATOR);
            match end {
                Some(end) => layout.length = end,
                None => {
                    return Err(self.fatal(
                        "Directory is too big (> 99999 bytes) and it doesn't end with a field terminator character. Unable to continue.",
                    ))
                },
            }
        } else if permissive && remainder == 11 && byte_at(body, 1) != b'0' {
            self.note(
                Severity::Major,
                "Directory length is not a multiple of 12 bytes long. Prepending a zero and trying to continue.",
            );
            body.insert(0, b'0');
            layout.length += 1;
        } else if permissive && remainder == 1 && byte_at(body, 1) == b'0' && byte_at(body, 2) == b'0' {
            layout.discard_first = true;
            self.note(
                Severity::Major,
                "Directory length is not a multiple of 12 bytes long. Discarding byte from start of directory and trying to continue.",
            );
        } else if permissive
            && remainder == 1
            && record_length > 10_000
            && byte_at(body, 0) == b'0'
            && byte_at(body, 1) == b'0'
            && (b'1'..=b'9').contains(&byte_at(body, 2))
        {
            layout.oversized_entry = true;
            self.note(
                Severity::Major,
                "Directory length is not a multiple of 12 bytes long. Will look for oversized field and try to work around it.",
            );
        } else {
            return Err(self.fatal(
                "Directory length is not a multiple of 12 bytes long. Unable to continue.",
            ));
        }
        Ok(layout)
    }

    /// Read `(tag, length)` pairs; returns them with the offset of the
    /// first field.
    fn read_directory(&mut self, body: &[u8], layout: DirectoryLayout) -> Result<(Vec<(String, usize)>, usize)> {
        let count = layout.length / DIRECTORY_ENTRY_LENGTH;
        let mut entries = Vec::with_capacity(count);
        let mut pos = usize::from(layout.discard_first);
        let mut oversized = layout.oversized_entry;
        let mut total_offset = 0usize;

        for _ in 0..count {
            let tag = latin1_to_string(window(body, pos, 3));
            pos += 3;

            let mut length_width = 4;
            if oversized {
                let check = window(body, pos, 10);
                if !digits_equal(check, 4, 5, total_offset) {
                    if digits_equal(check, 5, 5, total_offset) {
                        oversized = false;
                        length_width = 5;
                        self.note(
                            Severity::Major,
                            "Field is longer than 9999 bytes.  Writing this record out will result in a bad record.",
                        );
                    } else {
                        return Err(self.fatal(
                            "Unable to reconcile problems in directory. Unable to continue.",
                        ));
                    }
                }
            }

            let Ok(length) = parse_digits(window(body, pos, length_width)) else {
                return Err(self.fatal(format!(
                    "Directory entry for field {tag} has a non-numeric length. Unable to continue."
                )));
            };
            pos += length_width + 5;
            total_offset += length as usize;
            entries.push((tag, length as usize));
        }

        if oversized {
            pos += 1;
        }
        if body.get(pos) != Some(&FIELD_TERMINATOR) {
            return Err(self.fatal(
                "Expected field terminator at end of directory. Unable to continue.",
            ));
        }
        Ok((entries, pos + 1))
    }

    /// Bytes from `pos` to the next field terminator
    fn field_length(&mut self, body: &[u8], pos: usize) -> Result<usize> {
        let rest = body.get(pos..).unwrap_or_default();
        match memchr::memchr(FIELD_TERMINATOR, rest) {
            Some(n) => Ok(n),
            None if self.permissive() => {
                self.note(Severity::Minor, "Field not terminated trying to continue");
                Ok(rest.len())
            },
            None => Err(MarcError::InvalidField("Field not terminated".to_string())),
        }
    }

    fn is_control(&mut self, tag: &str) -> bool {
        if !tag.bytes().all(|b| b.is_ascii_digit()) {
            self.note(
                Severity::Typo,
                format!("Field tag contains non-numeric characters ({tag})."),
            );
            return false;
        }
        is_control_tag(tag)
    }

    fn parse_data_field(&mut self, tag: &str, raw: &mut [u8]) -> Result<DataField> {
        if self.permissive() {
            self.errors.set_field(field_label(tag, raw));
            self.errors.set_subfield(NO_LOCATION);
            self.clean_separators(raw);
        }

        let indicator = |b: Option<&u8>| match b {
            Some(&b) if b != FIELD_TERMINATOR && b != SUBFIELD_DELIMITER => char::from(b),
            _ => ' ',
        };
        let mut field = DataField::new(tag, indicator(raw.first()), indicator(raw.get(1)));

        let mut i = 2;
        while i < raw.len() {
            let byte = raw[i];
            i += 1;
            if byte != SUBFIELD_DELIMITER {
                continue;
            }
            let Some(&code) = raw.get(i) else {
                if self.permissive() {
                    self.note(Severity::Minor, "Subfield delimiter at end of data field, ignoring it.");
                    break;
                }
                return Err(MarcError::InvalidField(format!(
                    "unexpected end of data field {tag}"
                )));
            };
            i += 1;
            if code == FIELD_TERMINATOR {
                continue;
            }

            let size = self.subfield_length(raw, i)?;
            if size == 0 {
                if self.permissive() {
                    self.note(Severity::Minor, "Subfield of zero length encountered, ignoring it.");
                    continue;
                }
                return Err(MarcError::InvalidField(format!(
                    "Subfield of zero length encountered in field {tag}"
                )));
            }
            let data = raw[i..i + size].to_vec();
            i += size;

            if self.permissive() {
                self.errors.set_subfield(char::from(code).to_string());
            }
            let text = self.data_as_string(&data)?;
            let (code, text) = self.repair_subfield_code(tag, code, &data, text);
            field.add_subfield(code, text);
        }
        Ok(field)
    }

    fn repair_subfield_code(&mut self, tag: &str, code: u8, data: &[u8], text: String) -> (char, String) {
        if !self.permissive() || VALID_SUBFIELD_CODES.contains(&code) {
            return (char::from(code), text);
        }
        if code == SUBFIELD_DELIMITER || code > 0x7F {
            let message = if code == SUBFIELD_DELIMITER {
                "Subfield tag is a subfield separator, using first character of field as subfield tag."
            } else {
                "Subfield tag is an invalid character greater than 0x7f, using first character of field as subfield tag."
            };
            self.note(Severity::Major, message);
            return (char::from(data[0]), drop_first_char(&text));
        }
        if code.is_ascii_uppercase() {
            if self.options.uppercase_subfields {
                return (char::from(code), text);
            }
            self.note(
                Severity::Minor,
                "Subfield tag is an invalid uppercase character, changing it to lower case.",
            );
            return (char::from(code.to_ascii_lowercase()), text);
        }
        if code == b'[' && tag == "245" {
            self.note(
                Severity::Major,
                "Subfield tag is an open bracket, generating a code 'h' and pushing the bracket to the data.",
            );
            return ('h', format!("[{text}"));
        }
        if code == b' ' {
            self.note(Severity::Major, "Subfield tag is a space which is an invalid character");
        } else {
            self.note(
                Severity::Major,
                format!("Subfield tag is an invalid character, [ {} ]", char::from(code)),
            );
        }
        (char::from(code), text)
    }

    fn subfield_length(&mut self, raw: &[u8], start: usize) -> Result<usize> {
        let rest = raw.get(start..).unwrap_or_default();
        match rest
            .iter()
            .position(|b| *b == SUBFIELD_DELIMITER || *b == FIELD_TERMINATOR)
        {
            Some(n) => Ok(n),
            None if self.permissive() => {
                self.note(Severity::Minor, "Subfield not terminated trying to continue");
                Ok(rest.len())
            },
            None => Err(MarcError::InvalidField("subfield not terminated".to_string())),
        }
    }

    /// Repair subfield delimiters that are really data: delimiters inside
    /// East Asian multibyte characters, and delimiters in MARC-8 fields not
    /// followed by a valid code.
    fn clean_separators(&mut self, field: &mut [u8]) {
        let n = field.len();
        let bar = |b: u8| if b == SUBFIELD_DELIMITER { VERTICAL_BAR } else { b };

        let mut has_esc = false;
        let mut in_multibyte = false;
        let mut just_cleaned = false;
        let mut mb_offset = 0usize;

        for i in 0..n.saturating_sub(1) {
            if field[i] == ESC {
                has_esc = true;
                let next = byte_at(field, i + 1);
                if b"(,)-'".contains(&next) {
                    in_multibyte = false;
                } else if i + 2 < n && next == b'$' && field[i + 2] == b'1' {
                    in_multibyte = true;
                    mb_offset = 3;
                } else if i + 3 < n
                    && (next == b'$' || field[i + 2] == b'$')
                    && (field[i + 2] == b'1' || field[i + 3] == b'1')
                {
                    in_multibyte = true;
                    mb_offset = 4;
                }
            } else if in_multibyte && field[i] != b' ' {
                mb_offset = if mb_offset == 0 { 2 } else { mb_offset - 1 };
            }

            if in_multibyte && mb_offset == 0 && i + 2 < n {
                let f1 = field[i];
                let f2 = if byte_at(field, i + 1) == b' ' { byte_at(field, i + 2) } else { byte_at(field, i + 1) };
                let f3 = if byte_at(field, i + 1) == b' ' || byte_at(field, i + 2) == b' ' {
                    byte_at(field, i + 3)
                } else {
                    byte_at(field, i + 2)
                };
                if self.marc8.lookup_multibyte(bar(f1), bar(f2), bar(f3)).is_none() {
                    if just_cleaned && self.marc8.lookup_multibyte(b'!', bar(f2), bar(f3)).is_some() {
                        self.note(
                            Severity::Major,
                            "Character after restored vertical bar character makes bad multibyte character, changing it to \"!\"",
                        );
                        field[i] = b'!';
                    } else {
                        self.note(
                            Severity::Major,
                            "Bad Multibyte character found, reinterpreting data as non-multibyte data",
                        );
                        in_multibyte = false;
                    }
                }
            }

            just_cleaned = false;
            if field[i] != SUBFIELD_DELIMITER {
                continue;
            }
            let next = byte_at(field, i + 1);
            if in_multibyte && mb_offset != 0 {
                field[i] = VERTICAL_BAR;
                self.note(
                    Severity::Major,
                    "Subfield separator found in middle of a multibyte character, changing it to a vertical bar, and continuing",
                );
                if next == b'0' {
                    if byte_at(field, i + 2) == b'(' && byte_at(field, i + 3) == b'B' {
                        field[i + 1] = ESC;
                        self.note(
                            Severity::Major,
                            "Character after restored vertical bar character makes bad multibyte character, changing it to ESC",
                        );
                    } else {
                        field[i + 1] = b'!';
                        self.note(
                            Severity::Major,
                            "Character after restored vertical bar character makes bad multibyte character, changing it to \"!\"",
                        );
                    }
                }
                just_cleaned = true;
            } else if has_esc && !(next.is_ascii_lowercase() || next.is_ascii_digit()) {
                self.note(
                    Severity::Major,
                    "Subfield separator followed by invalid subfield tag, changing separator to a vertical bar, and continuing",
                );
                field[i] = VERTICAL_BAR;
                just_cleaned = true;
            } else if has_esc && next == b'0' {
                self.note(
                    Severity::Major,
                    "Subfield separator followed by invalid subfield tag, changing separator to a vertical bar, and continuing",
                );
                field[i] = VERTICAL_BAR;
                field[i + 1] = if byte_at(field, i + 2) == b'(' && byte_at(field, i + 3) == b'B' {
                    ESC
                } else {
                    b'!'
                };
                just_cleaned = true;
            } else if next == SUBFIELD_DELIMITER && byte_at(field, i + 2) == SUBFIELD_DELIMITER {
                self.note(
                    Severity::Major,
                    "Three consecutive subfield separators, changing first two to vertical bars.",
                );
                field[i] = VERTICAL_BAR;
                field[i + 1] = VERTICAL_BAR;
                just_cleaned = true;
            }
        }
    }

    fn data_as_string(&mut self, bytes: &[u8]) -> Result<String> {
        let text = match self.encoding {
            Encoding::Utf8 | Encoding::Utf8Maybe => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Marc8 => self.marc8_conversion(bytes)?,
            Encoding::Iso5426 => self.unimarc_conversion(bytes),
            Encoding::Marc8Maybe => {
                let marc8 = self.marc8_conversion(bytes)?;
                let unimarc = self.unimarc_conversion(bytes);
                let latin1 = latin1_to_string(bytes);
                if marc8 == unimarc && marc8 == latin1 {
                    marc8
                } else {
                    let composed: String = marc8.nfc().collect();
                    for (sample, text) in self.samples.iter_mut().zip([&composed, &unimarc, &latin1]) {
                        sample.push_str(SAMPLE_SEPARATOR);
                        sample.push_str(text);
                    }
                    format!("{marc8}{GUESS_SEPARATOR}{unimarc}{GUESS_SEPARATOR}{latin1}")
                }
            },
            Encoding::Marc8Broken => self.restore_escapes(bytes)?,
            Encoding::Latin1 | Encoding::BestGuess => latin1_to_string(bytes),
        };
        if self.permissive() {
            Ok(self.unescape_entities(text))
        } else {
            Ok(text)
        }
    }

    fn marc8_conversion(&mut self, bytes: &[u8]) -> Result<String> {
        let mut data = Cow::Borrowed(bytes);
        if self.permissive() && (memmem::find(bytes, b"b-\x1Bs").is_some() || bytes.contains(&OVERBAR)) {
            let fixed = SCRIPT_RESET.replace_all(bytes, &b"\x1B${1}"[..]);
            if fixed.as_ref() != bytes {
                self.note(
                    Severity::Minor,
                    "Subfield contains odd pattern of subscript or superscript escapes.",
                );
            }
            let mut fixed = fixed.into_owned();
            if fixed.contains(&OVERBAR) {
                for byte in fixed.iter_mut().filter(|b| **b == OVERBAR) {
                    *byte = 0xE5;
                }
                self.note(
                    Severity::Typo,
                    "Subfield contains 0xaf overbar character, changing it to proper MARC8 representation",
                );
            }
            data = Cow::Owned(fixed);
        }

        if !self.permissive() {
            return self.marc8.convert(&data);
        }
        let text = self.marc8.convert_with(&data, self.errors)?;
        if self.options.translate_ncr {
            Ok(self.translate_references(&text))
        } else {
            Ok(text)
        }
    }

    fn translate_references(&mut self, text: &str) -> String {
        if !LOOSE_NCR.is_match(text) {
            return text.to_string();
        }
        let mut invalid = Vec::new();
        let translated = LOOSE_NCR
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let whole = &caps[0];
                match u32::from_str_radix(&caps[1], 16).ok().and_then(char::from_u32) {
                    Some(c) => {
                        if caps.get(2).is_some() || !whole.ends_with(';') {
                            invalid.push(whole.to_string());
                        }
                        c.to_string()
                    },
                    None => whole.to_string(),
                }
            })
            .into_owned();
        for reference in invalid {
            self.note(
                Severity::Minor,
                format!("Subfield contains invalid Unicode Character Entity : {reference}"),
            );
        }
        translated
    }

    fn unimarc_conversion(&self, bytes: &[u8]) -> String {
        let text: String = self
            .unimarc
            .convert(bytes)
            .chars()
            .filter(|c| *c != '\u{0088}' && *c != '\u{0089}')
            .collect();
        UNICODE_PLACEHOLDER
            .replace_all(&text, |caps: &regex::Captures<'_>| {
                u32::from_str_radix(&caps[1], 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map_or_else(|| caps[0].to_string(), |c| c.to_string())
            })
            .into_owned()
    }

    /// Put back MARC-8 escapes that were stripped from East Asian text.
    fn restore_escapes(&mut self, bytes: &[u8]) -> Result<String> {
        let text = self.unescape_entities(latin1_to_string(bytes));
        let restored = MISSING_MULTIBYTE_ESCAPE
            .replace_all(&text, "\x1B$$1${1}")
            .replace("(B", "\x1B(B");
        if restored != text {
            self.note(
                Severity::Major,
                "Subfield seems to be missing MARC8 escape sequences, trying to restore them.",
            );
        }
        let bytes = latin1_bytes(&restored).unwrap_or_else(|| restored.clone().into_bytes());
        self.marc8_conversion(&bytes)
    }

    fn unescape_entities(&mut self, text: String) -> String {
        if !HTML_ENTITY.is_match(&text) {
            return text;
        }
        let unescaped = text
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&")
            .replace("&apos;", "'")
            .replace("&quot;", "\"");
        if unescaped == text {
            return text;
        }
        self.note(
            Severity::Typo,
            "Subfield contains escaped html character entities, un-escaping them.",
        );
        unescaped
    }

    /// Pick one of the three decodings kept for an undecided record and
    /// apply it to every subfield.
    fn choose_guessed_encoding(&mut self, record: &mut Record) {
        let default_part = usize::from(record.get_field("245").is_none());
        let [s1, s2, s3] = &self.samples;
        let (l1, l2, l3) = (s1.chars().count(), s2.chars().count(), s3.chars().count());

        let (part, reason) = if l1 < l3 && l2 == l3 && default_part == 0 {
            (0, "MARC8 translation shorter than ISO-8859-1, choosing MARC8.".to_string())
        } else if l2 + 2 < l1 && l2 + 2 < l3 {
            (1, "Unimarc translation shortest, choosing it.".to_string())
        } else if let Some(part) = only_one_starts_uppercase(s1, s2, s3) {
            (
                part,
                format!(
                    "Only the {} translation starts its subfields in uppercase, choosing it.",
                    GUESS_NAMES[part]
                ),
            )
        } else if l2 < l1 && l2 < l3 {
            (1, "Unimarc translation shortest, choosing it.".to_string())
        } else if s2 == s3 && !s1.trim().contains(' ') {
            (
                2,
                "Unimarc and ISO-8859-1 translations identical, choosing ISO-8859-1.".to_string(),
            )
        } else if !special_char_between_letters(s1) {
            (
                default_part,
                format!("Too few letters in translations, choosing {}", GUESS_NAMES[default_part]),
            )
        } else if l2 == l3 && default_part == 1 {
            (
                2,
                "Unimarc and ISO-8859-1 translations equal length, choosing ISO-8859-1.".to_string(),
            )
        } else {
            (
                default_part,
                format!("No Determination made, defaulting to {}", GUESS_NAMES[default_part]),
            )
        };
        self.note(Severity::Info, reason);

        for field in record.control_fields_mut() {
            pick_guess(&mut field.data, part);
        }
        for field in record.data_fields_mut() {
            for subfield in &mut field.subfields {
                pick_guess(&mut subfield.value, part);
            }
        }
    }
}

/// Keep decoding `part` of a value joined with [`GUESS_SEPARATOR`]
fn pick_guess(value: &mut String, part: usize) {
    if value.contains(GUESS_SEPARATOR) {
        *value = value
            .splitn(3, GUESS_SEPARATOR)
            .nth(part)
            .unwrap_or_default()
            .to_string();
    }
}

/// Encoding of a record whose leader gives no usable answer
fn guess_from_bytes(body: &[u8]) -> Encoding {
    let has_escape = body
        .windows(2)
        .any(|w| w[0] == ESC && b"-(,)$bsp".contains(&w[1]));
    if has_escape {
        Encoding::Marc8
    } else if body.is_ascii() {
        Encoding::Latin1
    } else if std::str::from_utf8(body).is_ok() {
        Encoding::Utf8
    } else {
        Encoding::Marc8Maybe
    }
}

fn only_one_starts_uppercase(s1: &str, s2: &str, s3: &str) -> Option<usize> {
    if s1.is_empty() || s2.is_empty() || s3.is_empty() {
        return None;
    }
    let parts: Vec<Vec<&str>> = [s1, s2, s3]
        .iter()
        .map(|s| s.trim().split(SAMPLE_SEPARATOR).collect())
        .collect();
    let shortest = parts.iter().map(Vec::len).min().unwrap_or(0);
    let upper = |s: &str| s.chars().next().is_some_and(char::is_uppercase);
    for i in 1..shortest {
        match (upper(parts[0][i]), upper(parts[1][i]), upper(parts[2][i])) {
            (true, false, false) => return Some(0),
            (false, true, false) => return Some(1),
            (false, false, true) => return Some(2),
            _ => {},
        }
    }
    None
}

/// Whether some non-ASCII character in `text` sits next to a letter
fn special_char_between_letters(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let mut between = true;
    for (i, c) in chars.iter().enumerate() {
        if u32::from(*c) > 0x7F {
            between = false;
            let before = i > 0 && chars[i - 1].is_alphabetic();
            let after = chars.get(i + 1).is_some_and(|c| c.is_alphabetic());
            if before || after {
                return true;
            }
        }
    }
    between
}

/// Diagnostic location for a field; 880s name the field they link to.
fn field_label(tag: &str, raw: &[u8]) -> String {
    if tag != "880" {
        return tag.to_string();
    }
    let linked: String = memmem::rfind(raw, b"\x1F6")
        .map(|at| {
            raw[at + 2..]
                .iter()
                .take_while(|b| b.is_ascii_digit() || **b == b'-')
                .map(|b| char::from(*b))
                .collect()
        })
        .unwrap_or_default();
    format!("{tag}({linked})")
}

fn drop_first_char(text: &str) -> String {
    let mut chars = text.chars();
    chars.next();
    chars.as_str().to_string()
}

fn byte_at(bytes: &[u8], i: usize) -> u8 {
    bytes.get(i).copied().unwrap_or(0)
}

fn window(body: &[u8], start: usize, len: usize) -> &[u8] {
    let end = (start + len).min(body.len());
    &body[start.min(end)..end]
}

/// Whether `bytes[offset..offset + width]` spells `value` (mod 10^width)
fn digits_equal(bytes: &[u8], offset: usize, width: usize, value: usize) -> bool {
    let modulus = 10usize.pow(u32::try_from(width).unwrap_or(0));
    let expected = format!("{:0width$}", value % modulus);
    bytes.get(offset..offset + width) == Some(expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::build_raw_record;
    use std::io::Cursor;

    fn reader(data: Vec<u8>) -> PermissiveReader<Cursor<Vec<u8>>> {
        PermissiveReader::new(Cursor::new(data))
    }

    fn sample(id: &str, title: &str) -> Vec<u8> {
        let title = format!("10\x1Fa{title}");
        build_raw_record(b'a', &[("001", id.as_bytes()), ("245", title.as_bytes())])
    }

    fn messages(reader: &PermissiveReader<Cursor<Vec<u8>>>) -> Vec<String> {
        reader.errors().errors().iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn test_clean_record_has_no_diagnostics() {
        let mut reader = reader(sample("id1", "Title"));
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.control_number(), Some("id1"));
        assert_eq!(record.get_field("245").unwrap().get_subfield('a'), Some("Title"));
        assert!(!reader.errors().has_errors());
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_stated_length_too_long() {
        let mut data = sample("id1", "Title");
        let real = data.len();
        data[0..5].copy_from_slice(format!("{:05}", real + 10).as_bytes());
        data.extend(sample("id2", "Second"));

        let mut reader = reader(data);
        let first = reader.read_record().unwrap().unwrap();
        assert_eq!(first.control_number(), Some("id1"));
        assert_eq!(reader.errors().max_severity(), Severity::Major);
        assert!(messages(&reader)
            .iter()
            .any(|m| m.contains("appears before stated record length")));

        let second = reader.read_record().unwrap().unwrap();
        assert_eq!(second.control_number(), Some("id2"));
        assert!(!reader.errors().has_errors());
    }

    #[test]
    fn test_stated_length_too_short() {
        let mut data = sample("id1", "Title");
        let real = data.len();
        data[0..5].copy_from_slice(format!("{:05}", real - 4).as_bytes());
        data.extend(sample("id2", "Second"));

        let mut reader = reader(data);
        let first = reader.read_record().unwrap().unwrap();
        assert_eq!(first.get_field("245").unwrap().get_subfield('a'), Some("Title"));
        assert!(messages(&reader)
            .iter()
            .any(|m| m.contains("appears after stated record length")));
        assert_eq!(reader.read_record().unwrap().unwrap().control_number(), Some("id2"));
    }

    #[test]
    fn test_missing_terminator_at_end_of_file() {
        let mut data = sample("id1", "Title");
        data.pop();
        let mut reader = reader(data);
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.control_number(), Some("id1"));
        assert!(messages(&reader).iter().any(|m| m.contains("Terminator appended")));
    }

    #[test]
    fn test_bad_count_digits_default_to_two() {
        let mut data = sample("id1", "Title");
        data[10] = b'x';
        data[11] = b' ';
        let mut reader = reader(data);
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.leader.indicator_count, 2);
        assert_eq!(record.leader.subfield_code_length, 2);
        assert_eq!(reader.errors().max_severity(), Severity::Typo);
        assert!(messages(&reader).contains(&"bogus indicator count - byte value = 78".to_string()));
    }

    #[test]
    fn test_entry_map_repairs() {
        let mut data = sample("id1", "Title");
        data[20..24].copy_from_slice(b"45x0");
        let mut r = reader(data);
        let record = r.read_record().unwrap().unwrap();
        assert!(record.leader.has_standard_entry_map());
        assert_eq!(r.errors().max_severity(), Severity::Minor);

        let mut data = sample("id1", "Title");
        data[20..24].copy_from_slice(b"4501");
        let mut r = reader(data);
        let record = r.read_record().unwrap().unwrap();
        assert_eq!(record.leader.entry_map, ['4', '5', '0', '1']);
        assert_eq!(r.errors().max_severity(), Severity::Typo);
    }

    #[test]
    fn test_unrecoverable_record_is_skipped() {
        let mut bad = sample("id1", "Title");
        let base = parse_digits(&bad[12..17]).unwrap() + 1;
        bad[12..17].copy_from_slice(format!("{base:05}").as_bytes());

        let mut data = bad;
        data.extend(sample("id2", "Two"));
        data.extend(sample("id3", "Three"));

        let mut reader = reader(data);
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, MarcError::Fatal(_)), "{err}");
        assert_eq!(reader.errors().max_severity(), Severity::Fatal);
        assert_eq!(reader.read_record().unwrap().unwrap().control_number(), Some("id2"));
        assert_eq!(reader.read_record().unwrap().unwrap().control_number(), Some("id3"));
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_unparsable_record_length_skips_to_next_record() {
        let mut data = sample("id1", "Title");
        data[2] = b'x';
        data.extend(sample("id2", "Two"));
        let mut reader = reader(data);
        assert!(matches!(reader.read_record(), Err(MarcError::Fatal(_))));
        assert_eq!(reader.read_record().unwrap().unwrap().control_number(), Some("id2"));
    }

    #[test]
    fn test_garbage_before_leader_is_skipped() {
        let mut data = b"\n\r junk".to_vec();
        data.extend(sample("id1", "Title"));
        let record = reader(data).read_record().unwrap().unwrap();
        assert_eq!(record.control_number(), Some("id1"));
    }

    #[test]
    fn test_subfield_code_repairs() {
        let data = build_raw_record(b'a', &[("245", b"10\x1FAUpper\x1F[sound]")]);
        let mut r = reader(data.clone());
        let field = r.read_record().unwrap().unwrap().get_field("245").unwrap().clone();
        assert_eq!(field.get_subfield('a'), Some("Upper"));
        assert_eq!(field.get_subfield('h'), Some("[sound]"));
        assert_eq!(r.errors().max_severity(), Severity::Major);

        let mut r = reader(data).with_uppercase_subfields(true);
        let field = r.read_record().unwrap().unwrap().get_field("245").unwrap().clone();
        assert_eq!(field.get_subfield('A'), Some("Upper"));
    }

    #[test]
    fn test_field_length_mismatch_trusts_terminator() {
        let mut data = sample("id1", "Title");
        // directory entry for 245 starts at offset 24 + 12; its length is bytes 3..7
        let entry = LEADER_LENGTH + DIRECTORY_ENTRY_LENGTH;
        data[entry + 3..entry + 7].copy_from_slice(b"0003");
        let mut r = reader(data);
        let record = r.read_record().unwrap().unwrap();
        assert_eq!(record.get_field("245").unwrap().get_subfield('a'), Some("Title"));
        assert!(messages(&r).iter().any(|m| m.contains("different from length stated")));
    }

    #[test]
    fn test_marc8_detected_from_escapes() {
        let data = build_raw_record(b' ', &[("245", b"10\x1Fa\x1B(2\x60\x1B(B and \xE2e")]);
        let mut r = reader(data);
        let record = r.read_record().unwrap().unwrap();
        assert_eq!(
            record.get_field("245").unwrap().get_subfield('a'),
            Some("\u{05D0} and e\u{0301}")
        );
        assert_eq!(record.leader.char_coding_scheme, 'a');
    }

    #[test]
    fn test_overbar_and_entities() {
        let data = build_raw_record(b' ', &[("245", b"10\x1FaTom &amp; Jerry\x1Fbx\xAF")]);
        let mut r = reader(data).with_default_encoding(Encoding::Marc8);
        let field = r.read_record().unwrap().unwrap().get_field("245").unwrap().clone();
        assert_eq!(field.get_subfield('a'), Some("Tom & Jerry"));
        assert_eq!(field.get_subfield('b'), Some("x\u{0304}"));
        assert_eq!(r.errors().max_severity(), Severity::Typo);
    }

    #[test]
    fn test_without_conversion_text_is_latin1() {
        let data = build_raw_record(b' ', &[("245", b"10\x1Facaf\xE9")]);
        let mut r = reader(data).with_convert_to_utf8(false);
        let record = r.read_record().unwrap().unwrap();
        assert_eq!(record.get_field("245").unwrap().get_subfield('a'), Some("caf\u{00E9}"));
        assert_eq!(record.leader.char_coding_scheme, ' ');
    }

    #[test]
    fn test_oversize_record_keeps_true_length() {
        let filler = vec![b'x'; 8000];
        let bodies: Vec<Vec<u8>> = (0..13)
            .map(|_| {
                let mut f = b"  \x1Fa".to_vec();
                f.extend_from_slice(&filler);
                f
            })
            .collect();
        let mut fields: Vec<(&str, &[u8])> = vec![("001", b"big")];
        fields.extend(bodies.iter().map(|b| ("500", b.as_slice())));
        let mut data = build_raw_record(b'a', &fields);
        data.extend(sample("id2", "After"));

        let mut r = reader(data);
        let record = r.read_record().unwrap().unwrap();
        assert!(record.leader.record_length > 99_999);
        let marshalled = record.leader.marshal();
        assert_eq!(&marshalled[0..5], "99999");
        assert_eq!(&marshalled[5..9], "nam ");
        assert_eq!(record.get_fields("500").count(), 13);
        assert_eq!(r.read_record().unwrap().unwrap().control_number(), Some("id2"));
    }

    #[test]
    fn test_strict_mode_reports_errors() {
        let mut data = sample("id1", "Title");
        data[10] = b'x';
        let mut r = reader(data).with_permissive(false);
        assert!(matches!(r.read_record(), Err(MarcError::InvalidLeader(_))));
        assert!(r.errors().errors().is_empty());
    }

    #[test]
    fn test_guess_helpers() {
        assert_eq!(guess_from_bytes(b"plain"), Encoding::Latin1);
        assert_eq!(guess_from_bytes(b"\x1B(2x"), Encoding::Marc8);
        assert_eq!(guess_from_bytes("caf\u{e9}".as_bytes()), Encoding::Utf8);
        assert_eq!(guess_from_bytes(b"caf\xE9"), Encoding::Marc8Maybe);
        assert!(special_char_between_letters("caf\u{e9}"));
        assert!(!special_char_between_letters("\u{e9} 1"));
        assert_eq!(only_one_starts_uppercase("|>Abc", "|>abc", "|>abc"), Some(0));
        assert_eq!(only_one_starts_uppercase("|>abc", "|>Abc", "|>abc"), Some(1));
        assert_eq!(field_label("880", b"10\x1F6245-01\x1Fax"), "880(245-01)");
        assert!(digits_equal(b"0012000340", 4, 5, 34));
    }
}
