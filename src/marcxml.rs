//! MARCXML serialization and deserialization of MARC records.
//!
//! This module converts between MARC records and MARCXML as defined by the
//! Library of Congress (<https://www.loc.gov/standards/marcxml/>): `tag`,
//! `ind1`, `ind2` and `code` are XML attributes, and output is placed in the
//! `http://www.loc.gov/MARC21/slim` namespace.
//!
//! Input may use the default namespace (`<record xmlns="...">`), a prefix
//! (`<marc:record xmlns:marc="...">`) or no namespace at all.
//!
//! # Examples
//!
//! ```
//! use marc_codec::{marcxml, DataField, Leader, Record};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut record = Record::new(Leader::default());
//! let mut field = DataField::new("245", '1', '0');
//! field.add_subfield('a', "Title");
//! record.insert_data_field(field);
//!
//! let xml = marcxml::record_to_marcxml(&record)?;
//! let restored = marcxml::marcxml_to_record(&xml)?;
//! assert_eq!(restored.get_field("245").unwrap().get_subfield('a'), Some("Title"));
//! # Ok(())
//! # }
//! ```

use crate::converter::CharConverter;
use crate::error::{MarcError, Result};
use crate::formats::{FormatReader, FormatWriter};
use crate::leader::{Leader, LEADER_LENGTH};
use crate::record::{DataField, Record};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Write as _;
use std::io::{Read, Write};
use unicode_normalization::UnicodeNormalization;

/// The MARCXML namespace URI.
pub const MARCXML_NS: &str = "http://www.loc.gov/MARC21/slim";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// Text transformations applied while writing XML.
struct TextHooks<'a> {
    converter: Option<&'a dyn CharConverter>,
    normalize: bool,
}

impl TextHooks<'_> {
    const NONE: TextHooks<'static> = TextHooks {
        converter: None,
        normalize: false,
    };

    fn apply(&self, text: &str) -> Result<String> {
        let converted = match self.converter {
            Some(converter) => converter.convert_str(text)?,
            None => text.to_string(),
        };
        if self.normalize {
            Ok(converted.nfc().collect())
        } else {
            Ok(converted)
        }
    }
}

fn newline(out: &mut String, indent: Option<usize>, depth: usize) {
    if let Some(width) = indent {
        out.push('\n');
        out.extend(std::iter::repeat(' ').take(width * depth));
    }
}

/// Append one `<record>` element to `out`.
fn write_record_element(
    out: &mut String,
    record: &Record,
    hooks: &TextHooks<'_>,
    indent: Option<usize>,
    namespace: bool,
) -> Result<()> {
    let base = usize::from(!namespace);

    let mut leader = record.leader.clone();
    if hooks.converter.is_some_and(|c| c.outputs_unicode()) {
        leader.char_coding_scheme = 'a';
    }

    newline(out, indent, base);
    if namespace {
        let _ = write!(out, "<record xmlns=\"{MARCXML_NS}\">");
    } else {
        out.push_str("<record>");
    }
    newline(out, indent, base + 1);
    let _ = write!(out, "<leader>{}</leader>", escape(&leader.marshal()));

    for field in record.control_fields() {
        newline(out, indent, base + 1);
        let _ = write!(
            out,
            "<controlfield tag=\"{}\">{}</controlfield>",
            escape(&field.tag),
            escape(&hooks.apply(&field.data)?)
        );
    }
    for field in record.data_fields() {
        newline(out, indent, base + 1);
        let _ = write!(
            out,
            "<datafield tag=\"{}\" ind1=\"{}\" ind2=\"{}\">",
            escape(&field.tag),
            escape(&field.indicator1.to_string()),
            escape(&field.indicator2.to_string())
        );
        for subfield in &field.subfields {
            newline(out, indent, base + 2);
            let _ = write!(
                out,
                "<subfield code=\"{}\">{}</subfield>",
                escape(&subfield.code.to_string()),
                escape(&hooks.apply(&subfield.value)?)
            );
        }
        newline(out, indent, base + 1);
        out.push_str("</datafield>");
    }
    newline(out, indent, base);
    out.push_str("</record>");
    Ok(())
}

/// Convert a MARC record to a standalone MARCXML document.
///
/// The root `<record>` element carries the MARCXML namespace.
///
/// # Errors
///
/// Currently infallible for records built in memory; the `Result` leaves
/// room for converters that reject their input.
pub fn record_to_marcxml(record: &Record) -> Result<String> {
    let mut out = String::from(XML_DECLARATION);
    write_record_element(&mut out, record, &TextHooks::NONE, None, true)?;
    Ok(out)
}

/// Convert a MARCXML document to a MARC record.
///
/// The first `<record>` element is used, whether it is the root or
/// inside a `<collection>`.
///
/// # Errors
///
/// Returns [`MarcError::XmlError`] if the XML is malformed or holds no
/// record.
pub fn marcxml_to_record(xml: &str) -> Result<Record> {
    parse_records(xml)?
        .into_iter()
        .next()
        .ok_or_else(|| MarcError::XmlError("No record element found".to_string()))
}

/// Convert a MARCXML document to records.
///
/// The root may be a `<collection>` or a single `<record>`.
///
/// # Errors
///
/// Returns [`MarcError::XmlError`] if the XML is malformed.
pub fn marcxml_to_records(xml: &str) -> Result<Vec<Record>> {
    parse_records(xml)
}

/// Element whose text is being collected
enum Target {
    None,
    Leader,
    Control(String),
    Subfield(char),
}

/// A `<record>` element read so far
#[derive(Default)]
struct PendingRecord {
    leader: String,
    control_fields: Vec<(String, String)>,
    data_fields: Vec<DataField>,
}

impl PendingRecord {
    fn build(self) -> Result<Record> {
        let mut leader_text = self.leader;
        while leader_text.chars().count() < LEADER_LENGTH {
            leader_text.push(' ');
        }
        let mut record = Record::new(Leader::unmarshal(&leader_text)?);
        for (tag, data) in self.control_fields {
            record.add_control_field(tag, data);
        }
        for field in self.data_fields {
            record.insert_data_field(field);
        }
        Ok(record)
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<String> {
    Ok(match element.try_get_attribute(name)? {
        Some(attr) => attr.unescape_value()?.into_owned(),
        None => String::new(),
    })
}

fn first_char(value: &str) -> char {
    value.chars().next().unwrap_or(' ')
}

/// Read every `<record>` element, matching element names without their
/// namespace prefix. Text is kept as written, including surrounding spaces.
fn parse_records(xml: &str) -> Result<Vec<Record>> {
    let mut reader = Reader::from_str(xml);
    reader.expand_empty_elements(true);

    let mut records = Vec::new();
    let mut pending: Option<PendingRecord> = None;
    let mut field: Option<DataField> = None;
    let mut target = Target::None;
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                text.clear();
                match e.local_name().as_ref() {
                    b"record" => pending = Some(PendingRecord::default()),
                    b"leader" => target = Target::Leader,
                    b"controlfield" => target = Target::Control(attribute(&e, "tag")?),
                    b"datafield" => {
                        field = Some(DataField::new(
                            attribute(&e, "tag")?,
                            first_char(&attribute(&e, "ind1")?),
                            first_char(&attribute(&e, "ind2")?),
                        ));
                    },
                    b"subfield" => {
                        let code = attribute(&e, "code")?.chars().next().ok_or_else(|| {
                            MarcError::InvalidField("Missing subfield code".to_string())
                        })?;
                        target = Target::Subfield(code);
                    },
                    _ => {},
                }
            },
            Event::Text(t) if !matches!(target, Target::None) => text.push_str(&t.unescape()?),
            Event::CData(t) if !matches!(target, Target::None) => {
                text.push_str(&String::from_utf8_lossy(&t.into_inner()));
            },
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                let content = std::mem::take(&mut text);
                match (std::mem::replace(&mut target, Target::None), e.local_name().as_ref()) {
                    (Target::Leader, b"leader") => {
                        if let Some(record) = pending.as_mut() {
                            record.leader = content;
                        }
                    },
                    (Target::Control(tag), b"controlfield") => {
                        if let Some(record) = pending.as_mut() {
                            record.control_fields.push((tag, content));
                        }
                    },
                    (Target::Subfield(code), b"subfield") => {
                        if let Some(field) = field.as_mut() {
                            field.add_subfield(code, content);
                        }
                    },
                    (_, b"datafield") => {
                        if let (Some(record), Some(field)) = (pending.as_mut(), field.take()) {
                            record.data_fields.push(field);
                        }
                    },
                    (_, b"record") => {
                        if let Some(record) = pending.take() {
                            records.push(record.build()?);
                        }
                    },
                    _ => {},
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    if depth > 0 {
        return Err(MarcError::XmlError(
            "Unexpected end of document: unclosed elements".to_string(),
        ));
    }
    Ok(records)
}

/// Reader for MARCXML documents.
///
/// The document is read in full on the first call, then records are handed
/// out one at a time.
#[derive(Debug)]
pub struct MarcXmlReader<R: Read> {
    source: Option<R>,
    records: std::vec::IntoIter<Record>,
    records_read: usize,
}

impl<R: Read> MarcXmlReader<R> {
    /// Create a reader over a `<collection>` or `<record>` document
    pub fn new(source: R) -> Self {
        MarcXmlReader {
            source: Some(source),
            records: Vec::new().into_iter(),
            records_read: 0,
        }
    }

    /// Read the next record.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, or [`MarcError::XmlError`] if the document is
    /// malformed.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if let Some(mut source) = self.source.take() {
            let mut xml = String::new();
            source.read_to_string(&mut xml)?;
            self.records = marcxml_to_records(&xml)?.into_iter();
            tracing::debug!(records = self.records.len(), "parsed MARCXML document");
        }
        let record = self.records.next();
        if record.is_some() {
            self.records_read += 1;
        }
        Ok(record)
    }
}

impl<R: Read> Iterator for MarcXmlReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

impl<R: Read + std::fmt::Debug> FormatReader for MarcXmlReader<R> {
    fn read_record(&mut self) -> Result<Option<Record>> {
        MarcXmlReader::read_record(self)
    }

    fn records_read(&self) -> Option<usize> {
        Some(self.records_read)
    }
}

/// Writer producing a MARCXML `<collection>`.
///
/// The collection is opened with the first record and closed by
/// [`finish`](Self::finish), which must be called.
///
/// ```
/// use marc_codec::{DataField, Leader, MarcXmlWriter, Record};
///
/// # fn main() -> marc_codec::Result<()> {
/// let mut record = Record::new(Leader::default());
/// record.add_control_field("001", "x1");
///
/// let mut out = Vec::new();
/// let mut writer = MarcXmlWriter::new(&mut out).with_indent(true);
/// writer.write_record(&record)?;
/// writer.finish()?;
///
/// let xml = String::from_utf8(out).unwrap();
/// assert!(xml.contains("\n    <controlfield tag=\"001\">x1</controlfield>"));
/// assert!(xml.ends_with("</collection>\n"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MarcXmlWriter<W: Write> {
    writer: W,
    indent: bool,
    normalize: bool,
    converter: Option<Box<dyn CharConverter>>,
    started: bool,
    finished: bool,
    records_written: usize,
}

impl<W: Write> MarcXmlWriter<W> {
    /// Create a writer with compact output
    pub fn new(writer: W) -> Self {
        MarcXmlWriter {
            writer,
            indent: false,
            normalize: false,
            converter: None,
            started: false,
            finished: false,
            records_written: 0,
        }
    }

    /// Put each element on its own line, indented two spaces per level
    #[must_use]
    pub fn with_indent(mut self, indent: bool) -> Self {
        self.indent = indent;
        self
    }

    /// Compose text to NFC
    #[must_use]
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Decode field text with `converter` before writing; used for
    /// records read without character conversion
    #[must_use]
    pub fn with_converter(mut self, converter: Box<dyn CharConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    fn start(&mut self) -> Result<()> {
        if !self.started {
            write!(self.writer, "{XML_DECLARATION}\n<collection xmlns=\"{MARCXML_NS}\">")?;
            self.started = true;
        }
        Ok(())
    }

    /// Write one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is finished, the converter rejects
    /// the text or the output fails.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if self.finished {
            return Err(MarcError::InvalidRecord(
                "Cannot write to a finished writer".to_string(),
            ));
        }
        self.start()?;

        let hooks = TextHooks {
            converter: self.converter.as_deref(),
            normalize: self.normalize,
        };
        let mut out = String::new();
        write_record_element(&mut out, record, &hooks, self.indent.then_some(2), false)?;
        self.writer.write_all(out.as_bytes())?;
        self.records_written += 1;
        Ok(())
    }

    /// Close the collection and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the output fails.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.start()?;
        self.writer.write_all(b"\n</collection>\n")?;
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Number of records written so far
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }
}

impl<W: Write + std::fmt::Debug> FormatWriter for MarcXmlWriter<W> {
    fn write_record(&mut self, record: &Record) -> Result<()> {
        MarcXmlWriter::write_record(self, record)
    }

    fn finish(&mut self) -> Result<()> {
        MarcXmlWriter::finish(self)
    }

    fn records_written(&self) -> Option<usize> {
        Some(self.records_written)
    }
}
