//! MARC-8 character set tables.
//!
//! A [`CodeTable`] maps `(charset, code)` to a Unicode character and records
//! which codes are combining diacritics. Tables are read from the Library of
//! Congress XML layout:
//!
//! ```xml
//! <codeTables>
//!   <codeTable>
//!     <characterSet ISOcode="45">
//!       <code><marc>E1</marc><ucs>0300</ucs><alt/><isCombining>true</isCombining></code>
//!     </characterSet>
//!   </codeTable>
//! </codeTables>
//! ```
//!
//! Single-byte sets use two hex digits for `<marc>`; the East Asian set
//! (`ISOcode="31"`) uses six, forming a 24-bit key. When `<ucs>` is empty
//! the `<alt>` code point is used.
//!
//! The bundled table is parsed once, on first use, and shared.

use crate::error::{MarcError, Result};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Basic Latin (ASCII), the default G0 set.
pub const BASIC_LATIN: u32 = 0x42;
/// Extended Latin (ANSEL), the default G1 set.
pub const EXTENDED_LATIN: u32 = 0x45;
/// East Asian Character Code, the only 3-byte set.
pub const CJK: u32 = 0x31;
/// Greek symbols, selected with `ESC g`.
pub const GREEK_SYMBOLS: u32 = 0x67;
/// Subscripts, selected with `ESC b`.
pub const SUBSCRIPTS: u32 = 0x62;
/// Superscripts, selected with `ESC p`.
pub const SUPERSCRIPTS: u32 = 0x70;

const BUNDLED_TABLES: &str = include_str!("../../resources/codetables.xml");

lazy_static! {
    static ref DEFAULT_WITH_CJK: std::result::Result<Arc<CodeTable>, String> =
        CodeTable::from_xml_str(BUNDLED_TABLES)
            .map(Arc::new)
            .map_err(|e| e.to_string());
    static ref DEFAULT_WITHOUT_CJK: std::result::Result<Arc<CodeTable>, String> =
        CodeTable::from_xml_str(BUNDLED_TABLES)
            .map(|mut table| {
                table.charsets.shift_remove(&CJK);
                Arc::new(table)
            })
            .map_err(|e| e.to_string());
}

/// One entry of a character set definition, as read from XML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CodeEntry {
    pub(crate) marc: Vec<u8>,
    pub(crate) ucs: Option<char>,
    pub(crate) alt: Option<char>,
    pub(crate) combining: bool,
}

impl CodeEntry {
    /// Character produced on decode: `ucs`, or `alt` when `ucs` is empty.
    pub(crate) fn decoded(&self) -> Option<char> {
        self.ucs.or(self.alt)
    }

    fn key(&self) -> u32 {
        self.marc
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Charset {
    pub(crate) entries: Vec<CodeEntry>,
    chars: HashMap<u32, char>,
    combining: HashSet<u32>,
}

/// Forward MARC-8 mapping: `(charset, code) -> char`.
#[derive(Debug, Clone, Default)]
pub struct CodeTable {
    pub(crate) charsets: IndexMap<u32, Charset>,
}

impl CodeTable {
    /// Shared bundled table including the East Asian set.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled definition failed to parse.
    pub fn default_with_cjk() -> Result<Arc<CodeTable>> {
        DEFAULT_WITH_CJK.clone().map_err(MarcError::CodeTable)
    }

    /// Shared bundled table without the East Asian set.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled definition failed to parse.
    pub fn default_without_cjk() -> Result<Arc<CodeTable>> {
        DEFAULT_WITHOUT_CJK.clone().map_err(MarcError::CodeTable)
    }

    /// Load a table definition from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// definition.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml_str(&xml)
    }

    /// Load a table definition from a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be read or is not a valid
    /// definition.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut xml = String::new();
        reader.read_to_string(&mut xml)?;
        Self::from_xml_str(&xml)
    }

    /// Parse a table definition.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::CodeTable`] for malformed hex values or
    /// [`MarcError::XmlError`] for malformed XML.
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        let mut table = CodeTable::default();
        for (charset, entry) in parse_definition(xml)? {
            let set = table.charsets.entry(charset).or_default();
            let key = entry.key();
            if let Some(ch) = entry.decoded() {
                set.chars.insert(key, ch);
            }
            if entry.combining {
                set.combining.insert(key);
            }
            set.entries.push(entry);
        }
        tracing::debug!(
            charsets = table.charsets.len(),
            entries = table.charsets.values().map(|c| c.entries.len()).sum::<usize>(),
            "loaded MARC-8 code table"
        );
        Ok(table)
    }

    /// Character for `code` in `charset`.
    ///
    /// Space always maps to itself. A code missing from a known set is
    /// retried with its high bit flipped, so a G1 set may be addressed
    /// through G0 and vice versa. A set that is not in the table decodes
    /// every code as the same-valued character.
    #[must_use]
    pub fn char_for(&self, charset: u32, code: u32) -> Option<char> {
        if code == 0x20 {
            return Some(' ');
        }
        let Some(set) = self.charsets.get(&charset) else {
            return char::from_u32(code);
        };
        if let Some(ch) = set.chars.get(&code) {
            return Some(*ch);
        }
        let flipped = if code < 0x80 { code + 0x80 } else { code - 0x80 };
        set.chars.get(&flipped).copied()
    }

    /// Whether `code` is a combining diacritic in the set selected for its
    /// range: `g0` for codes up to 0x7E, `g1` above.
    #[must_use]
    pub fn is_combining(&self, code: u32, g0: u32, g1: u32) -> bool {
        let charset = if code <= 0x7E { g0 } else { g1 };
        self.charsets
            .get(&charset)
            .is_some_and(|set| set.combining.contains(&code))
    }

    /// Whether the table defines `charset`
    #[must_use]
    pub fn has_charset(&self, charset: u32) -> bool {
        self.charsets.contains_key(&charset)
    }

    /// Charset identifiers in definition order
    pub fn charsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.charsets.keys().copied()
    }

    /// Every `(charset, code, char)` the table decodes, in definition order
    pub fn mappings(&self) -> impl Iterator<Item = (u32, u32, char)> + '_ {
        self.charsets.iter().flat_map(|(id, set)| {
            set.entries
                .iter()
                .filter_map(move |e| e.decoded().map(|ch| (*id, e.key(), ch)))
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Element {
    Marc,
    Ucs,
    Alt,
    Combining,
    Other,
}

/// Read `(charset, entry)` pairs in document order.
pub(crate) fn parse_definition(xml: &str) -> Result<Vec<(u32, CodeEntry)>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut out = Vec::new();
    let mut charset: Option<u32> = None;
    let mut current: Option<CodeEntry> = None;
    let mut element = Element::Other;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"characterSet" => {
                    let iso = e
                        .try_get_attribute("ISOcode")?
                        .ok_or_else(|| MarcError::CodeTable("characterSet without ISOcode".into()))?;
                    charset = Some(parse_hex(&iso.unescape_value()?)?);
                },
                b"code" => {
                    current = Some(CodeEntry {
                        marc: Vec::new(),
                        ucs: None,
                        alt: None,
                        combining: false,
                    });
                },
                b"marc" => element = Element::Marc,
                b"ucs" => element = Element::Ucs,
                b"alt" => element = Element::Alt,
                b"isCombining" => element = Element::Combining,
                _ => element = Element::Other,
            },
            Event::Text(t) => {
                let text = t.unescape()?;
                if let Some(entry) = current.as_mut() {
                    match element {
                        Element::Marc => entry.marc = parse_marc(&text)?,
                        Element::Ucs => entry.ucs = parse_code_point(&text)?,
                        Element::Alt => entry.alt = parse_code_point(&text)?,
                        Element::Combining => entry.combining = text.trim() == "true",
                        Element::Other => {},
                    }
                }
            },
            Event::End(e) => {
                element = Element::Other;
                match e.name().as_ref() {
                    b"code" => {
                        if let (Some(set), Some(entry)) = (charset, current.take()) {
                            if !entry.marc.is_empty() {
                                out.push((set, entry));
                            }
                        }
                    },
                    b"characterSet" => charset = None,
                    _ => {},
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(out)
}

fn parse_hex(text: &str) -> Result<u32> {
    u32::from_str_radix(text.trim(), 16)
        .map_err(|_| MarcError::CodeTable(format!("invalid hex value '{text}'")))
}

fn parse_marc(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() || text.len() % 2 != 0 {
        return Err(MarcError::CodeTable(format!("invalid marc code '{text}'")));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| MarcError::CodeTable(format!("invalid marc code '{text}'")))
        })
        .collect()
}

fn parse_code_point(text: &str) -> Result<Option<char>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value = parse_hex(text)?;
    char::from_u32(value)
        .map(Some)
        .ok_or_else(|| MarcError::CodeTable(format!("invalid code point '{text}'")))
}
