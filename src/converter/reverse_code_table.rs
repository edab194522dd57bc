//! Unicode to MARC-8 lookup.
//!
//! [`ReverseCodeTable`] is the inverse of [`CodeTable`]: for each Unicode
//! character, every charset that can produce it and the bytes to use there.
//! Both the `<ucs>` and the `<alt>` code point of an entry are indexed.
//!
//! [`CharsetTracker`] carries the per-field encoder state on top of a shared
//! table: the G0/G1 sets last selected, the charsets used so far in the
//! field, and a one-entry cache of the most recent lookup.

use super::code_table::{parse_definition, CodeTable, BASIC_LATIN, EXTENDED_LATIN};
use crate::error::{MarcError, Result};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Charset identifier mapped to the MARC-8 bytes for one character.
pub type CharsetEncodings = IndexMap<u32, Vec<u8>>;

/// Charset preferred when no used charset can encode a character.
const PREFERRED_FALLBACK: u32 = 0x53;

lazy_static! {
    static ref DEFAULT_REVERSE: std::result::Result<Arc<ReverseCodeTable>, String> =
        CodeTable::default_with_cjk()
            .map(|table| Arc::new(ReverseCodeTable::from_code_table(&table)))
            .map_err(|e| e.to_string());
}

/// Inverse MARC-8 index: `char -> {charset -> bytes}`.
#[derive(Debug, Clone, Default)]
pub struct ReverseCodeTable {
    chars: HashMap<char, CharsetEncodings>,
    combining: HashSet<char>,
}

impl ReverseCodeTable {
    /// Shared table built from the bundled definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled definition failed to parse.
    pub fn default_table() -> Result<Arc<ReverseCodeTable>> {
        DEFAULT_REVERSE.clone().map_err(MarcError::CodeTable)
    }

    /// Invert a forward table
    #[must_use]
    pub fn from_code_table(table: &CodeTable) -> Self {
        let mut reverse = ReverseCodeTable::default();
        for (charset, set) in &table.charsets {
            for entry in &set.entries {
                for ch in [entry.ucs, entry.alt].into_iter().flatten() {
                    reverse.insert(ch, *charset, &entry.marc, entry.combining);
                }
            }
        }
        reverse
    }

    /// Load and invert a definition file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml_str(&xml)
    }

    /// Load and invert a definition from a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be read or parsed.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut xml = String::new();
        reader.read_to_string(&mut xml)?;
        Self::from_xml_str(&xml)
    }

    /// Parse and invert a definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition is malformed.
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        let mut reverse = ReverseCodeTable::default();
        for (charset, entry) in parse_definition(xml)? {
            for ch in [entry.ucs, entry.alt].into_iter().flatten() {
                reverse.insert(ch, charset, &entry.marc, entry.combining);
            }
        }
        Ok(reverse)
    }

    fn insert(&mut self, ch: char, charset: u32, marc: &[u8], combining: bool) {
        self.chars
            .entry(ch)
            .or_default()
            .entry(charset)
            .or_insert_with(|| marc.to_vec());
        if combining {
            self.combining.insert(ch);
        }
    }

    /// All encodings of `ch`
    #[must_use]
    pub fn lookup(&self, ch: char) -> Option<&CharsetEncodings> {
        self.chars.get(&ch)
    }

    /// Whether `ch` is a combining mark in some charset
    #[must_use]
    pub fn is_combining(&self, ch: char) -> bool {
        self.combining.contains(&ch)
    }

    /// Whether `ch` has any MARC-8 encoding
    #[must_use]
    pub fn char_has_match(&self, ch: char) -> bool {
        self.chars.contains_key(&ch)
    }
}

/// Per-field encoder state over a [`ReverseCodeTable`].
#[derive(Debug)]
pub struct CharsetTracker<'a> {
    table: &'a ReverseCodeTable,
    g0: u32,
    g1: u32,
    charsets_used: Vec<u32>,
    last_lookup: Option<(char, Option<&'a CharsetEncodings>)>,
}

impl<'a> CharsetTracker<'a> {
    /// Fresh state: G0 basic Latin, G1 ANSEL
    #[must_use]
    pub fn new(table: &'a ReverseCodeTable) -> Self {
        CharsetTracker {
            table,
            g0: BASIC_LATIN,
            g1: EXTENDED_LATIN,
            charsets_used: vec![BASIC_LATIN, EXTENDED_LATIN],
            last_lookup: None,
        }
    }

    /// Back to the start-of-field state
    pub fn init(&mut self) {
        self.g0 = BASIC_LATIN;
        self.g1 = EXTENDED_LATIN;
        self.charsets_used = vec![BASIC_LATIN, EXTENDED_LATIN];
    }

    /// Charset last selected into G0
    #[must_use]
    pub fn g0(&self) -> u32 {
        self.g0
    }

    /// Charset last selected into G1
    #[must_use]
    pub fn g1(&self) -> u32 {
        self.g1
    }

    /// Record a G0 switch
    pub fn set_g0(&mut self, charset: u32) {
        self.g0 = charset;
    }

    /// Record a G1 switch
    pub fn set_g1(&mut self, charset: u32) {
        self.g1 = charset;
    }

    /// Cached lookup of every encoding of `ch`
    pub fn encodings(&mut self, ch: char) -> Option<&'a CharsetEncodings> {
        if let Some((key, value)) = self.last_lookup {
            if key == ch {
                return value;
            }
        }
        let value = self.table.lookup(ch);
        self.last_lookup = Some((ch, value));
        value
    }

    /// Whether `ch` can be encoded at all
    pub fn char_has_match(&mut self, ch: char) -> bool {
        self.encodings(ch).is_some()
    }

    /// Bytes for `ch` in the current G0 set, if it has any
    pub fn in_g0(&mut self, ch: char) -> Option<&'a [u8]> {
        let g0 = self.g0;
        self.encodings(ch)
            .and_then(|e| e.get(&g0))
            .map(Vec::as_slice)
    }

    /// Bytes for `ch` in the current G1 set, if it has any
    pub fn in_g1(&mut self, ch: char) -> Option<&'a [u8]> {
        let g1 = self.g1;
        self.encodings(ch)
            .and_then(|e| e.get(&g1))
            .map(Vec::as_slice)
    }

    /// Whether `ch` is reachable without an escape, through G0 or G1
    pub fn in_preferred_charset(&mut self, ch: char) -> bool {
        self.in_g0(ch).is_some() || self.in_g1(ch).is_some()
    }

    /// Pick the charset to switch to for `ch`.
    ///
    /// A sole candidate wins. Otherwise the first charset already used in
    /// this field, then `S`, then the first candidate in definition order;
    /// a newly chosen set joins the used list.
    pub fn best_charset(&mut self, ch: char) -> Option<(u32, &'a [u8])> {
        let encodings = self.encodings(ch)?;
        if encodings.len() == 1 {
            return encodings.first().map(|(k, v)| (*k, v.as_slice()));
        }
        if let Some(used) = self
            .charsets_used
            .iter()
            .find(|c| encodings.contains_key(*c))
        {
            return encodings.get(used).map(|v| (*used, v.as_slice()));
        }
        let (charset, bytes) = match encodings.get_key_value(&PREFERRED_FALLBACK) {
            Some((k, v)) => (*k, v.as_slice()),
            None => encodings.first().map(|(k, v)| (*k, v.as_slice()))?,
        };
        self.charsets_used.push(charset);
        Some((charset, bytes))
    }

    /// Whether `ch` is a combining mark
    #[must_use]
    pub fn is_combining(&self, ch: char) -> bool {
        self.table.is_combining(ch)
    }
}
