//! Character encodings of MARC field data.
//!
//! The encoding of a MARC21 record is indicated in position 9 of the leader:
//! - `'a'` = UTF-8
//! - space = MARC-8
//!
//! Real files also carry ISO-8859-1 and UNIMARC (ISO 5426) data under a
//! blank leader/09. The permissive reader tells these apart with the
//! detection modes ([`Encoding::BestGuess`] and the `*Maybe` variants);
//! those are never an output encoding.

use crate::converter::{
    latin1_to_string, CharEncoder, Iso5426ToUnicode, Latin1Encoder, Marc8ToUnicode, UnicodeToMarc8,
};
use crate::error::{MarcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Character encoding for MARC field data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Encoding {
    /// UTF-8
    #[default]
    Utf8,
    /// MARC-8 (ISO 2022 style, with escape sequences)
    Marc8,
    /// ISO-8859-1
    Latin1,
    /// ISO 5426, as used by UNIMARC
    Iso5426,
    /// Pick between MARC-8, ISO 5426 and ISO-8859-1 per record
    BestGuess,
    /// Leader says UTF-8 but the data is not; try MARC-8 first
    Marc8Maybe,
    /// MARC-8 whose escape sequences were stripped
    Marc8Broken,
    /// Leader is blank but the data may be UTF-8
    Utf8Maybe,
}

impl Encoding {
    /// Encoding named by leader/09: `'a'` is UTF-8, anything else MARC-8.
    #[must_use]
    pub fn from_leader_char(c: char) -> Self {
        match c {
            'a' => Encoding::Utf8,
            _ => Encoding::Marc8,
        }
    }

    /// Leader/09 value for data written in this encoding
    #[must_use]
    pub fn as_leader_char(self) -> char {
        match self {
            Encoding::Utf8 => 'a',
            _ => ' ',
        }
    }

    /// Canonical name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Marc8 => "MARC8",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Iso5426 => "ISO5426",
            Encoding::BestGuess => "BESTGUESS",
            Encoding::Marc8Maybe => "MARC8-Maybe",
            Encoding::Marc8Broken => "MARC8-Broken",
            Encoding::Utf8Maybe => "UTF8-Maybe",
        }
    }

    /// Whether this is a detection state rather than a concrete encoding
    #[must_use]
    pub fn is_detection_mode(self) -> bool {
        matches!(
            self,
            Encoding::BestGuess | Encoding::Marc8Maybe | Encoding::Marc8Broken | Encoding::Utf8Maybe
        )
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = MarcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(Encoding::Utf8),
            "MARC8" | "MARC-8" => Ok(Encoding::Marc8),
            "ISO-8859-1" | "ISO8859_1" | "LATIN1" => Ok(Encoding::Latin1),
            "ISO5426" | "UNIMARC" => Ok(Encoding::Iso5426),
            "BESTGUESS" => Ok(Encoding::BestGuess),
            "MARC8-MAYBE" => Ok(Encoding::Marc8Maybe),
            "MARC8-BROKEN" => Ok(Encoding::Marc8Broken),
            "UTF8-MAYBE" => Ok(Encoding::Utf8Maybe),
            _ => Err(MarcError::EncodingError(format!("Unknown character encoding: {s}"))),
        }
    }
}

/// Decode bytes in a concrete encoding.
///
/// MARC-8 is decoded strictly.
///
/// # Errors
///
/// Returns [`MarcError::EncodingError`] for invalid UTF-8, malformed
/// MARC-8, or a detection mode.
pub fn decode_bytes(bytes: &[u8], encoding: Encoding) -> Result<String> {
    match encoding {
        Encoding::Utf8 => String::from_utf8(bytes.to_vec())
            .map_err(|e| MarcError::EncodingError(format!("Invalid UTF-8: {e}"))),
        Encoding::Marc8 => Marc8ToUnicode::new()?.convert(bytes),
        Encoding::Latin1 => Ok(latin1_to_string(bytes)),
        Encoding::Iso5426 => Ok(Iso5426ToUnicode::new().convert(bytes)),
        other => Err(MarcError::EncodingError(format!(
            "{other} is not a concrete encoding"
        ))),
    }
}

/// Encode a string in a concrete output encoding.
///
/// # Errors
///
/// Returns [`MarcError::EncodingError`] for encodings that cannot be
/// written.
pub fn encode_string(s: &str, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Ok(s.as_bytes().to_vec()),
        Encoding::Marc8 => Ok(UnicodeToMarc8::new()?.convert(s)),
        Encoding::Latin1 => Latin1Encoder.encode(s),
        other => Err(MarcError::EncodingError(format!(
            "{other} is not an output encoding"
        ))),
    }
}
