//! Character set conversion between MARC-8, ISO 5426 and Unicode.
//!
//! Decoders implement [`CharConverter`]; encoders implement [`CharEncoder`].
//! Both are stateless between calls: every field starts from the default
//! character set registers.
//!
//! # Examples
//!
//! ```
//! use marc_codec::converter::{CharConverter, Marc8ToUnicode, UnicodeToMarc8};
//!
//! let encoder = UnicodeToMarc8::new()?;
//! let bytes = encoder.convert("man\u{0303}ana");
//! assert_eq!(bytes, b"ma\xE4nana");
//!
//! let decoder = Marc8ToUnicode::new()?;
//! assert_eq!(decoder.convert_bytes(&bytes)?, "man\u{0303}ana");
//! # Ok::<(), marc_codec::MarcError>(())
//! ```

pub mod code_table;
pub mod iso5426;
pub mod marc8_to_unicode;
pub mod reverse_code_table;
pub mod unicode_to_marc8;

pub use code_table::CodeTable;
pub use iso5426::Iso5426ToUnicode;
pub use marc8_to_unicode::Marc8ToUnicode;
pub use reverse_code_table::{CharsetTracker, ReverseCodeTable};
pub use unicode_to_marc8::UnicodeToMarc8;

use crate::error::Result;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::fmt::Debug;

/// Decodes field bytes in some legacy character set to Unicode.
pub trait CharConverter: Debug {
    /// Decode raw field bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the converter is strict and the data is invalid.
    fn convert_bytes(&self, data: &[u8]) -> Result<String>;

    /// Decode text that was read without conversion.
    ///
    /// A string made only of characters up to U+00FF is taken to hold one
    /// source byte per character. Anything else is already Unicode and is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// Returns an error if the converter is strict and the data is invalid.
    fn convert_str(&self, data: &str) -> Result<String> {
        match latin1_bytes(data) {
            Some(bytes) => self.convert_bytes(&bytes),
            None => Ok(data.to_string()),
        }
    }

    /// Whether the output is Unicode
    fn outputs_unicode(&self) -> bool {
        true
    }
}

/// Encodes Unicode text into a legacy byte encoding.
pub trait CharEncoder: Debug {
    /// Encode one field's text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be represented.
    fn encode(&self, data: &str) -> Result<Vec<u8>>;
}

/// ISO 8859-1 output; characters above U+00FF become `?`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Latin1Encoder;

impl CharEncoder for Latin1Encoder {
    fn encode(&self, data: &str) -> Result<Vec<u8>> {
        Ok(data
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect())
    }
}

/// One byte per character if every character fits in a byte.
pub(crate) fn latin1_bytes(data: &str) -> Option<Vec<u8>> {
    data.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

/// ISO 8859-1 decode: every byte is the code point of the same value.
#[must_use]
pub fn latin1_to_string(data: &[u8]) -> String {
    data.iter().map(|b| char::from(*b)).collect()
}

lazy_static! {
    static ref NCR: Option<Regex> = Regex::new("&#x([0-9A-Fa-f]{4});").ok();
}

/// Replace `&#xHHHH;` references with the characters they name.
///
/// Only the four-digit form is recognized. References to code points that
/// are not characters (surrogates) are left in place.
#[must_use]
pub fn translate_ncr(text: &str) -> String {
    let Some(pattern) = NCR.as_ref() else {
        return text.to_string();
    };
    if !text.contains("&#x") {
        return text.to_string();
    }
    pattern
        .replace_all(text, |caps: &Captures<'_>| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
