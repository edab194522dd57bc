//! ISO 5426 (UNIMARC) to Unicode decoding.
//!
//! ISO 5426 is single-byte: ASCII in the low half, special characters in
//! `A1`-`BF` and `E0`-`FE`, and non-spacing diacritics in `C0`-`DB`. Like
//! MARC-8 the diacritics precede their base character; they are emitted
//! after it. Bytes without a mapping decode as the Latin-1 character of the
//! same value.

use super::CharConverter;
use crate::error::Result;

/// UNIMARC decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Iso5426ToUnicode;

impl Iso5426ToUnicode {
    /// Create a decoder
    #[must_use]
    pub fn new() -> Self {
        Iso5426ToUnicode
    }

    /// Decode one field.
    #[must_use]
    pub fn convert(&self, data: &[u8]) -> String {
        let mut out = String::with_capacity(data.len());
        let mut marks: Vec<char> = Vec::new();
        let mut bytes = data.iter().copied().peekable();

        while let Some(byte) = bytes.next() {
            if let Some(mark) = diacritic(byte) {
                if bytes.peek().is_some() {
                    marks.push(mark);
                    continue;
                }
                out.push(mark);
                break;
            }
            out.push(base_char(byte));
            out.extend(marks.drain(..));
        }
        out.extend(marks);
        out
    }
}

impl CharConverter for Iso5426ToUnicode {
    fn convert_bytes(&self, data: &[u8]) -> Result<String> {
        Ok(self.convert(data))
    }
}

fn diacritic(byte: u8) -> Option<char> {
    let c = match byte {
        0xC0 => '\u{0309}',
        0xC1 => '\u{0300}',
        0xC2 => '\u{0301}',
        0xC3 => '\u{0302}',
        0xC4 => '\u{0303}',
        0xC5 => '\u{0304}',
        0xC6 => '\u{0306}',
        0xC7 => '\u{0307}',
        0xC8 | 0xC9 => '\u{0308}',
        0xCA => '\u{030A}',
        0xCB => '\u{0315}',
        0xCC => '\u{0312}',
        0xCD => '\u{030B}',
        0xCE => '\u{031B}',
        0xCF => '\u{030C}',
        0xD0 => '\u{0327}',
        0xD1 => '\u{031C}',
        0xD2 => '\u{0326}',
        0xD3 => '\u{0328}',
        0xD4 => '\u{0325}',
        0xD5 => '\u{032E}',
        0xD6 => '\u{0323}',
        0xD7 => '\u{0324}',
        0xD8 => '\u{0332}',
        0xD9 => '\u{0333}',
        0xDA => '\u{0329}',
        0xDB => '\u{032D}',
        _ => return None,
    };
    Some(c)
}

fn base_char(byte: u8) -> char {
    match byte {
        0xA1 => '\u{00A1}',
        0xA2 | 0xAA => '\u{201C}',
        0xA3 => '\u{00A3}',
        0xA4 => '\u{0024}',
        0xA5 => '\u{00A5}',
        0xA6 => '\u{2020}',
        0xA7 => '\u{00A7}',
        0xA8 => '\u{2032}',
        0xA9 => '\u{2018}',
        0xAB => '\u{00AB}',
        0xAC => '\u{266D}',
        0xAD => '\u{00A9}',
        0xAE => '\u{2117}',
        0xAF => '\u{00AE}',
        0xB0 => '\u{02BB}',
        0xB1 => '\u{02BC}',
        0xB2 => '\u{201A}',
        0xB6 => '\u{2021}',
        0xB7 => '\u{00B7}',
        0xB8 => '\u{2033}',
        0xB9 => '\u{2019}',
        0xBA => '\u{201D}',
        0xBB => '\u{00BB}',
        0xBC => '\u{266F}',
        0xBD => '\u{02B9}',
        0xBE => '\u{02BA}',
        0xBF => '\u{00BF}',
        0xE0 => '\u{2126}',
        0xE1 => '\u{00C6}',
        0xE2 => '\u{0110}',
        0xE3 => '\u{00AA}',
        0xE4 => '\u{0126}',
        0xE6 => '\u{0132}',
        0xE7 => '\u{013F}',
        0xE8 => '\u{0141}',
        0xE9 => '\u{00D8}',
        0xEA => '\u{0152}',
        0xEB => '\u{00BA}',
        0xEC => '\u{00DE}',
        0xED => '\u{0166}',
        0xEE => '\u{014A}',
        0xEF => '\u{0149}',
        0xF0 => '\u{0138}',
        0xF1 => '\u{00E6}',
        0xF2 => '\u{0111}',
        0xF3 => '\u{00F0}',
        0xF4 => '\u{0127}',
        0xF5 => '\u{0131}',
        0xF6 => '\u{0133}',
        0xF7 => '\u{0140}',
        0xF8 => '\u{0142}',
        0xF9 => '\u{00F8}',
        0xFA => '\u{0153}',
        0xFB => '\u{00DF}',
        0xFC => '\u{00FE}',
        0xFD => '\u{0167}',
        0xFE => '\u{014B}',
        other => char::from(other),
    }
}
