//! Unicode to MARC-8 encoding.
//!
//! The encoder keeps the G0/G1 registers from the previous character and
//! only emits an escape when a character is not available in either. Each
//! call starts from basic Latin/ANSEL and ends back in basic Latin.
//!
//! Characters with no MARC-8 form are decomposed (NFD) when that helps and
//! otherwise written as a numeric character reference, `&#xHHHH;`.

use super::code_table::{BASIC_LATIN, CJK};
use super::reverse_code_table::{CharsetTracker, ReverseCodeTable};
use super::CharEncoder;
use crate::error::Result;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

const ESC: u8 = 0x1B;
const G0: u8 = 0x28;
const G1: u8 = 0x29;
const MULTIBYTE: u8 = 0x24;

/// Charsets selected by a bare `ESC <final>`
const SHORTHAND: &[u32] = &[0x62, 0x67, 0x70];

/// Second half byte appended after a double-wide mark
fn trailing_half(c: char) -> Option<u8> {
    match c {
        '\u{0360}' => Some(0xFB),
        '\u{0361}' => Some(0xEC),
        _ => None,
    }
}

/// MARC-8 encoder.
#[derive(Debug, Clone)]
pub struct UnicodeToMarc8 {
    table: Arc<ReverseCodeTable>,
}

impl UnicodeToMarc8 {
    /// Encoder over the bundled tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled table failed to load.
    pub fn new() -> Result<Self> {
        Ok(UnicodeToMarc8 {
            table: ReverseCodeTable::default_table()?,
        })
    }

    /// Encoder over a caller-supplied table
    #[must_use]
    pub fn with_code_table(table: Arc<ReverseCodeTable>) -> Self {
        UnicodeToMarc8 { table }
    }

    /// Encode one field's text.
    #[must_use]
    pub fn convert(&self, text: &str) -> Vec<u8> {
        let mut state = EncodeState {
            tracker: CharsetTracker::new(&self.table),
            out: Vec::with_capacity(text.len()),
            last_base: 0,
        };
        state.encode_portion(text);
        if state.tracker.g0() != BASIC_LATIN {
            state.out.extend_from_slice(&[ESC, G0, BASIC_LATIN as u8]);
        }
        state.out
    }
}

impl CharEncoder for UnicodeToMarc8 {
    fn encode(&self, data: &str) -> Result<Vec<u8>> {
        Ok(self.convert(data))
    }
}

struct EncodeState<'a> {
    tracker: CharsetTracker<'a>,
    out: Vec<u8>,
    /// Where the bytes of the last non-combining character start
    last_base: usize,
}

impl EncodeState<'_> {
    fn encode_portion(&mut self, text: &str) {
        for c in text.chars() {
            let mut marc: Vec<u8> = Vec::with_capacity(4);
            let mut prefix = 0;
            let (g0_before, g1_before) = (self.tracker.g0(), self.tracker.g1());

            if c == ' ' {
                if self.tracker.g0() == CJK {
                    self.revert_to_basic_latin();
                }
                marc.push(b' ');
            } else if !self.tracker.char_has_match(c) {
                if let Some(replacement) = self.decomposed_form(c) {
                    self.encode_portion(&replacement);
                } else {
                    self.push_reference(c);
                }
                continue;
            } else if let Some(bytes) = self.tracker.in_g0(c) {
                marc.extend_from_slice(bytes);
            } else if let Some(bytes) = self.tracker.in_g1(c) {
                marc.extend_from_slice(bytes);
            } else if let Some((charset, bytes)) = self.tracker.best_charset(c) {
                let Ok(final_byte) = u8::try_from(charset) else {
                    self.push_reference(c);
                    continue;
                };
                marc.push(ESC);
                if bytes.len() == 3 {
                    marc.push(MULTIBYTE);
                    self.tracker.set_g0(charset);
                } else if bytes.first().is_some_and(|b| *b < 0x80) {
                    if !SHORTHAND.contains(&charset) {
                        marc.push(G0);
                    }
                    self.tracker.set_g0(charset);
                } else {
                    marc.push(G1);
                    self.tracker.set_g1(charset);
                }
                marc.push(final_byte);
                prefix = marc.len();
                marc.extend_from_slice(bytes);
            }

            if self.tracker.is_combining(c) && !self.out.is_empty() {
                // the mark goes in front of the character it decorates
                let at = self.last_base.min(self.out.len());
                if prefix > 0 {
                    // the base was written under the old registers
                    if self.tracker.g0() != g0_before {
                        marc.extend(designate(g0_before, false));
                        self.tracker.set_g0(g0_before);
                    }
                    if self.tracker.g1() != g1_before {
                        marc.extend(designate(g1_before, true));
                        self.tracker.set_g1(g1_before);
                    }
                }
                self.out.splice(at..at, marc.iter().copied());
                self.last_base = at + marc.len();
                if let Some(half) = trailing_half(c) {
                    self.out.push(half);
                }
            } else {
                self.last_base = self.out.len() + prefix;
                self.out.extend_from_slice(&marc);
            }
        }
    }

    /// A canonically equivalent spelling of `c` that can be encoded: its
    /// full decomposition, or the first two decomposed characters
    /// recomposed followed by the rest.
    fn decomposed_form(&mut self, c: char) -> Option<String> {
        let decomposed: String = c.nfd().collect();
        if decomposed.chars().eq(std::iter::once(c)) {
            return None;
        }
        if self.all_have_match(&decomposed) {
            return Some(decomposed);
        }
        if decomposed.chars().count() > 2 {
            let first_two: String = decomposed.chars().take(2).collect();
            let rest: String = decomposed.chars().skip(2).collect();
            let partial: String = first_two.nfc().collect();
            if partial != first_two && self.all_have_match(&partial) && self.all_have_match(&rest) {
                return Some(partial + &rest);
            }
        }
        None
    }

    fn all_have_match(&mut self, text: &str) -> bool {
        text.chars().all(|c| self.tracker.char_has_match(c))
    }

    fn push_reference(&mut self, c: char) {
        if self.tracker.g0() != BASIC_LATIN {
            self.revert_to_basic_latin();
        }
        self.last_base = self.out.len();
        self.out
            .extend_from_slice(format!("&#x{:04X};", u32::from(c)).as_bytes());
    }

    fn revert_to_basic_latin(&mut self) {
        self.out.extend_from_slice(&[ESC, G0, BASIC_LATIN as u8]);
        self.tracker.set_g0(BASIC_LATIN);
    }
}

/// Escape sequence selecting `charset` into G0 or G1
fn designate(charset: u32, g1: bool) -> Vec<u8> {
    let Ok(final_byte) = u8::try_from(charset) else {
        return Vec::new();
    };
    if g1 {
        vec![ESC, G1, final_byte]
    } else if charset == CJK {
        vec![ESC, MULTIBYTE, final_byte]
    } else if SHORTHAND.contains(&charset) {
        vec![ESC, final_byte]
    } else {
        vec![ESC, G0, final_byte]
    }
}
