//! MARC-8 to Unicode decoding.
//!
//! MARC-8 is an ISO 2022 style encoding: escape sequences select which
//! character set the G0 (bytes up to 0x7E) and G1 (bytes above) registers
//! address. Diacritics are stored before the character they decorate and
//! are emitted after it here, giving decomposed Unicode.
//!
//! The decoder runs in one of two modes. Strict decoding fails on the first
//! malformed sequence. Permissive decoding repairs what it can, logs each
//! repair on an [`ErrorHandler`] and always produces text.

use super::code_table::{CodeTable, BASIC_LATIN, CJK, EXTENDED_LATIN};
use super::{translate_ncr, CharConverter};
use crate::error::{MarcError, Result};
use crate::error_handler::{ErrorHandler, Severity};
use std::fmt::Write;
use std::sync::Arc;

const ESC: u8 = 0x1B;
const SPACE: u8 = 0x20;

/// Charset final bytes accepted after `ESC (`, `ESC )`, `ESC ,` and `ESC -`
const DESIGNATABLE: &[u8] = b"34BE1NQS2";
/// Intermediate bytes that are dropped when doubled up in an escape
const INTERMEDIATES: &[u8] = b"(,)-$!";

const UNKNOWN_CODE: &str =
    "Unknown character set code found following escape character. Discarding escape character.";

/// MARC-8 decoder.
///
/// Created with the bundled table without the East Asian set; that set is
/// swapped in for the rest of a call when a field selects it.
#[derive(Debug, Clone)]
pub struct Marc8ToUnicode {
    table: Arc<CodeTable>,
    loaded_multibyte: bool,
    translate_ncr: bool,
}

impl Marc8ToUnicode {
    /// Decoder over the bundled tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled table failed to load.
    pub fn new() -> Result<Self> {
        Ok(Marc8ToUnicode {
            table: CodeTable::default_without_cjk()?,
            loaded_multibyte: false,
            translate_ncr: false,
        })
    }

    /// Decoder over the bundled tables, East Asian set included up front.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled table failed to load.
    pub fn with_multibyte() -> Result<Self> {
        Ok(Marc8ToUnicode {
            table: CodeTable::default_with_cjk()?,
            loaded_multibyte: true,
            translate_ncr: false,
        })
    }

    /// Decoder over a caller-supplied table
    #[must_use]
    pub fn with_code_table(table: Arc<CodeTable>) -> Self {
        Marc8ToUnicode {
            table,
            loaded_multibyte: true,
            translate_ncr: false,
        }
    }

    /// Turn `&#xHHHH;` references in the output back into characters
    #[must_use]
    pub fn with_translate_ncr(mut self, translate: bool) -> Self {
        self.translate_ncr = translate;
        self
    }

    /// Whether numeric character references are translated
    #[must_use]
    pub fn translates_ncr(&self) -> bool {
        self.translate_ncr
    }

    /// Strict decode.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::EncodingError`] for any malformed escape
    /// sequence or stray space inside an escape sequence.
    pub fn convert(&self, data: &[u8]) -> Result<String> {
        self.decode(data, Recovery::Strict)
    }

    /// Permissive decode; repairs are logged on `errors`.
    ///
    /// # Errors
    ///
    /// Only fails if the East Asian table is needed and cannot be loaded.
    pub fn convert_with(&self, data: &[u8], errors: &mut ErrorHandler) -> Result<String> {
        self.decode(data, Recovery::Permissive(errors))
    }

    /// Character for a three-byte East Asian code, if this decoder's table
    /// carries that set.
    pub(crate) fn lookup_multibyte(&self, b1: u8, b2: u8, b3: u8) -> Option<char> {
        if self.table.has_charset(CJK) {
            self.table.char_for(CJK, make_multibyte(b1, b2, b3))
        } else {
            None
        }
    }

    fn decode(&self, data: &[u8], recovery: Recovery<'_>) -> Result<String> {
        let decoder = Decoder {
            data,
            table: Arc::clone(&self.table),
            loaded_multibyte: self.loaded_multibyte,
            offset: 0,
            g0: BASIC_LATIN,
            g1: EXTENDED_LATIN,
            multibyte: false,
            recovery,
        };
        let text = decoder.run()?;
        if self.translate_ncr {
            Ok(translate_ncr(&text))
        } else {
            Ok(text)
        }
    }
}

impl CharConverter for Marc8ToUnicode {
    fn convert_bytes(&self, data: &[u8]) -> Result<String> {
        self.convert(data)
    }
}

/// What to do with a defect: fail, or log and continue.
#[derive(Debug)]
enum Recovery<'h> {
    Strict,
    Permissive(&'h mut ErrorHandler),
}

impl Recovery<'_> {
    fn is_strict(&self) -> bool {
        matches!(self, Recovery::Strict)
    }

    /// Fail in strict mode, log in permissive mode.
    fn report(&mut self, severity: Severity, message: &str) -> Result<()> {
        match self {
            Recovery::Strict => Err(MarcError::EncodingError(message.to_string())),
            Recovery::Permissive(errors) => {
                errors.add_error(severity, message);
                Ok(())
            },
        }
    }

    /// Log in permissive mode only.
    fn note(&mut self, severity: Severity, message: &str) {
        if let Recovery::Permissive(errors) = self {
            errors.add_error(severity, message);
        }
    }
}

#[derive(Clone, Copy)]
enum Register {
    G0,
    G1,
}

/// Per-field decoder state.
struct Decoder<'a, 'h> {
    data: &'a [u8],
    table: Arc<CodeTable>,
    loaded_multibyte: bool,
    offset: usize,
    g0: u32,
    g1: u32,
    multibyte: bool,
    recovery: Recovery<'h>,
}

impl Decoder<'_, '_> {
    fn run(mut self) -> Result<String> {
        let len = self.data.len();
        let mut out = String::with_capacity(len);
        let mut diacritics: Vec<char> = Vec::new();

        self.check_mode()?;
        while self.offset < len {
            let byte = self.data[self.offset];
            if self.is_combining(byte) && self.has_next() {
                while self.offset < len
                    && self.is_combining(self.data[self.offset])
                    && self.has_next()
                {
                    if let Some(c) = self.char_for(self.data[self.offset]) {
                        diacritics.push(c);
                    }
                    self.offset += 1;
                    self.check_mode()?;
                }
                if self.offset >= len {
                    self.recovery.note(
                        Severity::Minor,
                        "Diacritic found at the end of field, without the character that it is supposed to decorate",
                    );
                    out.extend(diacritics.drain(..));
                    break;
                }
                let base = self.data[self.offset];
                self.push_single(&mut out, base);
                self.offset += 1;
                self.check_mode()?;
                out.extend(diacritics.drain(..));
            } else if self.multibyte {
                self.decode_multibyte(&mut out);
            } else {
                self.push_single(&mut out, byte);
                self.offset += 1;
            }
            if self.offset < len {
                self.check_mode()?;
            }
        }
        Ok(out)
    }

    fn decode_multibyte(&mut self, out: &mut String) {
        let data = self.data;
        let len = data.len();
        let o = self.offset;
        let space_at = |i: usize| data.get(o + i) == Some(&SPACE);

        if data[o] == SPACE {
            // a space amid multibyte characters stands for itself
            out.push(' ');
            self.offset += 1;
        } else if o + 3 <= len && (self.recovery.is_strict() || !(space_at(1) || space_at(2))) {
            let key = make_multibyte(data[o], data[o + 1], data[o + 2]);
            match self.multibyte_char(key) {
                Some(c) => {
                    out.push(c);
                    self.offset += 3;
                },
                None if self.recovery.is_strict() => {
                    let _ = write!(out, "<U+{key:06X}>");
                    self.offset += 3;
                },
                None => {
                    let next_is_valid = o + 6 <= len
                        && !space_at(4)
                        && !space_at(5)
                        && self
                            .multibyte_char(make_multibyte(data[o + 3], data[o + 4], data[o + 5]))
                            .is_some();
                    let shifted_is_valid = o + 4 <= len
                        && data[o] > 0x7F
                        && self
                            .multibyte_char(make_multibyte(data[o + 1], data[o + 2], data[o + 3]))
                            .is_some();
                    if next_is_valid {
                        self.recovery.note(
                            Severity::Minor,
                            "Erroneous MARC8 multibyte character, Discarding bad character and continuing reading Multibyte characters",
                        );
                        out.push_str("[?]");
                        self.offset += 3;
                    } else if shifted_is_valid {
                        self.recovery.note(
                            Severity::Minor,
                            "Erroneous character in MARC8 multibyte character, Copying bad character and continuing reading Multibyte characters",
                        );
                        if let Some(c) = self.table.char_for(EXTENDED_LATIN, u32::from(data[o])) {
                            out.push(c);
                        }
                        self.offset += 1;
                    } else {
                        self.recovery.note(
                            Severity::Minor,
                            "Erroneous MARC8 multibyte character, inserting change to default character set",
                        );
                        self.revert_to_default();
                    }
                },
            }
        } else if !self.recovery.is_strict() && o + 4 <= len && (space_at(1) || space_at(2)) {
            let middle = if space_at(1) { data[o + 2] } else { data[o + 1] };
            match self.multibyte_char(make_multibyte(data[o], middle, data[o + 3])) {
                Some(c) => {
                    self.recovery
                        .note(Severity::Typo, "Extraneous space found within MARC8 multibyte character");
                    out.push(c);
                    out.push(' ');
                    self.offset += 4;
                },
                None => {
                    self.recovery.note(
                        Severity::Minor,
                        "Erroneous MARC8 multibyte character, inserting change to default character set",
                    );
                    self.revert_to_default();
                },
            }
        } else if self.recovery.is_strict() {
            // a trailing partial character is dropped
            self.offset = len;
        } else {
            self.recovery.note(
                Severity::Minor,
                "Partial MARC8 multibyte character, inserting change to default character set",
            );
            self.revert_to_default();
        }
    }

    /// Consume any escape sequences at the current offset.
    fn check_mode(&mut self) -> Result<()> {
        let len = self.data.len();
        let mut spaces = 0usize;
        while self.offset < len && self.data[self.offset] == ESC {
            let mut extra = 0usize;
            let mut extra2 = 0usize;
            loop {
                if self.offset + extra + extra2 + 1 >= len {
                    spaces += extra + extra2;
                    self.offset += 1;
                    self.recovery.report(
                        Severity::Minor,
                        "Escape character found at end of field, discarding it.",
                    )?;
                    break;
                }
                match self.byte_at(1 + extra) {
                    Some(b'(' | b',') => {
                        self.designate(Register::G0, 2 + extra, false)?;
                    },
                    Some(b')' | b'-') => {
                        self.designate(Register::G1, 2 + extra, false)?;
                    },
                    Some(b'$') => {
                        self.load_multibyte()?;
                        match self.byte_at(2 + extra + extra2) {
                            Some(b')' | b'-') => {
                                self.designate(Register::G1, 3 + extra + extra2, true)?;
                            },
                            Some(b'(' | b',') => {
                                self.designate(Register::G0, 3 + extra + extra2, true)?;
                            },
                            Some(b'1') => {
                                self.g0 = CJK;
                                self.offset += 3 + extra + extra2;
                                self.multibyte = true;
                            },
                            Some(SPACE) => {
                                extra2 += 1;
                                continue;
                            },
                            _ => self.discard_escape()?,
                        }
                    },
                    Some(code @ (b'g' | b'b' | b'p')) => {
                        self.g0 = u32::from(code);
                        self.offset += 2 + extra;
                        self.multibyte = false;
                    },
                    Some(b's') => {
                        self.g0 = BASIC_LATIN;
                        self.offset += 2 + extra;
                        self.multibyte = false;
                    },
                    Some(SPACE) => {
                        self.recovery.report(
                            Severity::Typo,
                            "Extraneous space character found within MARC8 character set escape sequence",
                        )?;
                        extra += 1;
                        continue;
                    },
                    _ => self.discard_escape()?,
                }
                spaces += extra + extra2;
                break;
            }
        }
        if spaces > 0 {
            self.recovery.note(
                Severity::Typo,
                &format!(
                    "{spaces} extraneous space characters found within MARC8 character set escape sequence"
                ),
            );
        }
        Ok(())
    }

    /// Apply `ESC <intermediate> <final>`, the final byte `addnl` bytes
    /// past the escape.
    fn designate(&mut self, register: Register, addnl: usize, multibyte: bool) -> Result<()> {
        let mut addnl = addnl;
        match self.byte_at(addnl) {
            Some(b'!') if self.byte_at(addnl + 1) == Some(b'E') => addnl += 1,
            Some(SPACE) => {
                self.recovery.report(
                    Severity::Typo,
                    "Extraneous space character found within MARC8 character set escape sequence. Skipping over space.",
                )?;
                addnl += 1;
            },
            Some(b) if INTERMEDIATES.contains(&b) => {
                self.recovery.report(
                    Severity::Minor,
                    "Extraneous intermediate character found following escape character. Discarding intermediate character.",
                )?;
                addnl += 1;
            },
            _ => {},
        }
        match self.byte_at(addnl) {
            Some(code) if DESIGNATABLE.contains(&code) => {
                match register {
                    Register::G0 => self.g0 = u32::from(code),
                    Register::G1 => self.g1 = u32::from(code),
                }
                self.offset += 1 + addnl;
                self.multibyte = multibyte;
                Ok(())
            },
            _ => {
                self.offset += 1;
                self.multibyte = false;
                self.recovery.report(Severity::Minor, UNKNOWN_CODE)
            },
        }
    }

    fn discard_escape(&mut self) -> Result<()> {
        self.offset += 1;
        self.recovery.report(Severity::Minor, UNKNOWN_CODE)
    }

    fn load_multibyte(&mut self) -> Result<()> {
        if !self.loaded_multibyte {
            self.table = CodeTable::default_with_cjk()?;
            self.loaded_multibyte = true;
        }
        Ok(())
    }

    fn revert_to_default(&mut self) {
        self.multibyte = false;
        self.g0 = BASIC_LATIN;
        self.g1 = EXTENDED_LATIN;
    }

    fn byte_at(&self, ahead: usize) -> Option<u8> {
        self.data.get(self.offset + ahead).copied()
    }

    fn has_next(&self) -> bool {
        self.offset + 1 < self.data.len()
    }

    fn is_combining(&self, byte: u8) -> bool {
        self.table.is_combining(u32::from(byte), self.g0, self.g1)
    }

    fn char_for(&self, byte: u8) -> Option<char> {
        let charset = if byte <= 0x7E { self.g0 } else { self.g1 };
        self.table.char_for(charset, u32::from(byte))
    }

    fn multibyte_char(&self, key: u32) -> Option<char> {
        if self.table.has_charset(CJK) {
            self.table.char_for(CJK, key)
        } else {
            None
        }
    }

    /// Emit the character for `byte`, or a `<U+XXXX>` placeholder.
    fn push_single(&self, out: &mut String, byte: u8) {
        match self.char_for(byte) {
            Some(c) => out.push(c),
            None => {
                let _ = write!(out, "<U+{byte:04X}>");
            },
        }
    }
}

fn make_multibyte(b1: u8, b2: u8, b3: u8) -> u32 {
    (u32::from(b1) << 16) | (u32::from(b2) << 8) | u32::from(b3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(data: &[u8]) -> Result<String> {
        Marc8ToUnicode::new().unwrap().convert(data)
    }

    fn permissive(data: &[u8]) -> (String, ErrorHandler) {
        let mut errors = ErrorHandler::new();
        let text = Marc8ToUnicode::new()
            .unwrap()
            .convert_with(data, &mut errors)
            .unwrap();
        (text, errors)
    }

    #[test]
    fn test_ascii_passthrough() {
        assert_eq!(strict(b"Hello, world").unwrap(), "Hello, world");
        assert_eq!(strict(b"").unwrap(), "");
    }

    #[test]
    fn test_diacritic_follows_base() {
        // ANSEL acute (E2) precedes 'e'
        assert_eq!(strict(b"caf\xE2e").unwrap(), "cafe\u{0301}");
        // two stacked marks keep their order
        assert_eq!(strict(b"\xE2\xE3a").unwrap(), "a\u{0301}\u{0302}");
    }

    #[test]
    fn test_ansel_spacing_characters() {
        assert_eq!(strict(b"\xA1odz").unwrap(), "Łodz");
    }

    #[test]
    fn test_escape_to_hebrew_and_back() {
        let decoded = strict(b"a\x1B(2\x60\x61\x1B(Bb").unwrap();
        assert_eq!(decoded, "a\u{05D0}\u{05D1}b");
    }

    #[test]
    fn test_shorthand_escapes() {
        assert_eq!(strict(b"H\x1Bb2\x1BsO").unwrap(), "H\u{2082}O");
        assert_eq!(strict(b"x\x1Bp2\x1Bs").unwrap(), "x\u{00B2}");
        assert_eq!(strict(b"\x1Bgab\x1Bs").unwrap(), "\u{03B1}\u{03B2}");
    }

    #[test]
    fn test_multibyte_cjk() {
        let decoded = strict(b"\x1B$1\x21\x30\x21\x1B(B!").unwrap();
        assert_eq!(decoded, "\u{4E00}!");
    }

    #[test]
    fn test_multibyte_space_between_characters() {
        let decoded = strict(b"\x1B$1\x21\x30\x21 \x21\x30\x21").unwrap();
        assert_eq!(decoded, "\u{4E00} \u{4E00}");
    }

    #[test]
    fn test_unmapped_byte_placeholder() {
        assert_eq!(strict(b"a\xC9b").unwrap(), "a<U+00C9>b");
    }

    #[test]
    fn test_strict_rejects_trailing_escape() {
        assert!(matches!(strict(b"abc\x1B"), Err(MarcError::EncodingError(_))));
    }

    #[test]
    fn test_permissive_discards_trailing_escape() {
        let (text, errors) = permissive(b"abc\x1B");
        assert_eq!(text, "abc");
        assert_eq!(errors.max_severity(), Severity::Minor);
    }

    #[test]
    fn test_space_inside_escape() {
        assert!(strict(b"\x1B (2\x60").is_err());
        let (text, errors) = permissive(b"\x1B (2\x60");
        assert_eq!(text, "\u{05D0}");
        assert!(errors
            .errors()
            .iter()
            .any(|d| d.severity == Severity::Typo && d.message.starts_with("1 extraneous space")));
    }

    #[test]
    fn test_unknown_charset_code() {
        assert!(strict(b"\x1B(Zab").is_err());
        let (text, errors) = permissive(b"\x1B(Zab");
        // the escape is dropped and the rest decoded as ASCII
        assert_eq!(text, "(Zab");
        assert_eq!(errors.max_severity(), Severity::Minor);
    }

    #[test]
    fn test_dangling_diacritic() {
        // the escape after the acute leaves it with nothing to decorate;
        // the mark is kept in both modes
        assert_eq!(strict(b"ab\xE2\x1B(B").unwrap(), "ab\u{0301}");
        let (text, errors) = permissive(b"ab\xE2\x1B(B");
        assert_eq!(text, "ab\u{0301}");
        assert_eq!(errors.max_severity(), Severity::Minor);
    }

    #[test]
    fn test_partial_multibyte_permissive() {
        let (text, errors) = permissive(b"\x1B$1\x21\x30\x21\x21\x30");
        assert_eq!(text, "\u{4E00}!0");
        assert!(errors
            .errors()
            .iter()
            .any(|d| d.message.starts_with("Partial MARC8 multibyte")));
    }

    #[test]
    fn test_partial_multibyte_strict_drops_tail() {
        assert_eq!(strict(b"\x1B$1\x21\x30\x21\x21\x30").unwrap(), "\u{4E00}");
    }

    #[test]
    fn test_translate_ncr() {
        let decoder = Marc8ToUnicode::new().unwrap().with_translate_ncr(true);
        assert_eq!(decoder.convert(b"&#x4E00;x").unwrap(), "\u{4E00}x");
        assert_eq!(strict(b"&#x4E00;x").unwrap(), "&#x4E00;x");
    }

    #[test]
    fn test_state_resets_per_call() {
        let decoder = Marc8ToUnicode::new().unwrap();
        assert_eq!(decoder.convert(b"\x1B(2\x60").unwrap(), "\u{05D0}");
        assert_eq!(decoder.convert(b"\x60").unwrap(), "`");
    }
}
