//! MARC-8 and Unicode conversion through the public API.

use marc_codec::converter::code_table::CJK;
use marc_codec::{
    CharConverter, CodeTable, ErrorHandler, Marc8ToUnicode, ReverseCodeTable, Severity,
    UnicodeToMarc8,
};
use proptest::prelude::*;
use std::io::Write;
use std::sync::Arc;

/// Characters of the bundled tables that can stand on their own
fn spacing_chars(with_cjk: bool) -> Vec<char> {
    let table = CodeTable::default_with_cjk().unwrap();
    let reverse = ReverseCodeTable::default_table().unwrap();
    let mut chars: Vec<char> = table
        .mappings()
        .filter(|(charset, _, _)| with_cjk || *charset != CJK)
        .map(|(_, _, ch)| ch)
        .filter(|ch| !ch.is_control() && !ch.is_whitespace() && !reverse.is_combining(*ch))
        .collect();
    chars.sort_unstable();
    chars.dedup();
    chars
}

#[test]
fn test_every_mapped_character_round_trips() {
    let encoder = UnicodeToMarc8::new().unwrap();
    let decoder = Marc8ToUnicode::new().unwrap();
    let chars = spacing_chars(true);
    assert!(chars.len() > 250);
    for ch in chars {
        let text = ch.to_string();
        let bytes = encoder.convert(&text);
        assert_eq!(decoder.convert(&bytes).unwrap(), text, "U+{:04X} -> {bytes:02X?}", ch as u32);
    }
}

#[test]
fn test_decomposed_tilde_round_trips() {
    let text = "man\u{0303}ana";
    let bytes = UnicodeToMarc8::new().unwrap().convert(text);
    assert_eq!(bytes, b"ma\xE4nana");
    assert_eq!(Marc8ToUnicode::new().unwrap().convert(&bytes).unwrap(), text);
}

#[test]
fn test_precomposed_input_comes_back_decomposed() {
    let bytes = UnicodeToMarc8::new().unwrap().convert("ma\u{00F1}ana");
    let text = Marc8ToUnicode::new().unwrap().convert(&bytes).unwrap();
    assert_eq!(text, "man\u{0303}ana");
}

#[test]
fn test_strict_and_permissive_decoding() {
    let decoder = Marc8ToUnicode::new().unwrap();
    let broken = b"abc\x1B";
    assert!(decoder.convert(broken).is_err());

    let mut errors = ErrorHandler::new();
    let text = decoder.convert_with(broken, &mut errors).unwrap();
    assert_eq!(text, "abc");
    assert_eq!(errors.max_severity(), Severity::Minor);
}

#[test]
fn test_references_translated_on_request() {
    let decoder = Marc8ToUnicode::new().unwrap().with_translate_ncr(true);
    assert_eq!(decoder.convert(b"x&#x263A;y").unwrap(), "x\u{263A}y");
    let plain = Marc8ToUnicode::new().unwrap();
    assert_eq!(plain.convert(b"x&#x263A;y").unwrap(), "x&#x263A;y");
}

#[test]
fn test_char_converter_takes_raw_text() {
    let decoder = Marc8ToUnicode::new().unwrap();
    assert!(decoder.outputs_unicode());
    assert_eq!(decoder.convert_str("\u{E2}e").unwrap(), "e\u{0301}");
    // text already beyond Latin-1 is left alone
    assert_eq!(decoder.convert_str("\u{05D0}").unwrap(), "\u{05D0}");
}

#[test]
fn test_table_loaded_from_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<codeTables>
  <codeTable>
    <characterSet name="Basic Latin" ISOcode="42">
      <code><marc>41</marc><ucs>0041</ucs><alt/></code>
      <code><marc>42</marc><ucs>0042</ucs><alt/></code>
    </characterSet>
    <characterSet name="ANSEL" ISOcode="45">
      <code><marc>E2</marc><ucs>0301</ucs><alt/><isCombining>true</isCombining></code>
    </characterSet>
  </codeTable>
</codeTables>"#
    )
    .unwrap();

    let table = CodeTable::from_path(file.path()).unwrap();
    assert_eq!(table.charsets().collect::<Vec<_>>(), [0x42, 0x45]);
    assert_eq!(table.char_for(0x45, 0xE2), Some('\u{0301}'));

    let decoder = Marc8ToUnicode::with_code_table(Arc::new(table));
    assert_eq!(decoder.convert(b"\xE2AB").unwrap(), "A\u{0301}B");
}

proptest! {
    #[test]
    fn prop_mapped_text_round_trips(
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..24),
        spaces in prop::collection::vec(any::<bool>(), 24),
    ) {
        let chars = spacing_chars(false);
        let mut text = String::new();
        for (i, pick) in picks.iter().enumerate() {
            if spaces[i] && i > 0 {
                text.push(' ');
            }
            text.push(*pick.get(&chars));
        }
        let bytes = UnicodeToMarc8::new().unwrap().convert(&text);
        prop_assert_eq!(Marc8ToUnicode::new().unwrap().convert(&bytes).unwrap(), text);
    }
}
