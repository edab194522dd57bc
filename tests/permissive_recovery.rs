//! Recovery of damaged binary records.

mod common;

use common::{build_raw_record, raw_title_record};
use marc_codec::{
    Encoding, MarcError, NormalizationForm, NormalizingReader, PermissiveOptions, PermissiveReader,
    Severity,
};
use std::io::Cursor;

fn reader(data: Vec<u8>) -> PermissiveReader<Cursor<Vec<u8>>> {
    PermissiveReader::new(Cursor::new(data))
}

#[test]
fn test_oversize_record_reports_sentinel_length() {
    let bodies: Vec<Vec<u8>> = (0..13)
        .map(|i| {
            let mut body = format!("  \x1Fa{i:02}").into_bytes();
            body.extend(std::iter::repeat(b'z').take(8000));
            body
        })
        .collect();
    let mut fields: Vec<(&str, &[u8])> = vec![("001", b"huge")];
    fields.extend(bodies.iter().map(|b| ("505", b.as_slice())));
    let mut data = build_raw_record(b'a', &fields);
    data.extend(raw_title_record("after", "Next"));

    let mut r = reader(data);
    let record = r.read_record().unwrap().unwrap();
    let leader = record.leader.marshal();
    assert_eq!(&leader[0..5], "99999");
    assert_eq!(&leader[5..9], "cam ");
    assert!(record.leader.record_length > 99_999);

    let notes: Vec<String> = record
        .get_fields("505")
        .map(|f| f.get_subfield('a').unwrap()[..2].to_string())
        .collect();
    assert_eq!(notes.len(), 13);
    assert_eq!(notes[12], "12");

    assert_eq!(r.read_record().unwrap().unwrap().control_number(), Some("after"));
}

#[test]
fn test_non_numeric_counts_default_to_two() {
    let mut data = raw_title_record("id1", "Title");
    data[10] = b'?';
    data[11] = b'x';
    let mut r = reader(data);
    let record = r.read_record().unwrap().unwrap();
    assert_eq!(record.leader.indicator_count, 2);
    assert_eq!(record.leader.subfield_code_length, 2);
    assert_eq!(record.get_field("245").unwrap().get_subfield('a'), Some("Title"));
    assert!(r.errors().max_severity() < Severity::Minor);
}

#[test]
fn test_skip_and_continue_after_unrecoverable_record() {
    let mut first = raw_title_record("bad", "Broken");
    let base: u32 = std::str::from_utf8(&first[12..17]).unwrap().parse().unwrap();
    first[12..17].copy_from_slice(format!("{:05}", base + 1).as_bytes());

    let mut data = first;
    data.extend(raw_title_record("id2", "Two"));
    data.extend(raw_title_record("id3", "Three"));

    let mut r = reader(data);
    let results: Vec<_> = (&mut r).take(3).collect();
    assert!(matches!(results[0], Err(MarcError::Fatal(_))));
    let ids: Vec<_> = results[1..]
        .iter()
        .map(|r| r.as_ref().unwrap().control_number().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["id2", "id3"]);
    assert!(r.next().is_none());
}

#[test]
fn test_diagnostics_are_reset_per_record() {
    let mut data = raw_title_record("id1", "One");
    data[20..24].copy_from_slice(b"ab00");
    data.extend(raw_title_record("id2", "Two"));

    let mut r = reader(data);
    r.read_record().unwrap();
    assert_eq!(r.errors().max_severity(), Severity::Minor);
    let diagnostic = &r.errors().errors()[0];
    assert_eq!(diagnostic.record_id, "id1");

    r.read_record().unwrap();
    assert!(r.errors().errors().is_empty());
}

#[test]
fn test_latin1_default_encoding() {
    let data = build_raw_record(b' ', &[("001", b"l1"), ("245", b"10\x1FaGr\xFCn und Wei\xDF")]);
    let mut r = reader(data).with_default_encoding(Encoding::Latin1);
    let record = r.read_record().unwrap().unwrap();
    assert_eq!(
        record.get_field("245").unwrap().get_subfield('a'),
        Some("Gr\u{fc}n und Wei\u{df}")
    );
    assert_eq!(record.leader.char_coding_scheme, 'a');
}

#[test]
fn test_undecided_encoding_settles_every_field() {
    let data = build_raw_record(
        b'x',
        &[
            ("001", b"g1"),
            ("008", b"caf\xE9 data"),
            ("245", b"10\x1FaCaf\xE9 noir"),
        ],
    );
    let mut r = reader(data);
    let record = r.read_record().unwrap().unwrap();

    let control = record.get_control_field("008").unwrap();
    assert!(!control.contains("%%@%%"), "{control:?}");
    assert!(control.starts_with("caf") && control.ends_with("data"), "{control:?}");
    for field in record.data_fields() {
        for subfield in field.subfields() {
            assert!(!subfield.value.contains("%%@%%"), "{:?}", subfield.value);
        }
    }
    assert!(r
        .errors()
        .errors()
        .iter()
        .any(|d| d.severity == Severity::Info));
}

#[test]
fn test_options_from_config() {
    let options: PermissiveOptions = serde_json::from_str(
        r#"{"permissive": true, "convert_to_utf8": false, "default_encoding": "Marc8",
            "uppercase_subfields": false, "translate_ncr": false, "lookahead": 2048}"#,
    )
    .unwrap();
    let data = build_raw_record(b' ', &[("001", b"m1"), ("245", b"10\x1FaCaf\xE2e")]);
    let r = PermissiveReader::with_options(Cursor::new(data), options);

    // unconverted text carries one char per byte; a normalizing reader decodes it
    let mut normalized = NormalizingReader::new(r, NormalizationForm::Nfc);
    let record = normalized.read_record().unwrap().unwrap();
    assert_eq!(record.get_field("245").unwrap().get_subfield('a'), Some("Caf\u{e9}"));
    assert_eq!(record.leader.char_coding_scheme, 'a');
}

#[test]
fn test_recovery_is_logged() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        let mut data = raw_title_record("id1", "Title");
        let len = data.len();
        data[0..5].copy_from_slice(format!("{:05}", len + 10).as_bytes());
        data.extend(raw_title_record("id2", "Two"));
        let mut r = reader(data);
        assert!(r.read_record().unwrap().is_some());
        assert_eq!(r.errors().max_severity(), Severity::Major);
        assert!(r.read_record().unwrap().is_some());
    });
}
