//! Common test helpers shared across the integration tests.

#![allow(dead_code)]

use marc_codec::{DataField, Leader, Record};

/// Leader used by most test records: MARC-8 text, standard counts.
pub fn create_test_leader() -> Leader {
    Leader::unmarshal("00000cam a2200000 a 4500").expect("valid leader")
}

/// A small bibliographic record with a control number and a few data fields.
pub fn create_test_record() -> Record {
    let mut record = Record::new(create_test_leader());
    record.add_control_field("001", "ocm00012345");
    record.add_control_field("008", "850101s1984    nyu           000 0 eng  ");

    let mut author = DataField::new("100", '1', ' ');
    author.add_subfield('a', "Melville, Herman,");
    author.add_subfield('d', "1819-1891.");
    record.insert_data_field(author);

    let mut title = DataField::new("245", '1', '0');
    title.add_subfield('a', "Moby Dick /");
    title.add_subfield('c', "Herman Melville.");
    record.insert_data_field(title);

    for subject in ["Whaling", "Sea stories"] {
        let mut field = DataField::new("650", ' ', '0');
        field.add_subfield('a', subject);
        record.insert_data_field(field);
    }
    record
}

/// Assemble a raw ISO 2709 record from field bodies given without their
/// terminators. Leader/09 is set to `coding`; lengths and offsets that
/// overflow five digits are written the way broken producers write them.
pub fn build_raw_record(coding: u8, fields: &[(&str, &[u8])]) -> Vec<u8> {
    let mut directory = Vec::new();
    let mut data = Vec::new();
    for (tag, body) in fields {
        let length = body.len() + 1;
        directory.extend_from_slice(format!("{tag}{length:04}{:05}", data.len() % 100_000).as_bytes());
        data.extend_from_slice(body);
        data.push(0x1E);
    }
    directory.push(0x1E);
    let base = 24 + directory.len();
    let total = (base + data.len() + 1).min(99_999);

    let mut out = format!("{total:05}cam a22{base:05} a 4500").into_bytes();
    out[9] = coding;
    out.extend_from_slice(&directory);
    out.extend_from_slice(&data);
    out.push(0x1D);
    out
}

/// A UTF-8 raw record with a control number and a title.
pub fn raw_title_record(id: &str, title: &str) -> Vec<u8> {
    let title = format!("10\x1Fa{title}");
    build_raw_record(b'a', &[("001", id.as_bytes()), ("245", title.as_bytes())])
}

/// Every control and data field of `record`, ignoring the leader.
pub fn field_content(record: &Record) -> (Vec<(String, String)>, Vec<DataField>) {
    let control = record
        .control_fields()
        .iter()
        .map(|f| (f.tag.clone(), f.data.clone()))
        .collect();
    (control, record.data_fields().to_vec())
}
