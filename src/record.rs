//! MARC record structures and operations.
//!
//! This module provides the in-memory record model shared by every reader
//! and writer in the crate:
//! - [`Record`] — leader plus ordered control and data fields
//! - [`ControlField`] — tags 001-009, a single opaque payload
//! - [`DataField`] — two indicators and an ordered list of subfields
//! - [`Subfield`] — a one-character code and its payload
//!
//! # Examples
//!
//! ```
//! use marc_codec::{DataField, Leader, Record};
//!
//! let record = Record::builder(Leader::default())
//!     .control_field("001", "12345")
//!     .data_field(
//!         DataField::builder("245", '1', '0')
//!             .subfield('a', "Title")
//!             .build(),
//!     )
//!     .build();
//!
//! assert_eq!(record.control_number(), Some("12345"));
//! ```

use crate::leader::Leader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Tag of the control number field.
pub const CONTROL_NUMBER_TAG: &str = "001";

/// Returns true for control field tags: `"001"` through `"009"`.
#[must_use]
pub fn is_control_tag(tag: &str) -> bool {
    matches!(tag.as_bytes(), [b'0', b'0', b'1'..=b'9'])
}

/// A MARC record
///
/// Control and data fields keep insertion order, except that the control
/// number (`001`) always sits at index 0 of the control fields and is
/// unique. A sorted record instead keeps both lists ordered by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record leader (24 bytes)
    pub leader: Leader,
    control_fields: Vec<ControlField>,
    data_fields: Vec<DataField>,
    sorted: bool,
}

/// A control field (tags 001-009)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlField {
    /// Field tag
    pub tag: String,
    /// Field payload
    pub data: String,
}

/// A data field in a MARC record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataField {
    /// Field tag (normally 3 digits)
    pub tag: String,
    /// First indicator
    pub indicator1: char,
    /// Second indicator
    pub indicator2: char,
    /// Subfields (stored in `SmallVec` to avoid allocation for typical fields with 4 or fewer subfields)
    pub subfields: SmallVec<[Subfield; 4]>,
}

/// A subfield within a data field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfield {
    /// Subfield code (single character)
    pub code: char,
    /// Subfield value
    pub value: String,
}

/// Either kind of variable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Field {
    /// A control field
    Control(ControlField),
    /// A data field
    Data(DataField),
}

impl Field {
    /// The field's tag
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Field::Control(cf) => &cf.tag,
            Field::Data(df) => &df.tag,
        }
    }
}

impl From<ControlField> for Field {
    fn from(field: ControlField) -> Self {
        Field::Control(field)
    }
}

impl From<DataField> for Field {
    fn from(field: DataField) -> Self {
        Field::Data(field)
    }
}

impl Record {
    /// Create a new record that keeps fields in insertion order
    #[must_use]
    pub fn new(leader: Leader) -> Self {
        Record {
            leader,
            control_fields: Vec::new(),
            data_fields: Vec::new(),
            sorted: false,
        }
    }

    /// Create a new record that keeps fields sorted by tag
    #[must_use]
    pub fn new_sorted(leader: Leader) -> Self {
        Record {
            sorted: true,
            ..Record::new(leader)
        }
    }

    /// Create a builder for fluently constructing records
    #[must_use]
    pub fn builder(leader: Leader) -> RecordBuilder {
        RecordBuilder {
            record: Record::new(leader),
        }
    }

    /// Whether this record keeps its fields sorted by tag
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Insert a control field.
    ///
    /// A `001` goes to index 0, replacing any existing control number.
    pub fn insert_control_field(&mut self, field: ControlField) {
        if field.tag == CONTROL_NUMBER_TAG {
            match self.control_fields.first() {
                Some(first) if first.tag == CONTROL_NUMBER_TAG => self.control_fields[0] = field,
                _ => self.control_fields.insert(0, field),
            }
        } else {
            self.control_fields.push(field);
        }
        if self.sorted {
            self.control_fields.sort_by(|a, b| a.tag.cmp(&b.tag));
        }
    }

    /// Insert a data field
    pub fn insert_data_field(&mut self, field: DataField) {
        self.data_fields.push(field);
        if self.sorted {
            self.data_fields.sort_by(|a, b| a.tag.cmp(&b.tag));
        }
    }

    /// Insert a field of either kind
    pub fn add_field(&mut self, field: impl Into<Field>) {
        match field.into() {
            Field::Control(cf) => self.insert_control_field(cf),
            Field::Data(df) => self.insert_data_field(df),
        }
    }

    /// Convenience wrapper for [`Record::insert_control_field`]
    pub fn add_control_field(&mut self, tag: impl Into<String>, data: impl Into<String>) {
        self.insert_control_field(ControlField::new(tag, data));
    }

    /// Remove the first field equal to `field`, returning whether one was found
    pub fn remove_field(&mut self, field: &Field) -> bool {
        match field {
            Field::Control(cf) => remove_first(&mut self.control_fields, cf),
            Field::Data(df) => remove_first(&mut self.data_fields, df),
        }
    }

    /// Control fields in record order
    #[must_use]
    pub fn control_fields(&self) -> &[ControlField] {
        &self.control_fields
    }

    /// Data fields in record order
    #[must_use]
    pub fn data_fields(&self) -> &[DataField] {
        &self.data_fields
    }

    /// Mutable access to control field payloads; tags must not change
    pub fn control_fields_mut(&mut self) -> impl Iterator<Item = &mut ControlField> {
        self.control_fields.iter_mut()
    }

    /// Mutable access to data fields
    pub fn data_fields_mut(&mut self) -> impl Iterator<Item = &mut DataField> {
        self.data_fields.iter_mut()
    }

    /// All fields, control fields first
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.control_fields
            .iter()
            .cloned()
            .map(Field::Control)
            .chain(self.data_fields.iter().cloned().map(Field::Data))
    }

    /// Get the payload of the first control field with `tag`
    #[must_use]
    pub fn get_control_field(&self, tag: &str) -> Option<&str> {
        self.control_fields
            .iter()
            .find(|cf| cf.tag == tag)
            .map(|cf| cf.data.as_str())
    }

    /// Get all data fields with `tag`
    pub fn get_fields<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a DataField> + 'a {
        self.data_fields.iter().filter(move |df| df.tag == tag)
    }

    /// Get the first data field with `tag`
    #[must_use]
    pub fn get_field(&self, tag: &str) -> Option<&DataField> {
        self.data_fields.iter().find(|df| df.tag == tag)
    }

    /// The control number (`001`), if present
    #[must_use]
    pub fn control_number(&self) -> Option<&str> {
        self.get_control_field(CONTROL_NUMBER_TAG)
    }

    /// Fields whose tag matches `pattern`, in record order
    #[must_use]
    pub fn variable_fields_matching(&self, pattern: &Regex) -> Vec<Field> {
        self.fields().filter(|f| pattern.is_match(f.tag())).collect()
    }

    /// Remove every field
    pub fn clear_fields(&mut self) {
        self.control_fields.clear();
        self.data_fields.clear();
    }
}

fn remove_first<T: PartialEq>(items: &mut Vec<T>, target: &T) -> bool {
    match items.iter().position(|item| item == target) {
        Some(pos) => {
            items.remove(pos);
            true
        },
        None => false,
    }
}

/// Builder for fluently constructing MARC records
#[derive(Debug)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// Add a control field to the record being built
    #[must_use]
    pub fn control_field(mut self, tag: &str, data: &str) -> Self {
        self.record.add_control_field(tag, data);
        self
    }

    /// Add a data field to the record being built
    #[must_use]
    pub fn data_field(mut self, field: DataField) -> Self {
        self.record.insert_data_field(field);
        self
    }

    /// Build the record
    #[must_use]
    pub fn build(self) -> Record {
        self.record
    }
}

impl ControlField {
    /// Create a new control field
    #[must_use]
    pub fn new(tag: impl Into<String>, data: impl Into<String>) -> Self {
        ControlField {
            tag: tag.into(),
            data: data.into(),
        }
    }
}

impl DataField {
    /// Create a new data field
    #[must_use]
    pub fn new(tag: impl Into<String>, indicator1: char, indicator2: char) -> Self {
        DataField {
            tag: tag.into(),
            indicator1,
            indicator2,
            subfields: SmallVec::new(),
        }
    }

    /// Create a builder for constructing fields fluently
    ///
    /// # Examples
    ///
    /// ```
    /// use marc_codec::DataField;
    ///
    /// let field = DataField::builder("245", '1', '0')
    ///     .subfield('a', "The Great Gatsby")
    ///     .subfield('c', "F. Scott Fitzgerald")
    ///     .build();
    /// assert_eq!(field.get_subfield('c'), Some("F. Scott Fitzgerald"));
    /// ```
    #[must_use]
    pub fn builder(tag: impl Into<String>, indicator1: char, indicator2: char) -> DataFieldBuilder {
        DataFieldBuilder {
            field: DataField::new(tag, indicator1, indicator2),
        }
    }

    /// Add a subfield
    pub fn add_subfield(&mut self, code: char, value: impl Into<String>) {
        self.subfields.push(Subfield {
            code,
            value: value.into(),
        });
    }

    /// Append a subfield, builder style
    #[must_use]
    pub fn with_subfield(mut self, code: char, value: impl Into<String>) -> Self {
        self.add_subfield(code, value);
        self
    }

    /// Get first value for a subfield code
    #[must_use]
    pub fn get_subfield(&self, code: char) -> Option<&str> {
        self.subfields
            .iter()
            .find(|sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }

    /// Iterate over values with a specific subfield code
    pub fn get_subfields(&self, code: char) -> impl Iterator<Item = &str> {
        self.subfields
            .iter()
            .filter(move |sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }

    /// Iterate over all subfields
    pub fn subfields(&self) -> impl Iterator<Item = &Subfield> {
        self.subfields.iter()
    }
}

/// Builder for [`DataField`]
#[derive(Debug)]
pub struct DataFieldBuilder {
    field: DataField,
}

impl DataFieldBuilder {
    /// Append a subfield
    #[must_use]
    pub fn subfield(mut self, code: char, value: &str) -> Self {
        self.field.add_subfield(code, value);
        self
    }

    /// Build the field
    #[must_use]
    pub fn build(self) -> DataField {
        self.field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(text: &str) -> DataField {
        DataField::builder("245", '1', '0').subfield('a', text).build()
    }

    #[test]
    fn test_control_tag_range() {
        assert!(is_control_tag("001"));
        assert!(is_control_tag("009"));
        assert!(!is_control_tag("000"));
        assert!(!is_control_tag("010"));
        assert!(!is_control_tag("00A"));
        assert!(!is_control_tag("0010"));
    }

    #[test]
    fn test_control_number_kept_first() {
        let mut record = Record::new(Leader::default());
        record.add_control_field("005", "20240101");
        record.add_control_field("008", "fixed");
        record.add_control_field("001", "abc");

        let tags: Vec<&str> = record.control_fields().iter().map(|cf| cf.tag.as_str()).collect();
        assert_eq!(tags, vec!["001", "005", "008"]);
    }

    #[test]
    fn test_second_control_number_replaces_first() {
        let mut record = Record::new(Leader::default());
        record.add_control_field("001", "first");
        record.add_control_field("003", "DLC");
        record.add_control_field("001", "second");

        assert_eq!(record.control_fields().len(), 2);
        assert_eq!(record.control_number(), Some("second"));
        assert_eq!(record.control_fields()[0].tag, "001");
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut record = Record::new(Leader::default());
        record.insert_data_field(title("b"));
        record.insert_data_field(DataField::new("100", '1', ' '));
        record.insert_data_field(DataField::new("650", ' ', '0'));

        let tags: Vec<&str> = record.data_fields().iter().map(|df| df.tag.as_str()).collect();
        assert_eq!(tags, vec!["245", "100", "650"]);
    }

    #[test]
    fn test_sorted_record_orders_by_tag() {
        let mut record = Record::new_sorted(Leader::default());
        record.insert_data_field(title("b"));
        record.insert_data_field(DataField::new("650", ' ', '0'));
        record.insert_data_field(DataField::new("100", '1', ' '));
        record.add_control_field("008", "fixed");
        record.add_control_field("003", "DLC");
        record.add_control_field("001", "id");

        assert_eq!(record.fields().count(), 6);
        let data: Vec<&str> = record.data_fields().iter().map(|df| df.tag.as_str()).collect();
        assert_eq!(data, vec!["100", "245", "650"]);
        let control: Vec<&str> = record.control_fields().iter().map(|cf| cf.tag.as_str()).collect();
        assert_eq!(control, vec!["001", "003", "008"]);
    }

    #[test]
    fn test_remove_field() {
        let mut record = Record::new(Leader::default());
        record.insert_data_field(title("one"));
        record.insert_data_field(title("two"));

        assert!(record.remove_field(&Field::Data(title("one"))));
        assert!(!record.remove_field(&Field::Data(title("missing"))));
        assert_eq!(record.data_fields().len(), 1);
        assert_eq!(record.get_field("245").and_then(|f| f.get_subfield('a')), Some("two"));
    }

    #[test]
    fn test_variable_fields_matching() {
        let record = Record::builder(Leader::default())
            .control_field("001", "x")
            .data_field(DataField::new("650", ' ', '0'))
            .data_field(DataField::new("651", ' ', '0'))
            .data_field(title("t"))
            .build();

        let pattern = Regex::new("^65.$").unwrap();
        let tags: Vec<String> = record
            .variable_fields_matching(&pattern)
            .iter()
            .map(|f| f.tag().to_string())
            .collect();
        assert_eq!(tags, vec!["650", "651"]);
    }

    #[test]
    fn test_subfield_access() {
        let field = DataField::builder("650", ' ', '0')
            .subfield('a', "Cats")
            .subfield('x', "Behavior")
            .subfield('a', "Dogs")
            .build();

        assert_eq!(field.get_subfield('a'), Some("Cats"));
        assert_eq!(field.get_subfields('a').collect::<Vec<_>>(), vec!["Cats", "Dogs"]);
        assert_eq!(field.subfields().count(), 3);
    }
}
