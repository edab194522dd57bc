//! MARC record leader parsing and manipulation.
//!
//! The leader is a 24-byte fixed-length field at the start of every ISO 2709
//! record. It describes the record's lengths, offsets, and encoding.
//!
//! # Structure
//!
//! - Positions 0-4: Record length (5 digits)
//! - Position 5: Record status
//! - Position 6: Type of record
//! - Positions 7-8: Implementation defined
//! - Position 9: Character coding scheme (space = MARC-8, a = UTF-8)
//! - Position 10: Indicator count (usually 2)
//! - Position 11: Subfield code length (usually 2)
//! - Positions 12-16: Base address of data (5 digits)
//! - Positions 17-19: Implementation defined
//! - Positions 20-23: Entry map (usually "4500")

use crate::error::{MarcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest value the 5-digit length fields can carry.
pub const MAX_RECORD_LENGTH: u32 = 99_999;

/// Length of the leader in bytes.
pub const LEADER_LENGTH: usize = 24;

/// MARC Leader - 24 bytes at the start of every MARC record.
///
/// `record_length` keeps the true length even when it no longer fits in
/// five digits; [`Leader::marshal`] renders such lengths as `"99999"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    /// Record length - positions 0-4
    pub record_length: u32,
    /// Record status - position 5
    pub record_status: char,
    /// Type of record - position 6
    pub type_of_record: char,
    /// Implementation defined - positions 7-8
    pub impl_defined1: [char; 2],
    /// Character coding scheme - position 9
    pub char_coding_scheme: char,
    /// Indicator count - position 10
    pub indicator_count: u8,
    /// Subfield code length - position 11
    pub subfield_code_length: u8,
    /// Base address of data - positions 12-16
    pub base_address_of_data: u32,
    /// Implementation defined - positions 17-19
    pub impl_defined2: [char; 3],
    /// Entry map - positions 20-23
    pub entry_map: [char; 4],
}

impl Default for Leader {
    fn default() -> Self {
        Leader {
            record_length: 0,
            record_status: 'n',
            type_of_record: 'a',
            impl_defined1: ['m', ' '],
            char_coding_scheme: ' ',
            indicator_count: 2,
            subfield_code_length: 2,
            base_address_of_data: 0,
            impl_defined2: [' ', ' ', ' '],
            entry_map: ['4', '5', '0', '0'],
        }
    }
}

impl Leader {
    /// Parse a leader from 24 bytes, rejecting any non-numeric count or
    /// length field.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are too short or a numeric position
    /// does not hold digits.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes)?;
        let mut leader = Self::unmarshal_bytes(bytes)?;
        leader.record_length = parse_digits(&bytes[0..5])?;
        leader.indicator_count = parse_digit(bytes[10], "indicator count", 10)?;
        leader.subfield_code_length = parse_digit(bytes[11], "subfield code length", 11)?;
        leader.base_address_of_data = parse_digits(&bytes[12..17])?;
        Ok(leader)
    }

    /// Parse a leader leniently from its string form.
    ///
    /// Non-numeric lengths become `0`; non-numeric indicator count and
    /// subfield code length become `2`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the string is shorter than 24 characters.
    pub fn unmarshal(leader: &str) -> Result<Self> {
        let bytes: Vec<u8> = leader.chars().map(latin1_byte).collect();
        Self::unmarshal_bytes(&bytes)
    }

    /// Byte form of [`Leader::unmarshal`]; bytes are read as ISO-8859-1.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than 24 bytes are supplied.
    pub fn unmarshal_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes)?;
        let ch = |i: usize| char::from(bytes[i]);
        Ok(Leader {
            record_length: parse_digits(&bytes[0..5]).unwrap_or(0),
            record_status: ch(5),
            type_of_record: ch(6),
            impl_defined1: [ch(7), ch(8)],
            char_coding_scheme: ch(9),
            indicator_count: parse_digit(bytes[10], "indicator count", 10).unwrap_or(2),
            subfield_code_length: parse_digit(bytes[11], "subfield code length", 11).unwrap_or(2),
            base_address_of_data: parse_digits(&bytes[12..17]).unwrap_or(0),
            impl_defined2: [ch(17), ch(18), ch(19)],
            entry_map: [ch(20), ch(21), ch(22), ch(23)],
        })
    }

    /// Render the 24-character leader.
    ///
    /// Lengths above 99999 are written as `"99999"`.
    #[must_use]
    pub fn marshal(&self) -> String {
        let mut out = String::with_capacity(LEADER_LENGTH);
        out.push_str(&format_length(self.record_length));
        out.push(self.record_status);
        out.push(self.type_of_record);
        out.extend(self.impl_defined1);
        out.push(self.char_coding_scheme);
        out.push(digit_char(self.indicator_count));
        out.push(digit_char(self.subfield_code_length));
        out.push_str(&format_length(self.base_address_of_data));
        out.extend(self.impl_defined2);
        out.extend(self.entry_map);
        out
    }

    /// Serialize the leader to its 24 bytes (ISO-8859-1).
    #[must_use]
    pub fn as_bytes(&self) -> Vec<u8> {
        self.marshal().chars().map(latin1_byte).collect()
    }

    /// Whether the entry map holds the conventional `"4500"`.
    #[must_use]
    pub fn has_standard_entry_map(&self) -> bool {
        self.entry_map == ['4', '5', '0', '0']
    }

    /// Validate that the leader is suitable for binary record reading.
    ///
    /// Checks that `record_length` and `base_address_of_data` are at least
    /// 24, which is required before performing arithmetic on these fields
    /// during binary ISO 2709 parsing.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is less than 24.
    pub fn validate_for_reading(&self) -> Result<()> {
        if self.record_length < 24 {
            return Err(MarcError::InvalidLeader(format!(
                "Record length must be at least 24, got {}",
                self.record_length
            )));
        }
        if self.base_address_of_data < 24 {
            return Err(MarcError::InvalidLeader(format!(
                "Base address of data must be at least 24, got {}",
                self.base_address_of_data
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Leader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.marshal())
    }
}

fn check_length(bytes: &[u8]) -> Result<()> {
    if bytes.len() < LEADER_LENGTH {
        return Err(MarcError::InvalidLeader(format!(
            "Leader must be at least 24 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

fn format_length(value: u32) -> String {
    format!("{:05}", value.min(MAX_RECORD_LENGTH))
}

fn digit_char(value: u8) -> char {
    char::from_digit(u32::from(value % 10), 10).unwrap_or('2')
}

fn latin1_byte(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

fn parse_digit(byte: u8, what: &str, position: usize) -> Result<u8> {
    if byte.is_ascii_digit() {
        Ok(byte - b'0')
    } else {
        Err(MarcError::InvalidLeader(format!(
            "Invalid {what} at position {position}: {}",
            char::from(byte)
        )))
    }
}

/// Parse a run of ASCII digits into a number.
pub(crate) fn parse_digits(bytes: &[u8]) -> Result<u32> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(MarcError::InvalidLeader(format!(
            "Invalid numeric field: '{}'",
            String::from_utf8_lossy(bytes)
        )));
    }
    Ok(bytes
        .iter()
        .fold(0u32, |acc, b| acc.saturating_mul(10).saturating_add(u32::from(b - b'0'))))
}
