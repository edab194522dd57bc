#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # marc-codec
//!
//! Reading and writing MARC21 records in the ISO 2709 binary format and
//! MARCXML, with MARC-8 character set conversion.
//!
//! ## Quick Start
//!
//! ### Reading damaged records
//!
//! ```
//! use marc_codec::{Encoding, PermissiveReader, Severity};
//! use std::io::Cursor;
//!
//! # fn main() -> marc_codec::Result<()> {
//! let data: Vec<u8> = Vec::new();
//! let mut reader = PermissiveReader::new(Cursor::new(data))
//!     .with_convert_to_utf8(true)
//!     .with_default_encoding(Encoding::BestGuess);
//!
//! while let Some(record) = reader.read_record()? {
//!     if reader.errors().max_severity() >= Severity::Major {
//!         eprintln!("{:?}: {:?}", record.control_number(), reader.errors().errors());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Writing MARC-8
//!
//! ```
//! use marc_codec::{DataField, Encoding, Leader, MarcWriter, Record, WriterOptions};
//!
//! # fn main() -> marc_codec::Result<()> {
//! let mut record = Record::new(Leader::default());
//! record.add_control_field("001", "12345");
//! let mut field = DataField::new("245", '1', '0');
//! field.add_subfield('a', "Café");
//! record.insert_data_field(field);
//!
//! let options = WriterOptions {
//!     encoding: Encoding::Marc8,
//!     ..WriterOptions::default()
//! };
//! let mut buffer = Vec::new();
//! let mut writer = MarcWriter::with_options(&mut buffer, options)?;
//! writer.write_record(&record)?;
//! writer.finish()?;
//! assert_eq!(buffer.last(), Some(&0x1D));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`record`] — Record structures (`Record`, `ControlField`, `DataField`, `Subfield`)
//! - [`leader`] — The 24-byte record leader
//! - [`byte_stream`] — Buffered input with mark and reset
//! - [`reader`] — Strict ISO 2709 reading
//! - [`permissive_reader`] — Recovering ISO 2709 reading with diagnostics
//! - [`writer`] / [`split_writer`] — ISO 2709 output
//! - [`combining_reader`] — Merging of continuation records
//! - [`normalizing_reader`] — Unicode normalization of records
//! - [`marcxml`] — MARCXML reading and writing
//! - [`converter`] — MARC-8, ISO 5426 and Unicode character conversion
//! - [`error_handler`] — Severity-ranked diagnostics
//! - [`formats`] — Reader and writer traits
//! - [`encoding`] — Character encodings
//! - [`error`] — Error types and result type

pub mod byte_stream;
pub mod combining_reader;
pub mod converter;
pub mod encoding;
pub mod error;
pub mod error_handler;
/// Format-agnostic reading and writing.
///
/// See the [`formats`] module documentation for the reader and writer
/// traits shared by every codec.
pub mod formats;
pub mod leader;
pub mod marcxml;
pub mod normalizing_reader;
pub mod permissive_reader;
pub mod reader;
/// Record structures (`Record`, `ControlField`, `DataField`, `Subfield`)
pub mod record;
pub mod split_writer;
pub mod writer;

pub use byte_stream::ByteStream;
pub use combining_reader::{CombineOptions, CombiningReader};
pub use converter::{
    CharConverter, CharEncoder, CodeTable, Iso5426ToUnicode, Latin1Encoder, Marc8ToUnicode,
    ReverseCodeTable, UnicodeToMarc8,
};
pub use encoding::Encoding;
pub use error::{MarcError, Result};
pub use error_handler::{Diagnostic, ErrorHandler, Severity};
pub use formats::{FormatReader, FormatWriter};
pub use leader::Leader;
pub use marcxml::{MarcXmlReader, MarcXmlWriter};
pub use normalizing_reader::{NormalizationForm, NormalizingReader};
pub use permissive_reader::{PermissiveOptions, PermissiveReader};
pub use reader::MarcReader;
pub use record::{ControlField, DataField, Field, Record, RecordBuilder, Subfield};
pub use split_writer::{SplitOptions, SplitWriter};
pub use writer::{MarcWriter, WriterOptions};
