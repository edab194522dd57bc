//! Format-agnostic reading and writing.
//!
//! | Format | Reader | Writer |
//! |--------|--------|--------|
//! | ISO 2709 | [`MarcReader`](crate::MarcReader), [`PermissiveReader`](crate::PermissiveReader) | [`MarcWriter`](crate::MarcWriter), [`SplitWriter`](crate::SplitWriter) |
//! | MARCXML | [`MarcXmlReader`](crate::MarcXmlReader) | [`MarcXmlWriter`](crate::MarcXmlWriter) |
//!
//! # Example
//!
//! ```
//! use marc_codec::formats::{FormatReader, FormatWriter};
//!
//! fn copy<R: FormatReader, W: FormatWriter>(reader: &mut R, writer: &mut W) -> marc_codec::Result<usize> {
//!     let mut count = 0;
//!     while let Some(record) = reader.read_record()? {
//!         writer.write_record(&record)?;
//!         count += 1;
//!     }
//!     writer.finish()?;
//!     Ok(count)
//! }
//! ```

mod traits;

pub use traits::{FormatReader, FormatReaderExt, FormatWriter, RecordIterator};

/// Serialization formats handled by the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// ISO 2709 binary MARC (`.mrc`, `.marc`)
    Iso2709,
    /// MARCXML (`.xml`, `.marcxml`)
    MarcXml,
}

impl Format {
    /// Detect the format from a file extension.
    ///
    /// ```
    /// use marc_codec::formats::Format;
    ///
    /// assert_eq!(Format::from_extension("mrc"), Some(Format::Iso2709));
    /// assert_eq!(Format::from_extension("XML"), Some(Format::MarcXml));
    /// assert_eq!(Format::from_extension("json"), None);
    /// ```
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mrc" | "marc" => Some(Self::Iso2709),
            "xml" | "marcxml" => Some(Self::MarcXml),
            _ => None,
        }
    }

    /// Canonical file extension
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Iso2709 => "mrc",
            Self::MarcXml => "xml",
        }
    }

    /// Human-readable name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Iso2709 => "ISO 2709",
            Self::MarcXml => "MARCXML",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_extension("marc"), Some(Format::Iso2709));
        assert_eq!(Format::from_extension("MRC"), Some(Format::Iso2709));
        assert_eq!(Format::from_extension("marcxml"), Some(Format::MarcXml));
        assert_eq!(Format::from_extension("csv"), None);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(Format::Iso2709.extension(), "mrc");
        assert_eq!(Format::MarcXml.to_string(), "MARCXML");
    }
}
