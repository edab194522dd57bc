//! Reader and writer traits shared by the binary and MARCXML codecs.
//!
//! Readers are pull-based: each call to [`FormatReader::read_record`]
//! yields the next record, `Ok(None)` at the end of input, or an error for
//! the current record. Wrapping readers ([`NormalizingReader`],
//! [`CombiningReader`]) are generic over this trait.
//!
//! [`NormalizingReader`]: crate::NormalizingReader
//! [`CombiningReader`]: crate::CombiningReader

use crate::error::Result;
use crate::error_handler::ErrorHandler;
use crate::record::Record;

/// Source of MARC records.
pub trait FormatReader: std::fmt::Debug {
    /// Read the next record.
    ///
    /// Returns `Ok(None)` when the source is exhausted. An error concerns
    /// the current record only if the reader documents that it resumes at
    /// the next one.
    ///
    /// # Errors
    ///
    /// Returns an error if the source contains malformed data or I/O fails.
    fn read_record(&mut self) -> Result<Option<Record>>;

    /// Read all remaining records into a vector.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; records read before it are
    /// discarded.
    fn read_all(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Number of records read so far, if tracked
    fn records_read(&self) -> Option<usize> {
        None
    }

    /// Diagnostics for the record last returned, for readers that recover
    /// from defects instead of failing
    fn error_handler(&self) -> Option<&ErrorHandler> {
        None
    }
}

/// Sink for MARC records.
///
/// [`finish`](Self::finish) must be called once all records are written;
/// some writers only emit closing markup or flush there.
pub trait FormatWriter: std::fmt::Debug {
    /// Write one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or the output
    /// fails.
    fn write_record(&mut self, record: &Record) -> Result<()>;

    /// Write several records in order.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    fn write_batch(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }

    /// Flush and finalize the output.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn finish(&mut self) -> Result<()>;

    /// Number of records written so far, if tracked
    fn records_written(&self) -> Option<usize> {
        None
    }
}

/// Iterator access for any [`FormatReader`].
pub trait FormatReaderExt: FormatReader {
    /// Iterate over the remaining records.
    fn records(&mut self) -> RecordIterator<'_, Self>
    where
        Self: Sized,
    {
        RecordIterator { reader: self }
    }
}

impl<T: FormatReader> FormatReaderExt for T {}

/// Iterator adapter created by [`FormatReaderExt::records`].
#[derive(Debug)]
pub struct RecordIterator<'a, R: FormatReader> {
    reader: &'a mut R,
}

impl<R: FormatReader> Iterator for RecordIterator<'_, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record().transpose()
    }
}
