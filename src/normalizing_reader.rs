//! Unicode normalization of records from any reader.

use crate::converter::{CharConverter, Marc8ToUnicode};
use crate::error::{MarcError, Result};
use crate::error_handler::ErrorHandler;
use crate::formats::FormatReader;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

/// Unicode normalization forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalizationForm {
    /// Canonical composition
    #[default]
    Nfc,
    /// Canonical decomposition
    Nfd,
    /// Compatibility composition
    Nfkc,
    /// Compatibility decomposition
    Nfkd,
}

impl NormalizationForm {
    /// Normalize `text`
    #[must_use]
    pub fn apply(self, text: &str) -> String {
        match self {
            NormalizationForm::Nfc => text.nfc().collect(),
            NormalizationForm::Nfd => text.nfd().collect(),
            NormalizationForm::Nfkc => text.nfkc().collect(),
            NormalizationForm::Nfkd => text.nfkd().collect(),
        }
    }
}

impl FromStr for NormalizationForm {
    type Err = MarcError;

    /// Accepts `C`, `D`, `KC` and `KD`, with or without an `NF` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("NF").unwrap_or(&upper) {
            "C" => Ok(NormalizationForm::Nfc),
            "D" => Ok(NormalizationForm::Nfd),
            "KC" => Ok(NormalizationForm::Nfkc),
            "KD" => Ok(NormalizationForm::Nfkd),
            _ => Err(MarcError::ParseError(format!(
                "unknown normalization form: {s}"
            ))),
        }
    }
}

/// Reader that hands out records with normalized Unicode text.
///
/// Records whose leader/09 is not `'a'` are taken to hold text read
/// without conversion and are decoded from MARC-8 first. Every record
/// leaves with leader/09 set to `'a'`.
#[derive(Debug)]
pub struct NormalizingReader<R: FormatReader> {
    inner: R,
    form: NormalizationForm,
    marc8: Option<Marc8ToUnicode>,
}

impl<R: FormatReader> NormalizingReader<R> {
    /// Wrap `inner`, normalizing to `form`
    pub fn new(inner: R, form: NormalizationForm) -> Self {
        NormalizingReader {
            inner,
            form,
            marc8: None,
        }
    }

    /// Normalization form in use
    #[must_use]
    pub fn form(&self) -> NormalizationForm {
        self.form
    }

    /// Read and normalize the next record.
    ///
    /// # Errors
    ///
    /// Returns the wrapped reader's errors, or a MARC-8 decoding error for
    /// legacy text.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let Some(mut record) = self.inner.read_record()? else {
            return Ok(None);
        };

        let legacy = record.leader.char_coding_scheme != 'a';
        if legacy && self.marc8.is_none() {
            self.marc8 = Some(Marc8ToUnicode::new()?);
        }
        let converter = self.marc8.as_ref().filter(|_| legacy);

        for field in record.data_fields_mut() {
            for subfield in &mut field.subfields {
                let decoded = match converter {
                    Some(converter) => converter.convert_str(&subfield.value)?,
                    None => std::mem::take(&mut subfield.value),
                };
                subfield.value = self.form.apply(&decoded);
            }
        }
        record.leader.char_coding_scheme = 'a';
        Ok(Some(record))
    }
}

impl<R: FormatReader> Iterator for NormalizingReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

impl<R: FormatReader> FormatReader for NormalizingReader<R> {
    fn read_record(&mut self) -> Result<Option<Record>> {
        NormalizingReader::read_record(self)
    }

    fn records_read(&self) -> Option<usize> {
        self.inner.records_read()
    }

    fn error_handler(&self) -> Option<&ErrorHandler> {
        self.inner.error_handler()
    }
}
