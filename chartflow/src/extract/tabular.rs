//! CSV encoding of record sets.

use crate::errors::ExtractError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record with a fixed CSV header.
pub trait CsvRecord: Serialize {
    /// Column names, in serialization order.
    const HEADERS: &'static [&'static str];
}

/// Writes a header row followed by one row per record.
///
/// The header is written even for an empty slice.
///
/// # Errors
///
/// Returns [`ExtractError::Csv`] if a record cannot be serialized.
pub fn to_csv<T: CsvRecord>(records: &[T]) -> Result<Vec<u8>, ExtractError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(T::HEADERS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| ExtractError::Csv(e.into_error().into()))
}

/// Reads a body written by [`to_csv`].
///
/// # Errors
///
/// Returns [`ExtractError::Csv`] on malformed rows.
pub fn from_csv<T: DeserializeOwned>(body: &[u8]) -> Result<Vec<T>, ExtractError> {
    csv::Reader::from_reader(body)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(ExtractError::from)
}
