use std::fs::File;

use camino::{Utf8Path, Utf8PathBuf};
use csv::StringRecord;
use serde::de::DeserializeOwned;

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct InputRow {
    pub line: u64,
    headers: StringRecord,
    values: StringRecord,
}

impl InputRow {
    pub fn new(line: u64, headers: StringRecord, values: StringRecord) -> Self {
        Self {
            line,
            headers,
            values,
        }
    }

    pub fn from_pairs(line: u64, pairs: &[(&str, &str)]) -> Self {
        let headers = pairs.iter().map(|(name, _)| *name).collect::<StringRecord>();
        let values = pairs.iter().map(|(_, value)| *value).collect::<StringRecord>();
        Self::new(line, headers, values)
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn values(&self) -> &StringRecord {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.values.get(index))
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        if self.values.len() != self.headers.len() {
            return Err(SyncError::RowMapping {
                line: self.line,
                message: format!(
                    "expected {} fields, found {}",
                    self.headers.len(),
                    self.values.len()
                ),
            });
        }
        self.values
            .deserialize(Some(&self.headers))
            .map_err(|err| SyncError::RowMapping {
                line: self.line,
                message: err.to_string(),
            })
    }
}

pub struct InputTable {
    path: Utf8PathBuf,
    headers: StringRecord,
    reader: csv::Reader<File>,
}

impl InputTable {
    pub fn open(path: &Utf8Path) -> Result<Self, SyncError> {
        let read_error = |message: String| SyncError::CsvRead {
            path: path.to_path_buf(),
            message,
        };
        tracing::info!(input = %path, "loading rows");
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path.as_std_path())
            .map_err(|err| read_error(err.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|err| read_error(err.to_string()))?
            .clone();
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            reader,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&mut self) -> impl Iterator<Item = Result<InputRow, SyncError>> + '_ {
        let headers = self.headers.clone();
        let path = self.path.clone();
        self.reader.records().map(move |record| {
            let values = record.map_err(|err| SyncError::CsvRead {
                path: path.clone(),
                message: err.to_string(),
            })?;
            let line = values.position().map(|pos| pos.line()).unwrap_or_default();
            Ok(InputRow::new(line, headers.clone(), values))
        })
    }
}
