use std::fs::OpenOptions;

use camino::{Utf8Path, Utf8PathBuf};
use csv::StringRecord;

use crate::domain::RegistryId;
use crate::error::SyncError;
use crate::input::InputRow;

pub const INVALID_SUFFIX: &str = "_invalid_records.csv";
pub const UNSAVED_SUFFIX: &str = "_unsaved_records.csv";
pub const SUBMITTED_SUFFIX: &str = "_submitted.csv";

#[derive(Debug, Clone)]
pub struct SinkSet {
    invalid: Utf8PathBuf,
    unsaved: Utf8PathBuf,
    submitted: Utf8PathBuf,
    headers: StringRecord,
}

impl SinkSet {
    pub fn for_input(input: &Utf8Path, headers: &StringRecord) -> Self {
        Self {
            invalid: sink_path(input, INVALID_SUFFIX),
            unsaved: sink_path(input, UNSAVED_SUFFIX),
            submitted: sink_path(input, SUBMITTED_SUFFIX),
            headers: headers.clone(),
        }
    }

    pub fn invalid_path(&self) -> &Utf8Path {
        &self.invalid
    }

    pub fn unsaved_path(&self) -> &Utf8Path {
        &self.unsaved
    }

    pub fn submitted_path(&self) -> &Utf8Path {
        &self.submitted
    }

    pub fn invalid(&self, row: &InputRow, errors: &[String]) -> Result<(), SyncError> {
        tracing::warn!(
            line = row.line,
            sink = %self.invalid,
            errors = %errors.join("; "),
            "record failed validation"
        );
        let mut values = row.values().clone();
        values.push_field(&errors.join("; "));
        write_row(&self.invalid, &self.extended_headers("validation_errors"), &values)
    }

    pub fn unsaved(&self, row: &InputRow) -> Result<(), SyncError> {
        tracing::warn!(line = row.line, sink = %self.unsaved, "record could not be saved");
        write_row(&self.unsaved, &self.headers, row.values())
    }

    pub fn submitted(&self, row: &InputRow, id: &RegistryId) -> Result<(), SyncError> {
        let mut values = row.values().clone();
        values.push_field(id.as_str());
        write_row(&self.submitted, &self.extended_headers("registry_id"), &values)
    }

    fn extended_headers(&self, column: &str) -> StringRecord {
        let mut headers = self.headers.clone();
        headers.push_field(column);
        headers
    }
}

fn sink_path(input: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let stem = input.file_stem().unwrap_or("records");
    input.with_file_name(format!("{stem}{suffix}"))
}

fn write_row(path: &Utf8Path, headers: &StringRecord, values: &StringRecord) -> Result<(), SyncError> {
    let write_error = |message: String| SyncError::CsvWrite {
        path: path.to_path_buf(),
        message,
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| write_error(err.to_string()))?;
    let is_empty = file
        .metadata()
        .map_err(|err| write_error(err.to_string()))?
        .len()
        == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(file);
    if is_empty {
        writer
            .write_record(headers)
            .map_err(|err| write_error(err.to_string()))?;
    }
    writer
        .write_record(values)
        .map_err(|err| write_error(err.to_string()))?;
    writer.flush().map_err(|err| write_error(err.to_string()))
}
