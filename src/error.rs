use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("node type {0} has no parent and cannot be submitted from a data file")]
    NotSubmittable(String),

    #[error("invalid match policy: {0}")]
    InvalidMatchPolicy(String),

    #[error("invalid query separator pattern: {0}")]
    InvalidSeparator(String),

    #[error("invalid boolean operator: {0}")]
    InvalidOperator(String),

    #[error("missing config file biometa-sync.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read credentials from {0}")]
    CredentialRead(Utf8PathBuf),

    #[error("row {line}: {message}")]
    RowMapping { line: u64, message: String },

    #[error("failed to read CSV {path}: {message}")]
    CsvRead { path: Utf8PathBuf, message: String },

    #[error("failed to write CSV {path}: {message}")]
    CsvWrite { path: Utf8PathBuf, message: String },

    #[error("ledger {0} is locked by another writer")]
    LedgerLocked(Utf8PathBuf),

    #[error("ledger {0} was opened read-only")]
    LedgerReadOnly(Utf8PathBuf),

    #[error("registry request failed: {0}")]
    RegistryHttp(String),

    #[error("registry rejected credentials (status {0})")]
    RegistryAuth(u16),

    #[error("registry returned status {status}: {message}")]
    RegistryStatus { status: u16, message: String },

    #[error("unexpected registry response: {0}")]
    RegistryResponse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SyncError {
    // Transport failures abort a run; everything else is routed per row.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::RegistryHttp(_)
                | SyncError::RegistryAuth(_)
                | SyncError::RegistryStatus { .. }
                | SyncError::RegistryResponse(_)
        )
    }
}
