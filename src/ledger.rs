use std::fs::{self, File, OpenOptions};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::domain::{MatchPolicy, NodeType, RegistryId};
use crate::error::SyncError;

pub const LEDGER_HEADER: [&str; 7] = [
    "node_type",
    "internal_id",
    "registry_id",
    "parent_node_type",
    "parent_internal_id",
    "parent_registry_id",
    "timestamp",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub node_type: String,
    pub internal_id: String,
    #[serde(alias = "osdf_node_id")]
    pub registry_id: String,
    #[serde(default)]
    pub parent_node_type: String,
    #[serde(default, alias = "parent_id")]
    pub parent_internal_id: String,
    #[serde(default, alias = "parent_node_id")]
    pub parent_registry_id: String,
    #[serde(default)]
    pub timestamp: String,
}

impl LedgerEntry {
    pub fn new(
        node_type: NodeType,
        internal_id: &str,
        registry_id: &RegistryId,
        parent: Option<(NodeType, &str, &RegistryId)>,
    ) -> Self {
        let (parent_node_type, parent_internal_id, parent_registry_id) = match parent {
            Some((parent_type, parent_internal_id, parent_id)) => (
                parent_type.as_str().to_string(),
                parent_internal_id.to_string(),
                parent_id.to_string(),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        Self {
            node_type: node_type.as_str().to_string(),
            internal_id: internal_id.to_string(),
            registry_id: registry_id.to_string(),
            parent_node_type,
            parent_internal_id,
            parent_registry_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn is_type(&self, node_type: NodeType) -> bool {
        match self.node_type.parse::<NodeType>() {
            Ok(parsed) => parsed == node_type,
            Err(_) => self.node_type.eq_ignore_ascii_case(node_type.as_str()),
        }
    }

    fn is_parent_type(&self, node_type: NodeType) -> bool {
        match self.parent_node_type.parse::<NodeType>() {
            Ok(parsed) => parsed == node_type,
            Err(_) => self.parent_node_type.eq_ignore_ascii_case(node_type.as_str()),
        }
    }
}

#[derive(Debug)]
pub struct Ledger {
    path: Utf8PathBuf,
    policy: MatchPolicy,
    lock: Option<File>,
}

impl Ledger {
    pub fn open(path: impl Into<Utf8PathBuf>, policy: MatchPolicy) -> Result<Self, SyncError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        let lock_path = lock_path(&path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("open {lock_path}: {err}")))?;
        if let Err(err) = lock.try_lock_exclusive() {
            if is_contended(&err) {
                return Err(SyncError::LedgerLocked(path));
            }
            return Err(SyncError::Filesystem(format!("lock {lock_path}: {err}")));
        }
        tracing::debug!(ledger = %path, "acquired ledger lock");
        Ok(Self {
            path,
            policy,
            lock: Some(lock),
        })
    }

    pub fn read_only(path: impl Into<Utf8PathBuf>, policy: MatchPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            lock: None,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn append(&self, entry: &LedgerEntry) -> Result<(), SyncError> {
        if self.lock.is_none() {
            return Err(SyncError::LedgerReadOnly(self.path.clone()));
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| self.write_error(err))?;
        let is_empty = file.metadata().map_err(|err| self.write_error(err))?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            tracing::info!(ledger = %self.path, "writing ledger header");
            writer
                .write_record(LEDGER_HEADER)
                .map_err(|err| self.write_error(err))?;
        }
        writer.serialize(entry).map_err(|err| self.write_error(err))?;
        writer.flush().map_err(|err| self.write_error(err))?;
        tracing::debug!(
            node_type = %entry.node_type,
            internal_id = %entry.internal_id,
            registry_id = %entry.registry_id,
            "ledger entry appended"
        );
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<LedgerEntry>, SyncError> {
        let mut entries = Vec::new();
        self.scan(|entry| {
            entries.push(entry);
            false
        })?;
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize, SyncError> {
        let mut count = 0usize;
        self.scan(|_| {
            count += 1;
            false
        })?;
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(self.len()? == 0)
    }

    // First matching row in file order wins.
    pub fn lookup_parent(
        &self,
        node_type: NodeType,
        internal_id: &str,
    ) -> Result<Option<RegistryId>, SyncError> {
        let mut found = None;
        self.scan(|entry| {
            if entry.is_type(node_type)
                && self.policy.matches(internal_id, &entry.internal_id)
                && let Ok(id) = entry.registry_id.parse::<RegistryId>()
            {
                found = Some(id);
                return true;
            }
            false
        })?;
        match &found {
            Some(id) => tracing::debug!(%node_type, internal_id, registry_id = %id, "ledger hit"),
            None => tracing::debug!(%node_type, internal_id, "ledger miss"),
        }
        Ok(found)
    }

    pub fn children(
        &self,
        parent_type: NodeType,
        parent_internal_id: &str,
    ) -> Result<Vec<LedgerEntry>, SyncError> {
        let mut children = Vec::new();
        self.scan(|entry| {
            if entry.is_parent_type(parent_type)
                && self
                    .policy
                    .matches(parent_internal_id, &entry.parent_internal_id)
            {
                children.push(entry);
            }
            false
        })?;
        Ok(children)
    }

    pub fn contains(
        &self,
        node_type: NodeType,
        internal_id: &str,
        registry_id: &RegistryId,
    ) -> Result<bool, SyncError> {
        let mut found = false;
        self.scan(|entry| {
            found = entry.is_type(node_type)
                && entry.internal_id == internal_id
                && entry.registry_id == registry_id.as_str();
            found
        })?;
        Ok(found)
    }

    fn scan<F>(&self, mut visit: F) -> Result<(), SyncError>
    where
        F: FnMut(LedgerEntry) -> bool,
    {
        if !self.path.as_std_path().exists() {
            return Ok(());
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(self.path.as_std_path())
            .map_err(|err| self.read_error(err))?;
        for row in reader.deserialize::<LedgerEntry>() {
            let entry = row.map_err(|err| self.read_error(err))?;
            if visit(entry) {
                break;
            }
        }
        Ok(())
    }

    fn read_error(&self, err: impl std::fmt::Display) -> SyncError {
        SyncError::CsvRead {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }

    fn write_error(&self, err: impl std::fmt::Display) -> SyncError {
        SyncError::CsvWrite {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

fn lock_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.lock"))
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
