use crate::domain::{NodeType, RegistryId};
use crate::error::SyncError;
use crate::record::{Record, RecordMeta};

// A refused save is `Ok(None)`; `Err` means the registry could not be used.
pub trait RegistryClient {
    fn search(&self, node_type: NodeType, query: &str) -> Result<Vec<RecordMeta>, SyncError>;

    fn validate(&self, record: &Record) -> Result<Vec<String>, SyncError>;

    fn save(&self, record: &Record) -> Result<Option<RegistryId>, SyncError>;
}

impl<R: RegistryClient + ?Sized> RegistryClient for &R {
    fn search(&self, node_type: NodeType, query: &str) -> Result<Vec<RecordMeta>, SyncError> {
        (**self).search(node_type, query)
    }

    fn validate(&self, record: &Record) -> Result<Vec<String>, SyncError> {
        (**self).validate(record)
    }

    fn save(&self, record: &Record) -> Result<Option<RegistryId>, SyncError> {
        (**self).save(record)
    }
}
