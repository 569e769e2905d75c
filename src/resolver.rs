use serde_json::Value;

use crate::domain::{MatchPolicy, NodeType};
use crate::error::SyncError;
use crate::query::QueryFormatter;
use crate::record::Record;
use crate::registry::RegistryClient;

#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    Existing(Record),
    New(Record),
}

impl Loaded {
    pub fn is_new(&self) -> bool {
        matches!(self, Loaded::New(_))
    }

    pub fn into_record(self) -> Record {
        match self {
            Loaded::Existing(record) | Loaded::New(record) => record,
        }
    }
}

pub struct IdentityResolver<R: RegistryClient> {
    registry: R,
    formatter: QueryFormatter,
    policy: MatchPolicy,
}

impl<R: RegistryClient> IdentityResolver<R> {
    pub fn new(registry: R, formatter: QueryFormatter, policy: MatchPolicy) -> Self {
        Self {
            registry,
            formatter,
            policy,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn formatter(&self) -> &QueryFormatter {
        &self.formatter
    }

    pub fn load(&self, node_type: NodeType, internal_id: &str) -> Result<Loaded, SyncError> {
        self.load_by(node_type, internal_id, node_type.id_field())
    }

    pub fn load_by(
        &self,
        node_type: NodeType,
        internal_id: &str,
        search_field: &str,
    ) -> Result<Loaded, SyncError> {
        let query = self.formatter.format(internal_id, search_field);
        let results = self.registry.search(node_type, &query)?;
        tracing::debug!(
            %node_type,
            internal_id,
            candidates = results.len(),
            "registry search finished"
        );
        let hit = results.into_iter().find(|meta| {
            meta.meta
                .get(search_field)
                .and_then(Value::as_str)
                .is_some_and(|candidate| self.policy.matches(internal_id, candidate))
        });
        match hit {
            Some(meta) => {
                tracing::info!(%node_type, internal_id, registry_id = %meta.id, "found existing node");
                Ok(Loaded::Existing(Record::from_meta(node_type, meta)?))
            }
            None => {
                tracing::info!(%node_type, internal_id, "no existing node, creating new");
                Ok(Loaded::New(Record::new(node_type)))
            }
        }
    }
}
