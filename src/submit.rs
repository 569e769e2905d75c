use crate::domain::RegistryId;
use crate::error::SyncError;
use crate::input::InputRow;
use crate::mapping::{MappingContext, NodeRow};
use crate::record::Record;
use crate::registry::RegistryClient;
use crate::sink::SinkSet;

#[derive(Debug, Clone, PartialEq)]
pub struct SavedRecord {
    pub record: Record,
    pub id: RegistryId,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Saved(SavedRecord),
    Invalid(Vec<String>),
    SaveFailed,
}

pub struct RecordSubmitter<'a, R: RegistryClient> {
    registry: R,
    ctx: &'a MappingContext,
    sinks: &'a SinkSet,
}

impl<'a, R: RegistryClient> RecordSubmitter<'a, R> {
    pub fn new(registry: R, ctx: &'a MappingContext, sinks: &'a SinkSet) -> Self {
        Self {
            registry,
            ctx,
            sinks,
        }
    }

    pub fn process(
        &self,
        parent: &RegistryId,
        mut record: Record,
        row: &InputRow,
        node_row: &NodeRow,
    ) -> Result<Submission, SyncError> {
        if let Err(message) = node_row.apply(&mut record, self.ctx) {
            let errors = vec![message];
            self.sinks.invalid(row, &errors)?;
            return Ok(Submission::Invalid(errors));
        }
        let relation = record
            .node_type
            .relation()
            .ok_or_else(|| SyncError::NotSubmittable(record.node_type.to_string()))?;
        record.set_parent(relation, parent);

        let errors = self.registry.validate(&record)?;
        if !errors.is_empty() {
            self.sinks.invalid(row, &errors)?;
            return Ok(Submission::Invalid(errors));
        }

        let created = !record.is_saved();
        match self.registry.save(&record)? {
            Some(id) => {
                tracing::info!(
                    node_type = %record.node_type,
                    registry_id = %id,
                    created,
                    "record saved"
                );
                self.sinks.submitted(row, &id)?;
                record.id = Some(id.clone());
                Ok(Submission::Saved(SavedRecord {
                    record,
                    id,
                    created,
                }))
            }
            None => {
                self.sinks.unsaved(row)?;
                Ok(Submission::SaveFailed)
            }
        }
    }
}
