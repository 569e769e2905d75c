use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::domain::{MatchPolicy, NodeType, RegistryId};
use crate::error::SyncError;
use crate::input::{InputRow, InputTable};
use crate::ledger::{Ledger, LedgerEntry};
use crate::mapping::{MappingContext, NodeRow};
use crate::query::QueryFormatter;
use crate::registry::RegistryClient;
use crate::resolver::IdentityResolver;
use crate::sink::SinkSet;
use crate::submit::{RecordSubmitter, Submission};

#[derive(Debug)]
pub enum RowOutcome {
    Saved {
        registry_id: RegistryId,
        created: bool,
        tracked: bool,
    },
    Invalid(Vec<String>),
    SaveFailed,
    ParentMissing,
    Transport(SyncError),
}

impl RowOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RowOutcome::Saved { created: true, .. } => "created",
            RowOutcome::Saved { created: false, .. } => "updated",
            RowOutcome::Invalid(_) => "invalid",
            RowOutcome::SaveFailed => "save_failed",
            RowOutcome::ParentMissing => "parent_missing",
            RowOutcome::Transport(_) => "transport",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub node_type: String,
    pub input: String,
    pub rows: usize,
    pub created: usize,
    pub updated: usize,
    pub tracked: usize,
    pub invalid: usize,
    pub save_failed: usize,
    pub parent_missing: usize,
    pub invalid_sink: String,
    pub unsaved_sink: String,
    pub submitted_sink: String,
}

impl RunSummary {
    pub fn saved(&self) -> usize {
        self.created + self.updated
    }

    fn record(&mut self, outcome: &RowOutcome) {
        self.rows += 1;
        match outcome {
            RowOutcome::Saved {
                created, tracked, ..
            } => {
                if *created {
                    self.created += 1;
                } else {
                    self.updated += 1;
                }
                if *tracked {
                    self.tracked += 1;
                }
            }
            RowOutcome::Invalid(_) => self.invalid += 1,
            RowOutcome::SaveFailed => self.save_failed += 1,
            RowOutcome::ParentMissing => self.parent_missing += 1,
            RowOutcome::Transport(_) => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct Orchestrator<R: RegistryClient> {
    registry: R,
    ledger: Ledger,
    formatter: QueryFormatter,
    resolver_match: MatchPolicy,
    mapping: MappingContext,
}

impl<R: RegistryClient> Orchestrator<R> {
    pub fn new(
        registry: R,
        ledger: Ledger,
        formatter: QueryFormatter,
        resolver_match: MatchPolicy,
        mapping: MappingContext,
    ) -> Self {
        Self {
            registry,
            ledger,
            formatter,
            resolver_match,
            mapping,
        }
    }

    pub fn from_config(registry: R, ledger: Ledger, config: &ResolvedConfig) -> Self {
        Self::new(
            registry,
            ledger,
            config.formatter.clone(),
            config.resolver_match,
            config.mapping.clone(),
        )
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn submit(
        &self,
        node_type: NodeType,
        input: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, SyncError> {
        if node_type.parent().is_none() {
            return Err(SyncError::NotSubmittable(node_type.to_string()));
        }
        let started = Instant::now();
        let mut table = InputTable::open(input)?;
        let sinks = SinkSet::for_input(input, table.headers());
        let resolver = IdentityResolver::new(&self.registry, self.formatter.clone(), self.resolver_match);
        let submitter = RecordSubmitter::new(&self.registry, &self.mapping, &sinks);
        let mut summary = RunSummary {
            node_type: node_type.to_string(),
            input: input.to_string(),
            invalid_sink: sinks.invalid_path().to_string(),
            unsaved_sink: sinks.unsaved_path().to_string(),
            submitted_sink: sinks.submitted_path().to_string(),
            ..Default::default()
        };
        tracing::info!(%node_type, %input, ledger = %self.ledger.path(), "submission run started");
        sink.event(ProgressEvent {
            message: format!("phase=Submit; node_type={node_type}; input={input}"),
            elapsed: None,
        });

        for row in table.rows() {
            let row = row?;
            let outcome = self.process_row(node_type, &row, &resolver, &submitter, &sinks)?;
            sink.event(ProgressEvent {
                message: format!("row={}; outcome={}", row.line, outcome.label()),
                elapsed: Some(started.elapsed()),
            });
            match outcome {
                RowOutcome::Transport(err) => {
                    tracing::error!(line = row.line, error = %err, "registry unreachable, aborting run");
                    return Err(err);
                }
                outcome => summary.record(&outcome),
            }
        }

        tracing::info!(
            %node_type,
            rows = summary.rows,
            created = summary.created,
            updated = summary.updated,
            invalid = summary.invalid,
            save_failed = summary.save_failed,
            parent_missing = summary.parent_missing,
            "submission run finished"
        );
        sink.event(ProgressEvent {
            message: format!("phase=Done; rows={}", summary.rows),
            elapsed: Some(started.elapsed()),
        });
        Ok(summary)
    }

    pub fn submit_all(
        &self,
        files: &[(NodeType, Utf8PathBuf)],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RunSummary>, SyncError> {
        let mut ordered = files.to_vec();
        ordered.sort_by_key(|(node_type, _)| *node_type);
        let mut summaries = Vec::with_capacity(ordered.len());
        for (node_type, input) in &ordered {
            match self.submit(*node_type, input, sink) {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    tracing::error!(
                        %node_type,
                        %input,
                        completed = summaries.len(),
                        error = %err,
                        "stopping hierarchy run"
                    );
                    return Err(err);
                }
            }
        }
        Ok(summaries)
    }

    fn process_row(
        &self,
        node_type: NodeType,
        row: &InputRow,
        resolver: &IdentityResolver<&R>,
        submitter: &RecordSubmitter<'_, &R>,
        sinks: &SinkSet,
    ) -> Result<RowOutcome, SyncError> {
        let node_row = match NodeRow::parse(node_type, row) {
            Ok(node_row) => node_row,
            Err(err @ SyncError::RowMapping { .. }) => {
                let errors = vec![err.to_string()];
                sinks.invalid(row, &errors)?;
                return Ok(RowOutcome::Invalid(errors));
            }
            Err(err) => return Err(err),
        };
        let internal_id = node_row.internal_id();
        let Some(parent_type) = node_type.parent() else {
            return Err(SyncError::NotSubmittable(node_type.to_string()));
        };
        let parent_key = node_row.parent_internal_id(&self.mapping);

        let Some(parent_id) = self.ledger.lookup_parent(parent_type, parent_key)? else {
            tracing::error!(
                line = row.line,
                %node_type,
                internal_id,
                %parent_type,
                parent = parent_key,
                "parent not tracked, skipping row"
            );
            return Ok(RowOutcome::ParentMissing);
        };
        tracing::debug!(line = row.line, internal_id, parent_id = %parent_id, "parent resolved");

        let loaded = match resolver.load(node_type, internal_id) {
            Ok(loaded) => loaded,
            Err(err) if err.is_transport() => return Ok(RowOutcome::Transport(err)),
            Err(err) => return Err(err),
        };

        let saved = match submitter.process(&parent_id, loaded.into_record(), row, &node_row) {
            Ok(Submission::Saved(saved)) => saved,
            Ok(Submission::Invalid(errors)) => return Ok(RowOutcome::Invalid(errors)),
            Ok(Submission::SaveFailed) => return Ok(RowOutcome::SaveFailed),
            Err(err) if err.is_transport() => return Ok(RowOutcome::Transport(err)),
            Err(err) => return Err(err),
        };

        let tracked = !self.ledger.contains(node_type, internal_id, &saved.id)?;
        if tracked {
            self.ledger.append(&LedgerEntry::new(
                node_type,
                internal_id,
                &saved.id,
                Some((parent_type, parent_key, &parent_id)),
            ))?;
        }
        Ok(RowOutcome::Saved {
            registry_id: saved.id,
            created: saved.created,
            tracked,
        })
    }
}

pub fn track(
    ledger: &Ledger,
    node_type: NodeType,
    internal_id: &str,
    registry_id: &RegistryId,
    parent: Option<(NodeType, &str, &RegistryId)>,
) -> Result<bool, SyncError> {
    if ledger.contains(node_type, internal_id, registry_id)? {
        return Ok(false);
    }
    ledger.append(&LedgerEntry::new(node_type, internal_id, registry_id, parent))?;
    tracing::info!(%node_type, internal_id, %registry_id, "tracked node");
    Ok(true)
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub node_type: String,
    pub internal_id: String,
    pub registry_id: Option<String>,
    pub ledger: Utf8PathBuf,
}

pub fn lookup(
    ledger: &Ledger,
    node_type: NodeType,
    internal_id: &str,
) -> Result<LookupResult, SyncError> {
    let found = ledger.lookup_parent(node_type, internal_id)?;
    Ok(LookupResult {
        node_type: node_type.to_string(),
        internal_id: internal_id.to_string(),
        registry_id: found.map(|id| id.to_string()),
        ledger: ledger.path().to_path_buf(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ChildrenResult {
    pub parent_node_type: String,
    pub parent_internal_id: String,
    pub children: Vec<LedgerEntry>,
}

pub fn children(
    ledger: &Ledger,
    parent_type: NodeType,
    parent_internal_id: &str,
) -> Result<ChildrenResult, SyncError> {
    Ok(ChildrenResult {
        parent_node_type: parent_type.to_string(),
        parent_internal_id: parent_internal_id.to_string(),
        children: ledger.children(parent_type, parent_internal_id)?,
    })
}
