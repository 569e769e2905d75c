use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use biometa_sync::app::{Orchestrator, ProgressEvent, ProgressSink, track};
use biometa_sync::domain::{MatchPolicy, NodeType, RegistryId};
use biometa_sync::error::SyncError;
use biometa_sync::ledger::Ledger;
use biometa_sync::mapping::MappingContext;
use biometa_sync::query::QueryFormatter;
use biometa_sync::record::{Record, RecordMeta};
use biometa_sync::registry::RegistryClient;

/// Registry kept in memory. Search ignores the query text and returns every
/// node of the type, leaving the exact match to the resolver.
struct MemoryRegistry {
    nodes: Mutex<Vec<RecordMeta>>,
    next_id: Mutex<usize>,
    searches: Mutex<usize>,
    validations: Mutex<usize>,
    saves: Mutex<usize>,
    invalid: Vec<&'static str>,
    refused: Vec<&'static str>,
    offline_after_searches: Option<usize>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
            next_id: Mutex::new(456),
            searches: Mutex::new(0),
            validations: Mutex::new(0),
            saves: Mutex::new(0),
            invalid: Vec::new(),
            refused: Vec::new(),
            offline_after_searches: None,
        }
    }
}

impl MemoryRegistry {
    fn count(counter: &Mutex<usize>) -> usize {
        *counter.lock().unwrap()
    }

    fn nodes_of(&self, node_type: NodeType) -> Vec<RecordMeta> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|node| node.node_type == node_type.as_str())
            .cloned()
            .collect()
    }
}

impl RegistryClient for MemoryRegistry {
    fn search(&self, node_type: NodeType, _query: &str) -> Result<Vec<RecordMeta>, SyncError> {
        let mut searches = self.searches.lock().unwrap();
        if self
            .offline_after_searches
            .is_some_and(|limit| *searches >= limit)
        {
            return Err(SyncError::RegistryHttp("connection refused".to_string()));
        }
        *searches += 1;
        Ok(self.nodes_of(node_type))
    }

    fn validate(&self, record: &Record) -> Result<Vec<String>, SyncError> {
        *self.validations.lock().unwrap() += 1;
        let internal_id = record.internal_id().unwrap_or_default();
        if self.invalid.iter().any(|id| *id == internal_id) {
            return Ok(vec![format!("{internal_id} rejected by schema")]);
        }
        Ok(Vec::new())
    }

    fn save(&self, record: &Record) -> Result<Option<RegistryId>, SyncError> {
        *self.saves.lock().unwrap() += 1;
        let internal_id = record.internal_id().unwrap_or_default();
        if self.refused.iter().any(|id| *id == internal_id) {
            return Ok(None);
        }
        let mut nodes = self.nodes.lock().unwrap();
        let id = match &record.id {
            Some(id) => {
                nodes.retain(|node| node.id != id.as_str());
                id.clone()
            }
            None => {
                let mut next = self.next_id.lock().unwrap();
                let id: RegistryId = format!("REG{next}").parse()?;
                *next += 1;
                id
            }
        };
        nodes.push(RecordMeta {
            id: id.to_string(),
            ver: Some(record.version.unwrap_or(0) + 1),
            node_type: record.node_type.as_str().to_string(),
            meta: record.meta_document(),
            linkage: record.linkage.clone(),
        });
        Ok(Some(id))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

struct Workspace {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    fn ledger_path(&self) -> Utf8PathBuf {
        self.root.join("node_id_tracking.csv")
    }

    fn write(&self, name: &str, content: &str) -> Utf8PathBuf {
        let path = self.root.join(name);
        fs::write(path.as_std_path(), content).unwrap();
        path
    }

    fn seed_subject(&self, subject: &str, registry_id: &str) {
        let ledger = Ledger::open(self.ledger_path(), MatchPolicy::Exact).unwrap();
        let study: RegistryId = "STUDY1".parse().unwrap();
        track(
            &ledger,
            NodeType::Subject,
            subject,
            &registry_id.parse().unwrap(),
            Some((NodeType::Study, "prediabetes", &study)),
        )
        .unwrap();
    }

    fn ledger_rows(&self) -> Vec<String> {
        fs::read_to_string(self.ledger_path().as_std_path())
            .unwrap_or_default()
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    fn orchestrator<'a>(&self, registry: &'a MemoryRegistry) -> Orchestrator<&'a MemoryRegistry> {
        let ledger = Ledger::open(self.ledger_path(), MatchPolicy::Exact).unwrap();
        Orchestrator::new(
            registry,
            ledger,
            QueryFormatter::standard().unwrap(),
            MatchPolicy::Exact,
            MappingContext::default(),
        )
    }
}

fn exists(path: &Utf8Path) -> bool {
    path.as_std_path().exists()
}

#[test]
fn visit_is_created_under_tracked_subject() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let input = ws.write("visits.csv", "subject_id,visit_id\nS1,V1\n");
    let registry = MemoryRegistry::default();
    let sink = RecordingSink::default();

    let summary = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &input, &sink)
        .unwrap();

    assert_eq!(summary.rows, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.tracked, 1);
    let visits = registry.nodes_of(NodeType::Visit);
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].id, "REG456");
    assert_eq!(visits[0].linkage["by"], vec!["REG123".to_string()]);

    let rows = ws.ledger_rows();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].starts_with("visit,V1,REG456,subject,S1,REG123,"));
    assert!(exists(&ws.root.join("visits_submitted.csv")));
    assert!(
        sink.events
            .lock()
            .unwrap()
            .iter()
            .any(|event| event == "row=2; outcome=created")
    );
}

#[test]
fn rerun_updates_without_duplicates() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let input = ws.write("visits.csv", "subject_id,visit_id\nS1,V1\nS1,V2\n");
    let registry = MemoryRegistry::default();
    let sink = RecordingSink::default();

    let first = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &input, &sink)
        .unwrap();
    let after_first = ws.ledger_rows().len();
    let second = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &input, &sink)
        .unwrap();

    assert_eq!(first.created, 2);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 2);
    assert_eq!(second.tracked, 0);
    assert_eq!(registry.nodes_of(NodeType::Visit).len(), 2);
    assert_eq!(after_first, 3);
    assert_eq!(ws.ledger_rows().len(), after_first);
}

#[test]
fn missing_parent_makes_no_registry_calls() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let input = ws.write("visits.csv", "subject_id,visit_id\nS9,V1\n");
    let registry = MemoryRegistry::default();

    let summary = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &input, &RecordingSink::default())
        .unwrap();

    assert_eq!(summary.parent_missing, 1);
    assert_eq!(MemoryRegistry::count(&registry.searches), 0);
    assert_eq!(MemoryRegistry::count(&registry.validations), 0);
    assert_eq!(MemoryRegistry::count(&registry.saves), 0);
    assert_eq!(ws.ledger_rows().len(), 1);
}

#[test]
fn invalid_and_refused_rows_go_to_their_own_sinks() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let registry = MemoryRegistry {
        invalid: vec!["V2"],
        refused: vec!["V3"],
        ..Default::default()
    };

    let invalid_input = ws.write("invalid.csv", "subject_id,visit_id\nS1,V2\n");
    let summary = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &invalid_input, &RecordingSink::default())
        .unwrap();
    assert_eq!(summary.invalid, 1);
    assert_eq!(MemoryRegistry::count(&registry.saves), 0);
    let content = fs::read_to_string(ws.root.join("invalid_invalid_records.csv").as_std_path()).unwrap();
    assert_eq!(
        content,
        "subject_id,visit_id,validation_errors\nS1,V2,V2 rejected by schema\n"
    );
    assert!(!exists(&ws.root.join("invalid_unsaved_records.csv")));

    let refused_input = ws.write("refused.csv", "subject_id,visit_id\nS1,V3\n");
    let summary = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &refused_input, &RecordingSink::default())
        .unwrap();
    assert_eq!(summary.save_failed, 1);
    assert!(exists(&ws.root.join("refused_unsaved_records.csv")));
    assert!(!exists(&ws.root.join("refused_invalid_records.csv")));
    assert!(!exists(&ws.root.join("refused_submitted.csv")));
    assert_eq!(ws.ledger_rows().len(), 1);
}

#[test]
fn badly_typed_row_is_invalid_and_run_continues() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let input = ws.write(
        "visits.csv",
        "subject_id,visit_id,visit_number\nS1,V1,one\nS1,V2,2\n",
    );
    let registry = MemoryRegistry::default();

    let summary = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &input, &RecordingSink::default())
        .unwrap();

    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.created, 1);
    let content = fs::read_to_string(ws.root.join("visits_invalid_records.csv").as_std_path()).unwrap();
    let line = content.lines().nth(1).unwrap();
    assert!(line.starts_with("S1,V1,one,"));
    assert!(line.contains("row 2:"));
}

#[test]
fn short_row_is_invalid_and_neighbours_are_submitted() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let input = ws.write(
        "visits.csv",
        "subject_id,visit_id,date\nS1,V1,2016-01-01\nS1\nS1,V2,2016-01-01\n",
    );
    let registry = MemoryRegistry::default();

    let summary = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &input, &RecordingSink::default())
        .unwrap();

    assert_eq!(summary.rows, 3);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.invalid, 1);
    assert_eq!(MemoryRegistry::count(&registry.searches), 2);
    let content = fs::read_to_string(ws.root.join("visits_invalid_records.csv").as_std_path()).unwrap();
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], "subject_id,visit_id,date,validation_errors");
    assert_eq!(lines[1], "S1,\"row 3: expected 3 fields, found 1\"");
}

#[test]
fn hierarchy_run_submits_parents_first() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let registry = MemoryRegistry::default();
    let visits = ws.write("visits.csv", "subject_id,visit_id\nS1,V1\n");
    let samples = ws.write(
        "samples.csv",
        "sample_name_id,visit_id,body_site\nSMP1,V1,stool\n",
    );

    let summaries = ws
        .orchestrator(&registry)
        .submit_all(
            &[(NodeType::Sample, samples), (NodeType::Visit, visits)],
            &RecordingSink::default(),
        )
        .unwrap();

    let levels = summaries
        .iter()
        .map(|summary| summary.node_type.as_str())
        .collect::<Vec<_>>();
    assert_eq!(levels, vec!["visit", "sample"]);
    assert_eq!(summaries[1].created, 1);
    assert_eq!(summaries[1].parent_missing, 0);
    let sample = &registry.nodes_of(NodeType::Sample)[0];
    assert_eq!(sample.linkage["collected_during"], vec!["REG456".to_string()]);
}

#[test]
fn hierarchy_run_stops_at_transport_failure() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let registry = MemoryRegistry {
        offline_after_searches: Some(1),
        ..Default::default()
    };
    let visits = ws.write("visits.csv", "subject_id,visit_id\nS1,V1\nS1,V2\n");
    let samples = ws.write(
        "samples.csv",
        "sample_name_id,visit_id,body_site\nSMP1,V1,stool\n",
    );

    let err = ws
        .orchestrator(&registry)
        .submit_all(
            &[(NodeType::Visit, visits), (NodeType::Sample, samples)],
            &RecordingSink::default(),
        )
        .unwrap_err();

    assert!(err.is_transport());
    assert!(registry.nodes_of(NodeType::Sample).is_empty());
    assert!(!exists(&ws.root.join("samples_submitted.csv")));
}

#[test]
fn transport_failure_aborts_remaining_rows() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let input = ws.write("visits.csv", "subject_id,visit_id\nS1,V1\nS1,V2\nS1,V3\n");
    let registry = MemoryRegistry {
        offline_after_searches: Some(1),
        ..Default::default()
    };

    let err = ws
        .orchestrator(&registry)
        .submit(NodeType::Visit, &input, &RecordingSink::default())
        .unwrap_err();

    assert!(err.is_transport());
    assert_eq!(MemoryRegistry::count(&registry.saves), 1);
    let rows = ws.ledger_rows();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].starts_with("visit,V1,REG456,"));
}

#[test]
fn samples_chain_below_submitted_visits() {
    let ws = Workspace::new();
    ws.seed_subject("S1", "REG123");
    let registry = MemoryRegistry::default();
    let visits = ws.write("visits.csv", "subject_id,visit_id\nS1,V1\n");
    let samples = ws.write(
        "samples.csv",
        "sample_name_id,visit_id,body_site\nSMP1,V1,stool\n",
    );

    let orchestrator = ws.orchestrator(&registry);
    orchestrator
        .submit(NodeType::Visit, &visits, &RecordingSink::default())
        .unwrap();
    let summary = orchestrator
        .submit(NodeType::Sample, &samples, &RecordingSink::default())
        .unwrap();

    assert_eq!(summary.created, 1);
    let sample = &registry.nodes_of(NodeType::Sample)[0];
    assert_eq!(sample.linkage["collected_during"], vec!["REG456".to_string()]);
    assert_eq!(sample.meta["mixs"]["env_package"], "human-gut");
    assert!(ws.ledger_rows()[2].starts_with("sample,SMP1,REG457,visit,V1,REG456,"));
}

#[test]
fn project_rows_are_refused() {
    let ws = Workspace::new();
    let input = ws.write("projects.csv", "name\niHMP\n");
    let registry = MemoryRegistry::default();
    let err = ws
        .orchestrator(&registry)
        .submit(NodeType::Project, &input, &RecordingSink::default())
        .unwrap_err();
    assert_matches!(err, SyncError::NotSubmittable(_));
}

#[test]
fn concurrent_writer_is_refused_while_run_holds_ledger() {
    let ws = Workspace::new();
    let registry = MemoryRegistry::default();
    let _orchestrator = ws.orchestrator(&registry);
    let err = Ledger::open(ws.ledger_path(), MatchPolicy::Exact).unwrap_err();
    assert_matches!(err, SyncError::LedgerLocked(_));
}
