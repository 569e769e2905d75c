use std::collections::BTreeSet;
use std::fs::OpenOptions;

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::NodeType;
use crate::error::SyncError;
use crate::query::QueryFormatter;
use crate::record::RecordMeta;
use crate::registry::RegistryClient;

pub const RETRIEVE_HEADER: [&str; 5] = [
    "node_type",
    "node_id",
    "internal_id",
    "parent_linkage",
    "metadata_json",
];

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveResult {
    pub node_type: String,
    pub query: String,
    pub written: usize,
    pub output: String,
}

pub fn retrieve<R: RegistryClient>(
    registry: &R,
    formatter: &QueryFormatter,
    node_type: NodeType,
    tags: &[String],
    output: &Utf8Path,
) -> Result<RetrieveResult, SyncError> {
    let query = tags
        .iter()
        .map(|tag| formatter.format(tag, "tags"))
        .reduce(|left, right| formatter.combine(&left, &right))
        .unwrap_or_else(|| formatter.format(node_type.as_str(), "node_type"));
    let nodes = registry.search(node_type, &query)?;

    let mut seen = BTreeSet::new();
    let unique = nodes
        .into_iter()
        .filter(|node| seen.insert(node.id.clone()))
        .collect::<Vec<_>>();
    let written = write_nodes(node_type, &unique, output)?;
    tracing::info!(%node_type, %query, written, output = %output, "retrieved nodes");
    Ok(RetrieveResult {
        node_type: node_type.to_string(),
        query,
        written,
        output: output.to_string(),
    })
}

fn write_nodes(
    node_type: NodeType,
    nodes: &[RecordMeta],
    output: &Utf8Path,
) -> Result<usize, SyncError> {
    let write_error = |message: String| SyncError::CsvWrite {
        path: output.to_path_buf(),
        message,
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output.as_std_path())
        .map_err(|err| write_error(err.to_string()))?;
    let is_empty = file
        .metadata()
        .map_err(|err| write_error(err.to_string()))?
        .len()
        == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_empty {
        writer
            .write_record(RETRIEVE_HEADER)
            .map_err(|err| write_error(err.to_string()))?;
    }
    for node in nodes {
        let internal_id = node
            .meta
            .get(node_type.id_field())
            .and_then(|value| value.as_str())
            .unwrap_or_default();
        let linkage = serde_json::to_string(&node.linkage)
            .map_err(|err| write_error(err.to_string()))?;
        let meta =
            serde_json::to_string(&node.meta).map_err(|err| write_error(err.to_string()))?;
        writer
            .write_record([node_type.as_str(), &node.id, internal_id, &linkage, &meta])
            .map_err(|err| write_error(err.to_string()))?;
    }
    writer.flush().map_err(|err| write_error(err.to_string()))?;
    Ok(nodes.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use camino::Utf8PathBuf;
    use serde_json::json;

    use super::*;
    use crate::domain::RegistryId;
    use crate::record::Record;

    struct Fixed {
        nodes: Vec<RecordMeta>,
        queries: Mutex<Vec<String>>,
    }

    impl RegistryClient for Fixed {
        fn search(&self, _: NodeType, query: &str) -> Result<Vec<RecordMeta>, SyncError> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(self.nodes.clone())
        }

        fn validate(&self, _: &Record) -> Result<Vec<String>, SyncError> {
            Ok(Vec::new())
        }

        fn save(&self, _: &Record) -> Result<Option<RegistryId>, SyncError> {
            Ok(None)
        }
    }

    fn node(id: &str, visit_id: &str) -> RecordMeta {
        serde_json::from_value(json!({
            "id": id,
            "node_type": "visit",
            "meta": {"visit_id": visit_id},
            "linkage": {"by": ["S"]}
        }))
        .unwrap()
    }

    #[test]
    fn writes_unique_nodes_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let output = Utf8PathBuf::from_path_buf(dir.path().join("visits_out.csv")).unwrap();
        let registry = Fixed {
            nodes: vec![node("R1", "V1"), node("R1", "V1"), node("R2", "V2")],
            queries: Mutex::new(Vec::new()),
        };
        let result = retrieve(
            &registry,
            &QueryFormatter::standard().unwrap(),
            NodeType::Visit,
            &["prediabetes".to_string()],
            &output,
        )
        .unwrap();
        assert_eq!(result.written, 2);
        assert_eq!(registry.queries.lock().unwrap()[0], "(\"prediabetes\"[tags])");

        let mut reader = csv::Reader::from_path(output.as_std_path()).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            RETRIEVE_HEADER
        );
        let rows = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "R1");
        assert_eq!(&rows[0][2], "V1");
        assert_eq!(&rows[0][3], r#"{"by":["S"]}"#);
    }

    #[test]
    fn several_tags_are_combined() {
        let dir = tempfile::tempdir().unwrap();
        let output = Utf8PathBuf::from_path_buf(dir.path().join("out.csv")).unwrap();
        let registry = Fixed {
            nodes: Vec::new(),
            queries: Mutex::new(Vec::new()),
        };
        retrieve(
            &registry,
            &QueryFormatter::standard().unwrap(),
            NodeType::Sample,
            &["prediabetes".to_string(), "stool".to_string()],
            &output,
        )
        .unwrap();
        assert_eq!(
            registry.queries.lock().unwrap()[0],
            "((\"prediabetes\"[tags]) && (\"stool\"[tags]))"
        );
    }
}
