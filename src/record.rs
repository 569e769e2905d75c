use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{NodeType, RegistryId};
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: String,
    #[serde(default)]
    pub ver: Option<u64>,
    pub node_type: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub linkage: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub node_type: NodeType,
    pub id: Option<RegistryId>,
    pub version: Option<u64>,
    pub fields: Map<String, Value>,
    pub tags: BTreeSet<String>,
    pub linkage: BTreeMap<String, Vec<String>>,
}

impl Record {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            id: None,
            version: None,
            fields: Map::new(),
            tags: BTreeSet::new(),
            linkage: BTreeMap::new(),
        }
    }

    pub fn from_meta(node_type: NodeType, meta: RecordMeta) -> Result<Self, SyncError> {
        let id = meta.id.parse::<RegistryId>()?;
        let mut fields = meta.meta;
        let tags = match fields.remove("tags") {
            Some(Value::Array(values)) => values
                .into_iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        };
        Ok(Self {
            node_type,
            id: Some(id),
            version: meta.ver,
            fields,
            tags,
            linkage: meta.linkage,
        })
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn internal_id(&self) -> Option<&str> {
        self.field_str(self.node_type.id_field())
            .filter(|value| !value.is_empty())
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(
            tags.into_iter()
                .map(Into::into)
                .filter(|tag: &String| !tag.trim().is_empty()),
        );
    }

    pub fn set_parent(&mut self, relation: &str, parent: &RegistryId) {
        self.linkage = BTreeMap::from([(relation.to_string(), vec![parent.to_string()])]);
    }

    pub fn missing_required(&self) -> Vec<String> {
        self.node_type
            .required_fields()
            .iter()
            .filter(|field| match self.fields.get(**field) {
                None | Some(Value::Null) => true,
                Some(Value::String(value)) => value.trim().is_empty(),
                Some(_) => false,
            })
            .map(|field| format!("missing required field '{field}'"))
            .collect()
    }

    pub fn meta_document(&self) -> Map<String, Value> {
        let mut meta = self.fields.clone();
        meta.insert(
            "tags".to_string(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        meta
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_meta_splits_tags() {
        let meta: RecordMeta = serde_json::from_value(json!({
            "id": "abc123",
            "ver": 2,
            "node_type": "visit",
            "meta": {"visit_id": "V1", "tags": ["b", "a", "a"]},
            "linkage": {"by": ["REG123"]}
        }))
        .unwrap();
        let record = Record::from_meta(NodeType::Visit, meta).unwrap();
        assert_eq!(record.internal_id(), Some("V1"));
        assert_eq!(record.id.as_ref().map(RegistryId::as_str), Some("abc123"));
        assert_eq!(record.version, Some(2));
        assert_eq!(record.tags.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!record.fields.contains_key("tags"));
    }

    #[test]
    fn from_meta_rejects_malformed_id() {
        let meta: RecordMeta = serde_json::from_value(json!({
            "id": "nodes/abc",
            "node_type": "visit",
            "meta": {"visit_id": "V1"}
        }))
        .unwrap();
        let err = Record::from_meta(NodeType::Visit, meta).unwrap_err();
        assert!(matches!(err, SyncError::RegistryResponse(_)));
    }

    #[test]
    fn new_record_has_no_natural_key() {
        let mut record = Record::new(NodeType::Subject);
        assert!(!record.is_saved());
        assert_eq!(record.internal_id(), None);
        record.set("rand_subject_id", "");
        assert_eq!(record.internal_id(), None);
    }

    #[test]
    fn single_parent_linkage() {
        let mut record = Record::new(NodeType::Visit);
        record.linkage.insert("other".to_string(), vec!["x".to_string()]);
        let parent: RegistryId = "REG123".parse().unwrap();
        record.set_parent("by", &parent);
        assert_eq!(
            record.linkage,
            BTreeMap::from([("by".to_string(), vec!["REG123".to_string()])])
        );
    }

    #[test]
    fn required_fields_reported() {
        let mut record = Record::new(NodeType::Subject);
        record.set("rand_subject_id", "S1");
        assert_eq!(
            record.missing_required(),
            vec!["missing required field 'gender'".to_string()]
        );
    }

    #[test]
    fn meta_document_includes_sorted_tags() {
        let mut record = Record::new(NodeType::Visit);
        record.set("visit_id", "V1");
        record.add_tags(["visit id: V1", "", "study: prediabetes"]);
        let meta = record.meta_document();
        assert_eq!(meta["tags"], json!(["study: prediabetes", "visit id: V1"]));
        assert_eq!(meta["visit_id"], json!("V1"));
    }
}
