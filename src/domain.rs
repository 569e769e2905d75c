use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeType {
    Project,
    Study,
    Subject,
    Visit,
    Sample,
    SixteenSDnaPrep,
    WgsDnaPrep,
    SixteenSRawSeqSet,
    SixteenSTrimmedSeqSet,
    WgsRawSeqSet,
}

impl NodeType {
    pub const ALL: [NodeType; 10] = [
        NodeType::Project,
        NodeType::Study,
        NodeType::Subject,
        NodeType::Visit,
        NodeType::Sample,
        NodeType::SixteenSDnaPrep,
        NodeType::WgsDnaPrep,
        NodeType::SixteenSRawSeqSet,
        NodeType::SixteenSTrimmedSeqSet,
        NodeType::WgsRawSeqSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Project => "project",
            NodeType::Study => "study",
            NodeType::Subject => "subject",
            NodeType::Visit => "visit",
            NodeType::Sample => "sample",
            NodeType::SixteenSDnaPrep => "16s_dna_prep",
            NodeType::WgsDnaPrep => "wgs_dna_prep",
            NodeType::SixteenSRawSeqSet => "16s_raw_seq_set",
            NodeType::SixteenSTrimmedSeqSet => "16s_trimmed_seq_set",
            NodeType::WgsRawSeqSet => "wgs_raw_seq_set",
        }
    }

    pub fn id_field(&self) -> &'static str {
        match self {
            NodeType::Project | NodeType::Study | NodeType::Sample => "name",
            NodeType::Subject => "rand_subject_id",
            NodeType::Visit => "visit_id",
            NodeType::SixteenSDnaPrep | NodeType::WgsDnaPrep => "prep_id",
            NodeType::SixteenSRawSeqSet
            | NodeType::SixteenSTrimmedSeqSet
            | NodeType::WgsRawSeqSet => "comment",
        }
    }

    pub fn parent(&self) -> Option<NodeType> {
        match self {
            NodeType::Project => None,
            NodeType::Study => Some(NodeType::Project),
            NodeType::Subject => Some(NodeType::Study),
            NodeType::Visit => Some(NodeType::Subject),
            NodeType::Sample => Some(NodeType::Visit),
            NodeType::SixteenSDnaPrep | NodeType::WgsDnaPrep => Some(NodeType::Sample),
            NodeType::SixteenSRawSeqSet => Some(NodeType::SixteenSDnaPrep),
            NodeType::SixteenSTrimmedSeqSet => Some(NodeType::SixteenSRawSeqSet),
            NodeType::WgsRawSeqSet => Some(NodeType::WgsDnaPrep),
        }
    }

    pub fn relation(&self) -> Option<&'static str> {
        match self {
            NodeType::Project => None,
            NodeType::Study => Some("part_of"),
            NodeType::Subject => Some("participates_in"),
            NodeType::Visit => Some("by"),
            NodeType::Sample => Some("collected_during"),
            NodeType::SixteenSDnaPrep | NodeType::WgsDnaPrep => Some("prepared_from"),
            NodeType::SixteenSRawSeqSet | NodeType::WgsRawSeqSet => Some("sequenced_from"),
            NodeType::SixteenSTrimmedSeqSet => Some("computed_from"),
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            NodeType::Project => &["name", "description", "funding_agency"],
            NodeType::Study => &["name", "description", "center", "contact"],
            NodeType::Subject => &["rand_subject_id", "gender"],
            NodeType::Visit => &["visit_id", "visit_number", "date", "interval", "clinic_id"],
            NodeType::Sample => &["name", "fma_body_site", "mixs"],
            NodeType::SixteenSDnaPrep => &[
                "prep_id",
                "comment",
                "lib_layout",
                "lib_selection",
                "mimarks",
                "ncbi_taxon_id",
                "sequencing_center",
                "sequencing_contact",
                "storage_duration",
            ],
            NodeType::WgsDnaPrep => &[
                "prep_id",
                "comment",
                "lib_layout",
                "lib_selection",
                "mims",
                "ncbi_taxon_id",
                "sequencing_center",
                "sequencing_contact",
                "storage_duration",
            ],
            NodeType::SixteenSRawSeqSet | NodeType::WgsRawSeqSet => &[
                "checksums",
                "comment",
                "exp_length",
                "format",
                "format_doc",
                "local_file",
                "seq_model",
                "sequence_type",
                "size",
                "study",
            ],
            NodeType::SixteenSTrimmedSeqSet => &[
                "checksums",
                "comment",
                "format",
                "format_doc",
                "local_file",
                "size",
                "study",
            ],
        }
    }

    pub fn children(&self) -> Vec<NodeType> {
        NodeType::ALL
            .into_iter()
            .filter(|child| child.parent() == Some(*self))
            .collect()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let node_type = match normalized.as_str() {
            "project" => NodeType::Project,
            "study" => NodeType::Study,
            "subject" => NodeType::Subject,
            "visit" => NodeType::Visit,
            "sample" => NodeType::Sample,
            "16s_dna_prep" | "sixteensdnaprep" | "r16sdnaprep" => NodeType::SixteenSDnaPrep,
            "wgs_dna_prep" | "wgsdnaprep" => NodeType::WgsDnaPrep,
            "16s_raw_seq_set" | "sixteensrawseqset" | "r16srawseqset" => {
                NodeType::SixteenSRawSeqSet
            }
            "16s_trimmed_seq_set" | "sixteenstrimmedseqset" | "r16strimseqset" => {
                NodeType::SixteenSTrimmedSeqSet
            }
            "wgs_raw_seq_set" | "wgsrawseqset" => NodeType::WgsRawSeqSet,
            _ => return Err(SyncError::UnknownNodeType(value.to_string())),
        };
        Ok(node_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryId(String);

impl RegistryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RegistryId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !is_valid {
            return Err(SyncError::RegistryResponse(format!(
                "invalid registry id: {value:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    Exact,
    Prefix,
    Contains,
    Pattern,
}

impl MatchPolicy {
    pub fn matches(&self, wanted: &str, candidate: &str) -> bool {
        match self {
            MatchPolicy::Exact => candidate == wanted,
            MatchPolicy::Prefix => candidate.starts_with(wanted),
            MatchPolicy::Contains => candidate.contains(wanted),
            MatchPolicy::Pattern => match Regex::new(&format!("^(?:{wanted})")) {
                Ok(re) => re.is_match(candidate),
                Err(_) => candidate.starts_with(wanted),
            },
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::Exact => write!(f, "exact"),
            MatchPolicy::Prefix => write!(f, "prefix"),
            MatchPolicy::Contains => write!(f, "contains"),
            MatchPolicy::Pattern => write!(f, "pattern"),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchPolicy::Exact),
            "prefix" => Ok(MatchPolicy::Prefix),
            "contains" => Ok(MatchPolicy::Contains),
            "pattern" | "regex" => Ok(MatchPolicy::Pattern),
            _ => Err(SyncError::InvalidMatchPolicy(value.to_string())),
        }
    }
}
