use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::NodeType;
use crate::error::SyncError;
use crate::input::InputRow;
use crate::record::Record;

pub const DEFAULT_COLLECTION_DATE: &str = "2112-12-21";
const BIOME: &str = "terrestrial biome [ENVO:00000446]";
const NUCL_ACID_EXT: &str = "Nucleic Acid Extraction [OBI:0666667]";
const FASTQ_DOC: &str = "https://en.wikipedia.org/wiki/FASTQ_format";
const FASTA_DOC: &str = "https://en.wikipedia.org/wiki/FASTA_format";
const STOOL_TAXON: &str = "408170";
const NASAL_TAXON: &str = "1131769";

const TAG_D5: [&str; 2] = [
    "AATGATACGGCGACCACCGAGATCTACAC",
    "ACACTCTTTCCCTACACGACGCTCTTCCGATCT",
];
const TAG_D7: [&str; 2] = [
    "GATCGGAAGAGCACACGTCTGAACTCCAGTCAC",
    "ATCTCGTATGCCGTCTTCTGCTTG",
];
const PCR_FWD: &str = "AGAGTTTGATCCTGGCTCAG";
const PCR_REV: &str = "ATTACCGCGGCTGCTGG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingContext {
    pub study: String,
    pub project_name: String,
    pub sequencing_center: String,
    pub sequencing_contact: String,
    pub geo_loc_name: String,
    pub lat_lon: String,
}

impl Default for MappingContext {
    fn default() -> Self {
        Self {
            study: "prediabetes".to_string(),
            project_name: "iHMP".to_string(),
            sequencing_center: "Jackson Laboratory for Genomic Medicine".to_string(),
            sequencing_contact: String::new(),
            geo_loc_name: "Palo Alto, CA, USA".to_string(),
            lat_lon: "37.441883, -122.143019".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudyRow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub center: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(alias = "project_name")]
    pub project: String,
    #[serde(default)]
    pub tags: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectRow {
    #[serde(alias = "subject_id")]
    pub rand_subject_id: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub race: String,
    #[serde(default)]
    pub age: String,
    #[serde(default, alias = "study_name")]
    pub study: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisitRow {
    pub visit_id: String,
    #[serde(alias = "subject_id")]
    pub rand_subject_id: String,
    #[serde(default)]
    pub visit_number: Option<u32>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub interval: Option<i64>,
    #[serde(default)]
    pub clinic_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleRow {
    #[serde(alias = "name")]
    pub sample_name_id: String,
    pub visit_id: String,
    #[serde(default)]
    pub body_site: String,
    #[serde(default)]
    pub fma_body_site: Option<String>,
    #[serde(default)]
    pub collection_date: Option<String>,
    #[serde(default)]
    pub rand_subject_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnaPrepRow {
    pub prep_id: String,
    pub sample_name_id: String,
    #[serde(default)]
    pub body_site: String,
    #[serde(default)]
    pub visit_id: String,
    #[serde(default)]
    pub rand_subject_id: String,
    #[serde(default)]
    pub jaxid_sample: String,
    #[serde(default)]
    pub jaxid_library: String,
    #[serde(default, rename = "IndexCode1")]
    pub index_code_1: String,
    #[serde(default, rename = "IndexSeq1")]
    pub index_seq_1: String,
    #[serde(default, rename = "IndexCode2")]
    pub index_code_2: String,
    #[serde(default, rename = "IndexSeq2")]
    pub index_seq_2: String,
    #[serde(default)]
    pub material_received: String,
    #[serde(default)]
    pub sub_study: String,
    #[serde(default)]
    pub visit_type: String,
    #[serde(default)]
    pub raw_file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeqSetRow {
    pub prep_id: String,
    #[serde(default)]
    pub local_file: String,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub seq_model: String,
    #[serde(default)]
    pub exp_length: Option<u64>,
    #[serde(default)]
    pub jaxid_recd_dna: String,
    #[serde(default)]
    pub jaxid_recd_tissue: String,
    #[serde(default)]
    pub jaxid_library: String,
    #[serde(default)]
    pub visit_id: String,
    #[serde(default)]
    pub body_site: String,
    #[serde(default)]
    pub rand_subject_id: String,
}

#[derive(Debug, Clone)]
pub enum NodeRow {
    Study(StudyRow),
    Subject(SubjectRow),
    Visit(VisitRow),
    Sample(SampleRow),
    DnaPrep(NodeType, DnaPrepRow),
    SeqSet(NodeType, SeqSetRow),
}

impl NodeRow {
    pub fn parse(node_type: NodeType, row: &InputRow) -> Result<Self, SyncError> {
        let parsed = match node_type {
            NodeType::Project => {
                return Err(SyncError::NotSubmittable(node_type.to_string()));
            }
            NodeType::Study => NodeRow::Study(row.deserialize()?),
            NodeType::Subject => NodeRow::Subject(row.deserialize()?),
            NodeType::Visit => NodeRow::Visit(row.deserialize()?),
            NodeType::Sample => NodeRow::Sample(row.deserialize()?),
            NodeType::SixteenSDnaPrep | NodeType::WgsDnaPrep => {
                NodeRow::DnaPrep(node_type, row.deserialize()?)
            }
            NodeType::SixteenSRawSeqSet
            | NodeType::SixteenSTrimmedSeqSet
            | NodeType::WgsRawSeqSet => NodeRow::SeqSet(node_type, row.deserialize()?),
        };
        if parsed.internal_id().trim().is_empty() {
            return Err(SyncError::RowMapping {
                line: row.line,
                message: format!("empty {} natural key", node_type),
            });
        }
        Ok(parsed)
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeRow::Study(_) => NodeType::Study,
            NodeRow::Subject(_) => NodeType::Subject,
            NodeRow::Visit(_) => NodeType::Visit,
            NodeRow::Sample(_) => NodeType::Sample,
            NodeRow::DnaPrep(node_type, _) | NodeRow::SeqSet(node_type, _) => *node_type,
        }
    }

    pub fn internal_id(&self) -> &str {
        match self {
            NodeRow::Study(row) => &row.name,
            NodeRow::Subject(row) => &row.rand_subject_id,
            NodeRow::Visit(row) => &row.visit_id,
            NodeRow::Sample(row) => &row.sample_name_id,
            NodeRow::DnaPrep(_, row) => &row.prep_id,
            NodeRow::SeqSet(_, row) => &row.prep_id,
        }
    }

    pub fn parent_internal_id<'a>(&'a self, ctx: &'a MappingContext) -> &'a str {
        match self {
            NodeRow::Study(row) => &row.project,
            NodeRow::Subject(row) => row
                .study
                .as_deref()
                .filter(|study| !study.is_empty())
                .unwrap_or(ctx.study.as_str()),
            NodeRow::Visit(row) => &row.rand_subject_id,
            NodeRow::Sample(row) => &row.visit_id,
            NodeRow::DnaPrep(_, row) => &row.sample_name_id,
            NodeRow::SeqSet(_, row) => &row.prep_id,
        }
    }

    pub fn apply(&self, record: &mut Record, ctx: &MappingContext) -> Result<(), String> {
        match self {
            NodeRow::Study(row) => apply_study(row, record),
            NodeRow::Subject(row) => apply_subject(row, record, ctx)?,
            NodeRow::Visit(row) => apply_visit(row, record, ctx),
            NodeRow::Sample(row) => apply_sample(row, record, ctx),
            NodeRow::DnaPrep(NodeType::WgsDnaPrep, row) => apply_wgs_prep(row, record, ctx),
            NodeRow::DnaPrep(_, row) => apply_16s_prep(row, record, ctx),
            NodeRow::SeqSet(NodeType::SixteenSTrimmedSeqSet, row) => {
                apply_trimmed_seq_set(row, record, ctx)
            }
            NodeRow::SeqSet(_, row) => apply_raw_seq_set(row, record, ctx),
        }
        Ok(())
    }
}

fn apply_study(row: &StudyRow, record: &mut Record) {
    record.set("name", row.name.as_str());
    record.set("description", row.description.as_str());
    record.set("center", row.center.as_str());
    record.set("contact", row.contact.as_str());
    if !row.subtype.is_empty() {
        record.set("subtype", row.subtype.as_str());
    }
    record.add_tags(row.tags.split(';').map(str::trim));
}

fn apply_subject(
    row: &SubjectRow,
    record: &mut Record,
    ctx: &MappingContext,
) -> Result<(), String> {
    record.set("rand_subject_id", row.rand_subject_id.as_str());
    record.set("gender", gender(&row.gender)?);
    record.set("race", race(&row.race)?);
    record.add_tags([
        format!("subject id: {}", row.rand_subject_id),
        format!("study: {}", ctx.study),
    ]);
    if !row.age.is_empty() {
        record.add_tags([format!("age: {}", row.age)]);
    }
    Ok(())
}

fn apply_visit(row: &VisitRow, record: &mut Record, ctx: &MappingContext) {
    record.set("visit_id", row.visit_id.as_str());
    if let Some(number) = row.visit_number {
        record.set("visit_number", number);
    }
    if let Some(date) = &row.date {
        record.set("date", date.as_str());
    }
    if let Some(interval) = row.interval {
        record.set("interval", interval);
    }
    if let Some(clinic_id) = &row.clinic_id {
        record.set("clinic_id", clinic_id.as_str());
    }
    record.add_tags([
        format!("visit id: {}", row.visit_id),
        format!("subject id: {}", row.rand_subject_id),
        format!("study: {}", ctx.study),
    ]);
}

fn apply_sample(row: &SampleRow, record: &mut Record, ctx: &MappingContext) {
    let stool = is_stool(&row.body_site);
    record.set("name", row.sample_name_id.as_str());
    record.set("body_site", row.body_site.as_str());
    let fma = row
        .fma_body_site
        .clone()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| {
            if stool {
                "feces [FMA:64183]".to_string()
            } else {
                "nasal cavity [FMA:54378]".to_string()
            }
        });
    record.set("fma_body_site", fma);
    let package = env_package(stool);
    let collection_date = row
        .collection_date
        .as_deref()
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_COLLECTION_DATE);
    record.set(
        "mixs",
        json!({
            "biome": BIOME,
            "body_product": if stool { "feces" } else { "mucus" },
            "collection_date": collection_date,
            "env_package": package,
            "feature": "N/A",
            "geo_loc_name": ctx.geo_loc_name,
            "lat_lon": ctx.lat_lon,
            "material": material(stool),
            "project_name": ctx.project_name,
            "rel_to_oxygen": "N/A",
            "samp_collect_device": collect_device(stool),
            "samp_mat_process": "N/A",
            "samp_size": "N/A",
            "source_mat_id": [],
        }),
    );
    record.add_tags([
        format!("visit id: {}", row.visit_id),
        format!("body site: {}", row.body_site),
        format!("study: {}", ctx.study),
    ]);
    if !row.rand_subject_id.is_empty() {
        record.add_tags([format!("subject id: {}", row.rand_subject_id)]);
    }
}

fn apply_prep_common(row: &DnaPrepRow, record: &mut Record, ctx: &MappingContext) {
    record.set("prep_id", row.prep_id.as_str());
    record.set("comment", row.prep_id.as_str());
    record.set(
        "ncbi_taxon_id",
        if is_stool(&row.body_site) {
            STOOL_TAXON
        } else {
            NASAL_TAXON
        },
    );
    record.set("sequencing_center", ctx.sequencing_center.as_str());
    record.set("sequencing_contact", ctx.sequencing_contact.as_str());
    let library = if row.jaxid_library.is_empty() {
        "unknown"
    } else {
        &row.jaxid_library
    };
    record.add_tags([
        format!("jaxid (sample): {}", row.jaxid_sample),
        format!("jaxid (library): {library}"),
        format!("visit id: {}", row.visit_id),
        format!("subject id: {}", row.rand_subject_id),
        format!("study: {}", ctx.study),
    ]);
}

fn apply_16s_prep(row: &DnaPrepRow, record: &mut Record, ctx: &MappingContext) {
    apply_prep_common(row, record, ctx);
    record.set("frag_size", 301);
    record.set("lib_layout", "paired 301bp");
    record.set("lib_selection", "PCR");
    record.set("storage_duration", 2112);
    record.set("mimarks", mimarks(row, ctx));
    record.add_tags([format!("file prefix: {}", row.prep_id)]);
}

fn apply_wgs_prep(row: &DnaPrepRow, record: &mut Record, ctx: &MappingContext) {
    apply_prep_common(row, record, ctx);
    record.set("frag_size", 550);
    record.set(
        "lib_layout",
        "Paired End libraries, with nominal insert size of 450-550bp with a standard deviation of 50-60 bp",
    );
    record.set("lib_selection", "RANDOM");
    record.set("storage_duration", 1);
    record.set("mims", mims(row, ctx));
    record.add_tags([format!("dna_prep_id: {}", row.prep_id)]);
    for (label, value) in [
        ("sample type", &row.material_received),
        ("sub_study", &row.sub_study),
        ("visit type", &row.visit_type),
        ("raw_file_id", &row.raw_file_id),
    ] {
        if !value.is_empty() {
            record.add_tags([format!("{label}: {value}")]);
        }
    }
}

fn apply_seq_set_common(row: &SeqSetRow, record: &mut Record, ctx: &MappingContext) {
    record.set("study", ctx.study.as_str());
    record.set("comment", row.prep_id.as_str());
    record.set("local_file", row.local_file.as_str());
    let mut checksums = serde_json::Map::new();
    checksums.insert("md5".to_string(), Value::from(row.md5.as_str()));
    if let Some(sha256) = row.sha256.as_deref().filter(|value| !value.is_empty()) {
        checksums.insert("sha256".to_string(), Value::from(sha256));
    }
    record.set("checksums", Value::Object(checksums));
    if let Some(size) = row.size {
        record.set("size", size);
    }
    record.set("urls", Value::Array(Vec::new()));
    record.add_tags([
        tag_or_none("jaxid (dna)", &row.jaxid_recd_dna),
        tag_or_none("jaxid (tissue)", &row.jaxid_recd_tissue),
        tag_or_none("jaxid (library)", &row.jaxid_library),
        format!("visit id: {}", row.visit_id),
        format!("body site: {}", row.body_site),
        format!("subject id: {}", row.rand_subject_id),
        format!("study: {}", ctx.study),
        format!("prep id: {}", row.prep_id),
    ]);
}

fn apply_raw_seq_set(row: &SeqSetRow, record: &mut Record, ctx: &MappingContext) {
    apply_seq_set_common(row, record, ctx);
    record.set("sequence_type", "nucleotide");
    record.set("seq_model", row.seq_model.as_str());
    record.set("format", "fastq");
    record.set("format_doc", FASTQ_DOC);
    record.set("exp_length", row.exp_length.unwrap_or(0));
}

fn apply_trimmed_seq_set(row: &SeqSetRow, record: &mut Record, ctx: &MappingContext) {
    apply_seq_set_common(row, record, ctx);
    record.set("format", "fasta");
    record.set("format_doc", FASTA_DOC);
    if let Some(exp_length) = row.exp_length {
        record.set("exp_length", exp_length);
    }
}

fn mimarks(row: &DnaPrepRow, ctx: &MappingContext) -> Value {
    let stool = is_stool(&row.body_site);
    json!({
        "adapters": adapters(row),
        "biome": BIOME,
        "collection_date": DEFAULT_COLLECTION_DATE,
        "experimental_factor": env_package(stool),
        "feature": "N/A",
        "findex": forward_index(row),
        "rindex": reverse_index(row),
        "geo_loc_name": ctx.geo_loc_name,
        "investigation_type": "metagenome",
        "isol_growth_condt": "N/A",
        "lat_lon": ctx.lat_lon,
        "lib_const_meth": "paired end 16S 454 Amp protocol",
        "lib_reads_seqd": "N/A",
        "lib_size": 700,
        "lib_vector": "N/A",
        "material": material(stool),
        "nucl_acid_amp": "N/A",
        "nucl_acid_ext": NUCL_ACID_EXT,
        "pcr_cond": "initial denaturation: 95C_2min; [denaturation: 95C_20sec; anealing: 56C_30sec; extension: 72C_5min]-30 cycles: hold: 4C",
        "pcr_primers": pcr_primers(&row.index_code_1),
        "project_name": ctx.project_name,
        "rel_to_oxygen": "N/A",
        "samp_collect_device": collect_device(stool),
        "samp_mat_process": "N/A",
        "samp_size": "N/A",
        "seq_meth": "nextgen",
        "sop": [],
        "source_mat_id": ["deoxyribonucleic acid CHEBI:16991", "DNA extract OBI:0001051"],
        "submitted_to_insdc": false,
        "target_gene": "16S rRNA",
        "target_subfragment": "V1-V3",
        "url": [],
    })
}

fn mims(row: &DnaPrepRow, ctx: &MappingContext) -> Value {
    let stool = is_stool(&row.body_site);
    let package = env_package(stool);
    json!({
        "adapters": adapters(row),
        "findex": forward_index(row),
        "rindex": reverse_index(row),
        "annot_source": "N/A",
        "assembly": "N/A",
        "assembly_name": "N/A",
        "biome": BIOME,
        "collection_date": DEFAULT_COLLECTION_DATE,
        "encoded_traits": "N/A",
        "env_package": package,
        "experimental_factor": package,
        "extrachrom_elements": "N/A",
        "feature": "N/A",
        "finishing_strategy": "draft genome",
        "geo_loc_name": ctx.geo_loc_name,
        "investigation_type": "metagenome",
        "isol_growth_condt": "N/A",
        "lat_lon": ctx.lat_lon,
        "lib_const_meth": "N/A",
        "lib_reads_seqd": "N/A",
        "lib_screen": "N/A",
        "lib_size": 700,
        "lib_vector": "N/A",
        "material": material(stool),
        "nucl_acid_amp": "N/A",
        "nucl_acid_ext": NUCL_ACID_EXT,
        "project_name": ctx.project_name,
        "rel_to_oxygen": "N/A",
        "samp_collect_device": collect_device(stool),
        "samp_mat_process": "N/A",
        "samp_size": "N/A",
        "seq_meth": "nextgen",
        "sop": [],
        "source_mat_id": ["deoxyribonucleic acid CHEBI:16991", "DNA extract OBI:0001051"],
        "submitted_to_insdc": false,
        "url": [],
    })
}

fn adapters(row: &DnaPrepRow) -> String {
    [
        index_tag(&row.index_code_1, &row.index_seq_1),
        index_tag(&row.index_code_2, &row.index_seq_2),
    ]
    .join(",")
}

// D7 primers are the fallback.
fn index_tag(code: &str, seq: &str) -> String {
    let [pre, post] = if code.starts_with("D5") { TAG_D5 } else { TAG_D7 };
    format!("{pre}{seq}{post}")
}

fn pcr_primers(code: &str) -> String {
    if code.starts_with("D5") || code.starts_with("D7") || code.starts_with("A0") {
        format!("{PCR_FWD},{PCR_REV}")
    } else {
        "N/A".to_string()
    }
}

fn forward_index(row: &DnaPrepRow) -> &str {
    if row.index_code_2.starts_with("D5") {
        &row.index_seq_2
    } else {
        ""
    }
}

fn reverse_index(row: &DnaPrepRow) -> &str {
    if row.index_code_1.starts_with("D7") {
        &row.index_seq_1
    } else {
        ""
    }
}

fn is_stool(body_site: &str) -> bool {
    body_site.trim().to_ascii_lowercase().starts_with("stool")
}

fn env_package(stool: bool) -> &'static str {
    if stool { "human-gut" } else { "human-associated" }
}

fn material(stool: bool) -> &'static str {
    if stool {
        "feces(ENVO:00002003)"
    } else {
        "oronasal secretion(ENVO:02000035)"
    }
}

fn collect_device(stool: bool) -> &'static str {
    if stool { "self-sample" } else { "self-swab" }
}

fn tag_or_none(label: &str, value: &str) -> String {
    if value.is_empty() {
        format!("{label}: none")
    } else {
        format!("{label}: {value}")
    }
}

const RACES: [&str; 5] = [
    "black_or_african_american",
    "caucasian",
    "asian",
    "hispanic_or_latino",
    "ethnic_other",
];

pub fn race(code: &str) -> Result<&'static str, String> {
    let code = code.trim();
    let decoded = match code.to_ascii_uppercase().as_str() {
        "B" => "black_or_african_american",
        "C" => "caucasian",
        "A" => "asian",
        "H" => "hispanic_or_latino",
        "O" | "" => "ethnic_other",
        _ => RACES
            .iter()
            .copied()
            .find(|race| race.eq_ignore_ascii_case(code))
            .ok_or_else(|| format!("race value {code:?} is not valid; choose from {RACES:?}"))?,
    };
    Ok(decoded)
}

pub fn gender(value: &str) -> Result<&'static str, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "m" | "male" => Ok("male"),
        "f" | "female" => Ok("female"),
        "" | "u" | "unknown" => Ok("unknown"),
        other => Err(format!("gender value {other:?} is not valid")),
    }
}
