use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{MatchPolicy, NodeType};
use crate::error::SyncError;
use crate::mapping::MappingContext;
use crate::query::{BoolOp, DEFAULT_SEPARATOR, QueryFormatter, SplitMode};

pub const DEFAULT_CONFIG_FILE: &str = "biometa-sync.json";
pub const DEFAULT_LEDGER: &str = "node_id_tracking.csv";
pub const DEFAULT_NAMESPACE: &str = "ihmp";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub registry: Option<RegistryEntry>,
    #[serde(default)]
    pub ledger: Option<String>,
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub query: Option<QueryEntry>,
    #[serde(default)]
    pub ledger_match: Option<MatchPolicy>,
    #[serde(default)]
    pub resolver_match: Option<MatchPolicy>,
    #[serde(default)]
    pub mapping: Option<MappingEntry>,
    #[serde(default)]
    pub data_files: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RegistryEntry {
    pub base_url: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub username_file: Option<String>,
    #[serde(default)]
    pub password_file: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct QueryEntry {
    #[serde(default)]
    pub separator: Option<String>,
    #[serde(default)]
    pub operator: Option<BoolOp>,
    #[serde(default)]
    pub split_identifiers: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MappingEntry {
    #[serde(default)]
    pub study: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub sequencing_center: Option<String>,
    #[serde(default)]
    pub sequencing_contact: Option<String>,
    #[serde(default)]
    pub geo_loc_name: Option<String>,
    #[serde(default)]
    pub lat_lon: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub base_url: String,
    pub namespace: String,
    pub username_file: Option<Utf8PathBuf>,
    pub password_file: Option<Utf8PathBuf>,
    pub timeout: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl RegistrySettings {
    pub fn credentials(&self) -> Result<Credentials, SyncError> {
        Ok(Credentials {
            username: read_secret(self.username_file.as_deref())?,
            password: read_secret(self.password_file.as_deref())?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub registry: Option<RegistrySettings>,
    pub ledger_path: Utf8PathBuf,
    pub log_dir: Option<Utf8PathBuf>,
    pub formatter: QueryFormatter,
    pub ledger_match: MatchPolicy,
    pub resolver_match: MatchPolicy,
    pub mapping: MappingContext,
    pub data_files: Vec<(NodeType, Utf8PathBuf)>,
}

impl ResolvedConfig {
    pub fn require_registry(&self) -> Result<&RegistrySettings, SyncError> {
        self.registry
            .as_ref()
            .ok_or_else(|| SyncError::ConfigParse("missing \"registry\" section".to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Err(SyncError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SyncError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SyncError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let registry = config.registry.map(|entry| RegistrySettings {
            base_url: entry.base_url.trim_end_matches('/').to_string(),
            namespace: entry
                .namespace
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            username_file: entry.username_file.map(Utf8PathBuf::from),
            password_file: entry.password_file.map(Utf8PathBuf::from),
            timeout: Duration::from_secs(entry.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        });

        let query = config.query.unwrap_or_default();
        let mode = if query.split_identifiers.unwrap_or(true) {
            SplitMode::Tokens
        } else {
            SplitMode::WholeValue
        };
        let formatter = QueryFormatter::new(
            query.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR),
            query.operator.unwrap_or_default(),
            mode,
        )?;

        let defaults = MappingContext::default();
        let mapping = config.mapping.unwrap_or_default();
        let mapping = MappingContext {
            study: mapping.study.unwrap_or(defaults.study),
            project_name: mapping.project_name.unwrap_or(defaults.project_name),
            sequencing_center: mapping
                .sequencing_center
                .unwrap_or(defaults.sequencing_center),
            sequencing_contact: mapping
                .sequencing_contact
                .unwrap_or(defaults.sequencing_contact),
            geo_loc_name: mapping.geo_loc_name.unwrap_or(defaults.geo_loc_name),
            lat_lon: mapping.lat_lon.unwrap_or(defaults.lat_lon),
        };

        let mut data_files = config
            .data_files
            .unwrap_or_default()
            .into_iter()
            .map(|(node_type, path)| -> Result<(NodeType, Utf8PathBuf), SyncError> {
                let node_type: NodeType = node_type.parse()?;
                if node_type.parent().is_none() {
                    return Err(SyncError::NotSubmittable(node_type.to_string()));
                }
                Ok((node_type, Utf8PathBuf::from(path)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        data_files.sort_by_key(|(node_type, _)| *node_type);
        if let Some(pair) = data_files.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(SyncError::ConfigParse(format!(
                "more than one data file for {}",
                pair[0].0
            )));
        }

        Ok(ResolvedConfig {
            schema_version,
            registry,
            ledger_path: Utf8PathBuf::from(config.ledger.as_deref().unwrap_or(DEFAULT_LEDGER)),
            log_dir: config.log_dir.map(Utf8PathBuf::from),
            formatter,
            ledger_match: config.ledger_match.unwrap_or_default(),
            resolver_match: config.resolver_match.unwrap_or_default(),
            mapping,
            data_files,
        })
    }
}

fn read_secret(path: Option<&Utf8Path>) -> Result<String, SyncError> {
    match path {
        Some(path) => fs::read_to_string(path.as_std_path())
            .map(|value| value.trim().to_string())
            .map_err(|_| SyncError::CredentialRead(path.to_path_buf())),
        None => Ok(String::new()),
    }
}
