use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UnifyError;
use crate::mapping::{FieldMapping, Transform};

pub const CONFIG_FILE: &str = "kira-unify.json";
pub const DEFAULT_SPECIES: &str = "human";
pub const DEFAULT_NORMALIZE_WORKERS: usize = 50;
pub const DEFAULT_READ_WORKERS: usize = 30;
pub const DEFAULT_RESOLVER_URL: &str = "https://mygene.info/v3";
pub const DEFAULT_RESOLVER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RESOLVER_BATCH_SIZE: usize = 1000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default, alias = "WORKING_DIR")]
    pub working_dir: Option<String>,
    #[serde(default, alias = "PATH_TO_DATASETS")]
    pub datasets_dir: Option<String>,
    #[serde(default, alias = "FIELDS")]
    pub fields: Vec<String>,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub normalize_workers: Option<usize>,
    #[serde(default)]
    pub read_workers: Option<usize>,
    #[serde(default)]
    pub resolver: Option<ResolverEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ResolverEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    pub base_url: String,
    pub species: String,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_RESOLVER_URL.to_string(),
            species: DEFAULT_SPECIES.to_string(),
            timeout: Duration::from_secs(DEFAULT_RESOLVER_TIMEOUT_SECS),
            batch_size: DEFAULT_RESOLVER_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub datasets_dir: Utf8PathBuf,
    pub fields: Vec<String>,
    pub normalize_workers: usize,
    pub read_workers: usize,
    pub resolver: ResolverSettings,
}

impl ResolvedConfig {
    pub fn for_root(datasets_dir: Utf8PathBuf, fields: Vec<String>) -> Self {
        Self {
            schema_version: 1,
            datasets_dir,
            fields,
            normalize_workers: DEFAULT_NORMALIZE_WORKERS,
            read_workers: DEFAULT_READ_WORKERS,
            resolver: ResolverSettings::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, UnifyError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(UnifyError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| UnifyError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| UnifyError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, UnifyError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let datasets_dir = match (config.datasets_dir, config.working_dir) {
            (Some(dir), _) => Utf8PathBuf::from(dir),
            (None, Some(working_dir)) => Utf8PathBuf::from(working_dir).join("DataSets"),
            (None, None) => {
                return Err(UnifyError::ConfigParse(
                    "either working_dir or datasets_dir must be set".to_string(),
                ));
            }
        };

        validate_fields(&config.fields)?;

        let resolver_entry = config.resolver.unwrap_or_default();
        let resolver = ResolverSettings {
            base_url: resolver_entry
                .base_url
                .unwrap_or_else(|| DEFAULT_RESOLVER_URL.to_string()),
            species: config
                .species
                .unwrap_or_else(|| DEFAULT_SPECIES.to_string()),
            timeout: Duration::from_secs(
                resolver_entry
                    .timeout_secs
                    .unwrap_or(DEFAULT_RESOLVER_TIMEOUT_SECS),
            ),
            batch_size: resolver_entry
                .batch_size
                .unwrap_or(DEFAULT_RESOLVER_BATCH_SIZE)
                .max(1),
        };

        Ok(ResolvedConfig {
            schema_version,
            datasets_dir,
            fields: config.fields,
            normalize_workers: config
                .normalize_workers
                .unwrap_or(DEFAULT_NORMALIZE_WORKERS)
                .max(1),
            read_workers: config
                .read_workers
                .unwrap_or(DEFAULT_READ_WORKERS)
                .max(1),
            resolver,
        })
    }
}

pub fn validate_fields(fields: &[String]) -> Result<(), UnifyError> {
    if fields.is_empty() {
        return Err(UnifyError::ConfigParse(
            "fields must list at least one canonical field".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for field in fields {
        if field.trim().is_empty() {
            return Err(UnifyError::ConfigParse("empty canonical field name".to_string()));
        }
        if !seen.insert(field.as_str()) {
            return Err(UnifyError::ConfigParse(format!(
                "duplicate canonical field: {field}"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingEntry {
    #[serde(rename = "MAP")]
    pub map: String,
    #[serde(rename = "HEADER", default)]
    pub header: Option<String>,
    #[serde(rename = "DATA", default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MappingConfig {
    fields: BTreeMap<String, FieldMapping>,
}

impl MappingConfig {
    /// Loads `md_config.json`. `Ok(None)` means the dataset has no mapping file.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>, UnifyError> {
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(_) => return Err(UnifyError::ConfigRead(path.as_std_path().to_path_buf())),
        };
        Self::parse(&content)
            .map_err(|err| match err {
                UnifyError::ConfigParse(reason) => {
                    UnifyError::ConfigParse(format!("{path}: {reason}"))
                }
                other => other,
            })
            .map(Some)
    }

    pub fn parse(content: &str) -> Result<Self, UnifyError> {
        let entries: BTreeMap<String, MappingEntry> = serde_json::from_str(content)
            .map_err(|err| UnifyError::ConfigParse(err.to_string()))?;
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: BTreeMap<String, MappingEntry>) -> Result<Self, UnifyError> {
        let mut fields = BTreeMap::new();
        for (field, entry) in entries {
            let transform = Transform::from_name(&field, &entry.map, entry.data.as_ref())?;
            if transform.needs_header() && entry.header.is_none() {
                return Err(UnifyError::InvalidMapping {
                    field,
                    reason: format!("{} requires a HEADER", transform.name()),
                });
            }
            fields.insert(field, FieldMapping::new(entry.header, transform));
        }
        Ok(Self { fields })
    }

    pub fn get(&self, field: &str) -> Option<&FieldMapping> {
        self.fields.get(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_defaults() {
        let config = Config {
            working_dir: Some("/data".to_string()),
            fields: vec!["sex".to_string(), "age".to_string()],
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.datasets_dir, Utf8PathBuf::from("/data/DataSets"));
        assert_eq!(resolved.read_workers, DEFAULT_READ_WORKERS);
        assert_eq!(resolved.resolver.species, "human");
    }
}
