use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::DatasetName;
use crate::error::UnifyError;

pub const RAW_METADATA_FILE: &str = "patients.csv";
pub const RAW_EXPRESSION_FILE: &str = "mrna.csv";
pub const MAPPING_CONFIG_FILE: &str = "md_config.json";
pub const CANONICAL_METADATA_FILE: &str = "UD_metadata.csv";
pub const CANONICAL_EXPRESSION_FILE: &str = "UD_mrna.csv";

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset: &DatasetName) -> Utf8PathBuf {
        self.root.join(dataset.as_str())
    }

    pub fn raw_metadata_path(&self, dataset: &DatasetName) -> Utf8PathBuf {
        self.dataset_dir(dataset).join(RAW_METADATA_FILE)
    }

    pub fn raw_expression_path(&self, dataset: &DatasetName) -> Utf8PathBuf {
        self.dataset_dir(dataset).join(RAW_EXPRESSION_FILE)
    }

    pub fn mapping_config_path(&self, dataset: &DatasetName) -> Utf8PathBuf {
        self.dataset_dir(dataset).join(MAPPING_CONFIG_FILE)
    }

    pub fn canonical_metadata_path(&self, dataset: &DatasetName) -> Utf8PathBuf {
        self.dataset_dir(dataset).join(CANONICAL_METADATA_FILE)
    }

    pub fn canonical_expression_path(&self, dataset: &DatasetName) -> Utf8PathBuf {
        self.dataset_dir(dataset).join(CANONICAL_EXPRESSION_FILE)
    }

    pub fn dataset_exists(&self, dataset: &DatasetName) -> bool {
        self.dataset_dir(dataset).as_std_path().is_dir()
    }

    pub fn list_datasets(&self) -> Result<Vec<DatasetName>, UnifyError> {
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| UnifyError::Filesystem(format!("list {}: {err}", self.root)))?;
        let mut datasets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| UnifyError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Ok(dataset) = name.parse::<DatasetName>() {
                datasets.push(dataset);
            }
        }
        datasets.sort();
        Ok(datasets)
    }

    pub fn status(&self, dataset: &DatasetName) -> DatasetStatus {
        let exists = |path: Utf8PathBuf| path.as_std_path().is_file();
        DatasetStatus {
            dataset: dataset.to_string(),
            raw_metadata: exists(self.raw_metadata_path(dataset)),
            raw_expression: exists(self.raw_expression_path(dataset)),
            mapping_config: exists(self.mapping_config_path(dataset)),
            canonical_metadata: exists(self.canonical_metadata_path(dataset)),
            canonical_expression: exists(self.canonical_expression_path(dataset)),
        }
    }

    /// Replaces `path` with `content` through a temporary file in the same directory.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), UnifyError> {
        let parent = path
            .parent()
            .ok_or_else(|| UnifyError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| UnifyError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".kira-unify")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| UnifyError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| UnifyError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| UnifyError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetStatus {
    pub dataset: String,
    pub raw_metadata: bool,
    pub raw_expression: bool,
    pub mapping_config: bool,
    pub canonical_metadata: bool,
    pub canonical_expression: bool,
}

impl DatasetStatus {
    pub fn is_normalized(&self) -> bool {
        self.canonical_metadata && self.canonical_expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new(Utf8PathBuf::from("/data/DataSets"));
        let dataset: DatasetName = "GSE1378".parse().unwrap();

        assert!(
            store
                .canonical_metadata_path(&dataset)
                .ends_with("GSE1378/UD_metadata.csv")
        );
        assert!(store.raw_expression_path(&dataset).ends_with("GSE1378/mrna.csv"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("nested").join("out.csv")).unwrap();
        Store::write_bytes_atomic(&path, b"first").unwrap();
        Store::write_bytes_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(path.as_std_path()).unwrap(), b"second");
    }
}
