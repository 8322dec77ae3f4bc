use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::warn;

use crate::config::ResolvedConfig;
use crate::domain::{DatasetName, GeneId};
use crate::error::UnifyError;
use crate::explorer::Explorer;
use crate::normalize::{ArtifactStatus, DatasetReport, Normalizer, SterilizeReport};
use crate::pool::{DEFAULT_MAX_AGE, DEFAULT_MIN_AGE};
use crate::resolver::GeneResolver;
use crate::store::{DatasetStatus, Store};

pub const QUERY_METADATA_FILE: &str = "metadata.csv";
pub const QUERY_EXPRESSION_FILE: &str = "mrna.csv";
const INVALID_NAME_REASON: &str = "invalid dataset name";

#[derive(Debug, Clone, Default)]
pub struct SterilizeOptions {
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Datasets to pool; `None` means every dataset under the root.
    pub datasets: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub sex: Option<String>,
    pub min_age: Option<f64>,
    pub max_age: Option<f64>,
    pub symbols: Vec<String>,
    pub gene_ids: Vec<GeneId>,
    pub output_dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub datasets: Vec<String>,
    pub patients: usize,
    pub genes_in_pool: usize,
    pub metadata_rows: usize,
    pub expression_rows: usize,
    pub expression_columns: usize,
    pub metadata_path: String,
    pub expression_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub root: String,
    pub datasets: Vec<DatasetStatus>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<R: GeneResolver> {
    config: ResolvedConfig,
    store: Store,
    resolver: R,
}

impl<R: GeneResolver> App<R> {
    pub fn new(config: ResolvedConfig, resolver: R) -> Self {
        let store = Store::new(config.datasets_dir.clone());
        Self {
            config,
            store,
            resolver,
        }
    }

    pub fn sterilize(
        &self,
        targets: Option<Vec<String>>,
        options: SterilizeOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SterilizeReport, UnifyError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; scanning {}", self.store.root()),
            elapsed: None,
        });
        let mut invalid = Vec::new();
        let datasets = match targets {
            Some(names) => names
                .into_iter()
                .filter_map(|name| match name.parse::<DatasetName>() {
                    Ok(dataset) => Some(dataset),
                    Err(err) => {
                        warn!(dataset = %name, error = %err, "invalid dataset name; skipping");
                        invalid.push(name);
                        None
                    }
                })
                .collect(),
            None => self.store.list_datasets()?,
        };

        sink.event(ProgressEvent {
            message: format!("phase=Normalize; {} datasets", datasets.len()),
            elapsed: None,
        });
        let start = Instant::now();
        let normalizer = Normalizer::new(
            self.store.clone(),
            self.config.fields.clone(),
            &self.resolver,
            self.config.normalize_workers,
        );
        let mut report = normalizer.sterilize(&datasets, options.force)?;
        report
            .datasets
            .extend(invalid.into_iter().map(|name| DatasetReport {
                dataset: name,
                metadata: ArtifactStatus::Skipped {
                    reason: INVALID_NAME_REASON.to_string(),
                },
                expression: ArtifactStatus::Skipped {
                    reason: INVALID_NAME_REASON.to_string(),
                },
            }));
        sink.event(ProgressEvent {
            message: format!("phase=Done; {} failures", report.failures()),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> Result<ListResult, UnifyError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; scanning {}", self.store.root()),
            elapsed: None,
        });
        let datasets = self
            .store
            .list_datasets()?
            .iter()
            .map(|dataset| self.store.status(dataset))
            .collect();
        Ok(ListResult {
            root: self.store.root().to_string(),
            datasets,
        })
    }

    pub fn query(
        &self,
        request: QueryRequest,
        sink: &dyn ProgressSink,
    ) -> Result<QueryResult, UnifyError> {
        let start = Instant::now();
        let explorer = Explorer::new(self.store.clone(), self.config.read_workers)?;
        let requested = match request.datasets {
            Some(names) => names,
            None => explorer
                .all_datasets()?
                .iter()
                .map(DatasetName::to_string)
                .collect(),
        };

        sink.event(ProgressEvent {
            message: format!("phase=Pool; {} datasets requested", requested.len()),
            elapsed: None,
        });
        let mut pool = explorer.create_data_pool(&requested)?;
        if !request.exclude.is_empty() {
            pool = pool.remove_datasets(&request.exclude);
        }
        if let Some(sex) = &request.sex {
            pool = pool.restrict_by_sex(sex);
        }
        if request.min_age.is_some() || request.max_age.is_some() {
            pool = pool.restrict_by_age(
                request.min_age.unwrap_or(DEFAULT_MIN_AGE),
                request.max_age.unwrap_or(DEFAULT_MAX_AGE),
            );
        }
        pool = pool.restrict_genes_by_symbols(&self.resolver, &request.symbols)?;
        pool = pool.restrict_genes_by_ids(&request.gene_ids);

        sink.event(ProgressEvent {
            message: format!(
                "phase=Assemble; {} patients, {} genes",
                pool.patients().len(),
                pool.genes().len()
            ),
            elapsed: None,
        });
        let metadata = pool.get_metadata();
        let expression = pool.get_expression();

        let metadata_path = request.output_dir.join(QUERY_METADATA_FILE);
        let expression_path = request.output_dir.join(QUERY_EXPRESSION_FILE);
        Store::write_bytes_atomic(&metadata_path, &metadata.to_csv_bytes()?)?;
        Store::write_bytes_atomic(&expression_path, &expression.to_csv_bytes()?)?;

        let (expression_rows, expression_columns) = expression.shape();
        sink.event(ProgressEvent {
            message: "phase=Done; tables written".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(QueryResult {
            datasets: pool
                .datasets()
                .datasets()
                .iter()
                .map(DatasetName::to_string)
                .collect(),
            patients: pool.patients().len(),
            genes_in_pool: pool.genes().len(),
            metadata_rows: metadata.len(),
            expression_rows,
            expression_columns,
            metadata_path: metadata_path.to_string(),
            expression_path: expression_path.to_string(),
        })
    }
}
