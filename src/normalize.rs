use std::collections::HashSet;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::MappingConfig;
use crate::domain::{DatasetName, GeneId, PatientId};
use crate::error::UnifyError;
use crate::mapping::FieldMapping;
use crate::resolver::GeneResolver;
use crate::store::{
    MAPPING_CONFIG_FILE, RAW_EXPRESSION_FILE, RAW_METADATA_FILE, Store,
};
use crate::table::{ExpressionTable, MetadataTable};

pub const PATIENT_INDEX: &str = "patient_id";
pub const GENE_INDEX: &str = "gene_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Metadata,
    Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Config,
    Malformed,
    Resolver,
    Filesystem,
}

impl FailureKind {
    pub fn of(err: &UnifyError) -> Self {
        match err {
            err if err.is_resolver() => FailureKind::Resolver,
            UnifyError::MalformedTable { .. } => FailureKind::Malformed,
            UnifyError::Filesystem(_) | UnifyError::WorkerPool(_) => FailureKind::Filesystem,
            _ => FailureKind::Config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Written { rows: usize, columns: usize },
    UpToDate,
    Skipped { reason: String },
    Failed { kind: FailureKind, error: String },
}

impl ArtifactStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ArtifactStatus::Failed { .. })
    }

    pub fn is_written(&self) -> bool {
        matches!(self, ArtifactStatus::Written { .. })
    }

    fn skipped(reason: impl Into<String>) -> Self {
        ArtifactStatus::Skipped {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub metadata: ArtifactStatus,
    pub expression: ArtifactStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SterilizeReport {
    pub root: String,
    pub generated_at: String,
    pub force: bool,
    pub datasets: Vec<DatasetReport>,
    /// Set when resolution was needed and failed for every dataset that needed it.
    pub resolver_outage: bool,
}

impl SterilizeReport {
    pub fn failures(&self) -> usize {
        self.datasets
            .iter()
            .flat_map(|report| [&report.metadata, &report.expression])
            .filter(|status| status.is_failed())
            .count()
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetReport> {
        self.datasets.iter().find(|report| report.dataset == name)
    }
}

pub struct Normalizer<R> {
    store: Store,
    fields: Vec<String>,
    resolver: R,
    workers: usize,
}

impl<R: GeneResolver> Normalizer<R> {
    pub fn new(store: Store, fields: Vec<String>, resolver: R, workers: usize) -> Self {
        Self {
            store,
            fields,
            resolver,
            workers: workers.max(1),
        }
    }

    pub fn normalize_metadata(
        &self,
        dataset: &DatasetName,
        force: bool,
    ) -> Result<ArtifactStatus, UnifyError> {
        let target = self.store.canonical_metadata_path(dataset);
        if !force && target.as_std_path().exists() {
            debug!(dataset = %dataset, "canonical metadata up to date");
            return Ok(ArtifactStatus::UpToDate);
        }

        let Some(mapping) = MappingConfig::load(&self.store.mapping_config_path(dataset))? else {
            warn!(dataset = %dataset, "no {MAPPING_CONFIG_FILE} found; skipping metadata");
            return Ok(ArtifactStatus::skipped(format!("no {MAPPING_CONFIG_FILE}")));
        };
        let Some(raw) = MetadataTable::load(&self.store.raw_metadata_path(dataset))? else {
            warn!(dataset = %dataset, "no {RAW_METADATA_FILE} found; skipping metadata");
            return Ok(ArtifactStatus::skipped(format!("no {RAW_METADATA_FILE}")));
        };

        let canonical = self.build_metadata(dataset, &raw, &mapping);
        Store::write_bytes_atomic(&target, &canonical.to_csv_bytes()?)?;
        info!(
            dataset = %dataset,
            patients = canonical.len(),
            "wrote canonical metadata"
        );
        Ok(ArtifactStatus::Written {
            rows: canonical.len(),
            columns: canonical.columns().len(),
        })
    }

    pub fn build_metadata(
        &self,
        dataset: &DatasetName,
        raw: &MetadataTable,
        mapping: &MappingConfig,
    ) -> MetadataTable {
        for extra in mapping
            .field_names()
            .filter(|field| !self.fields.iter().any(|known| known == field))
        {
            debug!(dataset = %dataset, field = extra, "mapping for unknown field ignored");
        }

        let index = raw
            .index()
            .iter()
            .map(|raw_id| PatientId::new(dataset, raw_id).to_string())
            .collect();
        let mut canonical = MetadataTable::with_index(PATIENT_INDEX, index);
        let unmapped = FieldMapping::missing();
        for field in &self.fields {
            let field_mapping = mapping.get(field).unwrap_or(&unmapped);
            canonical.push_column(field, field_mapping.apply(raw));
        }
        canonical
    }

    pub fn normalize_expression(
        &self,
        dataset: &DatasetName,
        force: bool,
    ) -> Result<ArtifactStatus, UnifyError> {
        let target = self.store.canonical_expression_path(dataset);
        if !force && target.as_std_path().exists() {
            debug!(dataset = %dataset, "canonical expression up to date");
            return Ok(ArtifactStatus::UpToDate);
        }

        let raw = ExpressionTable::<String>::load(&self.store.raw_expression_path(dataset))?;
        let Some(raw) = raw else {
            warn!(dataset = %dataset, "no {RAW_EXPRESSION_FILE} found; skipping expression");
            return Ok(ArtifactStatus::skipped(format!("no {RAW_EXPRESSION_FILE}")));
        };

        let canonical = self.build_expression(dataset, raw)?;
        Store::write_bytes_atomic(&target, &canonical.to_csv_bytes()?)?;
        let (rows, columns) = canonical.shape();
        info!(dataset = %dataset, genes = rows, patients = columns, "wrote canonical expression");
        Ok(ArtifactStatus::Written { rows, columns })
    }

    pub fn build_expression(
        &self,
        dataset: &DatasetName,
        raw: ExpressionTable<String>,
    ) -> Result<ExpressionTable<GeneId>, UnifyError> {
        let raw = raw.map_columns(|raw_id| PatientId::new(dataset, raw_id).to_string());
        let gene_map = self.resolver.resolve(raw.rows())?;

        let symbols = raw.rows().len();
        let resolved =
            raw.rekey(GENE_INDEX, |symbol| gene_map.get(symbol).copied().flatten());
        let dropped = symbols - resolved.rows().len();
        if dropped > 0 {
            debug!(dataset = %dataset, dropped, "dropped unresolved gene symbols");
        }
        Ok(resolved.dedup_keep_first().sort_rows())
    }

    pub fn sterilize(
        &self,
        datasets: &[DatasetName],
        force: bool,
    ) -> Result<SterilizeReport, UnifyError> {
        let mut seen = HashSet::new();
        let datasets: Vec<&DatasetName> = datasets
            .iter()
            .filter(|dataset| seen.insert(*dataset))
            .collect();
        info!(root = %self.store.root(), datasets = datasets.len(), force, "sterilizing");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|err| UnifyError::WorkerPool(err.to_string()))?;

        let tasks: Vec<(usize, Artifact)> = (0..datasets.len())
            .flat_map(|position| {
                [
                    (position, Artifact::Metadata),
                    (position, Artifact::Expression),
                ]
            })
            .collect();
        let outcomes: Vec<ArtifactStatus> = pool.install(|| {
            tasks
                .par_iter()
                .map(|(position, artifact)| self.run_task(datasets[*position], *artifact, force))
                .collect()
        });

        let mut reports: Vec<DatasetReport> = datasets
            .iter()
            .map(|dataset| DatasetReport {
                dataset: dataset.to_string(),
                metadata: ArtifactStatus::UpToDate,
                expression: ArtifactStatus::UpToDate,
            })
            .collect();
        for ((position, artifact), status) in tasks.into_iter().zip(outcomes) {
            match artifact {
                Artifact::Metadata => reports[position].metadata = status,
                Artifact::Expression => reports[position].expression = status,
            }
        }

        let resolver_failures = reports
            .iter()
            .filter(|report| {
                matches!(
                    report.expression,
                    ArtifactStatus::Failed {
                        kind: FailureKind::Resolver,
                        ..
                    }
                )
            })
            .count();
        let resolved = reports
            .iter()
            .filter(|report| report.expression.is_written())
            .count();
        let resolver_outage = resolver_failures > 0 && resolved == 0;
        if resolver_outage {
            error!(failures = resolver_failures, "gene resolver unavailable for the whole batch");
        }

        info!("sterilize done");
        Ok(SterilizeReport {
            root: self.store.root().to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            force,
            datasets: reports,
            resolver_outage,
        })
    }

    fn run_task(&self, dataset: &DatasetName, artifact: Artifact, force: bool) -> ArtifactStatus {
        if !self.store.dataset_exists(dataset) {
            warn!(dataset = %dataset, "dataset directory not found; skipping");
            return ArtifactStatus::skipped("dataset directory not found");
        }
        let result = match artifact {
            Artifact::Metadata => self.normalize_metadata(dataset, force),
            Artifact::Expression => self.normalize_expression(dataset, force),
        };
        result.unwrap_or_else(|err| {
            if matches!(err, UnifyError::ResolverTimeout(_)) {
                warn!(dataset = %dataset, artifact = ?artifact, error = %err, "gene resolution timed out; skipping");
                return ArtifactStatus::skipped("gene resolver timed out");
            }
            error!(dataset = %dataset, artifact = ?artifact, error = %err, "normalization failed");
            ArtifactStatus::Failed {
                kind: FailureKind::of(&err),
                error: err.to_string(),
            }
        })
    }
}
