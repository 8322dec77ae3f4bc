use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{DatasetName, GeneId, PatientId};
use crate::error::UnifyError;
use crate::explorer::Explorer;
use crate::resolver::GeneResolver;
use crate::table::{ExpressionTable, MetadataTable};

pub const SEX_FIELD: &str = "sex";
pub const AGE_FIELD: &str = "age";
pub const DEFAULT_MIN_AGE: f64 = 0.0;
pub const DEFAULT_MAX_AGE: f64 = 120.0;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetPool {
    datasets: Vec<DatasetName>,
}

impl DatasetPool {
    pub fn new(available: &[DatasetName], requested: &[String]) -> Self {
        let mut datasets: Vec<DatasetName> = requested
            .iter()
            .filter_map(|name| name.parse::<DatasetName>().ok())
            .filter(|name| available.contains(name))
            .collect();
        datasets.sort();
        datasets.dedup();
        Self { datasets }
    }

    pub fn remove(&self, names: &[String]) -> Self {
        let datasets = self
            .datasets
            .iter()
            .filter(|dataset| !names.iter().any(|name| name.trim() == dataset.as_str()))
            .cloned()
            .collect();
        Self { datasets }
    }

    pub fn datasets(&self) -> &[DatasetName] {
        &self.datasets
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Restriction {
    Sex { sex: String },
    Age { min: f64, max: f64 },
}

impl Restriction {
    pub fn matching_patients(&self, table: &MetadataTable) -> BTreeSet<PatientId> {
        let field = match self {
            Restriction::Sex { .. } => SEX_FIELD,
            Restriction::Age { .. } => AGE_FIELD,
        };
        let Some(position) = table.column_position(field) else {
            return BTreeSet::new();
        };
        table
            .index()
            .iter()
            .enumerate()
            .filter(|(row, _)| {
                let cell = table.cell(*row, position);
                match self {
                    Restriction::Sex { sex } => cell.equals_text(sex),
                    Restriction::Age { min, max } => cell
                        .as_f64()
                        .is_some_and(|age| age >= *min && age <= *max),
                }
            })
            .filter_map(|(_, id)| id.parse::<PatientId>().ok())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatientPool {
    patients: BTreeSet<PatientId>,
    restrictions: Vec<Restriction>,
}

impl PatientPool {
    pub fn universe(explorer: &Explorer, datasets: &DatasetPool) -> Self {
        let sets = explorer.fan_out(datasets.datasets(), |dataset| {
            explorer
                .read_metadata(dataset)
                .map(|table| {
                    table
                        .index()
                        .iter()
                        .filter_map(|id| id.parse::<PatientId>().ok())
                        .collect::<BTreeSet<_>>()
                })
                .unwrap_or_default()
        });
        Self {
            patients: sets.into_iter().flatten().collect(),
            restrictions: Vec::new(),
        }
    }

    pub fn restrict(
        &self,
        explorer: &Explorer,
        datasets: &DatasetPool,
        restriction: Restriction,
    ) -> Self {
        let sets = explorer.fan_out(datasets.datasets(), |dataset| {
            explorer
                .read_metadata(dataset)
                .map(|table| restriction.matching_patients(&table))
                .unwrap_or_default()
        });
        let admitted: BTreeSet<PatientId> = sets.into_iter().flatten().collect();
        let patients: BTreeSet<PatientId> =
            self.patients.intersection(&admitted).cloned().collect();
        debug!(
            restriction = ?restriction,
            before = self.patients.len(),
            after = patients.len(),
            "restricted patient pool"
        );
        let mut restrictions = self.restrictions.clone();
        restrictions.push(restriction);
        Self {
            patients,
            restrictions,
        }
    }

    pub fn restrict_by_sex(&self, explorer: &Explorer, datasets: &DatasetPool, sex: &str) -> Self {
        self.restrict(
            explorer,
            datasets,
            Restriction::Sex {
                sex: sex.to_string(),
            },
        )
    }

    pub fn restrict_by_age(
        &self,
        explorer: &Explorer,
        datasets: &DatasetPool,
        min: f64,
        max: f64,
    ) -> Self {
        self.restrict(explorer, datasets, Restriction::Age { min, max })
    }

    /// Recomputes the universe over `datasets` and replays every restriction.
    pub fn rebuild(&self, explorer: &Explorer, datasets: &DatasetPool) -> Self {
        self.restrictions
            .iter()
            .fold(Self::universe(explorer, datasets), |pool, restriction| {
                pool.restrict(explorer, datasets, restriction.clone())
            })
    }

    pub fn patients(&self) -> &BTreeSet<PatientId> {
        &self.patients
    }

    pub fn restrictions(&self) -> &[Restriction] {
        &self.restrictions
    }

    pub fn contains_str(&self, patient: &str) -> bool {
        patient
            .parse::<PatientId>()
            .is_ok_and(|patient| self.patients.contains(&patient))
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenePool {
    genes: BTreeSet<GeneId>,
}

impl GenePool {
    pub fn restrict_by_symbols<R: GeneResolver + ?Sized>(
        &self,
        resolver: &R,
        symbols: &[String],
    ) -> Result<Self, UnifyError> {
        if symbols.is_empty() {
            return Ok(self.clone());
        }
        let resolved = resolver.resolve(symbols)?;
        let mut genes = self.genes.clone();
        for (symbol, id) in resolved {
            match id {
                Some(id) => {
                    genes.insert(id);
                }
                None => info!(symbol = %symbol, "gene symbol not found"),
            }
        }
        Ok(Self { genes })
    }

    pub fn restrict_by_ids(&self, ids: &[GeneId]) -> Self {
        let mut genes = self.genes.clone();
        genes.extend(ids.iter().copied());
        Self { genes }
    }

    pub fn reset(&self) -> Self {
        Self::default()
    }

    /// An empty pool places no restriction on genes.
    pub fn is_unrestricted(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn genes(&self) -> &BTreeSet<GeneId> {
        &self.genes
    }

    pub fn contains(&self, gene: GeneId) -> bool {
        self.genes.contains(&gene)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

#[derive(Clone)]
pub struct DataPool {
    explorer: Explorer,
    datasets: DatasetPool,
    patients: PatientPool,
    genes: GenePool,
}

impl DataPool {
    pub fn new(explorer: Explorer, requested: &[String]) -> Result<Self, UnifyError> {
        let available = explorer.all_datasets()?;
        let datasets = DatasetPool::new(&available, requested);
        let patients = PatientPool::universe(&explorer, &datasets);
        info!(
            datasets = datasets.len(),
            patients = patients.len(),
            "created data pool"
        );
        Ok(Self {
            explorer,
            datasets,
            patients,
            genes: GenePool::default(),
        })
    }

    pub fn datasets(&self) -> &DatasetPool {
        &self.datasets
    }

    pub fn patients(&self) -> &PatientPool {
        &self.patients
    }

    pub fn genes(&self) -> &GenePool {
        &self.genes
    }

    pub fn remove_datasets(&self, names: &[String]) -> Self {
        let datasets = self.datasets.remove(names);
        let patients = self.patients.rebuild(&self.explorer, &datasets);
        Self {
            explorer: self.explorer.clone(),
            datasets,
            patients,
            genes: self.genes.clone(),
        }
    }

    pub fn restrict_by_sex(&self, sex: &str) -> Self {
        let patients = self
            .patients
            .restrict_by_sex(&self.explorer, &self.datasets, sex);
        self.with_patients(patients)
    }

    pub fn restrict_by_age(&self, min: f64, max: f64) -> Self {
        let patients = self
            .patients
            .restrict_by_age(&self.explorer, &self.datasets, min, max);
        self.with_patients(patients)
    }

    pub fn restrict_genes_by_symbols<R: GeneResolver + ?Sized>(
        &self,
        resolver: &R,
        symbols: &[String],
    ) -> Result<Self, UnifyError> {
        let genes = self.genes.restrict_by_symbols(resolver, symbols)?;
        Ok(self.with_genes(genes))
    }

    pub fn restrict_genes_by_ids(&self, ids: &[GeneId]) -> Self {
        self.with_genes(self.genes.restrict_by_ids(ids))
    }

    pub fn reset_genes(&self) -> Self {
        self.with_genes(self.genes.reset())
    }

    pub fn get_metadata(&self) -> MetadataTable {
        self.explorer.get_metadata(self)
    }

    pub fn get_expression(&self) -> ExpressionTable<GeneId> {
        self.explorer.get_expression(self)
    }

    fn with_patients(&self, patients: PatientPool) -> Self {
        Self {
            explorer: self.explorer.clone(),
            datasets: self.datasets.clone(),
            patients,
            genes: self.genes.clone(),
        }
    }

    fn with_genes(&self, genes: GenePool) -> Self {
        Self {
            explorer: self.explorer.clone(),
            datasets: self.datasets.clone(),
            patients: self.patients.clone(),
            genes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn dataset_pool_drops_unknown_names() {
        let available: Vec<DatasetName> = ["A", "B"].iter().map(|n| n.parse().unwrap()).collect();
        let pool = DatasetPool::new(&available, &names(&["B", "Z", "A", "B"]));
        let listed: Vec<&str> = pool.datasets().iter().map(DatasetName::as_str).collect();
        assert_eq!(listed, vec!["A", "B"]);

        let removed = pool.remove(&names(&["A", "missing"]));
        assert_eq!(removed.len(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn gene_pool_accumulates_and_resets() {
        let pool = GenePool::default();
        assert!(pool.is_unrestricted());
        let pool = pool.restrict_by_ids(&[GeneId::new(15), GeneId::new(7157)]);
        assert_eq!(pool.len(), 2);
        assert!(pool.reset().is_unrestricted());
    }
}
