use std::sync::Arc;

use rayon::prelude::*;
use tracing::{error, warn};

use crate::domain::{DatasetName, GeneId};
use crate::error::UnifyError;
use crate::pool::DataPool;
use crate::store::Store;
use crate::table::{ExpressionTable, MetadataTable};

#[derive(Clone)]
pub struct Explorer {
    store: Store,
    readers: Arc<rayon::ThreadPool>,
}

impl Explorer {
    pub fn new(store: Store, read_workers: usize) -> Result<Self, UnifyError> {
        let readers = rayon::ThreadPoolBuilder::new()
            .num_threads(read_workers.max(1))
            .build()
            .map_err(|err| UnifyError::WorkerPool(err.to_string()))?;
        Ok(Self {
            store,
            readers: Arc::new(readers),
        })
    }

    pub fn all_datasets(&self) -> Result<Vec<DatasetName>, UnifyError> {
        self.store.list_datasets()
    }

    pub fn create_data_pool(&self, requested: &[String]) -> Result<DataPool, UnifyError> {
        DataPool::new(self.clone(), requested)
    }

    pub fn fan_out<T, F>(&self, datasets: &[DatasetName], task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&DatasetName) -> T + Sync + Send,
    {
        self.readers
            .install(|| datasets.par_iter().map(|dataset| task(dataset)).collect())
    }

    pub fn read_metadata(&self, dataset: &DatasetName) -> Option<MetadataTable> {
        let path = self.store.canonical_metadata_path(dataset);
        match MetadataTable::load(&path) {
            Ok(Some(table)) => Some(table),
            Ok(None) => {
                warn!(dataset = %dataset, "no canonical metadata; dataset contributes no patients");
                None
            }
            Err(err) => {
                error!(dataset = %dataset, error = %err, "canonical metadata unreadable");
                None
            }
        }
    }

    pub fn read_expression(&self, dataset: &DatasetName) -> Option<ExpressionTable<GeneId>> {
        let path = self.store.canonical_expression_path(dataset);
        match ExpressionTable::<GeneId>::load(&path) {
            Ok(Some(table)) => Some(table),
            Ok(None) => {
                warn!(dataset = %dataset, "no canonical expression; dataset contributes no genes");
                None
            }
            Err(err) => {
                error!(dataset = %dataset, error = %err, "canonical expression unreadable");
                None
            }
        }
    }

    pub fn get_metadata(&self, pool: &DataPool) -> MetadataTable {
        let patients = pool.patients();
        let tables = self.fan_out(pool.datasets().datasets(), |dataset| {
            self.read_metadata(dataset)
                .map(|table| table.filter_rows(|id| patients.contains_str(id)))
        });
        MetadataTable::concat(tables.into_iter().flatten().collect())
    }

    // Columns always follow the patient pool; rows follow the gene pool only when it is non-empty.
    pub fn get_expression(&self, pool: &DataPool) -> ExpressionTable<GeneId> {
        let patients = pool.patients();
        let genes = pool.genes();
        let tables = self.fan_out(pool.datasets().datasets(), |dataset| {
            let table = self
                .read_expression(dataset)?
                .filter_columns(|column| patients.contains_str(column));
            if genes.is_unrestricted() {
                Some(table)
            } else {
                Some(table.filter_rows(|gene| genes.contains(*gene)))
            }
        });
        tables
            .into_iter()
            .flatten()
            .fold(ExpressionTable::default(), ExpressionTable::outer_join)
    }
}
