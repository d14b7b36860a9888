//! An in-memory warehouse.

use crate::errors::WarehouseError;
use crate::quality::Metric;
use crate::storage::ObjectStorage;
use crate::warehouse::{TableKind, Warehouse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type Row = HashMap<String, String>;

/// Keeps staging rows as string maps and evaluates metrics in memory.
///
/// Empty CSV fields load as NULL, the way `COPY ... CSV` treats them.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    storage: Option<Arc<dyn ObjectStorage>>,
    tables: Mutex<HashMap<TableKind, Vec<Row>>>,
    created: Mutex<HashSet<TableKind>>,
}

impl MemoryWarehouse {
    /// A warehouse that cannot COPY.
    pub fn new() -> Self {
        Self::default()
    }

    /// A warehouse that COPYs from `storage`.
    pub fn with_storage(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            storage: Some(storage),
            ..Self::default()
        }
    }

    /// Adds chart rows with only `song_id` and `popularity` set.
    pub fn insert_chart_rows(&self, rows: &[(&str, i64)]) {
        let mut tables = self.tables.lock();
        let table = tables.entry(TableKind::ChartSongs).or_default();
        for (id, popularity) in rows {
            table.push(Row::from([
                ("song_id".to_string(), (*id).to_string()),
                ("popularity".to_string(), popularity.to_string()),
            ]));
        }
    }

    /// Adds attribute rows with only `song_id` set.
    pub fn insert_attribute_ids(&self, ids: &[&str]) {
        let mut tables = self.tables.lock();
        let table = tables.entry(TableKind::SongAttributes).or_default();
        for id in ids {
            table.push(Row::from([("song_id".to_string(), (*id).to_string())]));
        }
    }

    /// Rows currently in a table.
    pub fn rows(&self, table: TableKind) -> usize {
        self.tables.lock().get(&table).map_or(0, Vec::len)
    }

    /// True once `create_table` ran for the table.
    pub fn is_created(&self, table: TableKind) -> bool {
        self.created.lock().contains(&table)
    }

    fn values(&self, table: TableKind, column: &str) -> Vec<String> {
        self.tables
            .lock()
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get(column))
                    .filter(|v| !v.trim().is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn numbers(&self, table: TableKind, column: &str) -> Result<Vec<f64>, WarehouseError> {
        self.values(table, column)
            .iter()
            .map(|v| {
                v.parse::<f64>().map_err(|_| {
                    WarehouseError::Unsupported(format!("non-numeric value '{v}' in {column}"))
                })
            })
            .collect()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn create_table(&self, table: TableKind) -> Result<(), WarehouseError> {
        self.created.lock().insert(table);
        self.tables.lock().entry(table).or_default();
        Ok(())
    }

    async fn copy_from_storage(
        &self,
        table: TableKind,
        bucket: &str,
        key: &str,
    ) -> Result<(), WarehouseError> {
        let load_error = |message: String| WarehouseError::Load {
            key: key.to_string(),
            message,
        };
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| load_error("no storage attached".to_string()))?;
        if storage.bucket() != bucket {
            return Err(load_error(format!("unknown bucket '{bucket}'")));
        }
        let body = storage.get(key).await.map_err(|e| load_error(e.to_string()))?;

        let mut reader = csv::Reader::from_reader(body.as_ref());
        let headers = reader.headers().map_err(|e| load_error(e.to_string()))?.clone();
        let mut loaded = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| load_error(e.to_string()))?;
            loaded.push(
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect::<Row>(),
            );
        }

        self.tables.lock().entry(table).or_default().extend(loaded);
        Ok(())
    }

    async fn truncate(&self, table: TableKind) -> Result<(), WarehouseError> {
        if let Some(rows) = self.tables.lock().get_mut(&table) {
            rows.clear();
        }
        Ok(())
    }

    async fn measure(&self, table: TableKind, metric: &Metric) -> Result<Option<f64>, WarehouseError> {
        #[allow(clippy::cast_precision_loss)]
        let count = |n: usize| Some(n as f64);

        let value = match metric {
            Metric::RowCount => count(self.rows(table)),
            Metric::MissingCount(col) => count(self.rows(table) - self.values(table, col).len()),
            Metric::DuplicateCount(col) => {
                let values = self.values(table, col);
                let distinct: HashSet<&String> = values.iter().collect();
                count(values.len() - distinct.len())
            }
            Metric::Min(col) => self.numbers(table, col)?.into_iter().reduce(f64::min),
            Metric::Max(col) => self.numbers(table, col)?.into_iter().reduce(f64::max),
            Metric::OrphanCount(col) => {
                let known: HashSet<String> = self.values(table.other(), col).into_iter().collect();
                count(
                    self.values(table, col)
                        .iter()
                        .filter(|v| !known.contains(*v))
                        .count(),
                )
            }
        };
        Ok(value)
    }

    async fn row_count(&self, table: TableKind) -> Result<u64, WarehouseError> {
        Ok(self.rows(table) as u64)
    }
}
