use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::value::{CellValue, Record, keys_match, normalize_key};

/// Uniform access to an external tabular record store.
///
/// Key comparisons (`get_record_by_key`, filters, row location in writes) are trimmed and
/// case-insensitive for every backend.
pub trait RecordStore: Send {
    fn connect(&mut self, config: &Value) -> Result<()>;

    /// Header row; backends may serve it from a cache.
    fn get_headers(&mut self) -> Result<Vec<String>>;

    /// Header row read fresh from the backend.
    fn refresh_headers(&mut self) -> Result<Vec<String>> {
        self.get_headers()
    }

    fn get_all_records(&mut self) -> Result<Vec<Record>>;

    fn get_record_by_key(&mut self, key_column: &str, key_value: &str) -> Result<Option<Record>> {
        let records = self.get_all_records()?;
        Ok(records.into_iter().find(|record| {
            record
                .get(key_column)
                .is_some_and(|cell| keys_match(&cell.render(), key_value))
        }))
    }

    fn get_records_by_filter(&mut self, filters: &BTreeMap<String, CellValue>) -> Result<Vec<Record>> {
        let records = self.get_all_records()?;
        Ok(records
            .into_iter()
            .filter(|record| {
                filters.iter().all(|(column, expected)| {
                    let actual = record.get(column).cloned().unwrap_or_default();
                    keys_match(&actual.render(), &expected.render())
                })
            })
            .collect())
    }

    /// Writes `updates` into the row keyed by `key_value`, creating missing columns first.
    /// Returns `false` when no row matches.
    fn update_record(
        &mut self,
        key_column: &str,
        key_value: &str,
        updates: &BTreeMap<String, CellValue>,
    ) -> Result<bool>;

    /// Appends a column. Creating an existing column is a successful no-op.
    fn add_column(&mut self, name: &str, default_values: Option<&[CellValue]>) -> Result<bool>;

    /// Sets `column` for every row whose key is in `values` (keyed by key value).
    fn update_column_values(
        &mut self,
        column: &str,
        key_column: &str,
        values: &BTreeMap<String, CellValue>,
    ) -> Result<bool>;

    fn get_column_values(&mut self, column: &str) -> Result<Vec<CellValue>>;
}

#[derive(Debug, Default, Deserialize)]
struct InMemorySeed {
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    records: Vec<BTreeMap<String, Value>>,
}

/// Record store held entirely in memory. Used for dry runs and as the reference backend
/// in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    headers: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl InMemoryStore {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn with_records(headers: Vec<String>, records: Vec<Record>) -> Self {
        let mut store = Self::new(headers);
        for record in records {
            store.push_record(record);
        }
        store
    }

    pub fn push_record(&mut self, record: Record) {
        let row = self
            .headers
            .iter()
            .map(|header| record.get(header).cloned().unwrap_or_default())
            .collect();
        self.rows.push(row);
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == column)
    }

    fn row_index(&self, key_column: &str, key_value: &str) -> Result<Option<usize>> {
        let key_idx = self
            .column_index(key_column)
            .ok_or_else(|| anyhow!("key column '{key_column}' not found in headers"))?;
        Ok(self.rows.iter().position(|row| {
            row.get(key_idx)
                .is_some_and(|cell| keys_match(&cell.render(), key_value))
        }))
    }

    fn to_record(&self, row: &[CellValue]) -> Record {
        self.headers
            .iter()
            .cloned()
            .zip(row.iter().cloned().chain(std::iter::repeat(CellValue::Empty)))
            .collect()
    }
}

impl RecordStore for InMemoryStore {
    fn connect(&mut self, config: &Value) -> Result<()> {
        if config.is_null() {
            return Ok(());
        }
        let seed: InMemorySeed = serde_json::from_value(config.clone())
            .with_context(|| "invalid in-memory store config")?;
        self.headers = seed.headers;
        self.rows.clear();
        for raw in seed.records {
            let mut record = Record::new();
            for (column, value) in raw {
                let cell = CellValue::from_json(&value)
                    .ok_or_else(|| anyhow!("column '{column}' holds a non-scalar value"))?;
                record.insert(column, cell);
            }
            self.push_record(record);
        }
        Ok(())
    }

    fn get_headers(&mut self) -> Result<Vec<String>> {
        Ok(self.headers.clone())
    }

    fn get_all_records(&mut self) -> Result<Vec<Record>> {
        Ok(self.rows.iter().map(|row| self.to_record(row)).collect())
    }

    fn update_record(
        &mut self,
        key_column: &str,
        key_value: &str,
        updates: &BTreeMap<String, CellValue>,
    ) -> Result<bool> {
        let Some(row_idx) = self.row_index(key_column, key_value)? else {
            return Ok(false);
        };
        for column in updates.keys() {
            if self.column_index(column).is_none() {
                self.add_column(column, None)?;
            }
        }
        for (column, value) in updates {
            if let Some(col_idx) = self.column_index(column) {
                self.rows[row_idx][col_idx] = value.clone();
            }
        }
        Ok(true)
    }

    fn add_column(&mut self, name: &str, default_values: Option<&[CellValue]>) -> Result<bool> {
        if name.trim().is_empty() {
            bail!("column name cannot be empty");
        }
        if self.column_index(name).is_some() {
            return Ok(true);
        }
        let existing_width = self.headers.len();
        self.headers.push(name.to_string());
        for (idx, row) in self.rows.iter_mut().enumerate() {
            row.resize(existing_width, CellValue::Empty);
            let value = default_values
                .and_then(|values| values.get(idx))
                .cloned()
                .unwrap_or_default();
            row.push(value);
        }
        Ok(true)
    }

    fn update_column_values(
        &mut self,
        column: &str,
        key_column: &str,
        values: &BTreeMap<String, CellValue>,
    ) -> Result<bool> {
        let col_idx = self
            .column_index(column)
            .ok_or_else(|| anyhow!("column '{column}' not found"))?;
        let key_idx = self
            .column_index(key_column)
            .ok_or_else(|| anyhow!("key column '{key_column}' not found"))?;
        let by_key: BTreeMap<String, &CellValue> = values
            .iter()
            .map(|(key, value)| (normalize_key(key), value))
            .collect();
        for row in &mut self.rows {
            let key = row.get(key_idx).map(CellValue::render).unwrap_or_default();
            if let Some(value) = by_key.get(&normalize_key(&key)) {
                row[col_idx] = (*value).clone();
            }
        }
        Ok(true)
    }

    fn get_column_values(&mut self, column: &str) -> Result<Vec<CellValue>> {
        let col_idx = self
            .column_index(column)
            .ok_or_else(|| anyhow!("column '{column}' not found"))?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(col_idx).cloned().unwrap_or_default())
            .collect())
    }
}
