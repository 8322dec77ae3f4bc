use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::hash::Hash;
use std::io;
use std::str::FromStr;

use camino::Utf8Path;

use crate::error::UnifyError;

pub const MISSING_MARKERS: [&str; 8] = ["", "NA", "N/A", "NaN", "nan", "NULL", "null", "<NA>"];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn from_raw(value: &str) -> Self {
        if MISSING_MARKERS.contains(&value.trim()) {
            Cell::Missing
        } else {
            Cell::Text(value.to_string())
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(value) => Some(*value).filter(|v| !v.is_nan()),
            Cell::Text(value) => value.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
            Cell::Missing => None,
        }
    }

    pub fn equals_text(&self, value: &str) -> bool {
        match self {
            Cell::Missing => false,
            Cell::Text(text) => text == value,
            Cell::Number(number) => number.to_string() == value,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => Ok(()),
            Cell::Text(value) => write!(f, "{value}"),
            Cell::Number(value) => write!(f, "{value}"),
        }
    }
}

pub fn parse_value(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if MISSING_MARKERS.contains(&trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| !v.is_nan())
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataTable {
    index_name: String,
    index: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl MetadataTable {
    pub fn with_index(index_name: &str, index: Vec<String>) -> Self {
        let rows = vec![Vec::new(); index.len()];
        Self {
            index_name: index_name.to_string(),
            index,
            columns: Vec::new(),
            rows,
        }
    }

    pub fn push_column(&mut self, name: &str, mut cells: Vec<Cell>) {
        debug_assert_eq!(cells.len(), self.index.len());
        cells.resize(self.index.len(), Cell::Missing);
        self.columns.push(name.to_string());
        for (row, cell) in self.rows.iter_mut().zip(cells) {
            row.push(cell);
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        &self.rows[row][column]
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let position = self.column_position(name)?;
        Some(self.rows.iter().map(|row| &row[position]).collect())
    }

    pub fn filter_rows<F>(self, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let (index, rows) = self
            .index
            .into_iter()
            .zip(self.rows)
            .filter(|(id, _)| keep(id))
            .unzip();
        Self {
            index_name: self.index_name,
            index,
            columns: self.columns,
            rows,
        }
    }

    /// Row-wise union. Columns are aligned by name in first-seen order.
    pub fn concat(tables: Vec<MetadataTable>) -> MetadataTable {
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        let index_name = tables
            .iter()
            .map(|table| table.index_name.as_str())
            .find(|name| !name.is_empty())
            .unwrap_or_default()
            .to_string();

        let mut index = Vec::new();
        let mut rows = Vec::new();
        for table in tables {
            let positions: Vec<Option<usize>> = columns
                .iter()
                .map(|column| table.column_position(column))
                .collect();
            for (id, row) in table.index.into_iter().zip(table.rows) {
                let aligned = positions
                    .iter()
                    .map(|position| match position {
                        Some(position) => row[*position].clone(),
                        None => Cell::Missing,
                    })
                    .collect();
                index.push(id);
                rows.push(aligned);
            }
        }
        MetadataTable {
            index_name,
            index,
            columns,
            rows,
        }
    }

    pub fn parse_csv(content: &[u8], label: &str) -> Result<Self, UnifyError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(content);
        let header = read_header(&mut reader, label)?;
        let (index_name, columns) = split_header(&header, label)?;

        let mut index = Vec::new();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| malformed(label, err))?;
            let mut fields = record.iter();
            let id = fields.next().unwrap_or_default().to_string();
            index.push(id);
            rows.push(fields.map(Cell::from_raw).collect());
        }
        Ok(Self {
            index_name,
            index,
            columns,
            rows,
        })
    }

    /// Loads a table from disk. `Ok(None)` means the file does not exist.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>, UnifyError> {
        let Some(content) = read_optional(path)? else {
            return Ok(None);
        };
        Self::parse_csv(&content, path.as_str()).map(Some)
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, UnifyError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let header = std::iter::once(self.index_name.as_str())
            .chain(self.columns.iter().map(String::as_str));
        writer
            .write_record(header)
            .map_err(|err| UnifyError::Filesystem(err.to_string()))?;
        for (id, row) in self.index.iter().zip(&self.rows) {
            let record = std::iter::once(id.clone()).chain(row.iter().map(Cell::to_string));
            writer
                .write_record(record)
                .map_err(|err| UnifyError::Filesystem(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| UnifyError::Filesystem(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionTable<K> {
    index_name: String,
    rows: Vec<K>,
    columns: Vec<String>,
    values: Vec<Vec<Option<f64>>>,
}

impl<K> Default for ExpressionTable<K> {
    fn default() -> Self {
        Self {
            index_name: String::new(),
            rows: Vec::new(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<K> ExpressionTable<K> {
    pub fn new(
        index_name: &str,
        rows: Vec<K>,
        columns: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, UnifyError> {
        if rows.len() != values.len() {
            return Err(malformed(
                "in-memory",
                format!("{} row ids for {} value rows", rows.len(), values.len()),
            ));
        }
        if let Some(row) = values.iter().find(|row| row.len() != columns.len()) {
            return Err(malformed(
                "in-memory",
                format!("row of width {} in table of width {}", row.len(), columns.len()),
            ));
        }
        Ok(Self {
            index_name: index_name.to_string(),
            rows,
            columns,
            values,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn rows(&self) -> &[K] {
        &self.rows
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_values(&self, row: usize) -> &[Option<f64>] {
        &self.values[row]
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.columns.is_empty()
    }

    pub fn map_columns<F>(mut self, map: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        self.columns = self.columns.iter().map(|column| map(column)).collect();
        self
    }

    pub fn filter_columns<F>(self, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|&position| keep(&self.columns[position]))
            .collect();
        let columns = kept
            .iter()
            .map(|&position| self.columns[position].clone())
            .collect();
        let values = self
            .values
            .into_iter()
            .map(|row| kept.iter().map(|&position| row[position]).collect())
            .collect();
        Self {
            index_name: self.index_name,
            rows: self.rows,
            columns,
            values,
        }
    }

    pub fn filter_rows<F>(self, mut keep: F) -> Self
    where
        F: FnMut(&K) -> bool,
    {
        let (rows, values) = self
            .rows
            .into_iter()
            .zip(self.values)
            .filter(|(key, _)| keep(key))
            .unzip();
        Self {
            index_name: self.index_name,
            rows,
            columns: self.columns,
            values,
        }
    }

    pub fn rekey<K2, F>(self, index_name: &str, map: F) -> ExpressionTable<K2>
    where
        F: Fn(&K) -> Option<K2>,
    {
        let (rows, values) = self
            .rows
            .iter()
            .zip(self.values)
            .filter_map(|(key, row)| map(key).map(|mapped| (mapped, row)))
            .unzip();
        ExpressionTable {
            index_name: index_name.to_string(),
            rows,
            columns: self.columns,
            values,
        }
    }
}

impl<K: Eq + Hash + Clone> ExpressionTable<K> {
    pub fn dedup_keep_first(self) -> Self {
        let mut seen = HashSet::new();
        self.filter_rows(|key| seen.insert(key.clone()))
    }
}

impl<K: Ord> ExpressionTable<K> {
    pub fn sort_rows(self) -> Self {
        let mut paired: Vec<(K, Vec<Option<f64>>)> =
            self.rows.into_iter().zip(self.values).collect();
        paired.sort_by(|left, right| left.0.cmp(&right.0));
        let (rows, values) = paired.into_iter().unzip();
        Self {
            index_name: self.index_name,
            rows,
            columns: self.columns,
            values,
        }
    }
}

impl<K: Ord + Clone> ExpressionTable<K> {
    // Columns of `other` follow those of `self`; rows come out sorted and each side keeps its first duplicate.
    pub fn outer_join(self, other: Self) -> Self {
        let left_width = self.columns.len();
        let width = left_width + other.columns.len();

        let mut merged: BTreeMap<K, Vec<Option<f64>>> = BTreeMap::new();
        for (key, mut row) in self.rows.into_iter().zip(self.values) {
            if merged.contains_key(&key) {
                continue;
            }
            row.resize(width, None);
            merged.insert(key, row);
        }

        let mut seen_right = BTreeSet::new();
        for (key, row) in other.rows.into_iter().zip(other.values) {
            if !seen_right.insert(key.clone()) {
                continue;
            }
            let entry = merged.entry(key).or_insert_with(|| vec![None; width]);
            entry[left_width..].copy_from_slice(&row);
        }

        let index_name = if self.index_name.is_empty() {
            other.index_name
        } else {
            self.index_name
        };
        let mut columns = self.columns;
        columns.extend(other.columns);
        let (rows, values) = merged.into_iter().unzip();
        Self {
            index_name,
            rows,
            columns,
            values,
        }
    }
}

impl<K> ExpressionTable<K>
where
    K: FromStr,
    K::Err: fmt::Display,
{
    pub fn parse_csv(content: &[u8], label: &str) -> Result<Self, UnifyError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(content);
        let header = read_header(&mut reader, label)?;
        let (index_name, columns) = split_header(&header, label)?;

        let mut rows = Vec::new();
        let mut values = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| malformed(label, err))?;
            let mut fields = record.iter();
            let id = fields.next().unwrap_or_default();
            let key = id
                .parse::<K>()
                .map_err(|err| malformed(label, format!("row id {id:?}: {err}")))?;
            rows.push(key);
            values.push(fields.map(parse_value).collect());
        }
        Ok(Self {
            index_name,
            rows,
            columns,
            values,
        })
    }

    /// Loads a table from disk. `Ok(None)` means the file does not exist.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>, UnifyError> {
        let Some(content) = read_optional(path)? else {
            return Ok(None);
        };
        Self::parse_csv(&content, path.as_str()).map(Some)
    }
}

impl<K: fmt::Display> ExpressionTable<K> {
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, UnifyError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let header = std::iter::once(self.index_name.as_str())
            .chain(self.columns.iter().map(String::as_str));
        writer
            .write_record(header)
            .map_err(|err| UnifyError::Filesystem(err.to_string()))?;
        for (key, row) in self.rows.iter().zip(&self.values) {
            let record = std::iter::once(key.to_string()).chain(row.iter().map(|value| {
                value.map(|value| value.to_string()).unwrap_or_default()
            }));
            writer
                .write_record(record)
                .map_err(|err| UnifyError::Filesystem(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| UnifyError::Filesystem(err.to_string()))
    }
}

fn read_optional(path: &Utf8Path) -> Result<Option<Vec<u8>>, UnifyError> {
    match fs::read(path.as_std_path()) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(UnifyError::Filesystem(format!("read {path}: {err}"))),
    }
}

fn read_header(
    reader: &mut csv::Reader<&[u8]>,
    label: &str,
) -> Result<csv::StringRecord, UnifyError> {
    let header = reader.headers().map_err(|err| malformed(label, err))?.clone();
    if header.is_empty() {
        return Err(malformed(label, "missing header row"));
    }
    Ok(header)
}

fn split_header(
    header: &csv::StringRecord,
    label: &str,
) -> Result<(String, Vec<String>), UnifyError> {
    let mut fields = header.iter();
    let index_name = fields
        .next()
        .ok_or_else(|| malformed(label, "missing index column"))?
        .to_string();
    Ok((index_name, fields.map(str::to_string).collect()))
}

fn malformed(label: &str, reason: impl fmt::Display) -> UnifyError {
    UnifyError::MalformedTable {
        path: label.to_string(),
        reason: reason.to_string(),
    }
}
