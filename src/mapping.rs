use std::collections::HashMap;

use serde_json::Value;

use crate::error::UnifyError;
use crate::table::{Cell, MetadataTable};

pub const MISSING_SENTINEL: &str = "NA";

#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Identity,
    Numeric,
    /// `STR_MAP`: lookup in a value table.
    Categorical(HashMap<String, Option<String>>),
    Missing,
}

impl Transform {
    pub fn from_name(
        field: &str,
        name: &str,
        data: Option<&Value>,
    ) -> Result<Self, UnifyError> {
        match name.trim() {
            "ID" => Ok(Transform::Identity),
            "NUM" => Ok(Transform::Numeric),
            "NAN" => Ok(Transform::Missing),
            "STR_MAP" => {
                let table = data
                    .and_then(Value::as_object)
                    .ok_or_else(|| UnifyError::InvalidMapping {
                        field: field.to_string(),
                        reason: "STR_MAP requires a DATA object".to_string(),
                    })?;
                let mut lookup = HashMap::with_capacity(table.len());
                for (source, target) in table {
                    lookup.insert(source.clone(), categorical_target(field, target)?);
                }
                Ok(Transform::Categorical(lookup))
            }
            other => Err(UnifyError::UnknownTransform {
                field: field.to_string(),
                name: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transform::Identity => "ID",
            Transform::Numeric => "NUM",
            Transform::Categorical(_) => "STR_MAP",
            Transform::Missing => "NAN",
        }
    }

    pub fn needs_header(&self) -> bool {
        !matches!(self, Transform::Missing)
    }

    fn map_cell(&self, cell: &Cell) -> Cell {
        match self {
            Transform::Identity => cell.clone(),
            Transform::Numeric => match cell {
                Cell::Missing => Cell::Missing,
                Cell::Number(value) => Cell::Number(*value),
                Cell::Text(text) => parse_numeric(text).map_or(Cell::Missing, Cell::Number),
            },
            Transform::Categorical(lookup) => {
                let key = match cell {
                    Cell::Missing => return Cell::Missing,
                    Cell::Text(text) => text.clone(),
                    Cell::Number(value) => value.to_string(),
                };
                match lookup.get(&key) {
                    Some(Some(target)) => Cell::Text(target.clone()),
                    _ => Cell::Missing,
                }
            }
            Transform::Missing => Cell::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub header: Option<String>,
    pub transform: Transform,
}

impl FieldMapping {
    pub fn new(header: Option<String>, transform: Transform) -> Self {
        Self { header, transform }
    }

    pub fn missing() -> Self {
        Self {
            header: None,
            transform: Transform::Missing,
        }
    }

    pub fn apply(&self, table: &MetadataTable) -> Vec<Cell> {
        let source = match (&self.transform, &self.header) {
            (Transform::Missing, _) | (_, None) => None,
            (_, Some(header)) => table.column(header),
        };
        match source {
            Some(cells) => cells
                .into_iter()
                .map(|cell| self.transform.map_cell(cell))
                .collect(),
            None => vec![Cell::Missing; table.len()],
        }
    }
}

pub fn parse_numeric(value: &str) -> Option<f64> {
    value
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|number| !number.is_nan())
}

fn categorical_target(field: &str, target: &Value) -> Result<Option<String>, UnifyError> {
    match target {
        Value::Null => Ok(None),
        Value::String(value) if value == MISSING_SENTINEL => Ok(None),
        Value::String(value) => Ok(Some(value.clone())),
        Value::Number(value) => Ok(Some(value.to_string())),
        Value::Bool(value) => Ok(Some(value.to_string())),
        Value::Array(_) | Value::Object(_) => Err(UnifyError::InvalidMapping {
            field: field.to_string(),
            reason: format!("DATA values must be scalars, got {target}"),
        }),
    }
}
