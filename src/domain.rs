use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnifyError;

pub const PATIENT_SEPARATOR: char = '#';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetName(String);

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = UnifyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed.contains(PATIENT_SEPARATOR)
            && !trimmed.contains(['/', '\\']);
        if !is_valid {
            return Err(UnifyError::InvalidDatasetName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Canonical patient identifier, `<dataset>#<raw-id>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatientId {
    dataset: DatasetName,
    raw: String,
}

impl PatientId {
    pub fn new(dataset: &DatasetName, raw: &str) -> Self {
        Self {
            dataset: dataset.clone(),
            raw: raw.to_string(),
        }
    }

    pub fn dataset(&self) -> &DatasetName {
        &self.dataset
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.dataset, PATIENT_SEPARATOR, self.raw)
    }
}

impl FromStr for PatientId {
    type Err = UnifyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (dataset, raw) = value
            .split_once(PATIENT_SEPARATOR)
            .ok_or_else(|| UnifyError::InvalidPatientId(value.to_string()))?;
        let dataset = dataset
            .parse()
            .map_err(|_| UnifyError::InvalidPatientId(value.to_string()))?;
        Ok(Self {
            dataset,
            raw: raw.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeneId(u64);

impl GeneId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneId {
    type Err = UnifyError;

    // Tables written by float-indexed tools carry ids like "1017.0".
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(id) = trimmed.parse::<u64>() {
            return Ok(Self(id));
        }
        match trimmed.parse::<f64>() {
            Ok(float) if float.is_finite() && float >= 0.0 && float.fract() == 0.0 => {
                Ok(Self(float as u64))
            }
            _ => Err(UnifyError::InvalidGeneId(value.to_string())),
        }
    }
}
