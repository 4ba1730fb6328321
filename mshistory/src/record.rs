//! Parsed measurement records and typed path lookups into their fields
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dates::SourceDate;

/// The measurement payload of a [`Record`], a tree of string keys over typed scalars
pub type Fields = BTreeMap<String, FieldValue>;

/// A single node in a [`Fields`] tree.
///
/// Leaves are scalars, interior nodes are [`FieldValue::Map`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Map(Fields),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Map(_))
    }

    /// The numeric value of this leaf, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Fields> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        value.map(Self::Float).unwrap_or_default()
    }
}

impl From<Fields> for FieldValue {
    fn from(value: Fields) -> Self {
        Self::Map(value)
    }
}

/// The ways walking a [`ParamPath`] through a [`Record`] can fail.
///
/// None of these are fatal, they all mean "this value is unavailable".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("Key {key:?} not found at depth {depth}")]
    MissingKey { key: String, depth: usize },
    #[error("Expected a mapping to look up {key:?} at depth {depth}")]
    NotAMapping { key: String, depth: usize },
    #[error("Path {0} leads to a mapping, not a scalar")]
    NotAScalar(ParamPath),
    #[error("Path {0} leads to a non-numeric value")]
    NotNumeric(ParamPath),
    #[error("Cannot look up an empty path")]
    EmptyPath,
}

/// An ordered sequence of keys identifying a scalar in a [`Record`]'s fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamPath(Vec<String>);

impl ParamPath {
    pub fn new(keys: Vec<String>) -> Self {
        Self(keys)
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Walk `fields` one key at a time, returning the scalar at the end
    pub fn lookup<'a>(&self, fields: &'a Fields) -> Result<&'a FieldValue, FieldError> {
        let (first, rest) = self.0.split_first().ok_or(FieldError::EmptyPath)?;
        let mut node = fields.get(first).ok_or_else(|| FieldError::MissingKey {
            key: first.clone(),
            depth: 0,
        })?;
        for (i, key) in rest.iter().enumerate() {
            let depth = i + 1;
            let map = node.as_map().ok_or_else(|| FieldError::NotAMapping {
                key: key.clone(),
                depth,
            })?;
            node = map.get(key).ok_or_else(|| FieldError::MissingKey {
                key: key.clone(),
                depth,
            })?;
        }
        if node.is_scalar() {
            Ok(node)
        } else {
            Err(FieldError::NotAScalar(self.clone()))
        }
    }
}

impl Display for ParamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for ParamPath {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(FieldError::EmptyPath);
        }
        Ok(Self(s.split('.').map(|k| k.to_string()).collect()))
    }
}

impl<S: Into<String>> FromIterator<S> for ParamPath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(|k| k.into()).collect())
    }
}

impl From<&str> for ParamPath {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

/// A named [`ParamPath`]. The name is what baselines and timepoints are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub path: ParamPath,
}

impl Parameter {
    pub fn new(name: impl Into<String>, path: ParamPath) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }

    /// A parameter whose path is the single top-level key `name`
    pub fn top_level(name: impl Into<String>) -> Self {
        let name = name.into();
        let path = ParamPath::from(name.as_str());
        Self { name, path }
    }
}

/// One parsed source file's measurements plus the metadata identifying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source_id: String,
    pub timestamp: i64,
    pub iso_date: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    pub fn new(source_id: String, date: SourceDate, fields: Fields) -> Self {
        Self {
            source_id,
            timestamp: date.timestamp,
            iso_date: date.iso_date,
            fields,
        }
    }

    pub fn get(&self, path: &ParamPath) -> Result<&FieldValue, FieldError> {
        path.lookup(&self.fields)
    }

    /// Look up a numeric value. A null leaf is `Ok(None)`, a text leaf is an error.
    pub fn number(&self, path: &ParamPath) -> Result<Option<f64>, FieldError> {
        match self.get(path)? {
            FieldValue::Null => Ok(None),
            value => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| FieldError::NotNumeric(path.clone())),
        }
    }

    /// The label of the timepoint this record belongs to
    pub fn timepoint_label(&self) -> &str {
        &self.iso_date
    }
}
