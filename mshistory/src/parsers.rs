//! Parsers for the instrument and search engine outputs that make up a QC history.
//!
//! Each parser turns one source file into the [`Fields`] of a [`Record`](crate::record::Record).
//! A parser failing on one file never stops the others from being read, unless
//! the failure is [fatal](ParseError::is_fatal).
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::files::{parse_scalar, read_delimited};
use crate::record::{FieldValue, Fields, Record};
use crate::stats::mean_stdev;

pub const SAMPLE_KEY: &str = "Sample";
pub const PEPTIDES_KEY: &str = "peptides";
pub const SYSTEM_SUITABILITY: &str = "System Suitability";
pub const PRECURSOR_MASS_ERROR: &str = "Precursor Mass Error (ppm)";

const IRT_HEADER_PREFIX: &str = "Component Name ";
const IRT_PEPTIDE_PREFIX: &str = "iRT-pep_";
const IRT_SEPARATOR: &str = " ; ";
const SEARCH_OUTPUT_SUFFIX: &str = "_morpheus";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read delimited file: {0}")]
    CSVError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("Can't recognize the delimiter of {0}")]
    UnknownDelimiter(PathBuf),
    #[error("{0} has no data rows")]
    Empty(PathBuf),
    #[error("Column {0:?} is missing")]
    MissingColumn(String),
    #[error("Failed to parse {value:?} in column {column:?} as a number")]
    InvalidNumber { column: String, value: String },
    #[error("Parsing was cancelled")]
    Cancelled,
}

impl ParseError {
    /// Whether this failure should abort the whole batch rather than skip one file
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::IOError(e) => e.kind() == io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

/// Read the first row of a Morpheus `summary.tsv`, coercing numeric cells
pub fn parse_morpheus_summary(path: &Path) -> Result<Fields, ParseError> {
    let rows = read_delimited(path)?;
    let first = rows
        .into_iter()
        .next()
        .ok_or_else(|| ParseError::Empty(path.to_path_buf()))?;
    Ok(first
        .into_iter()
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| {
            let value = parse_scalar(&v);
            (k, value)
        })
        .collect())
}

/// Summarize the precursor mass error of the target PSMs in a Morpheus `PSMs.tsv`
/// as its mean and mean plus one standard deviation.
pub fn parse_morpheus_psm(path: &Path) -> Result<Fields, ParseError> {
    let rows = read_delimited(path)?;
    let mut errors = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        if row.get("Decoy?").is_some_and(|d| d.eq_ignore_ascii_case("true")) {
            continue;
        }
        let cell = row
            .get(PRECURSOR_MASS_ERROR)
            .ok_or_else(|| ParseError::MissingColumn(PRECURSOR_MASS_ERROR.to_string()))?;
        let value: f64 = cell.trim().parse().map_err(|_| ParseError::InvalidNumber {
            column: PRECURSOR_MASS_ERROR.to_string(),
            value: cell.clone(),
        })?;
        errors.push(value);
    }
    let (avg, stdev) = mean_stdev(&errors).ok_or_else(|| ParseError::Empty(path.to_path_buf()))?;
    let mut fields = Fields::new();
    fields.insert(PRECURSOR_MASS_ERROR.to_string(), avg.into());
    fields.insert(format!("{PRECURSOR_MASS_ERROR} Upper"), (avg + stdev).into());
    Ok(fields)
}

/// The sample a search output belongs to, from its enclosing `<sample>_morpheus`
/// directory, capitalized (`ecoli_morpheus` → `Ecoli`).
pub fn sample_from_path(path: &Path) -> Option<String> {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .find_map(|c| c.strip_suffix(SEARCH_OUTPUT_SUFFIX))
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
}

/// Prefix every key with the sample name and record the sample itself, so that
/// series from different samples can live side by side in one store.
pub fn label_sample(fields: Fields, sample: &str) -> Fields {
    let mut labeled: Fields = fields
        .into_iter()
        .map(|(k, v)| (format!("{sample} {k}"), v))
        .collect();
    labeled.insert(SAMPLE_KEY.to_string(), sample.into());
    labeled
}

/// Parse a search output with `parse_fn` and label it with the sample inferred from its path
pub fn parse_sample_output<F>(path: &Path, parse_fn: F) -> Result<Fields, ParseError>
where
    F: Fn(&Path) -> Result<Fields, ParseError>,
{
    let fields = parse_fn(path)?;
    match sample_from_path(path) {
        Some(sample) => Ok(label_sample(fields, &sample)),
        None => Ok(fields),
    }
}

fn format_peptide_id(component: &str) -> String {
    let suffix: String = component.chars().last().into_iter().collect();
    format!("pep_{suffix}")
}

/// Parse an iRT peptide retention time log from any line source.
///
/// The log is a ` ; ` separated table whose header starts with `Component Name`
/// and whose rows start with `iRT-pep_<letter>`.
pub fn parse_irt_log_from<R: BufRead>(reader: R) -> Result<Fields, ParseError> {
    let mut peptides = Fields::new();
    let mut params: Vec<String> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.starts_with(IRT_HEADER_PREFIX) {
            params = line
                .trim()
                .split(IRT_SEPARATOR)
                .skip(1)
                .map(|s| s.to_string())
                .collect();
            continue;
        }
        if !line.starts_with(IRT_PEPTIDE_PREFIX) {
            continue;
        }
        let mut tokens = line.split(IRT_SEPARATOR);
        let Some(name) = tokens.next() else {
            continue;
        };
        let entry = peptides
            .entry(format_peptide_id(name.trim()))
            .or_insert_with(|| FieldValue::Map(Fields::new()));
        let Some(peptide) = entry.as_map_mut() else {
            continue;
        };
        for (param, raw) in params.iter().zip(tokens) {
            let value = if raw.contains("N/A") {
                FieldValue::Null
            } else if param == SYSTEM_SUITABILITY {
                FieldValue::Text(raw.trim().to_string())
            } else {
                let x: f64 = raw.trim().parse().map_err(|_| ParseError::InvalidNumber {
                    column: param.clone(),
                    value: raw.to_string(),
                })?;
                FieldValue::Float(x)
            };
            peptide.insert(param.clone(), value);
        }
    }
    calculate_crt(&mut peptides);
    let mut fields = Fields::new();
    fields.insert(PEPTIDES_KEY.to_string(), FieldValue::Map(peptides));
    Ok(fields)
}

pub fn parse_irt_log(path: &Path) -> Result<Fields, ParseError> {
    let handle = io::BufReader::new(fs::File::open(path)?);
    parse_irt_log_from(handle)
}

fn retention_time(peptides: &Fields, peptide_id: &str) -> Option<f64> {
    peptides
        .get(peptide_id)?
        .as_map()?
        .get("RT")?
        .as_f64()
        .filter(|rt| *rt != 0.0)
}

/// Normalize each peptide's retention time to the `pep_b` (0) .. `pep_k` (100) scale,
/// stored as `crt`. Peptides without a usable RT, or logs without both anchors, get null.
pub fn calculate_crt(peptides: &mut Fields) {
    let anchors = retention_time(peptides, "pep_b").zip(retention_time(peptides, "pep_k"));
    let scale = anchors.and_then(|(rt0, rt100)| {
        let d_rt = rt100 - rt0;
        (d_rt != 0.0).then_some((rt0, d_rt))
    });
    for peptide in peptides.values_mut().filter_map(|p| p.as_map_mut()) {
        let rt = peptide
            .get("RT")
            .and_then(|v| v.as_f64())
            .filter(|rt| *rt != 0.0);
        let crt = rt
            .zip(scale)
            .map(|(rt, (rt0, d_rt))| (rt - rt0) / d_rt * 100.0);
        peptide.insert("crt".to_string(), crt.into());
    }
}

/// Every iRT peptide id seen in any of `records`, sorted
pub fn peptide_ids(records: &[Record]) -> BTreeSet<String> {
    records
        .iter()
        .filter_map(|rec| rec.fields.get(PEPTIDES_KEY)?.as_map())
        .flat_map(|peptides| peptides.keys().cloned())
        .collect()
}
