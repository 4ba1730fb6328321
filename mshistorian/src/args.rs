use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    #[default]
    /// Mail outlier reports through the local sendmail program
    Sendmail,
    /// Write outlier reports to the log instead of sending them
    Log,
    /// Evaluate timepoints without reporting them anywhere
    #[value(name = "none")]
    #[serde(rename = "none")]
    Quiet,
}

impl Display for NotifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A sample the search engine is run for: raw files whose names match `pattern`
/// are searched against `database` and written under `<instrument>/<output_dir>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    pub output_dir: String,
    pub pattern: String,
    pub database: String,
}

impl SearchTarget {
    pub fn new(output_dir: &str, pattern: &str, database: &str) -> Self {
        Self {
            output_dir: output_dir.to_string(),
            pattern: pattern.to_string(),
            database: database.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Holds the `standard` and `thermo` builds of the search engine
    pub engine_dir: PathBuf,
    /// The program the engine's executables are run with, if any
    pub runtime: Option<String>,
    pub database_dir: PathBuf,
    /// Extra modifications to merge into the engine's own table while searching
    pub extra_modifications: Option<PathBuf>,
    /// Command line options passed to every search
    pub options: BTreeMap<String, String>,
    pub targets: Vec<SearchTarget>,
}

impl Default for SearchParams {
    fn default() -> Self {
        make_default_search_params()
    }
}

pub fn make_default_search_params() -> SearchParams {
    let runtime = if cfg!(windows) {
        None
    } else {
        Some("mono".to_string())
    };
    let options = [("-ad", "true"), ("-mmu", "true")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    SearchParams {
        engine_dir: PathBuf::from("morpheus"),
        runtime,
        database_dir: PathBuf::from("db"),
        extra_modifications: Some(PathBuf::from("modifications.tsv")),
        options,
        targets: vec![
            SearchTarget::new("ecoli_morpheus", r"(E|e)coli.*\d{12}", "E_coli_uniprot_iRT.fasta"),
            SearchTarget::new("hela_morpheus", r"(Hela|hela).*\d{12}", "HUMAN.fasta"),
        ],
    }
}

/// The Morpheus summary columns that are charted and checked for outliers, per sample
pub fn make_default_summary_columns() -> Vec<String> {
    [
        "MS/MS Spectra",
        "Target PSMs",
        "Unique Target Peptides",
        "Target Protein Groups",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub(crate) fn non_empty_string(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("value must not be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_notify_mode_names() {
        assert_eq!(
            NotifyMode::from_str("none", true).unwrap(),
            NotifyMode::Quiet
        );
        assert_eq!(NotifyMode::from_str("log", true).unwrap(), NotifyMode::Log);
        let text = serde_json::to_string(&NotifyMode::Quiet).unwrap();
        assert_eq!(text, "\"none\"");
    }

    #[test]
    fn test_default_targets() {
        let params = make_default_search_params();
        assert_eq!(params.targets.len(), 2);
        let re = regex::Regex::new(&params.targets[1].pattern).unwrap();
        assert!(re.is_match("Hela_150101120000.raw"));
        assert!(!re.is_match("Hela_standard.raw"));
        assert_eq!(params.options["-ad"], "true");
    }
}
