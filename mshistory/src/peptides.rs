//! Discovery of the peptides most commonly identified across a set of search
//! results, and scoring of individual runs against them.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::dates::SourceDate;
use crate::files::{read_delimited, Row};
use crate::parsers::ParseError;
use crate::record::Fields;
use crate::stats::mean_stdev;
use crate::store::{load_json, save_json, StoreError};

pub const SEQUENCE_COLUMN: &str = "Peptide Sequence";
pub const BASE_SEQUENCE_COLUMN: &str = "Base Peptide Sequence";
pub const INTENSITY_COLUMN: &str = "Fraction of Intensity Matching";
pub const ION_COLUMN: &str = "Ratio of Matching Products";
pub const TOP_PEPTIDE_COUNT_KEY: &str = "n_top_peptide";

/// Peptides with a mean matched intensity fraction below this are zero-intensity
/// artifacts and never selected.
pub const MIN_INTENSITY_FRACTION: f64 = 0.1;

/// Matching statistics of one peptide sequence across many PSM files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeptideStats {
    pub sequence: String,
    pub base_sequence: String,
    /// Number of files the peptide was matched in
    pub n_log: usize,
    /// Number of PSMs matching the peptide over all files
    pub n_psm: usize,
    pub ion_avg: f64,
    pub ion_stdev: f64,
    pub intensity_avg: f64,
    pub intensity_stdev: f64,
}

impl PeptideStats {
    /// Whether a single PSM's fractions are in line with this peptide's history
    pub fn matches(&self, intensity_fraction: f64, ion_fraction: f64) -> bool {
        intensity_fraction > self.intensity_avg - 2.0 * self.intensity_stdev
            && ion_fraction > self.ion_avg - self.ion_stdev
    }
}

/// The selected common peptides, by sequence
pub type TopPeptides = BTreeMap<String, PeptideStats>;

#[derive(Debug, Default)]
struct PeptideAccumulator {
    base_sequence: String,
    intensity_fractions: Vec<f64>,
    ion_fractions: Vec<f64>,
    n_log: usize,
}

fn fraction_column(row: &Row, column: &str) -> Result<f64, ParseError> {
    let cell = row
        .get(column)
        .ok_or_else(|| ParseError::MissingColumn(column.to_string()))?;
    cell.trim().parse().map_err(|_| ParseError::InvalidNumber {
        column: column.to_string(),
        value: cell.clone(),
    })
}

/// One PSM row: sequence, base sequence, intensity fraction, ion fraction
type PeptideMatch = (String, String, f64, f64);

fn read_peptide_matches(path: &Path) -> Result<Vec<PeptideMatch>, ParseError> {
    let rows = read_delimited(path)?;
    let mut matches = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        let Some(sequence) = row.get(SEQUENCE_COLUMN).filter(|s| !s.is_empty()) else {
            continue;
        };
        let intensity = fraction_column(row, INTENSITY_COLUMN)?;
        let ion = fraction_column(row, ION_COLUMN)?;
        let base_sequence = row.get(BASE_SEQUENCE_COLUMN).cloned().unwrap_or_default();
        matches.push((sequence.clone(), base_sequence, intensity, ion));
    }
    Ok(matches)
}

/// Gather per-sequence statistics over every PSM file in `paths`.
///
/// A file that cannot be read, or that has any malformed row, is skipped whole
/// unless the failure is fatal.
pub fn collect_peptide_stats<S: AsRef<Path>>(
    paths: &[S],
) -> Result<Vec<PeptideStats>, ParseError> {
    let mut by_sequence: HashMap<String, PeptideAccumulator> = HashMap::new();
    for path in paths.iter().map(|p| p.as_ref()) {
        let matches = match read_peptide_matches(path) {
            Ok(matches) => matches,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Skipping peptides of {}: {e}", path.display());
                continue;
            }
        };
        debug!(
            "Reading peptides of {}",
            SourceDate::from_path(path)
                .map(|d| d.iso_date)
                .unwrap_or_else(|| path.display().to_string())
        );
        let mut seen = HashSet::new();
        for (sequence, base_sequence, intensity, ion) in matches {
            let acc = by_sequence
                .entry(sequence.clone())
                .or_insert_with(|| PeptideAccumulator {
                    base_sequence,
                    ..Default::default()
                });
            acc.intensity_fractions.push(intensity);
            acc.ion_fractions.push(ion);
            if seen.insert(sequence) {
                acc.n_log += 1;
            }
        }
    }

    Ok(by_sequence
        .into_iter()
        .filter_map(|(sequence, acc)| {
            let (ion_avg, ion_stdev) = mean_stdev(&acc.ion_fractions)?;
            let (intensity_avg, intensity_stdev) = mean_stdev(&acc.intensity_fractions)?;
            Some(PeptideStats {
                sequence,
                base_sequence: acc.base_sequence,
                n_log: acc.n_log,
                n_psm: acc.intensity_fractions.len(),
                ion_avg,
                ion_stdev,
                intensity_avg,
                intensity_stdev,
            })
        })
        .collect())
}

/// Pick up to `n` peptides, preferring those seen in the most files and then
/// those with the highest mean intensity fraction.
pub fn extract_top_peptides(stats: Vec<PeptideStats>, n: usize) -> TopPeptides {
    stats
        .into_iter()
        .filter(|p| p.intensity_avg >= MIN_INTENSITY_FRACTION)
        .sorted_by(|a, b| {
            b.n_log
                .cmp(&a.n_log)
                .then_with(|| b.intensity_avg.total_cmp(&a.intensity_avg))
                .then_with(|| a.sequence.cmp(&b.sequence))
        })
        .take(n)
        .inspect(|p| {
            debug!(
                "n_log={} n_psm={}, ion={:.2}({:.2}) intensity={:.2}({:.2}) seq={}",
                p.n_log,
                p.n_psm,
                p.ion_avg,
                p.ion_stdev,
                p.intensity_avg,
                p.intensity_stdev,
                p.sequence
            )
        })
        .map(|p| (p.sequence.clone(), p))
        .collect()
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// Find the top `n` peptides over `psm_paths`, cached at `<out_base>.json`.
///
/// Malformed PSM files are left out of the statistics. Only a fatal parse
/// failure aborts.
///
/// The list of files the cache was built from is kept at `<out_base>.fnames.json`,
/// and the statistics are only recomputed when that list changes.
#[instrument(level = "debug", skip(psm_paths))]
pub fn find_top_peptides<S: AsRef<Path>>(
    psm_paths: &[S],
    out_base: &Path,
    n: usize,
) -> Result<TopPeptides, StoreError> {
    let fnames: Vec<String> = psm_paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().to_string())
        .collect();
    let fnames_path = with_suffix(out_base, ".fnames.json");
    let cache_path = with_suffix(out_base, ".json");

    let previous: Option<Vec<String>> = load_json(&fnames_path)?;
    if previous.as_ref() == Some(&fnames) {
        if let Some(cached) = load_json::<TopPeptides>(&cache_path)? {
            debug!("Reusing {} cached top peptides", cached.len());
            return Ok(cached);
        }
    }

    let stats = collect_peptide_stats(psm_paths).map_err(|source| StoreError::Aborted {
        path: out_base.to_path_buf(),
        source,
    })?;
    let n_sequences = stats.len();
    let top = extract_top_peptides(stats, n);
    info!(
        "Selected {} top peptides of {n_sequences} from {} files",
        top.len(),
        fnames.len()
    );
    save_json(&top, &cache_path)?;
    save_json(&fnames, &fnames_path)?;
    Ok(top)
}

/// Count how many of `top` peptides were matched in the PSM file at `path`
/// with fractions in line with their history. Each sequence counts once.
pub fn count_top_peptides(path: &Path, top: &TopPeptides) -> Result<Fields, ParseError> {
    let rows = read_delimited(path)?;
    let mut seen = HashSet::new();
    for row in rows.iter() {
        let Some(sequence) = row.get(SEQUENCE_COLUMN).filter(|s| !s.is_empty()) else {
            continue;
        };
        let intensity = fraction_column(row, INTENSITY_COLUMN)?;
        let ion = fraction_column(row, ION_COLUMN)?;
        if let Some(peptide) = top.get(sequence) {
            if !seen.contains(sequence.as_str()) && peptide.matches(intensity, ion) {
                seen.insert(sequence.as_str());
            }
        }
    }
    let mut fields = Fields::new();
    fields.insert(TOP_PEPTIDE_COUNT_KEY.to_string(), seen.len().into());
    Ok(fields)
}
