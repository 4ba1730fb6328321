//! The persisted, chronologically ordered collection of parsed records, and the
//! accumulator that grows it from newly discovered source files.
//!
//! Persisted state is always read whole at the start of a run and written whole at
//! the end. Nothing locks these files, so two runs must never overlap on the same
//! store; scheduling them apart is the caller's job.
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::dates::SourceDate;
use crate::parsers::ParseError;
use crate::record::{Fields, Record};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An IO error occurred reading or writing {path}: {source}")]
    IOError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to (de)serialize {path}: {source}")]
    YAMLError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to (de)serialize {path}: {source}")]
    JSONError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Accumulation was aborted while parsing {path}: {source}")]
    Aborted {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

/// Read a YAML document, `None` if the file does not exist
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.is_file() {
        return Ok(None);
    }
    let handle = fs::File::open(path).map_err(|source| StoreError::IOError {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_reader(io::BufReader::new(handle))
        .map(Some)
        .map_err(|source| StoreError::YAMLError {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace the contents of `path` with `content`.
///
/// The content is written beside the destination and renamed over it, so an
/// interrupted write never leaves a truncated file behind.
pub fn write_staged(content: &[u8], path: &Path) -> Result<(), StoreError> {
    let io_err = |source| StoreError::IOError {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    {
        let mut handle = io::BufWriter::new(fs::File::create(&staging).map_err(io_err)?);
        handle.write_all(content).map_err(io_err)?;
        handle.flush().map_err(io_err)?;
    }
    fs::rename(&staging, path).map_err(io_err)
}

/// Replace the contents of `path` with `value` as YAML
pub fn save_yaml<T: Serialize>(value: &T, path: &Path) -> Result<(), StoreError> {
    let text = serde_yaml::to_string(value).map_err(|source| StoreError::YAMLError {
        path: path.to_path_buf(),
        source,
    })?;
    write_staged(text.as_bytes(), path)
}

/// Read a JSON document, `None` if the file does not exist
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.is_file() {
        return Ok(None);
    }
    let handle = fs::File::open(path).map_err(|source| StoreError::IOError {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(io::BufReader::new(handle))
        .map(Some)
        .map_err(|source| StoreError::JSONError {
            path: path.to_path_buf(),
            source,
        })
}

pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), StoreError> {
    let text = serde_json::to_vec(value).map_err(|source| StoreError::JSONError {
        path: path.to_path_buf(),
        source,
    })?;
    write_staged(&text, path)
}

/// Records sorted ascending by timestamp, with unique source ids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordStore {
    records: Vec<Record>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted store, or start an empty one if there is none yet
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut store: Self = load_yaml(path)?.unwrap_or_default();
        store.sort();
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        save_yaml(self, path)
    }

    pub fn source_ids(&self) -> HashSet<&str> {
        self.records.iter().map(|r| r.source_id.as_str()).collect()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.records.iter().any(|r| r.source_id == source_id)
    }

    /// Order by timestamp, then by source id so equal timestamps sort the same way every run
    pub fn sort(&mut self) {
        self.records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Append records, dropping any whose source id is already present, and re-sort
    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) {
        let mut seen: HashSet<String> = self.records.iter().map(|r| r.source_id.clone()).collect();
        for rec in records {
            if seen.insert(rec.source_id.clone()) {
                self.records.push(rec);
            }
        }
        self.sort();
    }
}

impl FromIterator<Record> for RecordStore {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        let mut store = Self::new();
        store.extend(iter);
        store
    }
}

/// A per-file parser turning one source file into record fields
pub trait SourceParser {
    fn parse(&self, path: &Path) -> Result<Fields, ParseError>;
}

impl<F> SourceParser for F
where
    F: Fn(&Path) -> Result<Fields, ParseError>,
{
    fn parse(&self, path: &Path) -> Result<Fields, ParseError> {
        self(path)
    }
}

/// Tallies of what happened to each file offered to the accumulator
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AccumulationSummary {
    pub added: usize,
    pub already_processed: usize,
    pub undated: usize,
    pub failed: usize,
}

impl AccumulationSummary {
    pub fn offered(&self) -> usize {
        self.added + self.already_processed + self.undated + self.failed
    }
}

impl Add for AccumulationSummary {
    type Output = AccumulationSummary;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for AccumulationSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.added += rhs.added;
        self.already_processed += rhs.already_processed;
        self.undated += rhs.undated;
        self.failed += rhs.failed;
    }
}

impl Sum for AccumulationSummary {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::add)
    }
}

/// Parse every file in `filenames` not already in `store` and add it.
///
/// Files without a date stamp are skipped silently. A file the parser rejects is
/// logged and skipped, unless the error [is fatal](ParseError::is_fatal), in which
/// case the whole batch is abandoned.
pub fn parse_logs<P, S>(
    filenames: impl IntoIterator<Item = S>,
    parser: &P,
    mut store: RecordStore,
) -> Result<(RecordStore, AccumulationSummary), StoreError>
where
    P: SourceParser + ?Sized,
    S: AsRef<Path>,
{
    let mut summary = AccumulationSummary::default();
    let mut processed: HashSet<String> =
        store.source_ids().into_iter().map(|s| s.to_string()).collect();
    let mut fresh = Vec::new();

    for fname in filenames {
        let path = fname.as_ref();
        let source_id = path.to_string_lossy().to_string();
        if processed.contains(&source_id) {
            summary.already_processed += 1;
            continue;
        }
        let Some(date) = SourceDate::from_path(path) else {
            summary.undated += 1;
            continue;
        };
        processed.insert(source_id.clone());
        match parser.parse(path) {
            Ok(fields) => {
                fresh.push(Record::new(source_id, date, fields));
                summary.added += 1;
            }
            Err(e) if e.is_fatal() => {
                return Err(StoreError::Aborted {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => {
                debug!("Error parsing {}: {e}", path.display());
                summary.failed += 1;
            }
        }
    }

    store.extend(fresh);
    Ok((store, summary))
}

/// Load the store at `store_path`, add every new parseable file, and write the
/// complete store back.
pub fn accumulate<P, S>(
    filenames: impl IntoIterator<Item = S>,
    parser: &P,
    store_path: &Path,
) -> Result<RecordStore, StoreError>
where
    P: SourceParser + ?Sized,
    S: AsRef<Path>,
{
    accumulate_summarized(filenames, parser, store_path).map(|(store, _)| store)
}

/// [`accumulate`], also returning what happened to each file offered
#[instrument(level = "debug", skip(filenames, parser))]
pub fn accumulate_summarized<P, S>(
    filenames: impl IntoIterator<Item = S>,
    parser: &P,
    store_path: &Path,
) -> Result<(RecordStore, AccumulationSummary), StoreError>
where
    P: SourceParser + ?Sized,
    S: AsRef<Path>,
{
    let store = RecordStore::load(store_path)?;
    let (store, summary) = parse_logs(filenames, parser, store)?;
    info!(
        "{}: {} new, {} already processed, {} undated, {} failed, {} total",
        store_path.display(),
        summary.added,
        summary.already_processed,
        summary.undated,
        summary.failed,
        store.len()
    );
    store.save(store_path)?;
    Ok((store, summary))
}
