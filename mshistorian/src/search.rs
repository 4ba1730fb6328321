//! Running the Morpheus search engine over newly acquired raw files
use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use mshistory::files::{find_files, read_delimited, source_stem, GlobError};
use mshistory::{ParseError, SourceDate};

use crate::args::{SearchParams, SearchTarget};
use crate::progress::ProgressRecord;
use crate::types::RAW_GLOB;

const MODIFICATIONS_TSV: &str = "modifications.tsv";
const MIN_OUTPUT_FILES: usize = 6;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read the modifications table: {0}")]
    ModificationsError(
        #[source]
        #[from]
        ParseError,
    ),
    #[error("Invalid raw file pattern: {0}")]
    PatternError(
        #[source]
        #[from]
        regex::Error,
    ),
    #[error("Invalid raw file glob: {0}")]
    GlobError(
        #[source]
        #[from]
        GlobError,
    ),
    #[error("The search of {0} exited with {1}")]
    Failed(PathBuf, ExitStatus),
    #[error("The search of {0} did not produce a complete output")]
    Incomplete(PathBuf),
}

/// Whether `out_dir` holds a finished search: a summary, a PSM table, and enough
/// files overall.
pub fn is_complete_output(out_dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(out_dir) else {
        return false;
    };
    let names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.iter().any(|n| n.contains("summary.tsv"))
        && names.iter().any(|n| n.contains("PSMs.tsv"))
        && names.len() >= MIN_OUTPUT_FILES
}

/// `H:MM:SS.s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64();
    let hours = (total / 3600.0).floor();
    let minutes = ((total - hours * 3600.0) / 60.0).floor();
    let seconds = total - hours * 3600.0 - minutes * 60.0;
    format!("{}:{:02}:{:04.1}", hours as u64, minutes as u64, seconds)
}

fn is_thermo_raw(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("raw"))
}

fn engine_build_dir(params: &SearchParams, thermo: bool) -> PathBuf {
    params
        .engine_dir
        .join(if thermo { "thermo" } else { "standard" })
}

fn engine_command(params: &SearchParams, thermo: bool) -> Command {
    let exe = engine_build_dir(params, thermo).join(if thermo {
        "morpheus_tmo_cl.exe"
    } else {
        "morpheus_cl.exe"
    });
    match params.runtime.as_deref() {
        Some(runtime) => {
            let mut cmd = Command::new(runtime);
            cmd.arg(exe);
            cmd
        }
        None => Command::new(exe),
    }
}

/// Extra modifications merged into the engine's table, restored when dropped
#[derive(Debug)]
pub struct ModificationsGuard {
    table: PathBuf,
    backup: PathBuf,
}

impl ModificationsGuard {
    /// Append the rows of `extra` whose description the engine's `table` lacks.
    pub fn apply(table: &Path, extra: &Path) -> Result<Self, SearchError> {
        let known: HashSet<String> = read_delimited(table)?
            .into_iter()
            .filter_map(|mut row| row.remove("Description"))
            .collect();

        let mut backup = table.as_os_str().to_owned();
        backup.push(".backup");
        let backup = PathBuf::from(backup);
        fs::copy(table, &backup)?;
        let guard = Self {
            table: table.to_path_buf(),
            backup,
        };

        let mut added = Vec::new();
        for line in io::BufReader::new(fs::File::open(extra)?).lines().skip(1) {
            let line = line?;
            let description = line.split('\t').next().unwrap_or_default();
            if !description.is_empty() && !known.contains(description) {
                added.push(line);
            }
        }
        debug!(
            "Adding {} modifications from {} to {}",
            added.len(),
            extra.display(),
            table.display()
        );
        let mut handle = fs::File::options().append(true).open(table)?;
        for line in added {
            writeln!(handle, "{line}")?;
        }
        Ok(guard)
    }
}

impl Drop for ModificationsGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::copy(&self.backup, &self.table) {
            error!("Failed to restore {}: {e}", self.table.display());
            return;
        }
        if let Err(e) = fs::remove_file(&self.backup) {
            debug!("Failed to remove {}: {e}", self.backup.display());
        }
    }
}

/// Search one raw file into `out_dir`, replacing whatever is there
pub fn run_search(
    raw_file: &Path,
    out_dir: &Path,
    database: &Path,
    params: &SearchParams,
) -> Result<(), SearchError> {
    let thermo = is_thermo_raw(raw_file);
    fs::create_dir_all(out_dir)?;

    let _guard = match params.extra_modifications.as_deref().filter(|p| p.is_file()) {
        Some(extra) => Some(ModificationsGuard::apply(
            &engine_build_dir(params, thermo).join(MODIFICATIONS_TSV),
            extra,
        )?),
        None => None,
    };

    let mut cmd = engine_command(params, thermo);
    cmd.arg("-d")
        .arg(raw_file)
        .arg("-o")
        .arg(out_dir)
        .arg("-db")
        .arg(database);
    for (key, value) in params.options.iter() {
        cmd.arg(key).arg(value);
    }
    info!(
        "{}: {}",
        if thermo { "morpheus(raw)" } else { "morpheus" },
        source_stem(raw_file)
    );
    debug!("{cmd:?}");
    let status = cmd.status()?;
    if !status.success() {
        return Err(SearchError::Failed(raw_file.to_path_buf(), status));
    }
    if !is_complete_output(out_dir) {
        return Err(SearchError::Incomplete(raw_file.to_path_buf()));
    }
    Ok(())
}

/// Search every dated raw file in `raw_files` that has no complete output under
/// `output_root` yet.
///
/// Partial outputs are removed before searching again. A failed search is logged
/// and the batch moves on. With `dry_run`, nothing is run or removed.
#[instrument(level = "debug", skip(raw_files, params))]
pub fn search_batch(
    raw_files: &[PathBuf],
    output_root: &Path,
    database: &Path,
    params: &SearchParams,
    dry_run: bool,
) -> ProgressRecord {
    let mut progress = ProgressRecord::default();
    for raw_file in raw_files {
        if SourceDate::from_path(raw_file).is_none() {
            continue;
        }
        let out_dir = output_root.join(source_stem(raw_file));
        if is_complete_output(&out_dir) {
            debug!("Skipping {}", source_stem(&out_dir));
            progress.search_skipped += 1;
            continue;
        }
        if dry_run {
            info!("Would search {}", raw_file.display());
            continue;
        }
        let started = Instant::now();
        let result = (|| -> Result<(), SearchError> {
            if out_dir.is_dir() {
                fs::remove_dir_all(&out_dir)?;
            }
            run_search(raw_file, &out_dir, database, params)
        })();
        match result {
            Ok(()) => {
                info!("finished in {}", format_elapsed(started.elapsed()));
                progress.searched += 1;
            }
            Err(e) => {
                error!("failed: {}: {e}", source_stem(&out_dir));
                progress.search_failed += 1;
            }
        }
    }
    progress
}

/// Search the raw files of `data_dir` for each configured target
pub fn search_instrument(
    data_dir: &Path,
    params: &SearchParams,
    dry_run: bool,
) -> Result<ProgressRecord, SearchError> {
    let mut progress = ProgressRecord::default();
    for target in params.targets.iter() {
        progress += search_target(data_dir, target, params, dry_run)?;
    }
    Ok(progress)
}

fn search_target(
    data_dir: &Path,
    target: &SearchTarget,
    params: &SearchParams,
    dry_run: bool,
) -> Result<ProgressRecord, SearchError> {
    let pattern = Regex::new(&target.pattern)?;
    let raw_files = find_files(data_dir, RAW_GLOB, Some(&pattern))?;
    debug!("{} raw files for {}", raw_files.len(), target.output_dir);
    Ok(search_batch(
        &raw_files,
        &data_dir.join(&target.output_dir),
        &params.database_dir.join(&target.database),
        params,
        dry_run,
    ))
}
