//! Delimited text reading and data directory discovery
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::parsers::ParseError;
use crate::record::FieldValue;

pub use globset::Error as GlobError;

/// A header-keyed row of a delimited file
pub type Row = HashMap<String, String>;

/// Pick the delimiter from the first line of an existing file, or from the
/// extension of a path that does not exist yet.
pub fn guess_delimiter(path: &Path) -> Result<u8, ParseError> {
    if path.is_file() {
        let mut line = String::new();
        io::BufReader::new(fs::File::open(path)?).read_line(&mut line)?;
        if line.contains('\t') {
            Ok(b'\t')
        } else if line.contains(',') {
            Ok(b',')
        } else {
            Err(ParseError::UnknownDelimiter(path.to_path_buf()))
        }
    } else {
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Ok(b','),
            Some("txt") | Some("tsv") => Ok(b'\t'),
            _ => Err(ParseError::UnknownDelimiter(path.to_path_buf())),
        }
    }
}

/// Read every row of a tab or comma separated file, keyed by the header line
pub fn read_delimited(path: &Path) -> Result<Vec<Row>, ParseError> {
    let delimiter = guess_delimiter(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Coerce a cell to an integer or float if it looks like one, otherwise keep the text
pub fn parse_scalar(text: &str) -> FieldValue {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return FieldValue::Int(i);
    }
    // Rust's float grammar also accepts "inf" and "NaN", which instrument
    // software writes as text labels, not numbers.
    let numeric_chars = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if numeric_chars && trimmed.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(x) = trimmed.parse::<f64>() {
            return FieldValue::Float(x);
        }
    }
    FieldValue::Text(text.to_string())
}

/// The file name without its directory or extension
pub fn source_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, GlobError> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

/// Find files under `root` whose path relative to `root` matches `pattern`, and
/// optionally `filter` as well. Results are sorted.
///
/// `*` does not cross directory boundaries, so `*_morpheus/*/summary.tsv`
/// matches exactly two directory levels down.
pub fn find_files(
    root: &Path,
    pattern: &str,
    filter: Option<&Regex>,
) -> Result<Vec<PathBuf>, GlobError> {
    let matcher = compile_glob(pattern)?;
    let depth = Path::new(pattern).components().count().max(1);
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root).ok()?;
            if !matcher.is_match(relative) {
                return None;
            }
            if let Some(filter) = filter {
                if !filter.is_match(&relative.to_string_lossy()) {
                    return None;
                }
            }
            Some(e.into_path())
        })
        .collect();
    found.sort();
    debug!("Found {} files matching {pattern} in {}", found.len(), root.display());
    Ok(found)
}

/// Recursively copy the contents of `source` into `destination`
pub fn copy_dir(source: &Path, destination: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("42"), FieldValue::Int(42));
        assert_eq!(parse_scalar("-3"), FieldValue::Int(-3));
        assert_eq!(parse_scalar("1.5e3"), FieldValue::Float(1500.0));
        assert_eq!(parse_scalar(".25"), FieldValue::Float(0.25));
        assert_eq!(parse_scalar("NaN"), FieldValue::Text("NaN".into()));
        assert_eq!(parse_scalar("1.2.3"), FieldValue::Text("1.2.3".into()));
        assert_eq!(parse_scalar("trypsin"), FieldValue::Text("trypsin".into()));
    }

    #[test]
    fn test_read_delimited() -> Result<(), ParseError> {
        let dir = tempfile::tempdir()?;
        let tsv = dir.path().join("summary.tsv");
        fs::write(&tsv, "Dataset\tTarget PSMs\nrun1\t100\nrun2\t200\n")?;
        let rows = read_delimited(&tsv)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["Target PSMs"], "200");

        let csv_path = dir.path().join("table.csv");
        fs::write(&csv_path, "a,b\n1,2\n")?;
        assert_eq!(guess_delimiter(&csv_path)?, b',');

        let odd = dir.path().join("odd.txt");
        fs::write(&odd, "no delimiters here\n")?;
        assert!(matches!(
            guess_delimiter(&odd),
            Err(ParseError::UnknownDelimiter(_))
        ));
        Ok(())
    }

    #[test]
    fn test_find_files() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        for sub in ["ecoli_morpheus/ecoli_150101120000", "hela_morpheus/hela_150102120000"] {
            fs::create_dir_all(root.join(sub))?;
            fs::write(root.join(sub).join("summary.tsv"), "a\tb\n")?;
            fs::write(root.join(sub).join("run.PSMs.tsv"), "a\tb\n")?;
        }
        fs::create_dir_all(root.join("instrument_data"))?;
        fs::write(root.join("instrument_data/Hela_iRT_150101120000.txt"), "")?;
        fs::write(root.join("instrument_data/blank_150101120000.txt"), "")?;

        let summaries = find_files(root, "*_morpheus/*/summary.tsv", None).unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].ends_with("ecoli_morpheus/ecoli_150101120000/summary.tsv"));

        let psms = find_files(root, "*_morpheus/*/*PSMs.tsv", None).unwrap();
        assert_eq!(psms.len(), 2);

        let irt = Regex::new(r"(Hela|hela|ecoli).*iRT").unwrap();
        let logs = find_files(root, "instrument_data/*.txt", Some(&irt)).unwrap();
        assert_eq!(logs.len(), 1);
        Ok(())
    }

    #[test]
    fn test_copy_dir() -> io::Result<()> {
        let src = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        fs::create_dir_all(src.path().join("js"))?;
        fs::write(src.path().join("index.html"), "<html/>")?;
        fs::write(src.path().join("js/chart.js"), "//")?;
        assert_eq!(copy_dir(src.path(), dest.path())?, 2);
        assert!(dest.path().join("js/chart.js").is_file());
        Ok(())
    }
}
