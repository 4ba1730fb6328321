//! Acquisition dates embedded in instrument file names.
//!
//! Instrument software stamps each acquisition with a `yymmddHHMMSS` run of
//! digits, e.g. `Hela_iRT_150302093015.raw`. Files without one are not dated
//! sources and are never accumulated.
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;

const DATE_FORMAT: &str = "%y%m%d%H%M%S";
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{12}").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceDate {
    /// Seconds since the epoch, reading the stamp as UTC
    pub timestamp: i64,
    pub iso_date: String,
}

impl SourceDate {
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self {
            timestamp: dt.and_utc().timestamp(),
            iso_date: dt.format(ISO_FORMAT).to_string(),
        }
    }

    /// Parse the first 12 digit run in `text`
    pub fn from_text(text: &str) -> Option<Self> {
        let stamp = date_pattern().find(text)?;
        NaiveDateTime::parse_from_str(stamp.as_str(), DATE_FORMAT)
            .ok()
            .map(Self::from_datetime)
    }

    /// Search the file name first, then enclosing directory names, innermost first.
    ///
    /// Search engine outputs live in a directory named after the raw file, so
    /// `hela_morpheus/Hela_150302093015/summary.tsv` is dated by its parent.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.components()
            .rev()
            .filter_map(|c| c.as_os_str().to_str())
            .find(|c| date_pattern().is_match(c))
            .and_then(Self::from_text)
    }

    /// Render an ISO label the way a person would read it in a message
    pub fn humanize(iso_date: &str) -> String {
        iso_date.replacen('T', ", ", 1)
    }
}
