use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use mshistory::files::GlobError;
use mshistory::{MessageSettings, StoreError, ToleranceRule};

use crate::args::{
    make_default_search_params, make_default_summary_columns, non_empty_string, NotifyMode,
    SearchParams,
};
use crate::context::{LogSinks, RunContext};
use crate::notify::make_notifier;
use crate::progress::ProgressRecord;
use crate::search::SearchError;
use crate::types::INSTRUMENTS_TXT;
use crate::website::update_instrument;

pub const CONFIG_TOML: &str = "mshistorian.toml";
pub const ENV_PREFIX: &str = "MSHISTORIAN_";

const DEFAULT_DATA_ROOT: &str = "..";
const DEFAULT_FROM_ADDRESS: &str = "mshistorian@localhost";
const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";
const DEFAULT_PEPTIDE_PREFIX: &str = "pep";
const DEFAULT_MAX_FORGIVEN: usize = 3;
const DEFAULT_TOP_PEPTIDES: usize = 300;

#[derive(Debug, Error)]
pub enum MSHistorianError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error(transparent)]
    StoreError(#[from] StoreError),
    #[error(transparent)]
    SearchError(#[from] SearchError),
    #[error("Invalid file pattern: {0}")]
    GlobError(
        #[source]
        #[from]
        GlobError,
    ),
    #[error("Invalid file filter: {0}")]
    RegexError(
        #[source]
        #[from]
        regex::Error,
    ),
    #[error("No instruments were given and {0} does not list any")]
    NoInstruments(PathBuf),
}

/// Keep the QC history of mass spectrometry instruments up to date.
///
/// For each instrument directory under the data root, search newly acquired raw
/// files, accumulate the search and iRT outputs into per-instrument histories,
/// write chart data for the QC web page, and report new runs whose measurements
/// fall below their baselines.
///
/// Every run reads and rewrites the histories under `<instrument>/web`. Runs against
/// the same data root must not overlap; schedule them apart.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
#[serde(default)]
pub struct MSHistorian {
    /// The instruments to update. If none are given, they are read from
    /// `instruments.txt` in the data root.
    #[arg()]
    pub instruments: Vec<String>,

    /// The directory holding one directory per instrument
    #[arg(short = 'd', long = "data-root", default_value = DEFAULT_DATA_ROOT)]
    pub data_root: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mshistorian.toml` in the working directory.
    /// Environment variables prefixed with `MSHISTORIAN_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// An address to send outlier reports to. May be given more than once.
    #[arg(short = 'r', long = "recipient", value_delimiter = ',')]
    pub recipients: Vec<String>,

    /// The sender address of outlier reports
    #[arg(short = 'f', long = "from-address", default_value = DEFAULT_FROM_ADDRESS)]
    pub from_address: String,

    /// The address of an instrument's QC page, quoted in outlier reports.
    ///
    /// `{instrument}` is replaced by the instrument name.
    #[arg(short = 'u', long = "report-url")]
    pub report_url: Option<String>,

    /// How outlier reports are delivered
    #[arg(short = 'n', long = "notify", default_value = "sendmail")]
    pub notify: NotifyMode,

    /// The sendmail program used to deliver outlier reports
    #[arg(long = "sendmail-path", default_value = DEFAULT_SENDMAIL)]
    pub sendmail_path: PathBuf,

    /// How many iRT peptides may fail together at one timepoint without it being
    /// reported
    #[arg(short = 'p', long = "max-forgiven-peptides", default_value_t = DEFAULT_MAX_FORGIVEN)]
    pub max_forgiven_peptides: usize,

    /// The prefix of iRT peptide parameter names
    #[arg(long = "peptide-prefix", default_value = DEFAULT_PEPTIDE_PREFIX, value_parser = non_empty_string)]
    pub peptide_prefix: String,

    /// The number of common peptides to track across search results
    #[arg(short = 't', long = "top-peptides", default_value_t = DEFAULT_TOP_PEPTIDES)]
    pub top_peptide_count: usize,

    /// Copy the contents of this directory into each instrument's web directory
    #[arg(long = "template-dir")]
    pub template_dir: Option<PathBuf>,

    /// Search newly acquired raw files before updating the histories
    #[arg(short = 's', long = "search")]
    pub run_search: bool,

    /// Report which raw files would be searched without running the search engine
    #[arg(long = "dry-run-search")]
    pub dry_run_search: bool,

    #[arg(skip=make_default_search_params())]
    pub search: SearchParams,

    /// The summary columns charted and checked for every sample
    #[arg(skip=make_default_summary_columns())]
    pub summary_columns: Vec<String>,
}

impl Default for MSHistorian {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            log_file: None,
            config_file: None,
            recipients: Vec::new(),
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            report_url: None,
            notify: NotifyMode::default(),
            sendmail_path: PathBuf::from(DEFAULT_SENDMAIL),
            max_forgiven_peptides: DEFAULT_MAX_FORGIVEN,
            peptide_prefix: DEFAULT_PEPTIDE_PREFIX.to_string(),
            top_peptide_count: DEFAULT_TOP_PEPTIDES,
            template_dir: None,
            run_search: false,
            dry_run_search: false,
            search: make_default_search_params(),
            summary_columns: make_default_summary_columns(),
        }
    }
}

impl MSHistorian {
    /// Layer `mshistorian.toml`, the `--config-file` and `MSHISTORIAN_` environment
    /// variables over these arguments.
    pub fn configure(self) -> Result<Self, MSHistorianError> {
        let mut config =
            Figment::from(Serialized::defaults(&self)).merge(Toml::file(CONFIG_TOML));
        if let Some(path) = self.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed(ENV_PREFIX));
        Ok(config.extract()?)
    }

    pub fn tolerance_rule(&self) -> ToleranceRule {
        ToleranceRule::new(self.peptide_prefix.clone(), self.max_forgiven_peptides)
    }

    pub fn message_settings(&self, instrument: &str) -> MessageSettings {
        MessageSettings::new(
            instrument,
            self.report_url
                .as_ref()
                .map(|url| url.replace("{instrument}", instrument)),
        )
    }

    fn read_instruments(data_root: &Path) -> Result<Vec<String>, MSHistorianError> {
        let path = data_root.join(INSTRUMENTS_TXT);
        if !path.is_file() {
            return Err(MSHistorianError::NoInstruments(path));
        }
        let listed: Vec<String> = fs::read_to_string(&path)?
            .split_whitespace()
            .map(String::from)
            .collect();
        if listed.is_empty() {
            return Err(MSHistorianError::NoInstruments(path));
        }
        Ok(listed)
    }

    pub fn resolve_instruments(&self) -> Result<Vec<String>, MSHistorianError> {
        if self.instruments.is_empty() {
            Self::read_instruments(&self.data_root)
        } else {
            Ok(self.instruments.clone())
        }
    }

    pub fn main(&self) -> Result<(), MSHistorianError> {
        self.run(&LogSinks::default())?;
        Ok(())
    }

    /// Update every instrument in turn. A failing instrument is logged and the
    /// others are still updated.
    pub fn run(&self, sinks: &LogSinks) -> Result<ProgressRecord, MSHistorianError> {
        let instruments = self.resolve_instruments()?;
        info!(
            "Updating {} from {}",
            instruments.join(", "),
            self.data_root.display()
        );
        debug!("{self:?}");
        let notifier = make_notifier(self.notify, &self.sendmail_path, &self.from_address);
        if self.notify == NotifyMode::Sendmail && self.recipients.is_empty() {
            warn!("No recipients were given, outlier reports will not be sent");
        }

        let mut progress = ProgressRecord::default();
        for instrument in instruments.iter() {
            progress.instruments += 1;
            if !self.data_root.join(instrument).is_dir() {
                error!(
                    "{instrument} has no directory in {}",
                    self.data_root.display()
                );
                progress.instrument_failures += 1;
                continue;
            }
            let ctx = match RunContext::create(&self.data_root, instrument, sinks) {
                Ok(ctx) => ctx,
                Err(e) => {
                    error!("Failed to prepare {instrument}: {e}");
                    progress.instrument_failures += 1;
                    continue;
                }
            };
            ctx.in_scope(|ctx| match update_instrument(ctx, self, notifier.as_ref()) {
                Ok(prog) => progress += prog,
                Err(e) => {
                    error!("Failed to update {}: {e}", ctx.instrument);
                    progress.instrument_failures += 1;
                }
            });
        }

        info!(
            "Instruments: {} ({} failed)",
            progress.instruments, progress.instrument_failures
        );
        info!("New Records: {}", progress.records_added);
        info!(
            "Timepoints Considered: {} | Outliers: {}",
            progress.timepoints_considered, progress.bad_timepoints
        );
        if self.run_search || self.dry_run_search {
            info!(
                "Searched: {} | Skipped: {} | Failed: {}",
                progress.searched, progress.search_skipped, progress.search_failed
            );
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_agree() {
        let parsed = MSHistorian::parse_from(["mshistorian"]);
        let default = MSHistorian::default();
        assert_eq!(parsed.data_root, default.data_root);
        assert_eq!(parsed.from_address, default.from_address);
        assert_eq!(parsed.notify, default.notify);
        assert_eq!(parsed.max_forgiven_peptides, default.max_forgiven_peptides);
        assert_eq!(parsed.top_peptide_count, default.top_peptide_count);
        assert_eq!(parsed.search, default.search);
        assert_eq!(parsed.summary_columns, default.summary_columns);
    }

    #[test]
    fn test_cli_values() {
        let parsed = MSHistorian::parse_from([
            "mshistorian",
            "qeplus",
            "qeclassic",
            "-r",
            "a@example.org,b@example.org",
            "--notify",
            "none",
            "-u",
            "http://example.org/{instrument}/index.html",
        ]);
        assert_eq!(parsed.instruments, vec!["qeplus", "qeclassic"]);
        assert_eq!(parsed.recipients.len(), 2);
        assert_eq!(parsed.notify, NotifyMode::Quiet);
        assert_eq!(
            parsed.message_settings("qeplus").report_url.as_deref(),
            Some("http://example.org/qeplus/index.html")
        );
    }

    #[test]
    fn test_instruments_file() -> Result<(), MSHistorianError> {
        let dir = tempfile::tempdir()?;
        let config = MSHistorian {
            data_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(matches!(
            config.resolve_instruments(),
            Err(MSHistorianError::NoInstruments(_))
        ));
        fs::write(dir.path().join(INSTRUMENTS_TXT), "qeplus\nqeplus2\n")?;
        assert_eq!(config.resolve_instruments()?, vec!["qeplus", "qeplus2"]);
        Ok(())
    }
}
