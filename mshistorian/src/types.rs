pub(crate) const MSMS_STORE: &str = "msms.logs.yaml";
pub(crate) const PSM_STORE: &str = "psm.logs.yaml";
pub(crate) const IRT_STORE: &str = "irt_peptides.logs.yaml";
pub(crate) const TOP_PEPTIDE_STORE: &str = "top_peptides.logs.yaml";
pub(crate) const TOP_PEPTIDE_CACHE_BASE: &str = "top_peptides";
pub(crate) const TIMEPOINTS: &str = "timepoints.yaml";
pub(crate) const RUN_LOG: &str = "run.log";
pub(crate) const CHARTS_JSONP: &str = "load_charts.jsonp";
pub(crate) const TITLE_JSONP: &str = "load_title.jsonp";
pub(crate) const DESCRIPTION_TXT: &str = "description.txt";
pub(crate) const INSTRUMENTS_TXT: &str = "instruments.txt";
pub(crate) const WEB_DIR: &str = "web";

pub(crate) const SUMMARY_GLOB: &str = "*_morpheus/*/summary.tsv";
pub(crate) const PSM_GLOB: &str = "*_morpheus/*/*PSMs.tsv";
pub(crate) const IRT_GLOB: &str = "instrument_data/*.txt";
pub(crate) const IRT_FILTER: &str = r"(Hela|hela|ecoli).*iRT";
pub(crate) const RAW_GLOB: &str = "instrument_data/*.raw";

pub(crate) const RUN_LOG_TIME_FORMAT: &str = "%Y-%m-%d|%H:%M:%S";
pub(crate) const DEFAULT_DESCRIPTION: &str = "Proteomics facility QC.";
