//! Bringing one instrument's histories, chart data and timepoints up to date
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use mshistory::chart::{make_chart, pep_id_params, write_jsonp, Chart, ChartTitle};
use mshistory::files::{copy_dir, find_files};
use mshistory::parsers::{
    parse_irt_log, parse_morpheus_psm, parse_morpheus_summary, parse_sample_output, peptide_ids,
    PEPTIDES_KEY, PRECURSOR_MASS_ERROR, SAMPLE_KEY,
};
use mshistory::peptides::{count_top_peptides, find_top_peptides, TOP_PEPTIDE_COUNT_KEY};
use mshistory::{
    accumulate_summarized, calibrate_and_classify, evaluate_and_notify, Baselines, Notifier,
    Parameter, Record, RecordStore, TimepointMap,
};

use crate::context::RunContext;
use crate::driver::{MSHistorian, MSHistorianError};
use crate::progress::ProgressRecord;
use crate::search::search_instrument;
use crate::types::{
    CHARTS_JSONP, DEFAULT_DESCRIPTION, DESCRIPTION_TXT, IRT_FILTER, IRT_GLOB, IRT_STORE,
    MSMS_STORE, PSM_GLOB, PSM_STORE, SUMMARY_GLOB, TIMEPOINTS, TITLE_JSONP,
    TOP_PEPTIDE_CACHE_BASE, TOP_PEPTIDE_STORE,
};

/// The accumulated histories of one instrument
#[derive(Debug, Default)]
pub struct Histories {
    pub msms: RecordStore,
    pub psm: RecordStore,
    pub top_peptides: RecordStore,
    pub irt: RecordStore,
}

impl Histories {
    pub fn len(&self) -> usize {
        self.msms.len() + self.psm.len() + self.top_peptides.len() + self.irt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The distinct samples the records were labeled with, sorted
pub fn samples(records: &[Record]) -> BTreeSet<String> {
    records
        .iter()
        .filter_map(|rec| rec.fields.get(SAMPLE_KEY)?.as_str())
        .map(String::from)
        .collect()
}

pub fn records_of_sample(records: &[Record], sample: &str) -> Vec<Record> {
    records
        .iter()
        .filter(|rec| {
            rec.fields
                .get(SAMPLE_KEY)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == sample)
        })
        .cloned()
        .collect()
}

/// The instrument's description for its QC page heading
pub fn read_description(data_dir: &Path) -> String {
    let path = data_dir.join(DESCRIPTION_TXT);
    match fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => DEFAULT_DESCRIPTION.to_string(),
        Err(e) => {
            if path.exists() {
                warn!("Failed to read {}: {e}", path.display());
            }
            DEFAULT_DESCRIPTION.to_string()
        }
    }
}

/// Parse every new search summary, PSM table and iRT log into the instrument's
/// histories.
#[instrument(level = "debug", skip_all)]
pub fn update_histories(
    ctx: &RunContext,
    config: &MSHistorian,
) -> Result<(Histories, usize), MSHistorianError> {
    let web_dir = &ctx.web_dir;
    let data_dir = &ctx.data_dir;
    let mut histories = Histories::default();

    let summaries = find_files(data_dir, SUMMARY_GLOB, None)?;
    let (msms, summary) = accumulate_summarized(
        &summaries,
        &|p: &Path| parse_sample_output(p, parse_morpheus_summary),
        &web_dir.join(MSMS_STORE),
    )?;
    histories.msms = msms;
    let mut added = summary.added;

    let psm_files = find_files(data_dir, PSM_GLOB, None)?;
    let (psm, summary) = accumulate_summarized(
        &psm_files,
        &|p: &Path| parse_sample_output(p, parse_morpheus_psm),
        &web_dir.join(PSM_STORE),
    )?;
    histories.psm = psm;
    added += summary.added;

    if !psm_files.is_empty() && config.top_peptide_count > 0 {
        match find_top_peptides(
            &psm_files,
            &web_dir.join(TOP_PEPTIDE_CACHE_BASE),
            config.top_peptide_count,
        ) {
            Ok(top) => {
                let (top_peptides, summary) = accumulate_summarized(
                    &psm_files,
                    &|p: &Path| parse_sample_output(p, |q| count_top_peptides(q, &top)),
                    &web_dir.join(TOP_PEPTIDE_STORE),
                )?;
                histories.top_peptides = top_peptides;
                added += summary.added;
            }
            Err(e) => {
                warn!("Skipping common peptides for {}: {e}", ctx.instrument);
                histories.top_peptides = RecordStore::load(&web_dir.join(TOP_PEPTIDE_STORE))?;
            }
        }
    }

    let irt_filter = Regex::new(IRT_FILTER)?;
    let irt_logs = find_files(data_dir, IRT_GLOB, Some(&irt_filter))?;
    let (irt, summary) =
        accumulate_summarized(&irt_logs, &parse_irt_log, &web_dir.join(IRT_STORE))?;
    histories.irt = irt;
    added += summary.added;

    Ok((histories, added))
}

fn sample_params(samples: &BTreeSet<String>, label: &str, key: &str) -> Vec<Parameter> {
    samples
        .iter()
        .map(|sample| {
            Parameter::new(
                format!("{sample} {label}"),
                format!("{sample} {key}").as_str().into(),
            )
        })
        .collect()
}

/// Build every chart of the QC page from the instrument's histories
pub fn make_charts(histories: &Histories, config: &MSHistorian) -> Vec<Chart> {
    let mut charts = Vec::new();

    let msms = histories.msms.records();
    let msms_samples = samples(msms);
    for column in config.summary_columns.iter() {
        charts.push(make_chart(
            msms,
            &sample_params(&msms_samples, column, column),
            &format!("Digest {column}"),
            "",
        ));
    }

    let psm = histories.psm.records();
    let psm_samples = samples(psm);
    let mut mass_error_params = Vec::new();
    for sample in psm_samples.iter() {
        mass_error_params.push(Parameter::new(
            format!("{sample} dMass avg"),
            format!("{sample} {PRECURSOR_MASS_ERROR}").as_str().into(),
        ));
        mass_error_params.push(Parameter::new(
            format!("{sample} dMass avg+std"),
            format!("{sample} {PRECURSOR_MASS_ERROR} Upper").as_str().into(),
        ));
    }
    charts.push(make_chart(
        psm,
        &mass_error_params,
        "Digest Precursor dMass [ppm]",
        "",
    ));

    if !histories.top_peptides.is_empty() {
        let top = histories.top_peptides.records();
        charts.push(make_chart(
            top,
            &sample_params(&samples(top), "Common Peptides", TOP_PEPTIDE_COUNT_KEY),
            "Digest Common Peptides",
            "Number of the most commonly identified peptides matched with typical intensity",
        ));
    }

    let irt = histories.irt.records();
    if !irt.is_empty() {
        let ids = peptide_ids(irt);
        charts.push(make_chart(
            irt,
            &pep_id_params(&ids, "RT"),
            "iRT Peptides Retention Time",
            "The measured retention time of the peptides",
        ));
        charts.push(make_chart(
            irt,
            &pep_id_params(&ids, "crt"),
            "iRT Peptides Relative Retention Time",
            "Retention time relative to pep_b (0) and pep_k (100)",
        ));
        charts.push(make_chart(
            irt,
            &pep_id_params(&ids, "Height"),
            "iRT Peptides Peak Height",
            "Height of the peak associated at the retention time",
        ));
    }
    charts
}

pub fn write_chart_data(
    web_dir: &Path,
    charts: &[Chart],
    title: &ChartTitle,
) -> Result<(), MSHistorianError> {
    write_jsonp(&charts, &web_dir.join(CHARTS_JSONP), "load_charts")?;
    write_jsonp(title, &web_dir.join(TITLE_JSONP), "load_title")?;
    Ok(())
}

/// The parameters checked for outliers and their baselines, with verdicts written
/// into `timepoints`
pub fn classify_histories(
    histories: &Histories,
    config: &MSHistorian,
    timepoints: &mut TimepointMap,
) -> Baselines {
    let mut baselines = Baselines::new();
    let msms = histories.msms.records();
    for sample in samples(msms) {
        let records = records_of_sample(msms, &sample);
        let params: Vec<Parameter> = config
            .summary_columns
            .iter()
            .map(|column| Parameter::top_level(format!("{sample} {column}")))
            .collect();
        baselines.extend(calibrate_and_classify(&records, &params, timepoints));
    }

    let irt = histories.irt.records();
    let params: Vec<Parameter> = peptide_ids(irt)
        .into_iter()
        .map(|id| {
            let path = [PEPTIDES_KEY, id.as_str(), "RT"].into_iter().collect();
            Parameter::new(format!("{id}_RT"), path)
        })
        .collect();
    baselines.extend(calibrate_and_classify(irt, &params, timepoints));
    baselines
}

/// Run one instrument's update: search, accumulate, chart, classify and report
pub fn update_instrument(
    ctx: &RunContext,
    config: &MSHistorian,
    notifier: &dyn Notifier,
) -> Result<ProgressRecord, MSHistorianError> {
    let mut progress = ProgressRecord::default();
    info!("Making chart data for {}", ctx.instrument);

    if config.run_search || config.dry_run_search {
        progress += search_instrument(&ctx.data_dir, &config.search, config.dry_run_search)?;
    }

    if let Some(template) = config.template_dir.as_deref() {
        let copied = copy_dir(template, &ctx.web_dir)?;
        debug!("Copied {copied} files from {}", template.display());
    }

    let (histories, added) = update_histories(ctx, config)?;
    progress.records_added += added;

    let charts = make_charts(&histories, config);
    let title = ChartTitle {
        title: ctx.instrument.clone(),
        description: read_description(&ctx.data_dir),
    };
    write_chart_data(&ctx.web_dir, &charts, &title)?;

    let timepoints_path: PathBuf = ctx.web_dir.join(TIMEPOINTS);
    let mut timepoints = TimepointMap::load(&timepoints_path)?;
    let baselines = classify_histories(&histories, config, &mut timepoints);
    let report = evaluate_and_notify(
        &mut timepoints,
        &baselines,
        &config.recipients,
        notifier,
        &config.tolerance_rule(),
        &config.message_settings(&ctx.instrument),
    );
    timepoints.save(&timepoints_path)?;

    progress.timepoints_considered += report.considered;
    progress.bad_timepoints += report.bad.len();
    Ok(progress)
}

#[cfg(test)]
mod test {
    use super::*;
    use mshistory::{FieldValue, Fields, SourceDate};

    fn labeled(stamp: &str, sample: &str, psms: i64) -> Record {
        let mut fields = Fields::new();
        fields.insert(SAMPLE_KEY.into(), FieldValue::Text(sample.into()));
        fields.insert(format!("{sample} Target PSMs"), FieldValue::Int(psms));
        Record::new(
            format!("{sample}_{stamp}"),
            SourceDate::from_text(stamp).unwrap(),
            fields,
        )
    }

    #[test]
    fn test_samples() {
        let records = vec![
            labeled("150101120000", "Hela", 100),
            labeled("150101130000", "Ecoli", 50),
            labeled("150102120000", "Hela", 90),
        ];
        let found: Vec<String> = samples(&records).into_iter().collect();
        assert_eq!(found, vec!["Ecoli", "Hela"]);
        assert_eq!(records_of_sample(&records, "Hela").len(), 2);
    }

    #[test]
    fn test_classify_per_sample() {
        let mut histories = Histories::default();
        histories.msms.extend([
            labeled("150101120000", "Hela", 100),
            labeled("150102120000", "Hela", 100),
            labeled("150103120000", "Hela", 100),
            labeled("150101130000", "Ecoli", 50),
            labeled("150102130000", "Ecoli", 50),
        ]);
        let config = MSHistorian {
            summary_columns: vec!["Target PSMs".into()],
            ..Default::default()
        };
        let mut timepoints = TimepointMap::new();
        let baselines = classify_histories(&histories, &config, &mut timepoints);
        assert_eq!(baselines["Hela Target PSMs"].avg, 100.0);
        assert_eq!(baselines["Ecoli Target PSMs"].avg, 50.0);
        // Each sample is classified only at its own timepoints
        let hela_tp = timepoints.get("2015-01-01T12:00:00").unwrap();
        assert_eq!(hela_tp.verdict("Ecoli Target PSMs"), None);
        assert_eq!(timepoints.len(), 5);
    }

    #[test]
    fn test_description() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_description(dir.path()), DEFAULT_DESCRIPTION);
        fs::write(dir.path().join(DESCRIPTION_TXT), "Thermo QExactive Plus\n").unwrap();
        assert_eq!(read_description(dir.path()), "Thermo QExactive Plus");
    }
}
