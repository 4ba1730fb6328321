//! Flagging timepoints whose measurements fell below their baselines, and composing
//! the notification that reports them.
use std::fmt::Write as _;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::dates::SourceDate;
use crate::stats::Baselines;
use crate::timepoint::TimepointMap;

/// Decides which failing parameters of a timepoint are tolerable noise.
///
/// A handful of iRT peptides drifting individually is expected; only when more than
/// `max_forgiven` of them fail together is it treated as a real problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceRule {
    /// Parameter names starting with this are peptide-derived
    pub peptide_prefix: String,
    pub max_forgiven: usize,
}

impl Default for ToleranceRule {
    fn default() -> Self {
        Self {
            peptide_prefix: "pep".to_string(),
            max_forgiven: 3,
        }
    }
}

impl ToleranceRule {
    pub fn new(peptide_prefix: impl Into<String>, max_forgiven: usize) -> Self {
        Self {
            peptide_prefix: peptide_prefix.into(),
            max_forgiven,
        }
    }

    pub fn is_peptide_param(&self, name: &str) -> bool {
        name.starts_with(&self.peptide_prefix)
    }

    /// The failing parameters that survive forgiveness
    pub fn unforgiven<'a>(&self, failing: &[&'a str]) -> Vec<&'a str> {
        let n_peptides = failing.iter().filter(|p| self.is_peptide_param(p)).count();
        if n_peptides <= self.max_forgiven {
            failing
                .iter()
                .copied()
                .filter(|p| !self.is_peptide_param(p))
                .collect()
        } else {
            failing.to_vec()
        }
    }
}

/// A timepoint judged bad, with every parameter that failed there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadTimepoint {
    pub label: String,
    pub failing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlierReport {
    /// How many timepoints were evaluated this run
    pub considered: usize,
    pub bad: Vec<BadTimepoint>,
}

impl OutlierReport {
    pub fn has_outliers(&self) -> bool {
        !self.bad.is_empty()
    }
}

/// Evaluate every unconsidered timepoint in chronological order and mark it considered.
///
/// Once considered, a timepoint is never evaluated again, even if later runs
/// would judge it differently.
pub fn evaluate_timepoints(timepoints: &mut TimepointMap, rule: &ToleranceRule) -> OutlierReport {
    let mut report = OutlierReport::default();
    for (label, tp) in timepoints.iter_mut() {
        if tp.is_considered() {
            continue;
        }
        let failing: Vec<&str> = tp.failing().collect();
        let remaining = rule.unforgiven(&failing);
        debug!("{label}: failing {failing:?}, unforgiven {remaining:?}");
        if !remaining.is_empty() {
            report.bad.push(BadTimepoint {
                label: label.clone(),
                failing: failing.iter().map(|s| s.to_string()).collect(),
            });
        }
        tp.mark_considered();
        report.considered += 1;
    }
    report
}

/// The subject and body of an outlier notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// What to say about the instrument in a notification
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageSettings {
    pub instrument: String,
    /// Where the full QC charts can be seen, if anywhere
    pub report_url: Option<String>,
}

impl MessageSettings {
    pub fn new(instrument: impl Into<String>, report_url: Option<String>) -> Self {
        Self {
            instrument: instrument.into(),
            report_url,
        }
    }
}

pub fn compose_message(
    report: &OutlierReport,
    baselines: &Baselines,
    settings: &MessageSettings,
) -> Notification {
    let instrument = settings.instrument.to_uppercase();
    let mut body = String::new();
    let _ = writeln!(body, "Hi,\n");
    let _ = writeln!(body, "This is the automated QC for the {instrument}.");
    if let Some(url) = settings.report_url.as_deref() {
        let _ = writeln!(body, "Full report: {url}.");
    }
    let _ = writeln!(body, "\nInsufficient counts were encountered on:\n");
    for bad in report.bad.iter() {
        let _ = writeln!(body, " - {}:", SourceDate::humanize(&bad.label));
        for param in bad.failing.iter() {
            let _ = writeln!(body, "   - {param}");
        }
    }
    let _ = writeln!(body, "\n\nThe reference counts ranges are:\n");
    for (param, baseline) in baselines.iter() {
        let _ = writeln!(body, " - {param}");
        let _ = writeln!(
            body,
            "    - range = {:.0} +/- {:.0}",
            baseline.avg, baseline.stdev
        );
        let _ = writeln!(body, "    - lower-95% = {:.0}", baseline.lower_limit);
    }
    Notification {
        subject: format!("Warning: QC for {instrument}"),
        body,
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("The notification transport is unavailable: {0}")]
    Unavailable(String),
    #[error("The notification transport rejected the message: {0}")]
    Rejected(String),
}

/// A channel outlier notifications are dispatched through. Delivery and retries
/// are the transport's concern.
pub trait Notifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Evaluate the unconsidered timepoints and, if any are bad, send one notification
/// listing them together with every baseline.
///
/// A failure to send is logged, never propagated. The caller persists `timepoints`
/// afterwards whether or not anything was bad.
#[instrument(level = "debug", skip_all)]
pub fn evaluate_and_notify<N: Notifier + ?Sized>(
    timepoints: &mut TimepointMap,
    baselines: &Baselines,
    recipients: &[String],
    notifier: &N,
    rule: &ToleranceRule,
    settings: &MessageSettings,
) -> OutlierReport {
    let report = evaluate_timepoints(timepoints, rule);
    if !report.has_outliers() {
        info!("{} new timepoints, no outliers", report.considered);
        return report;
    }
    let message = compose_message(&report, baselines, settings);
    info!(
        "{} of {} new timepoints are outliers, notifying {}",
        report.bad.len(),
        report.considered,
        recipients.join(",")
    );
    debug!("{}", message.body);
    if let Err(e) = notifier.send(recipients, &message.subject, &message.body) {
        warn!("Failed to send outlier notification: {e}");
    }
    report
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use super::*;
    use crate::stats::Baseline;

    #[derive(Default)]
    struct CollectingNotifier {
        sent: RefCell<Vec<(Vec<String>, Notification)>>,
        fail: bool,
    }

    impl Notifier for CollectingNotifier {
        fn send(
            &self,
            recipients: &[String],
            subject: &str,
            body: &str,
        ) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Unavailable("offline".into()));
            }
            self.sent.borrow_mut().push((
                recipients.to_vec(),
                Notification {
                    subject: subject.to_string(),
                    body: body.to_string(),
                },
            ));
            Ok(())
        }
    }

    fn timepoint_with(timepoints: &mut TimepointMap, label: &str, verdicts: &[(&str, bool)]) {
        let tp = timepoints.entry(label);
        for (name, passed) in verdicts {
            tp.set_verdict(name, *passed);
        }
    }

    #[test]
    fn test_tolerance_boundary() {
        let rule = ToleranceRule::default();
        let mut timepoints = TimepointMap::new();
        timepoint_with(
            &mut timepoints,
            "2015-01-01T12:00:00",
            &[
                ("pep_b_RT", false),
                ("pep_c_RT", false),
                ("pep_d_RT", false),
                ("pep_e_RT", true),
                ("Hela Target PSMs", true),
            ],
        );
        timepoint_with(
            &mut timepoints,
            "2015-01-02T12:00:00",
            &[
                ("pep_b_RT", false),
                ("pep_c_RT", false),
                ("pep_d_RT", false),
                ("pep_e_RT", false),
                ("Hela Target PSMs", true),
            ],
        );
        let report = evaluate_timepoints(&mut timepoints, &rule);
        assert_eq!(report.considered, 2);
        assert_eq!(report.bad.len(), 1);
        assert_eq!(report.bad[0].label, "2015-01-02T12:00:00");
        assert_eq!(report.bad[0].failing.len(), 4);
    }

    #[test]
    fn test_forgiven_peptides_with_other_failure() {
        let rule = ToleranceRule::default();
        let failing = ["Ecoli Target PSMs", "pep_b_RT"];
        assert_eq!(rule.unforgiven(&failing), vec!["Ecoli Target PSMs"]);
        assert!(rule.unforgiven(&["pep_b_RT", "pep_c_RT"]).is_empty());
    }

    #[test]
    fn test_consideration_is_one_shot() {
        let rule = ToleranceRule::default();
        let mut timepoints = TimepointMap::new();
        timepoint_with(&mut timepoints, "2015-01-01T12:00:00", &[("Hela Target PSMs", false)]);
        let report = evaluate_timepoints(&mut timepoints, &rule);
        assert_eq!(report.bad.len(), 1);
        assert!(timepoints.get("2015-01-01T12:00:00").unwrap().is_considered());

        let report = evaluate_timepoints(&mut timepoints, &rule);
        assert_eq!(report.considered, 0);
        assert!(!report.has_outliers());
    }

    #[test]
    fn test_message_contents() {
        let report = OutlierReport {
            considered: 3,
            bad: vec![BadTimepoint {
                label: "2015-01-02T12:30:00".into(),
                failing: vec!["Hela Target PSMs".into(), "pep_b_RT".into()],
            }],
        };
        let mut baselines = Baselines::new();
        baselines.insert(
            "Hela Target PSMs".into(),
            Baseline {
                avg: 15000.4,
                stdev: 500.2,
                lower_limit: 14000.0,
            },
        );
        let settings = MessageSettings::new(
            "qeplus",
            Some("http://example.org/qc/qeplus/index.html".into()),
        );
        let message = compose_message(&report, &baselines, &settings);
        assert_eq!(message.subject, "Warning: QC for QEPLUS");
        assert!(message.body.contains("automated QC for the QEPLUS"));
        assert!(message.body.contains("Full report: http://example.org/qc/qeplus/index.html."));
        assert!(message.body.contains(" - 2015-01-02, 12:30:00:\n   - Hela Target PSMs\n   - pep_b_RT\n"));
        assert!(message.body.contains("    - range = 15000 +/- 500\n"));
        assert!(message.body.contains("    - lower-95% = 14000\n"));
    }

    #[test_log::test]
    fn test_evaluate_and_notify() {
        let rule = ToleranceRule::default();
        let settings = MessageSettings::new("qeplus", None);
        let recipients = vec!["qc@example.org".to_string()];

        let mut timepoints = TimepointMap::new();
        timepoint_with(&mut timepoints, "2015-01-01T12:00:00", &[("Hela Target PSMs", true)]);
        let notifier = CollectingNotifier::default();
        let report = evaluate_and_notify(
            &mut timepoints,
            &Baselines::new(),
            &recipients,
            &notifier,
            &rule,
            &settings,
        );
        assert!(!report.has_outliers());
        assert!(notifier.sent.borrow().is_empty());

        timepoint_with(&mut timepoints, "2015-01-02T12:00:00", &[("Hela Target PSMs", false)]);
        let report = evaluate_and_notify(
            &mut timepoints,
            &Baselines::new(),
            &recipients,
            &notifier,
            &rule,
            &settings,
        );
        assert_eq!(report.bad.len(), 1);
        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, recipients);
        assert!(sent[0].1.body.contains("2015-01-02, 12:00:00"));
    }

    #[test]
    fn test_transport_failure_still_considers() {
        let notifier = CollectingNotifier {
            fail: true,
            ..Default::default()
        };
        let mut timepoints = TimepointMap::new();
        timepoint_with(&mut timepoints, "2015-01-02T12:00:00", &[("Hela Target PSMs", false)]);
        let report = evaluate_and_notify(
            &mut timepoints,
            &Baselines::new(),
            &[],
            &notifier,
            &ToleranceRule::default(),
            &MessageSettings::default(),
        );
        assert!(report.has_outliers());
        assert!(timepoints.get("2015-01-02T12:00:00").unwrap().is_considered());
    }
}
