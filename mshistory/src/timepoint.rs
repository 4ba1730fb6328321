//! Per-timepoint pass/fail verdicts for calibrated parameters
use std::collections::btree_map::{Iter, IterMut};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::record::{Parameter, ParamPath, Record};
use crate::stats::{calibrate, Baseline, Baselines};
use crate::store::{load_yaml, save_yaml, StoreError};

/// Whether a [`Timepoint`] has been evaluated for outliers yet.
///
/// The only transition is `Unconsidered` → `Considered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consideration {
    #[default]
    Unconsidered,
    Considered,
}

/// The verdicts for every parameter measured at one acquisition time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Timepoint {
    #[serde(default)]
    pub state: Consideration,
    /// Parameter name to whether it passed its lower bound
    #[serde(default)]
    pub verdicts: BTreeMap<String, bool>,
}

impl Timepoint {
    pub fn is_considered(&self) -> bool {
        self.state == Consideration::Considered
    }

    pub fn mark_considered(&mut self) {
        self.state = Consideration::Considered;
    }

    /// Store a verdict, unless this timepoint has already been considered.
    ///
    /// Returns whether the verdict was stored.
    pub fn set_verdict(&mut self, parameter: &str, passed: bool) -> bool {
        if self.is_considered() {
            return false;
        }
        self.verdicts.insert(parameter.to_string(), passed);
        true
    }

    pub fn verdict(&self, parameter: &str) -> Option<bool> {
        self.verdicts.get(parameter).copied()
    }

    /// The names of the parameters that failed, in name order
    pub fn failing(&self) -> impl Iterator<Item = &str> + '_ {
        self.verdicts
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(name, _)| name.as_str())
    }
}

/// Every [`Timepoint`] keyed by ISO timestamp label, which sorts chronologically
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimepointMap(BTreeMap<String, Timepoint>);

impl TimepointMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        Ok(load_yaml(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        save_yaml(self, path)
    }

    pub fn get(&self, label: &str) -> Option<&Timepoint> {
        self.0.get(label)
    }

    pub fn entry(&mut self, label: &str) -> &mut Timepoint {
        self.0.entry(label.to_string()).or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, String, Timepoint> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, String, Timepoint> {
        self.0.iter_mut()
    }

    pub fn unconsidered(&self) -> impl Iterator<Item = (&String, &Timepoint)> + '_ {
        self.0.iter().filter(|(_, tp)| !tp.is_considered())
    }
}

/// Record whether each record's value at `path` clears `baseline`, under `name`.
///
/// Missing values fail. Returns the number of verdicts stored.
pub fn classify(
    records: &[Record],
    name: &str,
    path: &ParamPath,
    baseline: &Baseline,
    timepoints: &mut TimepointMap,
) -> usize {
    let mut stored = 0;
    for rec in records {
        let passed = match rec.number(path) {
            Ok(Some(value)) => baseline.accepts(value),
            _ => false,
        };
        if timepoints.entry(rec.timepoint_label()).set_verdict(name, passed) {
            stored += 1;
        }
    }
    stored
}

/// Calibrate each parameter across `records` and classify every record against
/// the resulting baseline.
///
/// Parameters that cannot be calibrated are left out of the returned [`Baselines`]
/// and produce no verdicts. Parameter names must be distinct, later duplicates are
/// ignored.
pub fn calibrate_and_classify(
    records: &[Record],
    parameters: &[Parameter],
    timepoints: &mut TimepointMap,
) -> Baselines {
    let mut baselines = Baselines::new();
    let mut seen = HashSet::new();
    for param in parameters {
        if !seen.insert(param.name.as_str()) {
            warn!("Parameter {} was listed more than once, ignoring {}", param.name, param.path);
            continue;
        }
        let Some(baseline) = calibrate(records, &param.path) else {
            debug!("No baseline available for {}", param.name);
            continue;
        };
        let stored = classify(records, &param.name, &param.path, &baseline, timepoints);
        debug!(
            "{}: avg={:.3} stdev={:.3} lower_limit={:.3}, {stored} verdicts",
            param.name, baseline.avg, baseline.stdev, baseline.lower_limit
        );
        baselines.insert(param.name.clone(), baseline);
    }
    baselines
}
