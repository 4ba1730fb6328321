pub mod record;
pub mod dates;
pub mod files;
pub mod parsers;
pub mod stats;
pub mod store;
pub mod timepoint;
pub mod outliers;

pub mod peptides;
pub mod chart;

pub use crate::record::{FieldError, FieldValue, Fields, ParamPath, Parameter, Record};
pub use crate::dates::SourceDate;
pub use crate::parsers::ParseError;
pub use crate::stats::{calibrate, Baseline, Baselines};
pub use crate::store::{accumulate, accumulate_summarized, parse_logs, AccumulationSummary, RecordStore, SourceParser, StoreError};
pub use crate::timepoint::{calibrate_and_classify, classify, Consideration, Timepoint, TimepointMap};
pub use crate::outliers::{
    evaluate_and_notify, evaluate_timepoints, MessageSettings, Notification, Notifier, NotifyError,
    OutlierReport, ToleranceRule,
};
