mod args;
mod context;
mod driver;
mod notify;
mod progress;
mod search;
mod types;
mod website;

pub use args::*;
pub use context::{file_layer, stderr_layer, LogSinks, RunContext, LOG_FILE_TIME_FORMAT};
pub use driver::{MSHistorian, MSHistorianError, CONFIG_TOML, ENV_PREFIX};
pub use notify::{make_notifier, LogNotifier, QuietNotifier, SendmailNotifier};
pub use progress::ProgressRecord;
pub use search::{is_complete_output, search_batch, search_instrument, ModificationsGuard, SearchError};
pub use website::{update_instrument, Histories};
