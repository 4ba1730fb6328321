//! Logging sinks, for the process as a whole and for one instrument at a time
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{Dispatch, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, registry::LookupSpan, EnvFilter, Layer,
};

use crate::types::{RUN_LOG, RUN_LOG_TIME_FORMAT, WEB_DIR};

pub const LOG_FILE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// The compact STDERR layer, filtered by `RUST_LOG` and defaulting to INFO
pub fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fmt::layer()
        .compact()
        .with_timer(fmt::time::ChronoLocal::rfc_3339())
        .with_writer(io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
}

/// A plain text layer for log files, recording INFO and above
pub fn file_layer<S>(writer: NonBlocking, time_format: &str) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fmt::layer()
        .with_ansi(false)
        .with_timer(fmt::time::ChronoLocal::new(time_format.to_string()))
        .with_writer(writer)
        .with_filter(LevelFilter::INFO)
}

/// The process-wide log file named by `--log-file`, if any.
///
/// The writer is shared with every [`RunContext`] so the file sees all events.
#[derive(Default)]
pub struct LogSinks {
    pub log_file: Option<NonBlocking>,
    _guard: Option<WorkerGuard>,
}

impl LogSinks {
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let handle = fs::File::options().create(true).append(true).open(path)?;
        let (writer, guard) = tracing_appender::non_blocking(handle);
        Ok(Self {
            log_file: Some(writer),
            _guard: Some(guard),
        })
    }
}

/// The directories of one instrument and the dispatcher its run logs through.
///
/// Besides the process-wide sinks, everything logged inside [`RunContext::in_scope`]
/// is appended to `<data_root>/<instrument>/web/run.log`. The file is flushed when the
/// context is dropped.
pub struct RunContext {
    pub instrument: String,
    pub data_dir: PathBuf,
    pub web_dir: PathBuf,
    dispatch: Dispatch,
    _guard: WorkerGuard,
}

impl RunContext {
    pub fn create(data_root: &Path, instrument: &str, sinks: &LogSinks) -> io::Result<Self> {
        let data_dir = data_root.join(instrument);
        let web_dir = data_dir.join(WEB_DIR);
        fs::create_dir_all(&web_dir)?;

        let appender = tracing_appender::rolling::never(&web_dir, RUN_LOG);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let subscriber = tracing_subscriber::registry()
            .with(stderr_layer())
            .with(file_layer(writer, RUN_LOG_TIME_FORMAT))
            .with(
                sinks
                    .log_file
                    .clone()
                    .map(|w| file_layer(w, LOG_FILE_TIME_FORMAT)),
            );
        Ok(Self {
            instrument: instrument.to_string(),
            data_dir,
            web_dir,
            dispatch: Dispatch::new(subscriber),
            _guard: guard,
        })
    }

    pub fn run_log(&self) -> PathBuf {
        self.web_dir.join(RUN_LOG)
    }

    /// Run `f` with this context's dispatcher as the default
    pub fn in_scope<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, || f(self))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tracing::info;

    #[test]
    fn test_run_log_written() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let sinks = LogSinks::default();
        let run_log = {
            let ctx = RunContext::create(dir.path(), "qeplus", &sinks)?;
            ctx.in_scope(|ctx| info!("Making chart data for {}", ctx.instrument));
            ctx.run_log()
        };
        let text = fs::read_to_string(&run_log)?;
        assert!(text.contains("Making chart data for qeplus"));
        assert!(run_log.ends_with("qeplus/web/run.log"));
        Ok(())
    }
}
