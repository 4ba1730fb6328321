use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mshistorian::{
    file_layer, stderr_layer, LogSinks, MSHistorian, MSHistorianError, LOG_FILE_TIME_FORMAT,
};

fn configure_log(sinks: &LogSinks) {
    let subscriber = tracing_subscriber::registry().with(stderr_layer()).with(
        sinks
            .log_file
            .clone()
            .map(|writer| file_layer(writer, LOG_FILE_TIME_FORMAT)),
    );

    subscriber.init();
}

fn main() -> Result<(), MSHistorianError> {
    let args = MSHistorian::parse().configure()?;

    let sinks = LogSinks::open(args.log_file.as_deref())?;
    configure_log(&sinks);

    args.run(&sinks)?;
    Ok(())
}
