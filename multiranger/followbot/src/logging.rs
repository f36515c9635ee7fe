use std::{backtrace::Backtrace, panic::set_hook};

use anyhow::Context;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt::time::Uptime, layer::SubscriberExt, reload, Registry};

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerdeLevel {
    ERROR,
    WARN,
    #[default]
    INFO,
    DEBUG,
    TRACE,
}

impl From<SerdeLevel> for LevelFilter {
    fn from(level: SerdeLevel) -> Self {
        match level {
            SerdeLevel::ERROR => LevelFilter::ERROR,
            SerdeLevel::WARN => LevelFilter::WARN,
            SerdeLevel::INFO => LevelFilter::INFO,
            SerdeLevel::DEBUG => LevelFilter::DEBUG,
            SerdeLevel::TRACE => LevelFilter::TRACE,
        }
    }
}

/// Changes the level of the global subscriber after it was installed.
pub struct LogHandle(reload::Handle<LevelFilter, Registry>);

impl LogHandle {
    pub fn set_level(&self, level: SerdeLevel) -> anyhow::Result<()> {
        self.0
            .modify(|filter| *filter = level.into())
            .context("Failed to change the log level")
    }
}

/// Installs the global subscriber at `INFO` and routes `log` records and panics into it.
///
/// The level can be changed later through the returned handle, once the
/// configuration has been read.
pub fn init() -> anyhow::Result<LogHandle> {
    let (filter, handle) = reload::Layer::new(LevelFilter::INFO);
    let subscriber = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_timer(Uptime::default())
            .with_writer(std::io::stderr),
    );
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default tracing subscriber")?;
    tracing_log::LogTracer::init().context("Failed to initialize log tracer")?;

    set_hook(Box::new(move |info| {
        let backtrace = Backtrace::capture();
        tracing::error!("{info}\n{backtrace}");
    }));

    Ok(LogHandle(handle))
}
