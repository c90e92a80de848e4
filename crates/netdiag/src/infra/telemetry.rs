//! Tracing subscriber installation driven by [`LogSettings`].

use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;

use tracing::Subscriber;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::infra::config::LogFormat;
use crate::infra::config::LogSettings;
use crate::infra::config::LogSink;
use crate::infra::config::LogStream;

/// Keeps the non-blocking log writer alive; drop it last.
#[derive(Debug)]
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

struct LogWriter {
    writer: BoxMakeWriter,
    guard: Option<WorkerGuard>,
    ansi: bool,
    /// Set when the log file could not be opened and stderr is used instead.
    fallback: Option<(PathBuf, io::Error)>,
}

impl LogWriter {
    fn stream(stream: LogStream) -> Self {
        let (writer, ansi) = match stream {
            LogStream::Stderr => (
                BoxMakeWriter::new(io::stderr),
                io::stderr().is_terminal(),
            ),
            LogStream::Stdout => (
                BoxMakeWriter::new(io::stdout),
                io::stdout().is_terminal(),
            ),
        };
        Self {
            writer,
            guard: None,
            ansi,
            fallback: None,
        }
    }

    fn open(sink: LogSink) -> Self {
        let path = match sink {
            LogSink::Stream(stream) => return Self::stream(stream),
            LogSink::File(path) => path,
        };
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                Self {
                    writer: BoxMakeWriter::new(non_blocking),
                    guard: Some(guard),
                    ansi: false,
                    fallback: None,
                }
            }
            Err(err) => Self {
                fallback: Some((path, err)),
                ..Self::stream(LogStream::Stderr)
            },
        }
    }
}

fn build_subscriber(
    format: LogFormat,
    filter: EnvFilter,
    writer: BoxMakeWriter,
    ansi: bool,
) -> Box<dyn Subscriber + Send + Sync> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Json => Box::new(builder.with_ansi(false).json().with_writer(writer).finish()),
        LogFormat::Text => Box::new(builder.with_ansi(ansi).with_writer(writer).finish()),
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the settings'
/// default level. Returns a disabled guard if a subscriber is already set.
pub fn init_tracing(settings: &LogSettings) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.default_directive()));
    let LogWriter {
        writer,
        guard,
        ansi,
        fallback,
    } = LogWriter::open(settings.sink());

    let subscriber = build_subscriber(settings.format(), filter, writer, ansi);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return TelemetryGuard { _guard: None };
    }

    if let Some((path, err)) = fallback {
        warn!(path = %path.display(), error = %err, "Failed to open log file; logging to stderr");
    }
    for rejected in settings.rejected() {
        warn!(key = rejected.key, value = %rejected.value, "Invalid logging config; using default");
    }

    TelemetryGuard { _guard: guard }
}
