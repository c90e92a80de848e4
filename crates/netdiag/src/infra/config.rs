//! Server configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::domain::ToolPaths;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";
const DEFAULT_MAX_CONNECTIONS: usize = 64;
const DEFAULT_EVENT_QUEUE: usize = 128;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 15;

pub const LISTEN_ENV: &str = "NETDIAG_LISTEN";
pub const ALLOW_REMOTE_ENV: &str = "NETDIAG_ALLOW_REMOTE";
pub const MAX_CONNECTIONS_ENV: &str = "NETDIAG_MAX_CONNECTIONS";
const PORT_ENV: &str = "PORT";
const EVENT_QUEUE_ENV: &str = "NETDIAG_EVENT_QUEUE";
const SEND_TIMEOUT_ENV: &str = "NETDIAG_SEND_TIMEOUT_SECS";
const PING_BIN_ENV: &str = "NETDIAG_PING_BIN";
const TRACEROUTE_BIN_ENV: &str = "NETDIAG_TRACEROUTE_BIN";
const NSLOOKUP_BIN_ENV: &str = "NETDIAG_NSLOOKUP_BIN";
const LOG_FILE_ENV: &str = "NETDIAG_LOG";
const LOG_FORMAT_ENV: &str = "NETDIAG_LOG_FORMAT";
const LOG_STREAM_ENV: &str = "NETDIAG_LOG_STREAM";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    listen: String,
    allow_remote: bool,
    max_connections: usize,
    event_queue: usize,
    send_timeout: Duration,
    tools: ToolPaths,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub fn allow_remote(&self) -> bool {
        self.allow_remote
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn event_queue(&self) -> usize {
        self.event_queue
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub fn from_env() -> Self {
        let mut tools = ToolPaths::default();
        if let Some(ping) = non_empty_env(PING_BIN_ENV) {
            tools.ping = ping;
        }
        if let Some(traceroute) = non_empty_env(TRACEROUTE_BIN_ENV) {
            tools.traceroute = traceroute;
        }
        if let Some(nslookup) = non_empty_env(NSLOOKUP_BIN_ENV) {
            tools.nslookup = nslookup;
        }

        Self {
            listen: listen_from_env(),
            allow_remote: parse_env_bool(ALLOW_REMOTE_ENV),
            max_connections: parse_env_usize(MAX_CONNECTIONS_ENV, DEFAULT_MAX_CONNECTIONS),
            event_queue: parse_env_usize(EVENT_QUEUE_ENV, DEFAULT_EVENT_QUEUE).max(1),
            send_timeout: Duration::from_secs(parse_env_u64(
                SEND_TIMEOUT_ENV,
                DEFAULT_SEND_TIMEOUT_SECS,
            )),
            tools,
        }
    }

    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_event_queue(mut self, capacity: usize) -> Self {
        self.event_queue = capacity.max(1);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogStream {
    #[default]
    Stderr,
    Stdout,
}

/// Where log lines go. A file wins over the stream choice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    File(PathBuf),
    Stream(LogStream),
}

/// An environment value that could not be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedSetting {
    pub key: &'static str,
    pub value: String,
}

/// Logging configuration.
///
/// Read before any subscriber exists, so invalid values cannot be warned
/// about here. They are collected in [`LogSettings::rejected`] and reported
/// once logging is up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    file: Option<PathBuf>,
    format: LogFormat,
    stream: LogStream,
    verbose: bool,
    rejected: Vec<RejectedSetting>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        let mut rejected = Vec::new();
        let format = parse_env_choice(
            LOG_FORMAT_ENV,
            &[("text", LogFormat::Text), ("json", LogFormat::Json)],
            &mut rejected,
        );
        let stream = parse_env_choice(
            LOG_STREAM_ENV,
            &[("stderr", LogStream::Stderr), ("stdout", LogStream::Stdout)],
            &mut rejected,
        );
        Self {
            file: non_empty_env(LOG_FILE_ENV).map(PathBuf::from),
            format,
            stream,
            verbose: false,
            rejected,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Filter used when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    pub fn sink(&self) -> LogSink {
        match &self.file {
            Some(path) => LogSink::File(path.clone()),
            None => LogSink::Stream(self.stream),
        }
    }

    pub fn rejected(&self) -> &[RejectedSetting] {
        &self.rejected
    }
}

fn parse_env_choice<T: Copy + Default>(
    key: &'static str,
    choices: &[(&str, T)],
    rejected: &mut Vec<RejectedSetting>,
) -> T {
    let Some(value) = non_empty_env(key) else {
        return T::default();
    };
    let wanted = value.to_ascii_lowercase();
    match choices.iter().find(|(name, _)| *name == wanted) {
        Some((_, choice)) => *choice,
        None => {
            rejected.push(RejectedSetting { key, value });
            T::default()
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn listen_from_env() -> String {
    if let Some(listen) = non_empty_env(LISTEN_ENV) {
        return listen;
    }
    match non_empty_env(PORT_ENV) {
        Some(port) => match port.parse::<u16>() {
            Ok(port) => format!("127.0.0.1:{port}"),
            Err(_) => {
                warn!(value = %port, key = PORT_ENV, "Invalid port; using default listen address");
                DEFAULT_LISTEN.to_string()
            }
        },
        None => DEFAULT_LISTEN.to_string(),
    }
}

fn parse_env_bool(key: &str) -> bool {
    match non_empty_env(key).as_deref() {
        None => false,
        Some("1" | "true" | "TRUE" | "yes" | "on") => true,
        Some("0" | "false" | "FALSE" | "no" | "off") => false,
        Some(value) => {
            warn!(value, key, "Invalid boolean config; using false");
            false
        }
    }
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    let Some(value) = non_empty_env(key) else {
        return default;
    };
    match value.parse::<usize>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(value = %value, key, "Invalid numeric config; using default");
            default
        }
    }
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    let Some(value) = non_empty_env(key) else {
        return default;
    };
    match value.parse::<u64>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(value = %value, key, "Invalid numeric config; using default");
            default
        }
    }
}
