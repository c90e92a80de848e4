//! Diagnostic commands and their mapping onto OS executables.
//!
//! A client names a logical command (`ping`, `traceroute`, `nslookup`) plus a
//! bag of named arguments. [`DiagnosticCommand::parse`] validates that input
//! and [`DiagnosticCommand::invocation`] turns it into an explicit argv for
//! the current platform. Nothing here ever builds a shell string.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_PING_COUNT: u32 = 4;
pub const TRACEROUTE_MAX_HOPS: u32 = 15;

/// Client-chosen identifier correlating a request with its frames.
///
/// Accepted on the wire as a string or a number; always emitted as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawCommandId")]
#[serde(into = "String")]
pub struct CommandId(String);

impl CommandId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<CommandId> for String {
    fn from(value: CommandId) -> Self {
        value.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCommandId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawCommandId> for CommandId {
    fn from(raw: RawCommandId) -> Self {
        match raw {
            RawCommandId::Text(text) => CommandId(text),
            RawCommandId::Number(number) => CommandId(number.to_string()),
        }
    }
}

/// The fixed allow-list of commands a client may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Ping,
    Traceroute,
    Nslookup,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [
        CommandKind::Ping,
        CommandKind::Traceroute,
        CommandKind::Nslookup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Ping => "ping",
            CommandKind::Traceroute => "traceroute",
            CommandKind::Nslookup => "nslookup",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// Executables used for each command. Defaults follow the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ping: String,
    pub traceroute: String,
    pub nslookup: String,
}

impl ToolPaths {
    pub fn for_platform(platform: Platform) -> Self {
        let traceroute = match platform {
            Platform::Windows => "tracert",
            Platform::Unix => "traceroute",
        };
        Self {
            ping: "ping".to_string(),
            traceroute: traceroute.to_string(),
            nslookup: "nslookup".to_string(),
        }
    }

    pub fn program(&self, kind: CommandKind) -> &str {
        match kind {
            CommandKind::Ping => &self.ping,
            CommandKind::Traceroute => &self.traceroute,
            CommandKind::Nslookup => &self.nslookup,
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::for_platform(Platform::current())
    }
}

/// A fully resolved program + argv, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown command: {0}")]
    UnsupportedCommand(String),
    #[error("{command}: '{argument}' is required")]
    MissingArgument {
        command: CommandKind,
        argument: &'static str,
    },
    #[error("{command}: invalid '{argument}': {reason}")]
    InvalidArgument {
        command: CommandKind,
        argument: &'static str,
        reason: String,
    },
}

/// A validated diagnostic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticCommand {
    Ping { host: String, count: u32 },
    Traceroute { host: String },
    Nslookup { host: String },
}

impl DiagnosticCommand {
    pub fn parse(cmd: &str, args: &Map<String, Value>) -> Result<Self, ValidationError> {
        let kind = CommandKind::from_name(cmd)
            .ok_or_else(|| ValidationError::UnsupportedCommand(cmd.to_string()))?;
        let host = required_host(kind, args)?;
        Ok(match kind {
            CommandKind::Ping => DiagnosticCommand::Ping {
                host,
                count: ping_count(args.get("count")),
            },
            CommandKind::Traceroute => DiagnosticCommand::Traceroute { host },
            CommandKind::Nslookup => DiagnosticCommand::Nslookup { host },
        })
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            DiagnosticCommand::Ping { .. } => CommandKind::Ping,
            DiagnosticCommand::Traceroute { .. } => CommandKind::Traceroute,
            DiagnosticCommand::Nslookup { .. } => CommandKind::Nslookup,
        }
    }

    pub fn invocation(&self, platform: Platform, tools: &ToolPaths) -> Invocation {
        let program = tools.program(self.kind()).to_string();
        let args = match (self, platform) {
            (DiagnosticCommand::Ping { host, count }, Platform::Windows) => {
                vec!["-n".to_string(), count.to_string(), host.clone()]
            }
            (DiagnosticCommand::Ping { host, count }, Platform::Unix) => {
                vec!["-c".to_string(), count.to_string(), host.clone()]
            }
            (DiagnosticCommand::Traceroute { host }, Platform::Windows) => vec![host.clone()],
            (DiagnosticCommand::Traceroute { host }, Platform::Unix) => vec![
                "-m".to_string(),
                TRACEROUTE_MAX_HOPS.to_string(),
                host.clone(),
            ],
            (DiagnosticCommand::Nslookup { host }, _) => vec![host.clone()],
        };
        Invocation { program, args }
    }
}

fn required_host(kind: CommandKind, args: &Map<String, Value>) -> Result<String, ValidationError> {
    let host = match args.get("host") {
        Some(Value::String(host)) => host.trim(),
        Some(Value::Null) | None => "",
        Some(_) => {
            return Err(ValidationError::InvalidArgument {
                command: kind,
                argument: "host",
                reason: "expected a string".to_string(),
            });
        }
    };
    if host.is_empty() {
        return Err(ValidationError::MissingArgument {
            command: kind,
            argument: "host",
        });
    }
    // argv is not interpreted by a shell, but the tool still parses options.
    if host.starts_with('-') {
        return Err(ValidationError::InvalidArgument {
            command: kind,
            argument: "host",
            reason: "must not start with '-'".to_string(),
        });
    }
    Ok(host.to_string())
}

/// Lenient count parsing: numbers, or strings with a leading integer prefix.
fn ping_count(value: Option<&Value>) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 1.0).map(|f| f.trunc() as u64)),
        Some(Value::String(s)) => leading_integer(s),
        _ => None,
    };
    parsed
        .filter(|n| *n >= 1)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(DEFAULT_PING_COUNT)
}

fn leading_integer(text: &str) -> Option<u64> {
    let digits: String = text
        .trim_start()
        .trim_start_matches('+')
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
