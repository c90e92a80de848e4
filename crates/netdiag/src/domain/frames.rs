//! JSON frames exchanged over the WebSocket channel.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::domain::command::CommandId;
use crate::domain::command::CommandKind;

pub const GREETING: &str = "Connected to WebSocket server";
pub const CANCELLED_MESSAGE: &str = "Command cancelled";
pub const CANCEL_NOT_FOUND: &str = "no process found to cancel";

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Connected {
        message: String,
    },
    Start {
        id: CommandId,
        cmd: CommandKind,
    },
    Output {
        id: CommandId,
        data: String,
        complete: bool,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<CommandId>,
        data: String,
        complete: bool,
    },
    Complete {
        id: CommandId,
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
        complete: bool,
    },
    Cancelled {
        id: CommandId,
        message: String,
    },
    Echo {
        data: Value,
    },
}

impl ServerFrame {
    pub fn connected() -> Self {
        ServerFrame::Connected {
            message: GREETING.to_string(),
        }
    }

    pub fn start(id: CommandId, cmd: CommandKind) -> Self {
        ServerFrame::Start { id, cmd }
    }

    pub fn stdout(id: CommandId, data: String) -> Self {
        ServerFrame::Output {
            id,
            data,
            complete: false,
        }
    }

    pub fn stderr(id: CommandId, data: String) -> Self {
        ServerFrame::Error {
            id: Some(id),
            data,
            complete: false,
        }
    }

    /// Terminal error for a command (validation, spawn or runtime failure).
    pub fn failure(id: Option<CommandId>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            id,
            data: message.into(),
            complete: true,
        }
    }

    pub fn complete(id: CommandId, exit_code: Option<i32>) -> Self {
        ServerFrame::Complete {
            id,
            exit_code,
            complete: true,
        }
    }

    pub fn cancelled(id: CommandId) -> Self {
        ServerFrame::Cancelled {
            id,
            message: CANCELLED_MESSAGE.to_string(),
        }
    }

    pub fn echo(data: Value) -> Self {
        ServerFrame::Echo { data }
    }

    #[cfg(test)]
    pub fn id(&self) -> Option<&CommandId> {
        match self {
            ServerFrame::Start { id, .. }
            | ServerFrame::Output { id, .. }
            | ServerFrame::Complete { id, .. }
            | ServerFrame::Cancelled { id, .. } => Some(id),
            ServerFrame::Error { id, .. } => id.as_ref(),
            ServerFrame::Connected { .. } | ServerFrame::Echo { .. } => None,
        }
    }

    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        match self {
            ServerFrame::Complete { .. } | ServerFrame::Cancelled { .. } => true,
            ServerFrame::Error { complete, .. } => *complete,
            _ => false,
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(r#"{{"type":"error","data":"failed to encode frame: {err}","complete":true}}"#)
        })
    }
}

/// `command` request body. `cmd` is checked later against the allow-list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandFrame {
    pub id: CommandId,
    pub cmd: String,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct CancelFrame {
    id: CommandId,
}

#[derive(Debug, Deserialize)]
struct EchoFrame {
    #[serde(default)]
    data: Value,
}

/// A decoded client → server text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(CommandFrame),
    Cancel { id: CommandId },
    Echo { data: Value },
    /// Anything that is not a recognized frame; echoed back verbatim.
    Raw(String),
    /// A recognized `type` whose fields do not decode.
    Malformed {
        id: Option<CommandId>,
        reason: String,
    },
}

impl Inbound {
    pub fn parse(text: &str) -> Self {
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text) else {
            return Inbound::Raw(text.to_string());
        };
        let kind = object.get("type").and_then(Value::as_str).map(str::to_owned);
        let body = Value::Object(object);
        match kind.as_deref() {
            Some("command") => match serde_json::from_value::<CommandFrame>(body.clone()) {
                Ok(frame) => Inbound::Command(frame),
                Err(err) => malformed("command", &body, err),
            },
            Some("cancel") => match serde_json::from_value::<CancelFrame>(body.clone()) {
                Ok(frame) => Inbound::Cancel { id: frame.id },
                Err(err) => malformed("cancel", &body, err),
            },
            Some("echo") => match serde_json::from_value::<EchoFrame>(body.clone()) {
                Ok(frame) => Inbound::Echo { data: frame.data },
                Err(err) => malformed("echo", &body, err),
            },
            _ => Inbound::Raw(text.to_string()),
        }
    }
}

fn malformed(kind: &str, body: &Value, err: serde_json::Error) -> Inbound {
    let id = body
        .get("id")
        .and_then(|id| serde_json::from_value::<CommandId>(id.clone()).ok());
    Inbound::Malformed {
        id,
        reason: format!("Invalid {kind} frame: {err}"),
    }
}
