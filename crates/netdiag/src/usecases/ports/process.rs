use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
#[cfg(test)]
use tokio::sync::mpsc::error::TrySendError;

use crate::domain::CommandId;
use crate::domain::Invocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnErrorKind {
    NotFound,
    PermissionDenied,
    Other,
}

impl SpawnErrorKind {
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SpawnErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => SpawnErrorKind::PermissionDenied,
            _ => SpawnErrorKind::Other,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start '{program}': {reason}")]
    Spawn {
        program: String,
        reason: String,
        kind: SpawnErrorKind,
    },
    #[error("Failed to kill process: {0}")]
    Kill(String),
}

impl ProcessError {
    #[cfg(test)]
    pub fn spawn_kind(&self) -> Option<SpawnErrorKind> {
        match self {
            ProcessError::Spawn { kind, .. } => Some(*kind),
            ProcessError::Kill(_) => None,
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            ProcessError::Spawn { kind, .. } => match kind {
                SpawnErrorKind::NotFound => "Check that the tool is installed and in PATH.",
                SpawnErrorKind::PermissionDenied => {
                    "Permission denied. Check the executable's permissions."
                }
                SpawnErrorKind::Other => "Process spawn failed. Check server logs.",
            },
            ProcessError::Kill(_) => "The process may already have exited.",
        }
    }
}

/// What a supervised process reports back to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventKind {
    Stdout(String),
    Stderr(String),
    /// Both streams reached EOF and the process was reaped.
    /// `None` when it was terminated by a signal.
    Exited(Option<i32>),
    /// An OS error after a successful spawn; no `Exited` follows.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub id: CommandId,
    pub generation: u64,
    pub kind: ProcessEventKind,
}

/// Tagged sender handed to a launched process. Events for one process are
/// sent in the order they are produced.
#[derive(Debug, Clone)]
pub struct EventSink {
    id: CommandId,
    generation: u64,
    tx: mpsc::Sender<ProcessEvent>,
}

impl EventSink {
    pub fn new(id: CommandId, generation: u64, tx: mpsc::Sender<ProcessEvent>) -> Self {
        Self { id, generation, tx }
    }

    pub fn id(&self) -> &CommandId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn event(&self, kind: ProcessEventKind) -> ProcessEvent {
        ProcessEvent {
            id: self.id.clone(),
            generation: self.generation,
            kind,
        }
    }

    /// Waits for queue capacity. Returns `false` once the session is gone.
    pub async fn send(&self, kind: ProcessEventKind) -> bool {
        self.tx.send(self.event(kind)).await.is_ok()
    }

    #[cfg(test)]
    pub fn try_send(&self, kind: ProcessEventKind) -> Result<(), TrySendError<ProcessEvent>> {
        self.tx.try_send(self.event(kind))
    }
}

/// Control side of one running OS process.
pub trait ProcessControl: Send {
    fn pid(&self) -> Option<u32>;

    /// Requests termination. Calling it again, or after exit, is a no-op.
    fn kill(&mut self) -> Result<(), ProcessError>;
}

/// Starts processes and streams their lifecycle into an [`EventSink`].
pub trait ProcessLauncher: Send + Sync {
    fn launch(
        &self,
        invocation: &Invocation,
        sink: EventSink,
    ) -> Result<Box<dyn ProcessControl>, ProcessError>;
}

pub type ProcessLauncherHandle = Arc<dyn ProcessLauncher>;
