//! Turns `command` requests into running, registered processes.

use serde_json::Map;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

use crate::domain::DiagnosticCommand;
use crate::domain::Platform;
use crate::domain::ServerFrame;
use crate::domain::ToolPaths;
use crate::domain::frames::CommandFrame;
use crate::usecases::ports::EventSink;
use crate::usecases::ports::ProcessEvent;
use crate::usecases::ports::ProcessLauncherHandle;
use crate::usecases::registry::CommandRegistry;

/// Validates command requests and starts them through a [`ProcessLauncher`].
///
/// Stateless apart from configuration; shared by every session.
///
/// [`ProcessLauncher`]: crate::usecases::ports::ProcessLauncher
pub struct CommandDispatcher {
    launcher: ProcessLauncherHandle,
    tools: ToolPaths,
    platform: Platform,
}

impl CommandDispatcher {
    pub fn new(launcher: ProcessLauncherHandle, tools: ToolPaths) -> Self {
        Self {
            launcher,
            tools,
            platform: Platform::current(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Handles one `command` request and returns the frame to send: `start`
    /// on success, a terminal `error` otherwise.
    ///
    /// A process already registered under the same id is killed first, even
    /// if the new request turns out to be invalid.
    pub fn dispatch(
        &self,
        request: CommandFrame,
        generation: u64,
        registry: &mut CommandRegistry,
        events: &mpsc::Sender<ProcessEvent>,
    ) -> ServerFrame {
        let CommandFrame { id, cmd, args } = request;

        if registry.kill_and_remove(&id).is_ok() {
            info!(command_id = %id, "Killed previous command with reused id");
        }

        let command = match DiagnosticCommand::parse(&cmd, &args.unwrap_or_else(Map::new)) {
            Ok(command) => command,
            Err(err) => {
                warn!(command_id = %id, cmd = %cmd, error = %err, "Rejected command");
                return ServerFrame::failure(Some(id), err.to_string());
            }
        };

        let invocation = command.invocation(self.platform, &self.tools);
        let sink = EventSink::new(id.clone(), generation, events.clone());
        match self.launcher.launch(&invocation, sink) {
            Ok(handle) => {
                info!(
                    command_id = %id,
                    generation,
                    pid = ?handle.pid(),
                    invocation = %invocation,
                    "Command started"
                );
                registry.register(id.clone(), generation, handle);
                ServerFrame::start(id, command.kind())
            }
            Err(err) => {
                warn!(command_id = %id, invocation = %invocation, error = %err, "Command failed to start");
                ServerFrame::failure(Some(id), format!("{err}. {}", err.suggestion()))
            }
        }
    }
}
