//! Protocol state for one client connection.
//!
//! [`ConnectionSession`] is transport-agnostic: the server loop feeds it
//! inbound frames and process events and writes whatever it returns. All
//! registry mutation happens through `&mut self`, so one task owns it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;

use crate::domain::CommandId;
use crate::domain::Inbound;
use crate::domain::ServerFrame;
use crate::domain::frames::CANCEL_NOT_FOUND;
use crate::usecases::dispatcher::CommandDispatcher;
use crate::usecases::ports::ProcessEvent;
use crate::usecases::ports::ProcessEventKind;
use crate::usecases::registry::CommandRegistry;

/// Something the transport must write to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(ServerFrame),
    /// Unrecognized text, echoed back unchanged.
    Text(String),
    Binary(Vec<u8>),
}

pub struct ConnectionSession {
    dispatcher: Arc<CommandDispatcher>,
    registry: CommandRegistry,
    events: mpsc::Sender<ProcessEvent>,
    next_generation: u64,
}

impl ConnectionSession {
    /// Starts a session with an empty registry. `events` is the sending half
    /// of the channel whose receiver the transport polls.
    pub fn new(dispatcher: Arc<CommandDispatcher>, events: mpsc::Sender<ProcessEvent>) -> Self {
        Self {
            dispatcher,
            registry: CommandRegistry::new(),
            events,
            next_generation: 0,
        }
    }

    pub fn greeting(&self) -> ServerFrame {
        ServerFrame::connected()
    }

    pub fn active_commands(&self) -> usize {
        self.registry.len()
    }

    pub fn is_running(&self, id: &CommandId) -> bool {
        self.registry.contains(id)
    }

    /// Handles a text frame. `pending` is the session's event receiver; a
    /// cancel flushes what is already queued on it first.
    pub fn handle_text(
        &mut self,
        text: &str,
        pending: &mut mpsc::Receiver<ProcessEvent>,
    ) -> Vec<Outbound> {
        match Inbound::parse(text) {
            Inbound::Command(request) => {
                self.next_generation += 1;
                let frame = self.dispatcher.dispatch(
                    request,
                    self.next_generation,
                    &mut self.registry,
                    &self.events,
                );
                vec![Outbound::Frame(frame)]
            }
            Inbound::Cancel { id } => self.cancel(id, pending),
            Inbound::Echo { data } => vec![Outbound::Frame(ServerFrame::echo(data))],
            Inbound::Raw(raw) => vec![Outbound::Text(raw)],
            Inbound::Malformed { id, reason } => {
                debug!(command_id = ?id, reason = %reason, "Malformed frame");
                vec![Outbound::Frame(ServerFrame::failure(id, reason))]
            }
        }
    }

    pub fn handle_binary(&mut self, payload: Vec<u8>) -> Vec<Outbound> {
        vec![Outbound::Binary(payload)]
    }

    /// Maps a process event to a frame. Events from a process that is no
    /// longer registered under its id (cancelled, replaced, failed) are
    /// dropped, so nothing follows a terminal frame.
    pub fn handle_event(&mut self, event: ProcessEvent) -> Option<ServerFrame> {
        let ProcessEvent {
            id,
            generation,
            kind,
        } = event;
        if !self.registry.is_current(&id, generation) {
            return None;
        }
        let frame = match kind {
            ProcessEventKind::Stdout(data) => ServerFrame::stdout(id, data),
            ProcessEventKind::Stderr(data) => ServerFrame::stderr(id, data),
            ProcessEventKind::Exited(exit_code) => {
                self.registry.remove(&id);
                info!(command_id = %id, exit_code = ?exit_code, "Command completed");
                ServerFrame::complete(id, exit_code)
            }
            ProcessEventKind::Failed(reason) => {
                let _ = self.registry.kill_and_remove(&id);
                info!(command_id = %id, reason = %reason, "Command failed");
                ServerFrame::failure(Some(id), reason)
            }
        };
        Some(frame)
    }

    /// Flushes events already queued on `pending`, kills the process and
    /// answers `cancelled` without waiting for it to die.
    ///
    /// The flush stops at the queue. A chunk the process produced before the
    /// cancel but whose send is still waiting for queue capacity is dropped by
    /// the generation check once it lands.
    fn cancel(&mut self, id: CommandId, pending: &mut mpsc::Receiver<ProcessEvent>) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.registry.contains(&id) {
            while let Ok(event) = pending.try_recv() {
                if let Some(frame) = self.handle_event(event) {
                    out.push(Outbound::Frame(frame));
                }
            }
        }
        match self.registry.kill_and_remove(&id) {
            Ok(()) => {
                info!(command_id = %id, "Command cancelled");
                out.push(Outbound::Frame(ServerFrame::cancelled(id)));
            }
            Err(_) => {
                debug!(command_id = %id, "Cancel for unknown command");
                out.push(Outbound::Frame(ServerFrame::failure(
                    Some(id),
                    CANCEL_NOT_FOUND,
                )));
            }
        }
        out
    }

    /// Kills everything this session started. Nothing may be sent after.
    pub fn close(mut self) -> usize {
        let swept = self.registry.kill_all_and_clear();
        if swept > 0 {
            info!(swept, "Killed commands left running at disconnect");
        }
        swept
    }
}
