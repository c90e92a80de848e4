//! Per-connection table of running commands.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::domain::CommandId;
use crate::usecases::ports::ProcessControl;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Command not found: {0}")]
    NotFound(CommandId),
}

/// One live process plus the generation it was registered under.
pub struct RegistryEntry {
    generation: u64,
    handle: Box<dyn ProcessControl>,
}

impl RegistryEntry {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    fn kill(&mut self, id: &CommandId) {
        if let Err(err) = self.handle.kill() {
            warn!(command_id = %id, pid = ?self.handle.pid(), error = %err, "Failed to kill process");
        }
    }
}

/// Maps command ids to live processes for a single session.
///
/// Never shared: the owning session is the only mutator, so there is no
/// locking. At most one process is registered per id.
#[derive(Default)]
pub struct CommandRegistry {
    entries: HashMap<CommandId, RegistryEntry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `id`, killing whatever was there first.
    /// Returns the generation of the replaced entry, if any.
    pub fn register(
        &mut self,
        id: CommandId,
        generation: u64,
        handle: Box<dyn ProcessControl>,
    ) -> Option<u64> {
        let replaced = self.entries.remove(&id).map(|mut previous| {
            debug!(command_id = %id, pid = ?previous.pid(), "Replacing running command");
            previous.kill(&id);
            previous.generation
        });
        self.entries
            .insert(id, RegistryEntry { generation, handle });
        replaced
    }

    pub fn lookup(&self, id: &CommandId) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    /// True if `id` is registered under exactly this generation.
    pub fn is_current(&self, id: &CommandId, generation: u64) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.generation == generation)
    }

    pub fn contains(&self, id: &CommandId) -> bool {
        self.entries.contains_key(id)
    }

    /// Drops the entry without killing; for processes that already exited.
    pub fn remove(&mut self, id: &CommandId) -> Option<RegistryEntry> {
        self.entries.remove(id)
    }

    pub fn kill_and_remove(&mut self, id: &CommandId) -> Result<(), RegistryError> {
        let mut entry = self
            .entries
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        entry.kill(id);
        Ok(())
    }

    /// Kills every registered process and empties the table. Kill failures
    /// are logged and do not stop the sweep.
    pub fn kill_all_and_clear(&mut self) -> usize {
        let swept = self.entries.len();
        for (id, mut entry) in self.entries.drain() {
            entry.kill(&id);
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for CommandRegistry {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let swept = self.kill_all_and_clear();
            debug!(swept, "Registry dropped with live commands");
        }
    }
}
