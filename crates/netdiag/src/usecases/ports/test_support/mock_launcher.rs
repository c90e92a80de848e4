//! In-memory process launcher for use case tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::domain::Invocation;
use crate::usecases::ports::EventSink;
use crate::usecases::ports::ProcessControl;
use crate::usecases::ports::ProcessError;
use crate::usecases::ports::ProcessEventKind;
use crate::usecases::ports::ProcessLauncher;
use crate::usecases::ports::SpawnErrorKind;

/// Observable stand-in for a running process.
#[derive(Debug, Clone)]
pub struct MockProcess {
    pid: u32,
    kills: Arc<AtomicUsize>,
    fail_kill: Arc<AtomicBool>,
}

impl MockProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            kills: Arc::new(AtomicUsize::new(0)),
            fail_kill: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self) -> bool {
        self.kill_count() > 0
    }

    pub fn fail_kills(&self) {
        self.fail_kill.store(true, Ordering::SeqCst);
    }
}

impl ProcessControl for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.fail_kill.load(Ordering::SeqCst) {
            return Err(ProcessError::Kill("mock kill failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MockLaunch {
    pub invocation: Invocation,
    pub sink: EventSink,
    pub process: MockProcess,
}

impl MockLaunch {
    pub fn emit(&self, kind: ProcessEventKind) {
        let _ = self.sink.try_send(kind);
    }
}

#[derive(Debug, Default)]
pub struct MockLauncher {
    launches: Mutex<Vec<MockLaunch>>,
    spawn_failure: Mutex<Option<SpawnErrorKind>>,
    next_pid: AtomicU32,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        }
    }

    pub fn fail_spawns(&self, kind: SpawnErrorKind) {
        *self
            .spawn_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(kind);
    }

    pub fn launches(&self) -> Vec<MockLaunch> {
        self.launches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<MockLaunch> {
        self.launches().pop()
    }
}

impl ProcessLauncher for MockLauncher {
    fn launch(
        &self,
        invocation: &Invocation,
        sink: EventSink,
    ) -> Result<Box<dyn ProcessControl>, ProcessError> {
        let failure = *self
            .spawn_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(kind) = failure {
            return Err(ProcessError::Spawn {
                program: invocation.program.clone(),
                reason: "mock spawn failure".to_string(),
                kind,
            });
        }
        let process = MockProcess::new(self.next_pid.fetch_add(1, Ordering::SeqCst));
        self.launches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(MockLaunch {
                invocation: invocation.clone(),
                sink,
                process: process.clone(),
            });
        Ok(Box::new(process))
    }
}
