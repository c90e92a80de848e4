//! OS processes backed by `tokio::process`.
//!
//! Each spawned command gets one supervisor task. It pumps stdout and stderr
//! concurrently into the session's [`EventSink`], waits for the child only
//! after both pipes hit EOF, then reports the exit code. Kill requests reach
//! it over a oneshot channel, so [`ProcessHandle::kill`] never blocks.

use std::io;
use std::process::Stdio;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::Instrument;
use tracing::debug;
use tracing::warn;

use crate::common::Utf8ChunkDecoder;
use crate::domain::Invocation;
use crate::usecases::ports::EventSink;
use crate::usecases::ports::ProcessControl;
use crate::usecases::ports::ProcessError;
use crate::usecases::ports::ProcessEventKind;
use crate::usecases::ports::ProcessLauncher;
use crate::usecases::ports::SpawnErrorKind;

const READ_CHUNK_BYTES: usize = 8192;

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessLauncher;

impl ProcessLauncher for TokioProcessLauncher {
    fn launch(
        &self,
        invocation: &Invocation,
        sink: EventSink,
    ) -> Result<Box<dyn ProcessControl>, ProcessError> {
        let handle = ProcessHandle::spawn(invocation, sink)?;
        Ok(Box::new(handle))
    }
}

/// Control half of a supervised child process.
///
/// Dropping a handle whose process is still running kills it.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    /// Spawns `invocation` with piped stdout/stderr and starts supervising it
    /// on the current tokio runtime.
    pub fn spawn(invocation: &Invocation, sink: EventSink) -> Result<Self, ProcessError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| ProcessError::Spawn {
            program: invocation.program.clone(),
            reason: err.to_string(),
            kind: SpawnErrorKind::Other,
        })?;

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| ProcessError::Spawn {
            program: invocation.program.clone(),
            reason: err.to_string(),
            kind: SpawnErrorKind::from_io(&err),
        })?;

        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let span = tracing::debug_span!(
            "command",
            command_id = %sink.id(),
            generation = sink.generation(),
            pid = ?pid
        );
        runtime.spawn(supervise(child, kill_rx, sink).instrument(span));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
        })
    }
}

impl ProcessControl for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        if let Some(tx) = self.kill_tx.take() {
            // Err means the supervisor already reaped the child.
            let _ = tx.send(());
        }
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let _ = self.kill();
    }
}

enum Chunk {
    Data(String),
    Eof(Option<String>),
    Error(io::Error),
}

struct StreamPump<R> {
    reader: Option<R>,
    decoder: Utf8ChunkDecoder,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> StreamPump<R> {
    fn new(reader: Option<R>) -> Self {
        Self {
            reader,
            decoder: Utf8ChunkDecoder::new(),
            buf: vec![0; READ_CHUNK_BYTES],
        }
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Cancel-safe: the only await point is `read`.
    async fn next_chunk(&mut self) -> Chunk {
        let Some(reader) = self.reader.as_mut() else {
            return Chunk::Eof(None);
        };
        loop {
            match reader.read(&mut self.buf).await {
                Ok(0) => {
                    self.reader = None;
                    return Chunk::Eof(self.decoder.finish());
                }
                Ok(n) => {
                    let text = self.decoder.decode(&self.buf[..n]);
                    if !text.is_empty() {
                        return Chunk::Data(text);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.reader = None;
                    return Chunk::Error(err);
                }
            }
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn forward(
    sink: &EventSink,
    chunk: Chunk,
    wrap: fn(String) -> ProcessEventKind,
    stream: &'static str,
) -> Flow {
    let kind = match chunk {
        Chunk::Data(text) => wrap(text),
        Chunk::Eof(Some(tail)) => wrap(tail),
        Chunk::Eof(None) => return Flow::Continue,
        Chunk::Error(err) => {
            warn!(stream, error = %err, "Failed to read process output");
            let _ = sink
                .send(ProcessEventKind::Failed(format!("Failed to read {stream}: {err}")))
                .await;
            return Flow::Stop;
        }
    };
    if sink.send(kind).await {
        Flow::Continue
    } else {
        debug!("Session gone; stopping command");
        Flow::Stop
    }
}

fn terminate(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "start_kill failed; process likely exited");
    }
}

async fn supervise(mut child: Child, mut kill_rx: oneshot::Receiver<()>, sink: EventSink) {
    let mut stdout = StreamPump::new(child.stdout.take());
    let mut stderr = StreamPump::new(child.stderr.take());
    let mut kill_requested = false;

    while !kill_requested && (stdout.is_open() || stderr.is_open()) {
        let flow = tokio::select! {
            _ = &mut kill_rx => {
                kill_requested = true;
                Flow::Stop
            }
            chunk = stdout.next_chunk(), if stdout.is_open() => {
                forward(&sink, chunk, ProcessEventKind::Stdout, "stdout").await
            }
            chunk = stderr.next_chunk(), if stderr.is_open() => {
                forward(&sink, chunk, ProcessEventKind::Stderr, "stderr").await
            }
        };
        if let Flow::Stop = flow {
            kill_requested = true;
        }
    }

    if kill_requested {
        terminate(&mut child);
        match child.wait().await {
            Ok(status) => debug!(status = %status, "Killed command reaped"),
            Err(err) => warn!(error = %err, "Failed to reap killed command"),
        }
        return;
    }

    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            terminate(&mut child);
            let status = child.wait().await;
            debug!(status = ?status, "Killed command reaped");
            return;
        }
    };

    match status {
        Ok(status) => {
            debug!(status = %status, "Command exited");
            let _ = sink.send(ProcessEventKind::Exited(status.code())).await;
        }
        Err(err) => {
            warn!(error = %err, "Failed to wait for command");
            let _ = sink
                .send(ProcessEventKind::Failed(format!("Failed to wait for process: {err}")))
                .await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::CommandId;
    use crate::usecases::ports::ProcessEvent;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn sh(script: &str) -> Invocation {
        Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    fn sink(tx: &mpsc::Sender<ProcessEvent>) -> EventSink {
        EventSink::new(CommandId::new("t"), 1, tx.clone())
    }

    async fn collect_until_exit(rx: &mut mpsc::Receiver<ProcessEvent>) -> Vec<ProcessEventKind> {
        let mut kinds = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_secs(10), rx.recv()).await {
            let done = matches!(
                event.kind,
                ProcessEventKind::Exited(_) | ProcessEventKind::Failed(_)
            );
            kinds.push(event.kind);
            if done {
                break;
            }
        }
        kinds
    }

    fn stdout_text(kinds: &[ProcessEventKind]) -> String {
        kinds
            .iter()
            .filter_map(|k| match k {
                ProcessEventKind::Stdout(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn streams_stdout_then_exit_code() {
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = ProcessHandle::spawn(&sh("printf 'one\\ntwo\\n'; exit 3"), sink(&tx)).unwrap();

        let kinds = collect_until_exit(&mut rx).await;
        assert_eq!(stdout_text(&kinds), "one\ntwo\n");
        assert_eq!(kinds.last(), Some(&ProcessEventKind::Exited(Some(3))));
    }

    #[tokio::test]
    async fn chunks_arrive_separately_in_production_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = ProcessHandle::spawn(
            &sh("for i in 1 2 3 4 5; do echo $i; sleep 0.05; done"),
            sink(&tx),
        )
        .unwrap();

        let kinds = collect_until_exit(&mut rx).await;
        assert_eq!(
            kinds,
            vec![
                ProcessEventKind::Stdout("1\n".into()),
                ProcessEventKind::Stdout("2\n".into()),
                ProcessEventKind::Stdout("3\n".into()),
                ProcessEventKind::Stdout("4\n".into()),
                ProcessEventKind::Stdout("5\n".into()),
                ProcessEventKind::Exited(Some(0)),
            ]
        );
    }

    #[tokio::test]
    async fn stderr_is_kept_separate() {
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = ProcessHandle::spawn(&sh("echo oops >&2"), sink(&tx)).unwrap();

        let kinds = collect_until_exit(&mut rx).await;
        assert!(kinds.contains(&ProcessEventKind::Stderr("oops\n".into())));
        assert_eq!(stdout_text(&kinds), "");
        assert_eq!(kinds.last(), Some(&ProcessEventKind::Exited(Some(0))));
    }

    #[tokio::test]
    async fn missing_executable_fails_synchronously() {
        let (tx, _rx) = mpsc::channel(16);
        let invocation = Invocation {
            program: "netdiag-definitely-not-installed".to_string(),
            args: vec![],
        };
        let err = ProcessHandle::spawn(&invocation, sink(&tx)).unwrap_err();
        assert_eq!(err.spawn_kind(), Some(SpawnErrorKind::NotFound));
    }

    #[test]
    fn spawn_outside_runtime_is_an_error() {
        let (tx, _rx) = mpsc::channel(16);
        let err = ProcessHandle::spawn(&sh("true"), sink(&tx)).unwrap_err();
        assert_eq!(err.spawn_kind(), Some(SpawnErrorKind::Other));
    }

    #[tokio::test]
    async fn kill_stops_without_exit_event() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut handle = ProcessHandle::spawn(&sh("echo ready; exec sleep 30"), sink(&tx)).unwrap();

        let first = timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.kind, ProcessEventKind::Stdout("ready\n".into()));

        handle.kill().unwrap();
        handle.kill().unwrap();
        drop(tx);

        // The supervisor drops its sink once the child is reaped.
        let rest = timeout(Duration::from_secs(10), async {
            let mut rest = Vec::new();
            while let Some(event) = rx.recv().await {
                rest.push(event.kind);
            }
            rest
        })
        .await
        .unwrap();
        assert!(
            !rest.iter().any(|k| matches!(k, ProcessEventKind::Exited(_))),
            "{rest:?}"
        );
    }

    #[tokio::test]
    async fn dropping_handle_kills_process() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::spawn(&sh("exec sleep 30"), sink(&tx)).unwrap();
        drop(handle);
        drop(tx);

        let closed = timeout(Duration::from_secs(10), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
