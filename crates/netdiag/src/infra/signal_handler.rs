//! Shutdown signal handling.

use tokio::sync::watch;
use tracing::info;

#[cfg(unix)]
mod imp {
    use std::thread;
    use std::thread::JoinHandle;

    use signal_hook::consts::SIGINT;
    use signal_hook::consts::SIGTERM;
    use signal_hook::iterator::Signals;
    use tokio::sync::watch;

    pub struct SignalHandler {
        _handle: JoinHandle<()>,
    }

    impl SignalHandler {
        pub fn setup(shutdown: watch::Sender<bool>) -> std::io::Result<Self> {
            let mut signals = Signals::new([SIGINT, SIGTERM])?;

            let handle = thread::Builder::new()
                .name("signal-handler".to_string())
                .spawn(move || {
                    if let Some(sig) = signals.forever().next() {
                        super::notify(&shutdown, sig);
                    }
                })?;

            Ok(Self { _handle: handle })
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use tokio::sync::watch;

    pub struct SignalHandler {
        _task: tokio::task::JoinHandle<()>,
    }

    impl SignalHandler {
        /// Must be called from inside a tokio runtime.
        pub fn setup(shutdown: watch::Sender<bool>) -> std::io::Result<Self> {
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|err| std::io::Error::other(err.to_string()))?;
            let task = runtime.spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    super::notify(&shutdown, 2);
                }
            });
            Ok(Self { _task: task })
        }
    }
}

pub use imp::SignalHandler;

fn notify(shutdown: &watch::Sender<bool>, signal: i32) {
    info!(signal, "Received signal, initiating graceful shutdown");
    let _ = shutdown.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_flips_shutdown_flag() {
        let (tx, rx) = watch::channel(false);
        notify(&tx, 15);
        assert!(*rx.borrow());
    }
}
