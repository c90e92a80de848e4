pub mod process;
#[cfg(test)]
pub(crate) mod test_support;

pub use process::EventSink;
pub use process::ProcessControl;
pub use process::ProcessError;
pub use process::ProcessEvent;
pub use process::ProcessEventKind;
pub use process::ProcessLauncher;
pub use process::ProcessLauncherHandle;
pub use process::SpawnErrorKind;
