pub mod config;
pub mod process;
pub mod signal_handler;
pub mod telemetry;

pub use config::LogSettings;
pub use config::ServerConfig;
pub use process::ProcessHandle;
pub use process::TokioProcessLauncher;
pub use signal_handler::SignalHandler;
pub use telemetry::init_tracing;
