//! Test doubles for use case ports.

mod mock_launcher;

pub use mock_launcher::MockLaunch;
pub use mock_launcher::MockLauncher;
pub use mock_launcher::MockProcess;
