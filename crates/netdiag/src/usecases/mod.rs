//! Command lifecycle logic, independent of the transport and the OS.

pub mod dispatcher;
pub mod ports;
pub mod registry;
pub mod session;

pub use dispatcher::CommandDispatcher;
pub use registry::CommandRegistry;
pub use registry::RegistryError;
pub use session::ConnectionSession;
pub use session::Outbound;
