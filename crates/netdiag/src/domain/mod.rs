//! Protocol and command types shared by every layer.

pub mod command;
pub mod frames;

pub use command::CommandId;
pub use command::CommandKind;
pub use command::DiagnosticCommand;
pub use command::Invocation;
pub use command::Platform;
pub use command::ToolPaths;
pub use command::ValidationError;
pub use frames::Inbound;
pub use frames::ServerFrame;
