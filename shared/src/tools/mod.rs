//! Task tools the assistant can call.

pub mod dispatcher;
mod handlers;
pub mod registry;
pub mod result;

pub use dispatcher::ToolDispatcher;
pub use registry::{ToolKind, ToolRegistry, ToolSchema};
pub use result::{ToolCallResult, NOT_AUTHORIZED, NOT_FOUND};
