//! The Herald server: MCP tool dispatch over streaming HTTP, OAuth-gated
//! routing, and bootstrap wiring.

pub mod git;
mod middleware;
pub mod project;
mod rpc;
mod service;
mod tools;
mod tunnel;

pub use middleware::RateLimiter;
pub use project::{Project, ProjectManager};
pub use rpc::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpServer, SessionRegistry, ToolContext,
    ToolDefinition, ToolRegistry,
};
pub use service::{run, ServerDeps};
pub use tools::Deps;
pub use tunnel::NgrokTunnel;
