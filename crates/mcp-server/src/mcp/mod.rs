//! MCP 协议层
//!
//! - `protocol`：JSON-RPC 2.0 消息结构与错误码
//! - `tools`：固定的六个规则集工具及其 Schema
//! - `handler`：与传输方式无关的请求分发

pub mod handler;
pub mod protocol;
pub mod tools;

pub use handler::McpHandler;
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use tools::{Tool, ToolRegistry};
