//! MCP (Model Context Protocol) Server
//!
//! Hand-rolled JSON-RPC 2.0 server over stdio, following MCP protocol
//! version 2025-06-18. Exposes the tutoring pipeline as tools: `ask_tutor`,
//! `search_material`, and `list_documents`.


pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{CallToolParams, CallToolResult, ListToolsResult, Tool, ToolContent};
pub use server::{McpServer, ToolHandler};
