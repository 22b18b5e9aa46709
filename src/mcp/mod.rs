//! Model Context Protocol surface (stdio transport).
pub mod server;
pub mod tools;
