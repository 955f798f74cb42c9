//! `mcp-db-gateway`: a JSON-RPC gateway exposing a relational database
//! over the Model Context Protocol. Split into a library (this crate
//! root) and a thin `main.rs` binary, the way `proxy` separates its own
//! reusable modules from `src/bin/*.rs` entry points.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod rate_limit;
pub mod router;
pub mod session;
pub mod stdio;
