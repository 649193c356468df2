//! cairnd — the Cairn OPC UA server daemon, usable as a library so tests
//! and embedding applications can run the engine in-process.

pub mod config;
pub mod server;

pub use config::DaemonConfig;
pub use server::{ServerDeps, ServerHandle};
