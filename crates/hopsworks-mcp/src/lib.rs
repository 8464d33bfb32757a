//! Hopsworks MCP Server
//!
//! Exposes the Hopsworks feature store and ML platform to AI agents via the
//! Model Context Protocol. Every tool forwards to the Hopsworks REST API of
//! the project selected at login.

pub mod client;
pub mod config;
pub mod error;
pub mod install;
pub mod resources;
pub mod server;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use client::HopsworksClient;
pub use config::Config;
pub use server::HopsworksMcpServer;
