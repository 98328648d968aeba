//! # carelink-server
//!
//! Process entry point for the provider-side sync service.

pub mod config;
pub mod observability;
pub mod server;

pub use server::{ProviderServer, ServerBuilder};
