//! SabhaIO - robot device server
//!
//! Multiplexes TCP clients onto device drivers. Drivers publish samples into
//! per-device ports from their own threads; a single client manager thread
//! serves every connection, enforcing access grants and each session's data
//! mode and frequency.
//!
//! ## Modules
//!
//! - [`core`]: device table, driver trait, per-device ports
//! - [`protocol`]: frame header, decoder, server requests
//! - [`server`]: sessions, client manager, runtime and control
//! - [`interfaces`]: typed payloads per device interface
//! - [`devices`]: simulated drivers and the driver factory
//! - [`client`]: blocking client

pub mod client;
pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod interfaces;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use server::Server;
