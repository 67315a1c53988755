//! Framed TCP file server and client.
//!
//! One connection carries one typed control message and, for GET and PUT, a payload whose
//! length is announced before the first payload byte. Payload is never parsed.

pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod server;
pub mod transfer;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use server::{serve, Server};
