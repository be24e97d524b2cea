//! # viaduct-proxy
//!
//! A protocol-translating reverse proxy. Clients speak one protocol
//! version, the upstream server another; every frame is re-encoded in
//! both directions through a schema-driven dynamic transcoder, with
//! selective on-path injection (console chat, time-of-day rewrites,
//! map-pin teleports, post-scene script pushes).
//!
//! Layering, leaves first: transport → session cipher → transcoder →
//! interceptor → session → server → service.

#![deny(unsafe_code)]

pub mod admin;
pub mod config;
pub mod console;
pub mod interceptor;
pub mod luashell;
pub mod server;
pub mod service;
pub mod session;
pub mod terrain;
pub mod transport;

pub use config::Config;
pub use service::{Keys, Service};
pub use session::Session;
