// Redacting wrapper for credentials
pub mod secret;

// Error taxonomy and per-call context
pub mod context;
pub mod error;

// Configuration (TOML + DATAPORT_* environment)
pub mod config;

// SQLite-backed stores
mod db;
pub mod activity;
pub mod credentials;
pub mod destination;
pub mod export_log;

// OAuth consent broker
pub mod oauth;

// Connection tests
pub mod validator;

// HTTP APIs
pub mod api;
pub mod auth;

pub use context::RequestContext;
pub use error::{DestinationError, Result};
pub use secret::Secret;
