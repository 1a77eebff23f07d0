//! kh-core: Core types and configuration for keyhold
//!
//! This crate provides shared identifiers, error types and configuration
//! structures used by the agent daemon and the `keyhold` client.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ConfigError, KhError};
pub use types::{ClientId, DialogId, KeyVersion, RequestId};
