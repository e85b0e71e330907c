//! Core library for the SkillSwipe client.
//!
//! - [`api`]: the authenticated API client and error taxonomy
//! - [`auth`]: session state and token stores
//! - [`models`]: typed API payloads
//! - [`config`]: configuration file and environment overrides

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, CallOptions, ErrorKind, RequestDescriptor};
pub use auth::SessionManager;
pub use config::Config;
