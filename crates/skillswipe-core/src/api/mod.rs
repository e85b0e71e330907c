//! REST API client module for the SkillSwipe platform.
//!
//! This module provides the `ApiClient` for communicating with the
//! SkillSwipe API: accounts, developer and company profiles, job postings,
//! swipes and wishlists.
//!
//! The API uses JWT bearer tokens. Access tokens are short-lived and are
//! refreshed transparently with the stored refresh token.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod request;
pub mod transport;

pub use client::{ApiClient, SessionExpiredHook};
pub use error::{ApiError, ErrorKind};
pub use request::{CallOptions, RequestDescriptor};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
