//! Session state and where it is kept.
//!
//! This module provides:
//! - `SessionManager`: the stored access/refresh tokens and signed-in user
//! - `TokenStore`: the key/value backing store behind a session
//! - `MemoryStore`, `FileStore`, `KeyringStore`: process-local, JSON file in
//!   the cache directory, and OS keychain backends

pub mod credentials;
pub mod session;
pub mod store;

pub use credentials::KeyringStore;
pub use session::{SessionManager, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};
pub use store::{FileStore, MemoryStore, TokenStore};
