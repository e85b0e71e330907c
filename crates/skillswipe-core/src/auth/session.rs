use anyhow::{Context, Result};
use tracing::warn;

use super::store::{MemoryStore, TokenStore};
use crate::models::{LoginResponse, User};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";

/// Owns the stored credentials and signed-in user.
///
/// Shared between the API client and whatever hosts it. Reads never fail:
/// a store that cannot be read is logged and treated as empty, so a broken
/// store degrades to "signed out" rather than wedging every request.
pub struct SessionManager {
    store: Box<dyn TokenStore>,
}

impl SessionManager {
    pub fn new(store: impl TokenStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read session store");
                None
            }
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    pub fn set_access_token(&self, token: &str) -> Result<()> {
        self.store
            .set(ACCESS_TOKEN_KEY, token)
            .context("Failed to store access token")
    }

    /// Persist everything a successful login hands back
    pub fn store_login(&self, login: &LoginResponse) -> Result<()> {
        let user = serde_json::to_string(&login.user)?;
        self.store
            .set(ACCESS_TOKEN_KEY, &login.access)
            .context("Failed to store access token")?;
        self.store
            .set(REFRESH_TOKEN_KEY, &login.refresh)
            .context("Failed to store refresh token")?;
        self.store
            .set(USER_KEY, &user)
            .context("Failed to store user")?;
        Ok(())
    }

    /// The stored user, if present and readable
    pub fn user(&self) -> Option<User> {
        let raw = self.read(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Stored user is not valid JSON");
                None
            }
        }
    }

    /// Has tokens and a user on record. Says nothing about whether the server
    /// still accepts the tokens.
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some() && self.user().is_some()
    }

    /// Remove all three keys. Every key is attempted even if one fails.
    pub fn clear(&self) -> Result<()> {
        let mut first_error = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key = key, error = %e, "Failed to remove session key");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.context("Failed to clear session")),
            None => Ok(()),
        }
    }
}
