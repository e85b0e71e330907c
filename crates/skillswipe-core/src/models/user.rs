use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Developer,
    Company,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Company => "company",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Pending,
}

/// The signed-in account, as returned by login and kept in the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub status: UserStatus,
}

impl User {
    pub fn is_developer(&self) -> bool {
        self.role == Role::Developer
    }

    pub fn is_company(&self) -> bool {
        self.role == Role::Company
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
}

/// Whether the account has finished onboarding.
///
/// Guarding routes on this is the caller's decision; a failed status check
/// is reported as an error, never assumed either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileStatus {
    pub has_profile: bool,
    #[serde(default)]
    pub profile_completion: u32,
    #[serde(default)]
    pub next_required_step: Option<String>,
    pub user_role: Role,
    #[serde(default)]
    pub profile_mandatory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPing {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub last_ping: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: UserStatus,
}
