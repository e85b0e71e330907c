//! Typed wrappers over the SkillSwipe endpoints.
//!
//! Everything here goes through [`ApiClient::execute`], so every call gets
//! token attachment, refresh and error classification for free.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::client::{decode, ApiClient};
use super::request::RequestDescriptor;
use super::transport::Transport;
use super::ApiError;
use crate::models::{
    ActivityPing, DashboardTab, LoginResponse, ProfileStatus, RefreshResponse, SwipeOutcome,
    SwipeRequest, User, WishlistTarget,
};

impl<T: Transport> ApiClient<T> {
    // ===== Auth =====

    pub async fn register(&self, user: Value) -> Result<Value, ApiError> {
        self.post("/auth/users/", user).await
    }

    /// Sign in and persist the returned tokens and user
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request =
            RequestDescriptor::post("/auth/login/", json!({ "email": email, "password": password }));
        let login: LoginResponse = self.execute_as(request).await?;

        self.session()
            .store_login(&login)
            .map_err(|e| ApiError::Auth(format!("{:#}", e)))?;
        info!(user = %login.user.username, role = login.user.role.as_str(), "Logged in");
        Ok(login)
    }

    pub async fn refresh_token(&self, refresh: &str) -> Result<RefreshResponse, ApiError> {
        self.execute_as(RequestDescriptor::post(
            "/auth/jwt/refresh/",
            json!({ "refresh": refresh }),
        ))
        .await
    }

    /// Blacklist the refresh token server side, then forget the session.
    /// Local credentials are cleared even if the server call fails.
    pub async fn logout(&self) {
        if let Some(refresh) = self.session().refresh_token() {
            if let Err(e) = self.post("/auth/logout/", json!({ "refresh": refresh })).await {
                warn!(error = %e, "Logout request failed");
            }
        }
        if let Err(e) = self.session().clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        info!("Logged out");
    }

    pub async fn profile_status(&self) -> Result<ProfileStatus, ApiError> {
        self.execute_as(RequestDescriptor::get("/auth/profile-status/"))
            .await
    }

    pub async fn update_activity(&self) -> Result<ActivityPing, ApiError> {
        self.execute_as(RequestDescriptor::new(reqwest::Method::POST, "/auth/ping/"))
            .await
    }

    /// Resume a stored session on startup.
    ///
    /// Returns the stored user when tokens and user are on record and the
    /// server accepts an activity ping. Any failure clears the session.
    pub async fn restore_session(&self) -> Option<User> {
        let session = self.session();
        if session.access_token().is_none() {
            return None;
        }
        let user = session.user()?;

        match self.update_activity().await {
            Ok(_) => {
                debug!(user = %user.username, "Restored session");
                Some(user)
            }
            Err(e) => {
                warn!(error = %e, "Auth check failed, clearing session");
                if let Err(e) = session.clear() {
                    warn!(error = %e, "Failed to clear stored credentials");
                }
                None
            }
        }
    }

    // ===== Profiles =====

    pub async fn developer_profile(&self) -> Result<Value, ApiError> {
        self.get("/profiles/developer/me/").await
    }

    pub async fn create_developer_profile(&self, profile: Value) -> Result<Value, ApiError> {
        self.post("/profiles/developer/", profile).await
    }

    pub async fn company_profile(&self) -> Result<Value, ApiError> {
        self.get("/profiles/company/me/").await
    }

    pub async fn create_company_profile(&self, profile: Value) -> Result<Value, ApiError> {
        self.post("/profiles/company/", profile).await
    }

    pub async fn search_companies(&self, term: &str) -> Result<Value, ApiError> {
        self.execute(RequestDescriptor::get("/profiles/company/").with_query([("search", term)]))
            .await
    }

    pub async fn all_companies(&self) -> Result<Value, ApiError> {
        self.get("/profiles/company/").await
    }

    pub async fn developer_by_id(&self, id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/profiles/developer/{}/", id)).await
    }

    pub async fn company_by_id(&self, id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/profiles/company/{}/", id)).await
    }

    // ===== Jobs =====

    pub async fn jobs<I, K, V>(&self, params: I) -> Result<Value, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.execute(RequestDescriptor::get("/jobs/jobs/").with_query(params))
            .await
    }

    pub async fn job_by_id(&self, id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/jobs/jobs/{}/", id)).await
    }

    pub async fn create_job(&self, job: Value) -> Result<Value, ApiError> {
        self.post("/jobs/jobs/", job).await
    }

    pub async fn job_statistics(&self) -> Result<Value, ApiError> {
        self.get("/jobs/jobs/statistics/").await
    }

    // ===== Swipes =====

    /// Cards to swipe on, narrowed by the filter panel's parameters
    pub async fn discover<I, K, V>(&self, filters: I) -> Result<Value, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.execute(RequestDescriptor::get("/swipes/discover/").with_query(filters))
            .await
    }

    pub async fn swipe(&self, swipe: &SwipeRequest) -> Result<SwipeOutcome, ApiError> {
        let body = serde_json::to_value(swipe)
            .map_err(|e| ApiError::Network(format!("failed to encode swipe: {}", e)))?;
        let outcome: SwipeOutcome = decode(self.post("/swipes/swipe/", body).await?)?;
        if outcome.match_created {
            info!("Swipe created a match");
        }
        Ok(outcome)
    }

    pub async fn dashboard(&self, tab: &DashboardTab) -> Result<Value, ApiError> {
        self.execute(RequestDescriptor::get("/swipes/dashboard/").with_query([("tab", tab.as_str())]))
            .await
    }

    pub async fn matches(&self) -> Result<Value, ApiError> {
        self.dashboard(&DashboardTab::Matches).await
    }

    // ===== Wishlist =====

    pub async fn wishlist(&self) -> Result<Value, ApiError> {
        self.get("/jobs/wishlist/").await
    }

    pub async fn add_to_wishlist(&self, target: &WishlistTarget) -> Result<Value, ApiError> {
        self.post("/jobs/wishlist/", target.to_body()).await
    }

    pub async fn remove_from_wishlist(&self, wishlist_id: &str) -> Result<Value, ApiError> {
        self.delete(&format!("/jobs/wishlist/{}/", wishlist_id)).await
    }

    pub async fn clear_wishlist(&self) -> Result<Value, ApiError> {
        self.delete("/jobs/wishlist/clear/").await
    }
}
