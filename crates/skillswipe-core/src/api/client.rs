//! API client for the SkillSwipe REST API.
//!
//! [`ApiClient`] attaches bearer tokens, classifies failures into
//! [`ApiError`], and recovers from an expired access token by refreshing it
//! once and replaying every request that hit the expiry in the meantime.
//!
//! Refresh is single-flight: the first request to see an expired token
//! performs the refresh, later ones queue behind it and are replayed in the
//! order they queued, ahead of the request that triggered the refresh.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::{join, join_all};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{self, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::request::{CallOptions, RequestDescriptor};
use super::transport::{HttpRequest, ReqwestTransport, Transport};
use super::ApiError;
use crate::auth::SessionManager;
use crate::config::Config;
use crate::models::RefreshResponse;

// ============================================================================
// Constants
// ============================================================================

/// Token refresh endpoint (SimpleJWT via Djoser)
pub(crate) const REFRESH_PATH: &str = "/auth/jwt/refresh/";

/// HTTP request timeout used when none is configured.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub type SessionExpiredHook = Arc<dyn Fn() + Send + Sync>;

type Reply = oneshot::Sender<Result<Value, ApiError>>;

/// A request parked behind an in-flight refresh
struct PendingRequest {
    request: RequestDescriptor,
    timeout: Duration,
    reply: Reply,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    pending: VecDeque<PendingRequest>,
}

/// Marks a refresh as in flight for as long as it lives.
///
/// If the refreshing call is dropped before it settles (cancelled, timed out
/// by its caller), the flag is cleared and every parked request fails with
/// `Cancelled` instead of waiting forever.
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    armed: bool,
}

impl<'a> RefreshGuard<'a> {
    fn new(state: &'a Mutex<RefreshState>) -> Self {
        Self { state, armed: true }
    }

    /// Clear the flag and take the queue in one step
    fn finish(mut self) -> VecDeque<PendingRequest> {
        self.armed = false;
        Self::release(self.state)
    }

    fn release(state: &Mutex<RefreshState>) -> VecDeque<PendingRequest> {
        let mut state = state.lock();
        state.refreshing = false;
        std::mem::take(&mut state.pending)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let pending = Self::release(self.state);
            warn!(queued = pending.len(), "Token refresh abandoned");
            for parked in pending {
                let _ = parked.reply.send(Err(ApiError::Cancelled));
            }
        }
    }
}

/// How a request that hit an expired token gets its answer
enum Recovery {
    /// A refresh is in flight; wait for the refresher to replay us
    Wait(oneshot::Receiver<Result<Value, ApiError>>),
    /// The token changed while we were in flight; just send again
    Replay(String),
    /// We own the refresh
    Refresh,
    /// The session was torn down while we were in flight
    Ended,
}

/// Everything needed to put a request on the wire. Shared with the task that
/// drains the queue after a refresh, which outlives the refreshing caller.
struct Wire<T> {
    base_url: String,
    transport: T,
}

/// Authenticated client for the SkillSwipe API.
///
/// Share it behind an `Arc`; the refresh state is per client, so every caller
/// in a session must use the same instance.
pub struct ApiClient<T: Transport = ReqwestTransport> {
    wire: Arc<Wire<T>>,
    session: Arc<SessionManager>,
    request_timeout: Duration,
    refresh: Mutex<RefreshState>,
    session_expired: RwLock<Option<SessionExpiredHook>>,
}

impl ApiClient<ReqwestTransport> {
    /// Create a client over reqwest using the configured base URL and timeout
    pub fn new(config: &Config, session: Arc<SessionManager>) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(config.base_url(), transport, session)
            .with_timeout(config.request_timeout()))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn with_transport(
        base_url: impl Into<String>,
        transport: T,
        session: Arc<SessionManager>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            wire: Arc::new(Wire {
                base_url: base_url.trim_end_matches('/').to_string(),
                transport,
            }),
            session,
            request_timeout: DEFAULT_TIMEOUT,
            refresh: Mutex::new(RefreshState::default()),
            session_expired: RwLock::new(None),
        }
    }

    /// Default bound on each network call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.wire.base_url
    }

    /// Register the callback fired when the session cannot be refreshed.
    /// By the time it runs, stored credentials have been cleared.
    pub fn on_session_expired(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.session_expired.write() = Some(Arc::new(hook));
    }

    // ===== Request Methods =====

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(RequestDescriptor::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(RequestDescriptor::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(RequestDescriptor::put(path, body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(RequestDescriptor::patch(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(RequestDescriptor::delete(path)).await
    }

    /// Execute a request, refreshing the access token if it has expired
    pub async fn execute(&self, request: RequestDescriptor) -> Result<Value, ApiError> {
        self.execute_with(request, CallOptions::default()).await
    }

    /// Execute with an explicit per-call timeout and cancellation token.
    ///
    /// The timeout bounds each network call made on behalf of this request
    /// (the original send, a refresh it drives, its replay).
    pub async fn execute_with(
        &self,
        request: RequestDescriptor,
        options: CallOptions,
    ) -> Result<Value, ApiError> {
        let timeout = options.timeout.unwrap_or(self.request_timeout);
        tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                debug!(path = %request.path, "Request cancelled");
                Err(ApiError::Cancelled)
            }
            result = self.run(&request, timeout) => result,
        }
    }

    /// Execute and decode the response body
    pub(crate) async fn execute_as<R: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> Result<R, ApiError> {
        let value = self.execute(request).await?;
        decode(value)
    }

    async fn run(&self, request: &RequestDescriptor, timeout: Duration) -> Result<Value, ApiError> {
        let sent_with = self.session.access_token();
        match self.wire.send(request, sent_with.as_deref(), timeout).await {
            Err(err) if err.is_token_expired() => {
                debug!(path = %request.path, error = %err, "Access token rejected");
                self.recover(request.clone(), sent_with, timeout).await
            }
            other => other,
        }
    }

    async fn recover(
        &self,
        request: RequestDescriptor,
        sent_with: Option<String>,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        // Check-and-set of the flag and the enqueue share one critical section
        let recovery = {
            let mut state = self.refresh.lock();
            if state.refreshing {
                let (reply, waiter) = oneshot::channel();
                state.pending.push_back(PendingRequest {
                    request: request.clone(),
                    timeout,
                    reply,
                });
                debug!(queued = state.pending.len(), "Refresh in flight, queuing request");
                Recovery::Wait(waiter)
            } else {
                match self.session.access_token() {
                    Some(current) if sent_with.as_deref() != Some(current.as_str()) => {
                        Recovery::Replay(current)
                    }
                    // A failed refresh already cleared the session and fired the hook
                    None if sent_with.is_some() => Recovery::Ended,
                    _ => {
                        state.refreshing = true;
                        Recovery::Refresh
                    }
                }
            }
        };

        match recovery {
            Recovery::Wait(waiter) => waiter.await.unwrap_or(Err(ApiError::Cancelled)),
            Recovery::Replay(token) => self.wire.replay(&request, &token, timeout).await,
            Recovery::Refresh => self.refresh_and_replay(request, timeout).await,
            Recovery::Ended => {
                debug!(path = %request.path, "Session already ended");
                Err(ApiError::Auth("session expired".to_string()))
            }
        }
    }

    async fn refresh_and_replay(
        &self,
        request: RequestDescriptor,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        let guard = RefreshGuard::new(&self.refresh);
        info!("Access token expired, attempting to refresh");

        match self.refresh_access_token(timeout).await {
            Ok(token) => {
                let pending = guard.finish();
                info!(queued = pending.len(), "Token refreshed, replaying queued requests");

                // The drain runs on its own task so queued callers get their
                // replies even if this caller goes away. join polls in order:
                // queued sends go out first, in queue order, then ours.
                let wire = Arc::clone(&self.wire);
                let drain = tokio::spawn(async move {
                    let mut queued = Vec::with_capacity(pending.len());
                    for parked in pending {
                        queued.push(wire.answer(parked, &token));
                    }
                    let (_, result) =
                        join(join_all(queued), wire.replay(&request, &token, timeout)).await;
                    result
                });
                drain.await.unwrap_or_else(|e| {
                    warn!(error = %e, "Replay task failed");
                    Err(ApiError::Cancelled)
                })
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed, ending session");
                if let Err(e) = self.session.clear() {
                    warn!(error = %e, "Failed to clear stored credentials");
                }
                let pending = guard.finish();
                let reason = format!("token refresh failed: {}", err.message());
                for parked in pending {
                    let _ = parked.reply.send(Err(ApiError::Auth(reason.clone())));
                }
                self.notify_session_expired();
                Err(ApiError::Auth(reason))
            }
        }
    }

    /// Exchange the stored refresh token for a new access token and store it
    async fn refresh_access_token(&self, timeout: Duration) -> Result<String, ApiError> {
        let refresh = self
            .session
            .refresh_token()
            .ok_or_else(|| ApiError::Auth("No refresh token available".to_string()))?;

        let request = RequestDescriptor::post(REFRESH_PATH, json!({ "refresh": refresh }));
        let response: RefreshResponse = decode(self.wire.send(&request, None, timeout).await?)?;

        self.session
            .set_access_token(&response.access)
            .map_err(|e| ApiError::Auth(format!("{:#}", e)))?;
        Ok(response.access)
    }

    fn notify_session_expired(&self) {
        let hook = self.session_expired.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.refresh.lock().pending.len()
    }

    #[cfg(test)]
    pub(crate) fn is_refreshing(&self) -> bool {
        self.refresh.lock().refreshing
    }
}

impl<T: Transport> Wire<T> {
    /// Replay a parked request and hand the result to its caller
    async fn answer(&self, parked: PendingRequest, token: &str) {
        let replayed = self.replay(&parked.request, token, parked.timeout).await;
        if parked.reply.send(replayed).is_err() {
            debug!(path = %parked.request.path, "Queued caller went away before its replay finished");
        }
    }

    /// Send once more with a token that is known to be fresh. Another expiry
    /// here means the session is beyond saving, so it is not retried.
    async fn replay(
        &self,
        request: &RequestDescriptor,
        token: &str,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        match self.send(request, Some(token), timeout).await {
            Err(err) if err.is_token_expired() => {
                warn!(path = %request.path, "Refreshed token rejected");
                Err(ApiError::Auth(format!("refreshed token rejected: {}", err.message())))
            }
            other => other,
        }
    }

    /// One network round trip: headers, timeout, status check, decode
    async fn send(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut headers = request.headers.clone();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ApiError::Auth("stored access token is not a valid header value".to_string())
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }

        debug!(method = %request.method, url = %url, "Sending request");
        let http = HttpRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
        };
        let response = tokio::time::timeout(timeout, self.transport.send(http))
            .await
            .map_err(|_| ApiError::Timeout(timeout))??;

        if response.status.is_success() {
            if response.body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&response.body)
                .map_err(|e| ApiError::Network(format!("Invalid response from server: {}", e)))
        } else {
            let err = ApiError::classify(response.status, &response.body);
            debug!(
                status = response.status.as_u16(),
                body = %ApiError::truncate_body(&response.body),
                "Request failed"
            );
            Err(err)
        }
    }
}

/// Decode a response body into a typed payload
pub(crate) fn decode<R: DeserializeOwned>(value: Value) -> Result<R, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::Network(format!("Invalid response from server: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::mock::{bearer, json_response, path, text_response, MockTransport, BASE_URL};
    use crate::api::transport::HttpResponse;
    use crate::api::ErrorKind;
    use crate::auth::{MemoryStore, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    const EXPIRED: &str = "Given token not valid for any token type";

    fn session_with(access: Option<&str>, refresh: Option<&str>) -> Arc<SessionManager> {
        let store = MemoryStore::new();
        if let Some(access) = access {
            store.set(ACCESS_TOKEN_KEY, access).unwrap();
        }
        if let Some(refresh) = refresh {
            store.set(REFRESH_TOKEN_KEY, refresh).unwrap();
        }
        store
            .set(USER_KEY, r#"{"id": "u-1", "username": "ada", "email": "ada@example.com", "role": "developer"}"#)
            .unwrap();
        Arc::new(SessionManager::new(store))
    }

    fn expired_response() -> Result<HttpResponse, ApiError> {
        json_response(401, json!({"detail": EXPIRED, "code": "token_not_valid"}))
    }

    /// Accepts only `new-token` and hands it out on refresh
    fn rotating_server(request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        if path(request) == REFRESH_PATH {
            return json_response(200, json!({"access": "new-token"}));
        }
        match bearer(request) {
            Some("new-token") => json_response(200, json!({"path": path(request)})),
            _ => expired_response(),
        }
    }

    fn client_for(
        transport: &Arc<MockTransport>,
        session: Arc<SessionManager>,
    ) -> ApiClient<Arc<MockTransport>> {
        ApiClient::with_transport(BASE_URL, Arc::clone(transport), session)
    }

    fn count_expiries(client: &ApiClient<Arc<MockTransport>>) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        client.on_session_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        fired
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("timed out waiting for {}", what);
    }

    // -------------------------------------------------------------------------
    // Refresh and replay
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_request_retried() {
        let transport = Arc::new(MockTransport::new(rotating_server));
        let session = session_with(Some("expired-token"), Some("valid-refresh"));
        let client = client_for(&transport, Arc::clone(&session));

        let body = client.get("/profiles/developer/me/").await.unwrap();
        assert_eq!(body, json!({"path": "/profiles/developer/me/"}));

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(bearer(&calls[0]), Some("expired-token"));
        assert_eq!(path(&calls[1]), REFRESH_PATH);
        assert_eq!(calls[1].body, Some(json!({"refresh": "valid-refresh"})));
        assert_eq!(bearer(&calls[1]), None);
        assert_eq!(path(&calls[2]), "/profiles/developer/me/");
        assert_eq!(bearer(&calls[2]), Some("new-token"));

        assert_eq!(session.access_token().as_deref(), Some("new-token"));
        assert_eq!(session.refresh_token().as_deref(), Some("valid-refresh"));
        assert!(!client.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session() {
        let transport = Arc::new(MockTransport::new(|request| {
            if path(request) == REFRESH_PATH {
                json_response(401, json!({"detail": "Token is invalid or expired", "code": "token_not_valid"}))
            } else {
                expired_response()
            }
        }));
        let session = session_with(Some("expired-token"), Some("valid-refresh"));
        let client = client_for(&transport, Arc::clone(&session));
        let expiries = count_expiries(&client);

        let err = client.get("/profiles/developer/me/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);

        assert_eq!(session.access_token(), None);
        assert_eq!(session.refresh_token(), None);
        assert_eq!(session.user(), None);
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert!(!client.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_expiries_share_one_refresh() {
        let transport = Arc::new(MockTransport::new(rotating_server));
        let client = client_for(&transport, session_with(Some("expired-token"), Some("valid-refresh")));

        let (a, b) = tokio::join!(client.get("/a"), client.get("/b"));
        assert_eq!(a.unwrap(), json!({"path": "/a"}));
        assert_eq!(b.unwrap(), json!({"path": "/b"}));
        assert_eq!(transport.refresh_calls(), 1);

        let calls = transport.calls();
        let refresh_at = calls.iter().position(|c| path(c) == REFRESH_PATH).unwrap();
        let mut retried: Vec<&str> = calls[refresh_at + 1..]
            .iter()
            .inspect(|c| assert_eq!(bearer(c), Some("new-token")))
            .map(path)
            .collect();
        retried.sort();
        assert_eq!(retried, vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_many_concurrent_expiries_refresh_once() {
        let transport = Arc::new(MockTransport::new(rotating_server));
        let client = client_for(&transport, session_with(Some("expired-token"), Some("valid-refresh")));

        let paths: Vec<String> = (0..8).map(|i| format!("/items/{}/", i)).collect();
        let results = join_all(paths.iter().map(|p| client.get(p))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_queued_requests_replay_in_fifo_order() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(MockTransport::new(rotating_server).gated(Arc::clone(&gate)));
        let client = Arc::new(client_for(
            &transport,
            session_with(Some("expired-token"), Some("valid-refresh")),
        ));
        let spawn = |path: &'static str| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get(path).await })
        };

        let r0 = spawn("/r0");
        wait_until("refresh in flight", || transport.refresh_calls() == 1).await;
        let r1 = spawn("/r1");
        wait_until("r1 queued", || client.queued() == 1).await;
        let r2 = spawn("/r2");
        wait_until("r2 queued", || client.queued() == 2).await;
        let r3 = spawn("/r3");
        wait_until("r3 queued", || client.queued() == 3).await;

        let sent_before_refresh = transport.calls().len();
        gate.notify_one();
        for handle in [r0, r1, r2, r3] {
            assert!(handle.await.unwrap().is_ok());
        }

        let paths = transport.paths();
        let replayed: Vec<&str> = paths[sent_before_refresh..].iter().map(String::as_str).collect();
        assert_eq!(replayed, vec!["/r1", "/r2", "/r3", "/r0"]);
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_rejects_every_queued_request() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(
            MockTransport::new(|request| {
                if path(request) == REFRESH_PATH {
                    json_response(500, json!({}))
                } else {
                    expired_response()
                }
            })
            .gated(Arc::clone(&gate)),
        );
        let session = session_with(Some("expired-token"), Some("valid-refresh"));
        let client = Arc::new(client_for(&transport, Arc::clone(&session)));
        let expiries = count_expiries(&client);
        let spawn = |path: &'static str| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get(path).await })
        };

        let r0 = spawn("/r0");
        wait_until("refresh in flight", || transport.refresh_calls() == 1).await;
        let r1 = spawn("/r1");
        let r2 = spawn("/r2");
        wait_until("both queued", || client.queued() == 2).await;

        gate.notify_one();
        for handle in [r0, r1, r2] {
            assert_eq!(handle.await.unwrap().unwrap_err().kind(), ErrorKind::Auth);
        }

        assert_eq!(session.access_token(), None);
        assert_eq!(session.refresh_token(), None);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert_eq!(client.queued(), 0);
        assert!(!client.is_refreshing());
        // r0, the refresh, r1, r2; nothing replayed after the failed refresh
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_refreshed_token_rejected_again_is_auth() {
        let transport = Arc::new(MockTransport::new(|request| {
            if path(request) == REFRESH_PATH {
                json_response(200, json!({"access": "new-token"}))
            } else {
                expired_response()
            }
        }));
        let session = session_with(Some("expired-token"), Some("valid-refresh"));
        let client = client_for(&transport, Arc::clone(&session));

        let err = client.get("/jobs/wishlist/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(transport.calls().len(), 3);
        // The refresh itself worked, so the session is left alone
        assert_eq!(session.access_token().as_deref(), Some("new-token"));
    }

    #[tokio::test]
    async fn test_token_rotated_in_flight_replays_without_refresh() {
        let session = session_with(Some("old-token"), Some("valid-refresh"));
        let rotated = Arc::clone(&session);
        let transport = Arc::new(MockTransport::new(move |request| match bearer(request) {
            Some("old-token") => {
                // Another request refreshed while this one was on the wire
                rotated.set_access_token("new-token").unwrap();
                expired_response()
            }
            Some("new-token") => json_response(200, json!({"ok": true})),
            _ => expired_response(),
        }));
        let client = client_for(&transport, session);

        assert_eq!(client.get("/swipes/discover/").await.unwrap(), json!({"ok": true}));
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_ends_session() {
        let transport = Arc::new(MockTransport::new(|_| expired_response()));
        let session = session_with(Some("expired-token"), None);
        let client = client_for(&transport, Arc::clone(&session));
        let expiries = count_expiries(&client);

        let err = client.get("/auth/profile-status/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(session.access_token(), None);
        assert_eq!(session.user(), None);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
    }

    // -------------------------------------------------------------------------
    // Errors that bypass the refresh path
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_validation_error_skips_refresh() {
        let transport = Arc::new(MockTransport::new(|_| {
            json_response(400, json!({"errors": {"title": "required"}}))
        }));
        let client = client_for(&transport, session_with(Some("access"), Some("refresh")));

        let err = client.post("/jobs/jobs/", json!({"description": "Rust role"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.fields().and_then(|f| f.get("title")).map(String::as_str), Some("required"));
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(client.queued(), 0);
    }

    #[tokio::test]
    async fn test_detail_error_skips_refresh() {
        let transport = Arc::new(MockTransport::new(|_| {
            json_response(403, json!({"detail": "You do not have permission to perform this action."}))
        }));
        let client = client_for(&transport, session_with(Some("access"), Some("refresh")));

        let err = client.get("/jobs/jobs/statistics/").await.unwrap_err();
        assert_eq!(err, ApiError::Detail("You do not have permission to perform this action.".into()));
        assert_eq!(transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_network_error_is_not_retried() {
        let transport = Arc::new(MockTransport::new(|_| {
            Err(ApiError::Network("connection refused".to_string()))
        }));
        let client = client_for(&transport, session_with(Some("access"), Some("refresh")));

        let err = client.get("/jobs/jobs/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_network_error() {
        let transport = Arc::new(MockTransport::new(|_| text_response(200, "<html>oops</html>")));
        let client = client_for(&transport, session_with(Some("access"), Some("refresh")));

        let err = client.get("/jobs/jobs/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_empty_success_body_is_null() {
        let transport = Arc::new(MockTransport::new(|_| text_response(204, "")));
        let client = client_for(&transport, session_with(Some("access"), Some("refresh")));

        assert_eq!(client.delete("/jobs/wishlist/clear/").await.unwrap(), Value::Null);
    }

    // -------------------------------------------------------------------------
    // Headers
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_no_token_omits_authorization_header() {
        let transport = Arc::new(MockTransport::new(|_| json_response(201, json!({"id": "u-9"}))));
        let client = client_for(&transport, Arc::new(SessionManager::in_memory()));

        client.post("/auth/users/", json!({"email": "new@example.com"})).await.unwrap();

        let calls = transport.calls();
        assert!(calls[0].headers.get(header::AUTHORIZATION).is_none());
        assert_eq!(
            calls[0].headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_stored_token_is_sent_as_bearer() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!([]))));
        let client = client_for(&transport, session_with(Some("abc"), Some("refresh")));

        client.get("/jobs/wishlist/").await.unwrap();
        assert_eq!(bearer(&transport.calls()[0]), Some("abc"));
        assert_eq!(transport.calls()[0].url, format!("{}/jobs/wishlist/", BASE_URL));
    }

    // -------------------------------------------------------------------------
    // Timeouts and cancellation
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let transport = Arc::new(MockTransport::hanging());
        let client = client_for(&transport, session_with(Some("access"), Some("refresh")));

        let options = CallOptions::default().with_timeout(Duration::from_secs(5));
        let err = client
            .execute_with(RequestDescriptor::get("/jobs/jobs/"), options)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!({}))));
        let client = client_for(&transport, session_with(Some("access"), Some("refresh")));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .execute_with(RequestDescriptor::get("/jobs/jobs/"), CallOptions::default().with_cancel(cancel))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Cancelled);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_refresh_releases_queue() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(MockTransport::new(rotating_server).gated(Arc::clone(&gate)));
        let session = session_with(Some("expired-token"), Some("valid-refresh"));
        let client = Arc::new(client_for(&transport, Arc::clone(&session)));

        let cancel = CancellationToken::new();
        let refresher = {
            let client = Arc::clone(&client);
            let options = CallOptions::default().with_cancel(cancel.clone());
            tokio::spawn(async move {
                client.execute_with(RequestDescriptor::get("/r0"), options).await
            })
        };
        wait_until("refresh in flight", || transport.refresh_calls() == 1).await;
        let queued = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get("/r1").await })
        };
        wait_until("r1 queued", || client.queued() == 1).await;

        cancel.cancel();
        assert_eq!(refresher.await.unwrap(), Err(ApiError::Cancelled));
        assert_eq!(queued.await.unwrap(), Err(ApiError::Cancelled));
        assert!(!client.is_refreshing());
        assert_eq!(session.refresh_token().as_deref(), Some("valid-refresh"));

        // A later expiry can start a fresh refresh
        gate.notify_one();
        assert_eq!(client.get("/r2").await.unwrap(), json!({"path": "/r2"}));
        assert_eq!(transport.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_queued_replay_survives_cancelled_refresher() {
        let gate = Arc::new(Notify::new());
        let retry_gate = Arc::new(Notify::new());
        let transport = Arc::new(
            MockTransport::new(rotating_server)
                .gated(Arc::clone(&gate))
                .holding(
                    |r| path(r) == "/r0" && bearer(r) == Some("new-token"),
                    Arc::clone(&retry_gate),
                ),
        );
        let session = session_with(Some("expired-token"), Some("valid-refresh"));
        let client = Arc::new(client_for(&transport, Arc::clone(&session)));

        let cancel = CancellationToken::new();
        let refresher = {
            let client = Arc::clone(&client);
            let options = CallOptions::default().with_cancel(cancel.clone());
            tokio::spawn(async move {
                client
                    .execute_with(RequestDescriptor::post("/r0", json!({"n": 0})), options)
                    .await
            })
        };
        wait_until("refresh in flight", || transport.refresh_calls() == 1).await;
        let queued = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.post("/r1", json!({"n": 1})).await })
        };
        wait_until("r1 queued", || client.queued() == 1).await;

        gate.notify_one();
        wait_until("replays sent", || {
            transport.count("/r0") == 2 && transport.count("/r1") == 2
        })
        .await;

        // The refresher gives up while its own retry is still on the wire
        cancel.cancel();
        assert_eq!(refresher.await.unwrap(), Err(ApiError::Cancelled));
        assert_eq!(queued.await.unwrap(), Ok(json!({"path": "/r1"})));

        let r1_sends: Vec<_> = transport.calls().into_iter().filter(|c| path(c) == "/r1").collect();
        assert_eq!(bearer(&r1_sends[1]), Some("new-token"));
        assert_eq!(session.access_token().as_deref(), Some("new-token"));
        assert!(!client.is_refreshing());
        retry_gate.notify_one();
    }

    #[tokio::test]
    async fn test_refresh_network_failure_rejects_queue_and_ends_session() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(
            MockTransport::new(|request| {
                if path(request) == REFRESH_PATH {
                    Err(ApiError::Network("connection reset by peer".to_string()))
                } else {
                    expired_response()
                }
            })
            .gated(Arc::clone(&gate)),
        );
        let session = session_with(Some("expired-token"), Some("valid-refresh"));
        let client = Arc::new(client_for(&transport, Arc::clone(&session)));
        let expiries = count_expiries(&client);
        let spawn = |path: &'static str| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get(path).await })
        };

        let r0 = spawn("/r0");
        wait_until("refresh in flight", || transport.refresh_calls() == 1).await;
        let r1 = spawn("/r1");
        wait_until("r1 queued", || client.queued() == 1).await;

        gate.notify_one();
        for handle in [r0, r1] {
            assert_eq!(handle.await.unwrap().unwrap_err().kind(), ErrorKind::Auth);
        }

        assert_eq!(session.access_token(), None);
        assert_eq!(session.refresh_token(), None);
        assert_eq!(session.user(), None);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert!(!client.is_refreshing());
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_undecodable_refresh_response_ends_session() {
        for body in ["<html>Bad Gateway</html>", r#"{"token": "missing-access-field"}"#] {
            let transport = Arc::new(MockTransport::new(move |request| {
                if path(request) == REFRESH_PATH {
                    text_response(200, body)
                } else {
                    expired_response()
                }
            }));
            let session = session_with(Some("expired-token"), Some("valid-refresh"));
            let client = client_for(&transport, Arc::clone(&session));
            let expiries = count_expiries(&client);

            let err = client.get("/jobs/jobs/").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Auth, "refresh body {}", body);
            assert_eq!(session.access_token(), None);
            assert_eq!(session.refresh_token(), None);
            assert_eq!(expiries.load(Ordering::SeqCst), 1);
            assert_eq!(transport.calls().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_late_expiry_after_failed_refresh_notifies_once() {
        let held = Arc::new(Notify::new());
        let transport = Arc::new(
            MockTransport::new(|request| {
                if path(request) == REFRESH_PATH {
                    json_response(401, json!({"detail": "Token is invalid or expired", "code": "token_not_valid"}))
                } else {
                    expired_response()
                }
            })
            .holding(|r| path(r) == "/slow", Arc::clone(&held)),
        );
        let session = session_with(Some("expired-token"), Some("valid-refresh"));
        let client = Arc::new(client_for(&transport, Arc::clone(&session)));
        let expiries = count_expiries(&client);

        let slow = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get("/slow").await })
        };
        wait_until("slow request sent", || transport.count("/slow") == 1).await;

        assert_eq!(client.get("/fast").await.unwrap_err().kind(), ErrorKind::Auth);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert_eq!(session.access_token(), None);

        // The slow request comes back expired after the session is gone
        held.notify_one();
        assert_eq!(slow.await.unwrap().unwrap_err().kind(), ErrorKind::Auth);
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
    }
}
