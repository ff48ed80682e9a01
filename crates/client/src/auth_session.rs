//! Authentication session: tokens, permission snapshot, and the single
//! debounced path that ends a session on an authentication failure.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use fva_shared::{
    ApiEnvelope, ApiError, LoginRequest, RouteNode, TokenPair, UserInfo, PATH_LOGIN, PATH_LOGOUT,
    PATH_REFRESH_TOKEN, PATH_USER_INFO,
};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::api_client::ApiClient;
use crate::config::ClientConfig;
use crate::fallback::FallbackAdapter;
use crate::permission::{PermissionSnapshot, Permissions};
use crate::storage::SessionStore;
use crate::ws::ConnectionManager;

const EVENT_CAPACITY: usize = 16;

/// Session lifecycle notifications for the embedding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoggedIn,
    PermissionsLoaded,
    TokenRefreshed,
    LoggedOut,
    /// The server refused the session; emitted once per debounce window.
    Invalidated { reason: String },
}

/// Whether permission answers are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Anonymous,
    /// Logged in, snapshot not fetched yet. Not the same as denied.
    Loading,
    Ready,
}

#[derive(Debug, Default)]
struct TokenSlot {
    tokens: Option<TokenPair>,
    /// Bumped whenever the session starts or ends, so a fetch started for
    /// an older session cannot install its snapshot.
    generation: u64,
}

/// Token pair and permission snapshot. Both are replaced whole, never
/// mutated in place.
#[derive(Debug, Default)]
pub struct SessionState {
    tokens: RwLock<TokenSlot>,
    snapshot: RwLock<Option<Arc<PermissionSnapshot>>>,
}

impl SessionState {
    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
            .filter(|t| !t.is_empty())
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    pub fn snapshot(&self) -> Option<Arc<PermissionSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn permission_status(&self) -> PermissionStatus {
        if !self.is_authenticated() {
            PermissionStatus::Anonymous
        } else if self.snapshot().is_some() {
            PermissionStatus::Ready
        } else {
            PermissionStatus::Loading
        }
    }

    fn generation(&self) -> u64 {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Start a new session. Returns its generation.
    fn install(&self, tokens: TokenPair) -> u64 {
        let mut slot = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        slot.tokens = Some(tokens);
        slot.generation += 1;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
        slot.generation
    }

    /// Swap the token pair of the running session, if `expected` is still
    /// its access token.
    fn replace_tokens(&self, expected: &str, tokens: TokenPair) -> bool {
        let mut slot = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        match &slot.tokens {
            Some(current) if current.access_token == expected => {
                slot.tokens = Some(tokens);
                true
            }
            _ => false,
        }
    }

    /// End the session. Returns the tokens it held.
    fn clear(&self) -> Option<TokenPair> {
        let mut slot = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        slot.generation += 1;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
        slot.tokens.take()
    }

    fn set_snapshot_if(&self, generation: u64, snapshot: Arc<PermissionSnapshot>) -> bool {
        let slot = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation || slot.tokens.is_none() {
            return false;
        }
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        true
    }
}

/// Lets one unauthorized failure through per window.
#[derive(Debug)]
pub struct UnauthorizedGuard {
    window: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl UnauthorizedGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: Mutex::new(None),
        }
    }

    /// True for the first call of a window; false until the window expires.
    pub fn try_fire(&self) -> bool {
        let mut last = self.last_fired.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(previous) = *last {
            if now.duration_since(previous) < self.window {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

struct AuthInner {
    config: ClientConfig,
    state: Arc<SessionState>,
    connection: ConnectionManager,
    guard: UnauthorizedGuard,
    /// Socket rejections that REST showed to be server faults, since the
    /// session or token last changed.
    socket_fault_retries: AtomicU32,
    store: Option<SessionStore>,
    events: broadcast::Sender<SessionEvent>,
    http: reqwest::Client,
}

/// The logged-in (or not) user of this process.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<AuthInner>,
}

impl AuthSession {
    /// Session persisted in the platform config directory when
    /// `persist_session` is set.
    pub fn new(config: ClientConfig) -> Self {
        let store = if config.persist_session {
            SessionStore::default_location()
        } else {
            None
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: ClientConfig, store: Option<SessionStore>) -> Self {
        let state = Arc::new(SessionState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &Weak<AuthInner>| {
            let url_state = state.clone();
            let url_config = config.clone();
            let weak = weak.clone();
            let connection = ConnectionManager::new(
                &config,
                move || {
                    url_state
                        .access_token()
                        .map(|token| url_config.ws_url(&token))
                },
                move |reason| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let session = AuthSession { inner };
                    tokio::spawn(async move {
                        session.handle_socket_rejection(&reason).await;
                    });
                },
            );

            AuthInner {
                guard: UnauthorizedGuard::new(config.unauthorized_debounce),
                socket_fault_retries: AtomicU32::new(0),
                config,
                state,
                connection,
                store,
                events,
                http: reqwest::Client::new(),
            }
        });

        Self { inner }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &SessionState {
        &self.inner.state
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.is_authenticated()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Checks against the current snapshot.
    pub fn permissions(&self) -> Permissions {
        Permissions::new(self.inner.state.snapshot(), self.inner.config.access_mode)
    }

    /// Log in and connect the notification socket. Returns once the tokens
    /// are stored; the permission snapshot follows asynchronously.
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenPair, ApiError> {
        let envelope: ApiEnvelope<TokenPair> =
            self.api(None).post_form(PATH_LOGIN, request).await?;
        let tokens = envelope.data;
        if tokens.access_token.is_empty() {
            return Err(ApiError::Deserialize(
                "login response carried no access token".to_string(),
            ));
        }

        self.start_session(tokens.clone()).await;
        crate::log_info!("Logged in as {}", request.username);
        Ok(tokens)
    }

    /// Resume a saved session. False when nothing usable was saved.
    pub async fn restore(&self) -> bool {
        let Some(tokens) = self.inner.store.as_ref().and_then(SessionStore::load_tokens) else {
            return false;
        };
        if tokens.access_token.is_empty() {
            return false;
        }

        self.start_session(tokens).await;
        crate::log_info!("Restored saved session");
        true
    }

    async fn start_session(&self, tokens: TokenPair) {
        self.inner.connection.disconnect().await;
        self.persist(&tokens);
        let generation = self.inner.state.install(tokens);
        self.inner.socket_fault_retries.store(0, Ordering::SeqCst);
        self.emit(SessionEvent::LoggedIn);
        self.inner.connection.connect().await;
        self.spawn_permission_load(generation);
    }

    /// Clear the session and tell the server. Harmless when logged out.
    pub async fn logout(&self) {
        let Some(previous) = self.end_session().await else {
            return;
        };
        self.emit(SessionEvent::LoggedOut);
        crate::log_info!("Logged out");

        let api = self.api(Some(previous.access_token));
        if let Err(e) = api.post::<Value>(PATH_LOGOUT).await {
            crate::log_warn!("Logout notification failed: {}", e);
        }
    }

    /// End the session after an authentication failure. Only the first
    /// call per debounce window acts; returns whether this one did.
    pub async fn force_invalidate(&self, reason: &str) -> bool {
        if !self.inner.state.is_authenticated() {
            crate::log_debug!("Ignoring unauthorized ({}) without a session", reason);
            return false;
        }
        if !self.inner.guard.try_fire() {
            crate::log_debug!("Unauthorized ({}) within debounce window, ignored", reason);
            return false;
        }

        crate::log_warn!("Session invalidated: {}", reason);
        self.end_session().await;
        self.emit(SessionEvent::Invalidated {
            reason: reason.to_string(),
        });
        true
    }

    /// The socket was refused or closed with 4001. The server uses 4001 for
    /// unhandled exceptions as well as bad tokens, so ask REST before ending
    /// the session: only a 401 there, or no answer at all, logs out. A token
    /// REST still accepts gets the socket reconnected on the reconnect
    /// schedule instead.
    async fn handle_socket_rejection(&self, reason: &str) {
        let Some(token) = self.inner.state.access_token() else {
            return;
        };

        match self.api(Some(token.clone())).get::<Value>(PATH_USER_INFO).await {
            Ok(_) => {}
            Err(e) if e.is_unauthorized() => {
                self.force_invalidate(reason).await;
                return;
            }
            Err(e) => {
                crate::log_warn!("Could not verify the token after socket rejection: {}", e);
                self.force_invalidate(reason).await;
                return;
            }
        }

        let retry = self.inner.socket_fault_retries.fetch_add(1, Ordering::SeqCst);
        let Some(delay) = self.inner.config.reconnect.delay_for_attempt(retry) else {
            crate::log_error!(
                "Notification socket keeps closing with 4001 ({}) while the token is valid, \
                 leaving it disconnected",
                reason
            );
            return;
        };
        crate::log_warn!(
            "Socket closed with 4001 ({}) but the token is valid, reconnecting in {:?}",
            reason,
            delay
        );
        tokio::time::sleep(delay).await;
        if self.inner.state.access_token().as_deref() != Some(token.as_str()) {
            return;
        }
        self.inner.connection.disconnect().await;
        self.inner.connection.connect().await;
    }

    /// Socket first, REST on any socket failure.
    pub async fn get_user_info(&self) -> Result<ApiEnvelope<UserInfo>, ApiError> {
        let result = self.fallback().get_user_info().await;
        self.check_unauthorized(result).await
    }

    pub async fn get_user_routes(&self) -> Result<ApiEnvelope<Vec<RouteNode>>, ApiError> {
        let result = self.fallback().get_user_routes().await;
        self.check_unauthorized(result).await
    }

    /// The route tree narrowed to the current identity level.
    pub async fn accessible_routes(&self) -> Result<Vec<RouteNode>, ApiError> {
        let routes = self.get_user_routes().await?.data;
        Ok(self.permissions().filter_routes(&routes))
    }

    /// Fetch and install a fresh snapshot for the current session.
    pub async fn refresh_permissions(&self) -> Result<Arc<PermissionSnapshot>, ApiError> {
        if !self.is_authenticated() {
            return Err(ApiError::Unauthorized("not logged in".to_string()));
        }
        self.load_permissions(self.inner.state.generation()).await
    }

    /// Exchange the current token for a new pair and reconnect the socket
    /// with it.
    pub async fn refresh_token(&self) -> Result<TokenPair, ApiError> {
        let Some(current) = self.inner.state.access_token() else {
            return Err(ApiError::Unauthorized("not logged in".to_string()));
        };

        let result = self
            .api(Some(current.clone()))
            .post::<TokenPair>(PATH_REFRESH_TOKEN)
            .await;
        let tokens = self.check_unauthorized(result).await?.data;
        if tokens.access_token.is_empty() {
            return Err(ApiError::Deserialize(
                "refresh response carried no access token".to_string(),
            ));
        }

        if !self.inner.state.replace_tokens(&current, tokens.clone()) {
            return Err(ApiError::Unauthorized(
                "session ended during token refresh".to_string(),
            ));
        }
        self.persist(&tokens);
        self.inner.socket_fault_retries.store(0, Ordering::SeqCst);
        self.emit(SessionEvent::TokenRefreshed);
        crate::log_info!("Access token refreshed");

        self.inner.connection.disconnect().await;
        self.inner.connection.connect().await;
        Ok(tokens)
    }

    fn api(&self, token: Option<String>) -> ApiClient {
        ApiClient::with_client(self.inner.http.clone())
            .with_base_url(self.inner.config.base_url.clone())
            .with_bearer(token)
    }

    fn fallback(&self) -> FallbackAdapter<'_> {
        FallbackAdapter::new(
            &self.inner.connection,
            self.api(self.inner.state.access_token()),
        )
    }

    async fn check_unauthorized<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(e) = &result {
            if e.is_unauthorized() {
                self.force_invalidate(&e.to_string()).await;
            }
        }
        result
    }

    fn spawn_permission_load(&self, generation: u64) {
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.load_permissions(generation).await {
                crate::log_error!("Failed to load permissions: {}", e);
            }
        });
    }

    async fn load_permissions(&self, generation: u64) -> Result<Arc<PermissionSnapshot>, ApiError> {
        let info = self.get_user_info().await?.data;
        let snapshot = Arc::new(PermissionSnapshot::from(&info));
        if self.inner.state.set_snapshot_if(generation, snapshot.clone()) {
            crate::log_info!(
                "Permissions loaded: {} marks, {} roles",
                snapshot.permission_marks.len(),
                snapshot.role_codes.len()
            );
            self.emit(SessionEvent::PermissionsLoaded);
        } else {
            crate::log_debug!("Discarding permissions fetched for an ended session");
        }
        Ok(snapshot)
    }

    /// Clear state first, then storage and the socket.
    async fn end_session(&self) -> Option<TokenPair> {
        let previous = self.inner.state.clear();
        if let Some(store) = &self.inner.store {
            store.clear_tokens();
        }
        self.inner.connection.disconnect().await;
        previous
    }

    fn persist(&self, tokens: &TokenPair) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.save_tokens(tokens) {
                crate::log_warn!("Failed to save session: {}", e);
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(access: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: "r".to_string(),
            expires_time: None,
        }
    }

    #[test]
    fn guard_fires_once_per_window() {
        let guard = UnauthorizedGuard::new(Duration::from_millis(50));
        assert!(guard.try_fire());
        assert!(!guard.try_fire());
        assert!(!guard.try_fire());
        std::thread::sleep(Duration::from_millis(60));
        assert!(guard.try_fire());
    }

    #[test]
    fn permission_status_transitions() {
        let state = SessionState::default();
        assert_eq!(state.permission_status(), PermissionStatus::Anonymous);

        let generation = state.install(tokens("a"));
        assert_eq!(state.permission_status(), PermissionStatus::Loading);

        assert!(state.set_snapshot_if(generation, Arc::new(PermissionSnapshot::default())));
        assert_eq!(state.permission_status(), PermissionStatus::Ready);

        state.clear();
        assert_eq!(state.permission_status(), PermissionStatus::Anonymous);
        assert!(state.snapshot().is_none());
    }

    #[test]
    fn stale_snapshot_is_discarded() {
        let state = SessionState::default();
        let old = state.install(tokens("a"));
        state.clear();
        assert!(!state.set_snapshot_if(old, Arc::new(PermissionSnapshot::default())));

        let new = state.install(tokens("b"));
        assert!(!state.set_snapshot_if(old, Arc::new(PermissionSnapshot::default())));
        assert!(state.set_snapshot_if(new, Arc::new(PermissionSnapshot::default())));
    }

    #[test]
    fn token_replacement_requires_current_token() {
        let state = SessionState::default();
        state.install(tokens("a"));
        assert!(!state.replace_tokens("other", tokens("b")));
        assert!(state.replace_tokens("a", tokens("b")));
        assert_eq!(state.access_token().as_deref(), Some("b"));
    }

    #[test]
    fn empty_access_token_is_not_a_session() {
        let state = SessionState::default();
        state.install(tokens(""));
        assert!(!state.is_authenticated());
    }

    #[tokio::test]
    async fn logout_without_session_is_silent() {
        let session = AuthSession::with_store(ClientConfig::default(), None);
        let mut events = session.subscribe_events();
        session.logout().await;
        session.logout().await;
        assert!(!session.is_authenticated());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalidate_without_session_is_ignored() {
        let session = AuthSession::with_store(ClientConfig::default(), None);
        assert!(!session.force_invalidate("expired").await);
    }

    #[tokio::test]
    async fn refresh_permissions_requires_login() {
        let session = AuthSession::with_store(ClientConfig::default(), None);
        assert!(matches!(
            session.refresh_permissions().await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
