//! Session manager: grant execution, expiry checks and single-flight refresh.
//!
//! The token state sits behind a `RwLock` and is swapped as a whole. Refreshes
//! are serialized by a `Mutex` holding the outcome of the last refresh, and a
//! generation counter lets callers that queued behind an in-flight refresh adopt
//! its outcome instead of issuing their own call. However many callers cross the
//! safety margin together, the token endpoint sees one refresh request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};
use super::clock::{Clock, SystemClock};
use super::config::IamConfig;
use super::credentials::Credentials;
use super::error::IamError;
use super::grant_helpers::TokenFlow;
use super::http_client::IamHttpClient;
use super::types::{Grant, SessionPhase, TokenResponse, TokenState};

struct SessionInner {
    state: Arc<TokenState>,
    phase: SessionPhase,
}

impl Default for SessionInner {
    fn default() -> Self {
        SessionInner { state: Arc::new(TokenState::default()), phase: SessionPhase::Unauthenticated }
    }
}

/// Owns the token state of one set of credentials.
pub struct SessionManager<C: IamHttpClient> {
    http_client: C,
    credentials: Arc<Credentials>,
    config: IamConfig,
    flow: TokenFlow,
    clock: Arc<dyn Clock>,
    inner: RwLock<SessionInner>,
    /// Outcome of the most recent refresh; holding the lock means owning the refresh.
    refresh_lock: Mutex<Option<Result<String, IamError>>>,
    refresh_generation: AtomicU64,
}

impl<C: IamHttpClient> SessionManager<C> {
    /// Creates an unauthenticated session using the wall clock.
    pub fn new(config: IamConfig, credentials: Arc<Credentials>, http_client: C) -> Self {
        let flow = TokenFlow::new(config.token_url(), config.revoke_url(), config.token_api_version.clone());
        SessionManager {
            http_client,
            credentials,
            config,
            flow,
            clock: Arc::new(SystemClock),
            inner: RwLock::new(SessionInner::default()),
            refresh_lock: Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seeds the session with tokens obtained elsewhere.
    pub async fn with_token_state(self, state: TokenState) -> Self {
        self.replace_state(state).await;
        self
    }

    /// Transport shared with the permission evaluator and request builder.
    pub fn http_client(&self) -> &C {
        &self.http_client
    }

    /// Credentials the session authenticates with.
    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.credentials
    }

    /// Endpoint and timing configuration.
    pub fn config(&self) -> &IamConfig {
        &self.config
    }

    /// Current instant according to the session's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Executes `grant` and replaces the token state on success.
    ///
    /// Not meant to run concurrently with itself.
    #[instrument(skip(self), level = "debug")]
    pub async fn authenticate(&self, grant: Grant) -> Result<(), IamError> {
        let previous = {
            let mut inner = self.inner.write().await;
            std::mem::replace(&mut inner.phase, SessionPhase::Authenticating)
        };
        let issued_at = self.clock.now();
        match self.flow.execute(&self.http_client, &self.credentials, &grant).await {
            Ok(response) => match self.issue_state(response, issued_at, "") {
                Ok(state) => {
                    self.replace_state(state).await;
                    debug!(grant_type = grant.grant_type(), "session authenticated");
                    Ok(())
                }
                Err(err) => {
                    self.inner.write().await.phase = previous;
                    warn!(grant_type = grant.grant_type(), error = %err, "authentication failed");
                    Err(err)
                }
            },
            Err(err) => {
                self.inner.write().await.phase = previous;
                warn!(grant_type = grant.grant_type(), error = %err, "authentication failed");
                Err(err)
            }
        }
    }

    /// Password grant for a user.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), IamError> {
        self.authenticate(Grant::Password { username: username.to_string(), password: password.to_string() })
            .await
    }

    /// Client credentials grant.
    pub async fn client_credentials_login(&self) -> Result<(), IamError> {
        self.authenticate(Grant::ClientCredentials).await
    }

    /// Authorization code grant.
    pub async fn code_login(&self, code: &str, redirect_uri: &str) -> Result<(), IamError> {
        self.authenticate(Grant::AuthorizationCode { code: code.to_string(), redirect_uri: redirect_uri.to_string() })
            .await
    }

    /// JWT-bearer grant with a caller-supplied assertion.
    pub async fn jwt_login(&self, assertion: &str) -> Result<(), IamError> {
        self.authenticate(Grant::JwtBearer { assertion: assertion.to_string() }).await
    }

    /// JWT-bearer grant with an assertion minted from the stored service identity.
    pub async fn service_login(&self) -> Result<(), IamError> {
        let identity = self
            .credentials
            .service_identity()
            .ok_or_else(|| IamError::InvalidServiceIdentity("no service identity configured".into()))?;
        let assertion = identity.assertion(&self.config.assertion_audience(), self.clock.now())?;
        self.authenticate(Grant::JwtBearer { assertion }).await
    }

    /// Returns a token valid for at least the safety margin, or `""` when none
    /// can be obtained.
    pub async fn current_token(&self) -> String {
        match self.valid_token().await {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "no valid access token");
                String::new()
            }
        }
    }

    /// Like [`current_token`](Self::current_token) but keeps the error.
    pub async fn valid_token(&self) -> Result<String, IamError> {
        let seen_generation = self.refresh_generation.load(Ordering::SeqCst);
        if let Some(token) = self.fresh_token().await? {
            return Ok(token);
        }

        let mut last_outcome = self.refresh_lock.lock().await;
        if self.refresh_generation.load(Ordering::SeqCst) != seen_generation {
            if let Some(outcome) = last_outcome.as_ref() {
                debug!("adopting result of concurrent refresh");
                return outcome.clone();
            }
        }
        // A grant may have landed while waiting.
        if let Some(token) = self.fresh_token().await? {
            return Ok(token);
        }
        let outcome = self.refresh_locked().await;
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        *last_outcome = Some(outcome.clone());
        outcome
    }

    /// Exchanges the stored refresh token for a new token state.
    pub async fn refresh(&self) -> Result<(), IamError> {
        let mut last_outcome = self.refresh_lock.lock().await;
        let outcome = self.refresh_locked().await;
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        *last_outcome = Some(outcome.clone());
        outcome.map(|_| ())
    }

    /// Pure check against the granted scopes.
    pub async fn has_scopes<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.inner.read().await.state.has_scopes(required)
    }

    /// Snapshot of the current token state.
    pub async fn token_state(&self) -> Arc<TokenState> {
        self.inner.read().await.state.clone()
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> SessionPhase {
        self.inner.read().await.phase
    }

    /// Whether an access token is held, regardless of its expiry.
    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.state.is_authenticated()
    }

    /// Expiry instant of the current access token.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.state.expires_at
    }

    /// OpenID Connect identity token, when the grant returned one.
    pub async fn id_token(&self) -> Option<String> {
        self.inner.read().await.state.id_token.clone()
    }

    /// Stored refresh token; empty when none was issued.
    pub async fn refresh_token(&self) -> String {
        self.inner.read().await.state.refresh_token.clone()
    }

    /// Revokes the access and refresh tokens, then forgets them.
    #[instrument(skip(self), level = "debug")]
    pub async fn revoke(&self) -> Result<(), IamError> {
        let state = self.token_state().await;
        if !state.is_authenticated() {
            return Err(IamError::NotAuthenticated);
        }
        self.flow
            .revoke(&self.http_client, &self.credentials, &state.access_token, "access_token")
            .await?;
        if !state.refresh_token.is_empty() {
            self.flow
                .revoke(&self.http_client, &self.credentials, &state.refresh_token, "refresh_token")
                .await?;
        }
        *self.inner.write().await = SessionInner::default();
        debug!("session revoked");
        Ok(())
    }

    /// `Some(token)` when the current token is outside the safety margin,
    /// `None` when a refresh is needed.
    async fn fresh_token(&self) -> Result<Option<String>, IamError> {
        let inner = self.inner.read().await;
        if inner.phase == SessionPhase::Exhausted {
            return Err(IamError::SessionExpired);
        }
        if !inner.state.is_authenticated() {
            return Err(IamError::NotAuthenticated);
        }
        if !inner.state.expires_within(self.clock.now(), self.config.safety_margin()) {
            return Ok(Some(inner.state.access_token.clone()));
        }
        Ok(None)
    }

    /// Performs one refresh. Callers hold `refresh_lock`.
    #[instrument(skip(self), level = "debug")]
    async fn refresh_locked(&self) -> Result<String, IamError> {
        let previous = {
            let mut inner = self.inner.write().await;
            if inner.phase == SessionPhase::Exhausted {
                return Err(IamError::SessionExpired);
            }
            inner.phase = SessionPhase::RefreshPending;
            inner.state.clone()
        };
        if previous.refresh_token.is_empty() {
            self.inner.write().await.phase = SessionPhase::RefreshFailed;
            warn!("refresh needed but no refresh token is held");
            return Err(IamError::NoRefreshToken);
        }

        let grant = Grant::RefreshToken { refresh_token: previous.refresh_token.clone() };
        let issued_at = self.clock.now();
        let issued = self
            .flow
            .execute(&self.http_client, &self.credentials, &grant)
            .await
            .and_then(|response| self.issue_state(response, issued_at, &previous.refresh_token));
        match issued {
            Ok(state) => {
                let token = state.access_token.clone();
                self.replace_state(state).await;
                debug!("session refreshed");
                Ok(token)
            }
            Err(err) => {
                // Later callers short-circuit with SessionExpired; this one sees the rejection.
                let phase = if err.is_invalid_grant() { SessionPhase::Exhausted } else { SessionPhase::RefreshFailed };
                self.inner.write().await.phase = phase;
                warn!(error = %err, phase = ?phase, "refresh failed");
                Err(err)
            }
        }
    }

    /// Builds the token state for a response, warning when the issued lifetime
    /// is inside the safety margin (every later token request then refreshes).
    fn issue_state(
        &self,
        response: TokenResponse,
        issued_at: DateTime<Utc>,
        previous_refresh: &str,
    ) -> Result<TokenState, IamError> {
        let lifetime = response.expires_in;
        let state = TokenState::from_response(response, issued_at, previous_refresh)?;
        if state.expires_within(issued_at, self.config.safety_margin()) {
            warn!(
                expires_in = lifetime,
                safety_margin_secs = self.config.safety_margin().num_seconds(),
                "issued token lifetime is within the safety margin"
            );
        }
        Ok(state)
    }

    async fn replace_state(&self, state: TokenState) {
        let phase = if state.is_authenticated() { SessionPhase::Authenticated } else { SessionPhase::Unauthenticated };
        let mut inner = self.inner.write().await;
        *inner = SessionInner { state: Arc::new(state), phase };
    }
}

#[cfg(feature = "transport")]
impl SessionManager<super::http_client::ReqwestHttpClient> {
    /// Session over a `reqwest` transport using the configured timeout.
    pub fn connect(config: IamConfig, credentials: Arc<Credentials>) -> Result<Self, IamError> {
        config.validate()?;
        let client = super::http_client::ReqwestHttpClient::new(config.request_timeout())
            .map_err(|e| IamError::Transport(e.to_string()))?;
        Ok(Self::new(config, credentials, client))
    }
}
