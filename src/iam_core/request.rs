//! Boundary used by resource services: authorized request preparation and
//! status interpretation.

use std::sync::Arc;
use tracing::{debug, instrument};
use super::error::IamError;
use super::http_client::{HttpMethod, HttpRequest, HttpResponse, IamHttpClient};
use super::permissions::PermissionEvaluator;
use super::session::SessionManager;
use super::signer::RequestSigner;

/// Authorization a resource endpoint requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Bearer,
    Signed,
    BearerAndSigned,
}

impl AuthMode {
    fn bearer(self) -> bool {
        matches!(self, AuthMode::Bearer | AuthMode::BearerAndSigned)
    }

    fn signed(self) -> bool {
        matches!(self, AuthMode::Signed | AuthMode::BearerAndSigned)
    }
}

/// Attaches bearer tokens and signatures to outbound requests.
pub struct RequestBuilder<C: IamHttpClient> {
    session: Arc<SessionManager<C>>,
    signer: RequestSigner,
    permissions: PermissionEvaluator<C>,
}

impl<C: IamHttpClient> RequestBuilder<C> {
    /// Builder over `session`, signing with the session's credentials.
    pub fn new(session: Arc<SessionManager<C>>) -> Self {
        let signer = RequestSigner::new(session.credentials().clone());
        let permissions = PermissionEvaluator::new(session.clone());
        RequestBuilder { session, signer, permissions }
    }

    /// Replaces the signer, e.g. to sign extra request parts.
    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = signer;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager<C>> {
        &self.session
    }

    /// Sets `Authorization: Bearer <token>` with a token valid past the safety margin.
    pub async fn attach_bearer_auth(&self, mut request: HttpRequest) -> Result<HttpRequest, IamError> {
        let token = self.session.valid_token().await?;
        request.set_header("Authorization", format!("Bearer {token}"));
        Ok(request)
    }

    /// Adds the signature headers, dated by the session's clock.
    pub fn attach_signature(&self, request: HttpRequest) -> Result<HttpRequest, IamError> {
        self.signer.sign(request, self.session.now())
    }

    /// Whether the session's granted scopes include all of `scopes`.
    pub async fn has_scopes<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        self.session.has_scopes(scopes).await
    }

    /// Fail-closed organization permission check.
    pub async fn has_permissions<S: AsRef<str>>(&self, organization_id: &str, permissions: &[S]) -> bool {
        self.permissions.has_permissions(organization_id, permissions).await
    }

    pub fn permissions(&self) -> &PermissionEvaluator<C> {
        &self.permissions
    }

    /// Creates a JSON request to `url` with the requested authorization attached.
    ///
    /// Bearer auth is attached before signing so a signature over headers covers it.
    pub async fn prepare(
        &self,
        method: HttpMethod,
        url: &str,
        api_version: &str,
        auth: AuthMode,
    ) -> Result<HttpRequest, IamError> {
        let mut request = HttpRequest::new(method, url)
            .with_header("Accept", "application/json")
            .with_header("Content-Type", "application/json")
            .with_header("Api-Version", api_version);
        if auth.bearer() {
            request = self.attach_bearer_auth(request).await?;
        }
        if auth.signed() {
            request = self.attach_signature(request)?;
        }
        Ok(request)
    }

    /// Sends `request`, mapping 401/403/404 and other failures to errors.
    #[instrument(skip_all, fields(method = %request.method, path = request.path()), level = "debug")]
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, IamError> {
        let resp = self
            .session
            .http_client()
            .execute(request)
            .await
            .map_err(|e| IamError::Transport(e.to_string()))?;
        debug!(status = resp.status, "response received");
        match IamError::from_status(resp.status) {
            None => Ok(resp),
            Some(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam_core::clock::ManualClock;
    use crate::iam_core::config::IamConfig;
    use crate::iam_core::credentials::Credentials;
    use crate::iam_core::http_client::InMemoryHttpClient;
    use crate::iam_core::signer::{SIGNATURE_HEADER, SIGNED_DATE_HEADER};
    use crate::iam_core::types::TokenState;
    use chrono::{Duration, TimeZone, Utc};

    async fn builder(signing: bool) -> (RequestBuilder<InMemoryHttpClient>, InMemoryHttpClient) {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut creds = Credentials::builder("client", "secret");
        if signing {
            creds = creds.signing_keys("shared", "secret-key");
        }
        let client = InMemoryHttpClient::new();
        let state = TokenState {
            access_token: "T1".into(),
            expires_at: Some(start + Duration::hours(1)),
            ..Default::default()
        };
        let session = SessionManager::new(IamConfig::new("https://iam.test"), Arc::new(creds.build().unwrap()), client.clone())
            .with_clock(Arc::new(ManualClock::new(start)))
            .with_token_state(state)
            .await;
        (RequestBuilder::new(Arc::new(session)), client)
    }

    #[tokio::test]
    async fn prepare_attaches_requested_auth() {
        let (builder, _) = builder(true).await;
        let req = builder
            .prepare(HttpMethod::GET, "https://iam.test/authorize/identity/Group", "1", AuthMode::BearerAndSigned)
            .await
            .unwrap();
        assert_eq!(req.header("Authorization"), Some("Bearer T1"));
        assert_eq!(req.header("Api-Version"), Some("1"));
        assert_eq!(req.header(SIGNED_DATE_HEADER), Some("2024-03-01T08:00:00Z"));
        assert!(req.header(SIGNATURE_HEADER).is_some());

        let req = builder
            .prepare(HttpMethod::GET, "https://iam.test/x", "1", AuthMode::None)
            .await
            .unwrap();
        assert!(req.header("Authorization").is_none());
        assert!(req.header(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn signing_without_keys_fails() {
        let (builder, _) = builder(false).await;
        let err = builder
            .prepare(HttpMethod::POST, "https://iam.test/x", "1", AuthMode::Signed)
            .await
            .unwrap_err();
        assert_eq!(err, IamError::NoSigningKeyConfigured);
    }

    #[tokio::test]
    async fn send_maps_statuses() {
        let (builder, client) = builder(false).await;
        client.insert_response("https://iam.test/ok", HttpResponse::empty(201));
        client.insert_response("https://iam.test/missing", HttpResponse::empty(404));
        client.insert_response("https://iam.test/denied", HttpResponse::empty(403));

        let ok = builder.send(HttpRequest::new(HttpMethod::POST, "https://iam.test/ok")).await.unwrap();
        assert_eq!(ok.status, 201);
        let err = builder.send(HttpRequest::new(HttpMethod::GET, "https://iam.test/missing")).await.unwrap_err();
        assert_eq!(err, IamError::NotFound);
        let err = builder.send(HttpRequest::new(HttpMethod::GET, "https://iam.test/denied")).await.unwrap_err();
        assert_eq!(err, IamError::Forbidden);
        let err = builder.send(HttpRequest::new(HttpMethod::GET, "https://iam.test/unrouted")).await.unwrap_err();
        assert!(matches!(err, IamError::Transport(_)));
    }
}
