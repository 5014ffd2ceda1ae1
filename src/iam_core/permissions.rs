//! Token introspection and organization permission checks.
//!
//! Every check introspects the current token again; snapshots are never cached
//! because permissions can change server-side at any time. Failures deny.

use std::sync::Arc;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use super::error::IamError;
use super::grant_helpers::{decode_json, form_request};
use super::http_client::IamHttpClient;
use super::session::SessionManager;
use super::types::parse_scopes;

/// One organization entry of an introspection response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationPermissions {
    pub organization_id: String,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub effective_permissions: Vec<String>,
}

impl OrganizationPermissions {
    /// Exact, case-sensitive, order-independent match. Empty `required` is true.
    pub fn has_permissions<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|p| self.permissions.iter().any(|have| have == p.as_ref()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organizations {
    #[serde(default)]
    pub managing_organization: Option<String>,
    #[serde(default)]
    pub organization_list: Vec<OrganizationPermissions>,
}

/// Typed introspection response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PermissionSnapshot {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub identity_type: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub organizations: Organizations,
}

impl PermissionSnapshot {
    /// Entry for `organization_id`, if the token has one.
    pub fn organization(&self, organization_id: &str) -> Option<&OrganizationPermissions> {
        self.organizations
            .organization_list
            .iter()
            .find(|o| o.organization_id == organization_id)
    }

    pub fn managing_organization(&self) -> Option<&str> {
        self.organizations.managing_organization.as_deref()
    }

    /// False when the token is inactive or the organization is absent.
    pub fn has_permissions<S: AsRef<str>>(&self, organization_id: &str, required: &[S]) -> bool {
        self.active
            && self
                .organization(organization_id)
                .is_some_and(|org| org.has_permissions(required))
    }

    /// Scope check against the introspected scope string.
    pub fn has_scopes<S: AsRef<str>>(&self, required: &[S]) -> bool {
        let granted = parse_scopes(self.scope.as_deref().unwrap_or_default());
        self.active && required.iter().all(|s| granted.contains(s.as_ref()))
    }
}

/// Answers permission questions for the session's current token.
pub struct PermissionEvaluator<C: IamHttpClient> {
    session: Arc<SessionManager<C>>,
}

impl<C: IamHttpClient> PermissionEvaluator<C> {
    pub fn new(session: Arc<SessionManager<C>>) -> Self {
        PermissionEvaluator { session }
    }

    /// Introspects the current token.
    #[instrument(skip(self), level = "debug")]
    pub async fn introspect(&self) -> Result<PermissionSnapshot, IamError> {
        let token = self
            .session
            .valid_token()
            .await
            .map_err(|e| IamError::IntrospectionFailed(e.to_string()))?;
        let config = self.session.config();
        let request = form_request(
            &config.introspect_url(),
            &config.introspect_api_version,
            self.session.credentials(),
            &[("token", token.as_str())],
        );
        let resp = self
            .session
            .http_client()
            .execute(request)
            .await
            .map_err(|e| IamError::IntrospectionFailed(e.to_string()))?;
        if resp.status != 200 {
            return Err(IamError::IntrospectionFailed(format!("introspect returned status {}", resp.status)));
        }
        let snapshot: PermissionSnapshot =
            decode_json(&resp).map_err(|e| IamError::IntrospectionFailed(e.to_string()))?;
        debug!(active = snapshot.active, organizations = snapshot.organizations.organization_list.len(), "introspected");
        Ok(snapshot)
    }

    /// Like [`has_permissions`](Self::has_permissions), keeping the introspection error.
    pub async fn check_permissions<S: AsRef<str>>(
        &self,
        organization_id: &str,
        permissions: &[S],
    ) -> Result<bool, IamError> {
        let snapshot = self.introspect().await?;
        Ok(snapshot.has_permissions(organization_id, permissions))
    }

    /// True only when the current session holds every permission in the organization.
    ///
    /// Introspection failures deny.
    pub async fn has_permissions<S: AsRef<str>>(&self, organization_id: &str, permissions: &[S]) -> bool {
        match self.check_permissions(organization_id, permissions).await {
            Ok(allowed) => allowed,
            Err(err) => {
                warn!(organization_id, error = %err, "permission check denied, introspection failed");
                false
            }
        }
    }

    /// Scope check against a fresh introspection. Failures deny.
    pub async fn has_scopes_active<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        match self.introspect().await {
            Ok(snapshot) => snapshot.has_scopes(scopes),
            Err(err) => {
                warn!(error = %err, "scope check denied, introspection failed");
                false
            }
        }
    }
}
