//! IAM core primitives: grants, token endpoint responses and token state.

use std::collections::BTreeSet;
use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use super::error::IamError;

/// Grant type used for the JWT-bearer assertion flow.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// OAuth2 grants the session manager can execute.
#[derive(Clone)]
pub enum Grant {
    /// Resource Owner Password Credentials grant.
    Password {
        /// Login name of the user.
        username: String,
        /// The user's password.
        password: String,
    },
    /// Client credentials grant, using only the client id/secret.
    ClientCredentials,
    /// JWT-bearer grant with a pre-signed assertion.
    JwtBearer {
        /// Signed JWT presented as the `assertion` form field.
        assertion: String,
    },
    /// Authorization code grant.
    AuthorizationCode {
        /// The authorization code received on the redirect.
        code: String,
        /// Redirect URI used when the code was requested.
        redirect_uri: String,
    },
    /// Refresh token grant. Only issued internally by the session manager.
    RefreshToken {
        /// The refresh token being exchanged.
        refresh_token: String,
    },
}

impl Grant {
    /// Value of the `grant_type` form field.
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::Password { .. } => "password",
            Grant::ClientCredentials => "client_credentials",
            Grant::JwtBearer { .. } => JWT_BEARER_GRANT,
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Form fields specific to this grant, excluding `grant_type` and `scope`.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Grant::Password { username, password } => vec![
                ("username", username.clone()),
                ("password", password.clone()),
            ],
            Grant::ClientCredentials => Vec::new(),
            Grant::JwtBearer { assertion } => vec![("assertion", assertion.clone())],
            Grant::AuthorizationCode { code, redirect_uri } => vec![
                ("code", code.clone()),
                ("redirect_uri", redirect_uri.clone()),
            ],
            Grant::RefreshToken { refresh_token } => vec![("refresh_token", refresh_token.clone())],
        }
    }
}

// Grants carry passwords and tokens; only the kind is printed.
impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grant").field("grant_type", &self.grant_type()).finish()
    }
}

/// JSON body returned by the token endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token.
    #[serde(default)]
    pub access_token: String,
    /// Refresh token, absent for grants that do not issue one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OpenID Connect identity token.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: i64,
    /// Usually `Bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Error body returned by the token endpoint on rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthErrorResponse {
    /// OAuth2 error code such as `invalid_grant`.
    #[serde(default)]
    pub error: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Current tokens held by a session. Replaced as a whole, never field by field.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    /// Current bearer token; empty means not authenticated.
    pub access_token: String,
    /// Token used to obtain a new access token; may be empty.
    pub refresh_token: String,
    /// Optional OpenID Connect identity token.
    pub id_token: Option<String>,
    /// Token type reported by the server.
    pub token_type: String,
    /// Scopes granted to the access token.
    pub granted_scopes: BTreeSet<String>,
    /// Absolute expiry instant, meaningful whenever `access_token` is set.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    /// Builds the state from a token response issued at `issued_at`.
    ///
    /// `previous_refresh` is kept when the response does not rotate the refresh token.
    /// Fails with `MalformedTokenResponse` when `expires_in` does not yield a
    /// representable instant.
    pub fn from_response(
        response: TokenResponse,
        issued_at: DateTime<Utc>,
        previous_refresh: &str,
    ) -> Result<Self, IamError> {
        let expires_at = TimeDelta::try_seconds(response.expires_in.max(0))
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                IamError::MalformedTokenResponse(format!("expires_in out of range: {}", response.expires_in))
            })?;
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| previous_refresh.to_string());
        Ok(TokenState {
            access_token: response.access_token,
            refresh_token,
            id_token: response.id_token.filter(|t| !t.is_empty()),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            granted_scopes: parse_scopes(response.scope.as_deref().unwrap_or_default()),
            expires_at: Some(expires_at),
        })
    }

    /// Whether an access token is held.
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Whether the token needs refreshing at `now` given the safety margin.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(at) => at - now < margin,
            None => true,
        }
    }

    /// True when every scope in `required` was granted.
    pub fn has_scopes<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|s| self.granted_scopes.contains(s.as_ref()))
    }
}

impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenState")
            .field("authenticated", &self.is_authenticated())
            .field("has_refresh_token", &!self.refresh_token.is_empty())
            .field("has_id_token", &self.id_token.is_some())
            .field("token_type", &self.token_type)
            .field("granted_scopes", &self.granted_scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No grant has succeeded yet.
    Unauthenticated,
    /// A grant call is in flight.
    Authenticating,
    /// A valid token is held.
    Authenticated,
    /// A refresh call is in flight.
    RefreshPending,
    /// The last refresh failed; the next token request retries.
    RefreshFailed,
    /// The refresh token was refused; only a new grant recovers the session.
    Exhausted,
}

/// Splits a space-separated scope string into a set.
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn issued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn state_from_response_computes_expiry_and_scopes() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"T1","refresh_token":"R1","expires_in":1800,"token_type":"Bearer","scope":"mail tenant ?.?.dsc.service.readAny"}"#,
        )
        .unwrap();
        let state = TokenState::from_response(response, issued(), "").unwrap();
        assert_eq!(state.access_token, "T1");
        assert_eq!(state.refresh_token, "R1");
        assert_eq!(state.expires_at, Some(issued() + Duration::seconds(1800)));
        assert!(state.has_scopes(&["mail", "tenant"]));
        assert!(!state.has_scopes(&["mail", "openid"]));
        assert!(state.has_scopes::<&str>(&[]));
    }

    #[test]
    fn missing_refresh_token_keeps_previous() {
        let response = TokenResponse { access_token: "T2".into(), expires_in: 60, ..Default::default() };
        let state = TokenState::from_response(response, issued(), "R1").unwrap();
        assert_eq!(state.refresh_token, "R1");
        assert_eq!(state.token_type, "Bearer");
    }

    #[test]
    fn expiry_margin() {
        let response = TokenResponse { access_token: "T".into(), expires_in: 1800, ..Default::default() };
        let state = TokenState::from_response(response, issued(), "").unwrap();
        let margin = Duration::seconds(60);
        assert!(!state.expires_within(issued() + Duration::seconds(1739), margin));
        assert!(state.expires_within(issued() + Duration::seconds(1741), margin));
        assert!(TokenState::default().expires_within(issued(), margin));
    }

    #[test]
    fn out_of_range_lifetime_is_malformed() {
        for expires_in in [9_000_000_000_000_000, i64::MAX] {
            let response = TokenResponse { access_token: "T".into(), expires_in, ..Default::default() };
            let err = TokenState::from_response(response, issued(), "").unwrap_err();
            assert!(matches!(err, IamError::MalformedTokenResponse(_)));
        }
        let response = TokenResponse { access_token: "T".into(), expires_in: -5, ..Default::default() };
        let state = TokenState::from_response(response, issued(), "").unwrap();
        assert_eq!(state.expires_at, Some(issued()));
    }

    #[test]
    fn grant_debug_hides_secrets() {
        let grant = Grant::Password { username: "jane".into(), password: "hunter2".into() };
        let printed = format!("{grant:?}");
        assert!(printed.contains("password"));
        assert!(!printed.contains("hunter2"));
        assert_eq!(Grant::JwtBearer { assertion: "a".into() }.grant_type(), JWT_BEARER_GRANT);
    }
}
