//! Error kinds shared by every part of the IAM session core.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`GrantRejected`](IamError::GrantRejected) | `grant_rejected` | No |
//! | [`MalformedTokenResponse`](IamError::MalformedTokenResponse) | `malformed_token_response` | No |
//! | [`NoRefreshToken`](IamError::NoRefreshToken) | `no_refresh_token` | No |
//! | [`NoSigningKeyConfigured`](IamError::NoSigningKeyConfigured) | `no_signing_key` | No |
//! | [`IntrospectionFailed`](IamError::IntrospectionFailed) | `introspection_failed` | Yes |
//! | [`Transport`](IamError::Transport) | `transport_error` | Yes |
//!
//! The enum is `Clone` so that the outcome of a single refresh can be handed to
//! every caller that waited on it.

use thiserror::Error;

/// Errors raised by the session manager, signer, permission evaluator and
/// request builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IamError {
    /// The token endpoint answered a grant or refresh with a non-success status.
    #[error("grant rejected with status {status}{}", .error.as_deref().map(|e| format!(" ({e})")).unwrap_or_default())]
    GrantRejected {
        /// HTTP status returned by the token endpoint.
        status: u16,
        /// OAuth2 `error` code from the response body, when present.
        error: Option<String>,
    },

    /// Success status, but no usable access token in the body.
    #[error("malformed token response: {0}")]
    MalformedTokenResponse(String),

    /// A refresh was requested while no refresh token is held.
    #[error("no refresh token available, authenticate again")]
    NoRefreshToken,

    /// Signing requested without a shared/secret key pair.
    #[error("no signing key pair configured")]
    NoSigningKeyConfigured,

    /// Network or decode failure while introspecting the current token.
    #[error("introspection failed: {0}")]
    IntrospectionFailed(String),

    /// No grant has completed on this session yet.
    #[error("session is not authenticated")]
    NotAuthenticated,

    /// The refresh token was rejected as invalid; a new grant is required.
    #[error("session expired, refresh token is no longer valid")]
    SessionExpired,

    /// The underlying HTTP transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A signed request did not carry a valid signature.
    #[error("invalid request signature")]
    InvalidSignature,

    /// A signed request's date is outside the accepted window.
    #[error("request signature expired")]
    SignatureExpired,

    /// The service identity could not produce a JWT assertion.
    #[error("invalid service identity: {0}")]
    InvalidServiceIdentity(String),

    /// Configuration rejected during validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Resource services: the server answered 401.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource services: the server answered 403.
    #[error("forbidden")]
    Forbidden,

    /// Resource services: the server answered 404.
    #[error("resource not found")]
    NotFound,

    /// Resource services: any other non-success status.
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
}

impl IamError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            IamError::GrantRejected { .. } => "grant_rejected",
            IamError::MalformedTokenResponse(_) => "malformed_token_response",
            IamError::NoRefreshToken => "no_refresh_token",
            IamError::NoSigningKeyConfigured => "no_signing_key",
            IamError::IntrospectionFailed(_) => "introspection_failed",
            IamError::NotAuthenticated => "not_authenticated",
            IamError::SessionExpired => "session_expired",
            IamError::Transport(_) => "transport_error",
            IamError::InvalidSignature => "invalid_signature",
            IamError::SignatureExpired => "signature_expired",
            IamError::InvalidServiceIdentity(_) => "invalid_service_identity",
            IamError::Config(_) => "invalid_config",
            IamError::Unauthorized => "unauthorized",
            IamError::Forbidden => "forbidden",
            IamError::NotFound => "not_found",
            IamError::UnexpectedStatus(_) => "unexpected_status",
        }
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            IamError::Transport(_) | IamError::IntrospectionFailed(_) => true,
            IamError::UnexpectedStatus(status) => *status >= 500,
            _ => false,
        }
    }

    /// True when the refresh token itself was refused with `invalid_grant`.
    pub(crate) fn is_invalid_grant(&self) -> bool {
        matches!(
            self,
            IamError::GrantRejected { status: 400 | 401, error: Some(code) } if code == "invalid_grant"
        )
    }

    /// Maps a resource-service response status to an error, `None` on 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 => Some(IamError::Unauthorized),
            403 => Some(IamError::Forbidden),
            404 => Some(IamError::NotFound),
            other => Some(IamError::UnexpectedStatus(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_rejected_display_includes_oauth_code() {
        let err = IamError::GrantRejected { status: 400, error: Some("invalid_grant".into()) };
        assert_eq!(err.to_string(), "grant rejected with status 400 (invalid_grant)");
        let err = IamError::GrantRejected { status: 500, error: None };
        assert_eq!(err.to_string(), "grant rejected with status 500");
    }

    #[test]
    fn invalid_grant_detection() {
        assert!(IamError::GrantRejected { status: 400, error: Some("invalid_grant".into()) }.is_invalid_grant());
        assert!(!IamError::GrantRejected { status: 400, error: Some("invalid_client".into()) }.is_invalid_grant());
        assert!(!IamError::GrantRejected { status: 503, error: None }.is_invalid_grant());
        assert!(!IamError::NoRefreshToken.is_invalid_grant());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(IamError::from_status(204), None);
        assert_eq!(IamError::from_status(401), Some(IamError::Unauthorized));
        assert_eq!(IamError::from_status(403), Some(IamError::Forbidden));
        assert_eq!(IamError::from_status(404), Some(IamError::NotFound));
        assert_eq!(IamError::from_status(502), Some(IamError::UnexpectedStatus(502)));
        assert!(IamError::UnexpectedStatus(502).is_recoverable());
        assert!(!IamError::UnexpectedStatus(409).is_recoverable());
        assert!(!IamError::NoSigningKeyConfigured.is_recoverable());
    }
}
