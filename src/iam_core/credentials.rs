//! Static credentials used to obtain tokens and sign requests.

use std::sync::Arc;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;
use super::error::IamError;

/// Lifetime of a minted service assertion.
const ASSERTION_LIFETIME_MINUTES: i64 = 60;

/// Immutable credential set for one session manager.
///
/// A different set of credentials needs a new `SessionManager`.
#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
    shared_key: Option<String>,
    secret_key: Option<String>,
    scopes: Vec<String>,
    service_identity: Option<ServiceIdentity>,
}

impl Credentials {
    /// Starts a builder for the given OAuth2 client.
    pub fn builder(client_id: impl Into<String>, client_secret: impl Into<String>) -> CredentialsBuilder {
        CredentialsBuilder {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            shared_key: None,
            secret_key: None,
            scopes: Vec::new(),
            service_identity: None,
        }
    }

    /// OAuth2 client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// OAuth2 client secret.
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// The shared/secret key pair, when both halves are present.
    pub fn signing_keys(&self) -> Option<(&str, &str)> {
        match (&self.shared_key, &self.secret_key) {
            (Some(shared), Some(secret)) => Some((shared.as_str(), secret.as_str())),
            _ => None,
        }
    }

    /// Requested scopes; empty means server default.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Service identity for the JWT-bearer grant.
    pub fn service_identity(&self) -> Option<&ServiceIdentity> {
        self.service_identity.as_ref()
    }

    /// `Authorization` header value for HTTP Basic client authentication.
    pub fn basic_auth(&self) -> String {
        let creds = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", STANDARD.encode(creds.as_bytes()))
    }

    /// Wraps the credentials for sharing between components.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("shared_key", &self.shared_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("scopes", &self.scopes)
            .field("service_identity", &self.service_identity)
            .finish()
    }
}

/// Builder for [`Credentials`].
pub struct CredentialsBuilder {
    client_id: String,
    client_secret: String,
    shared_key: Option<String>,
    secret_key: Option<String>,
    scopes: Vec<String>,
    service_identity: Option<ServiceIdentity>,
}

impl CredentialsBuilder {
    /// Sets the HMAC key pair used for signed requests.
    pub fn signing_keys(mut self, shared_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.shared_key = Some(shared_key.into()).filter(|k| !k.is_empty());
        self.secret_key = Some(secret_key.into()).filter(|k| !k.is_empty());
        self
    }

    /// Adds requested scopes, keeping the first occurrence of duplicates.
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for scope in scopes {
            let scope = scope.into();
            if !scope.is_empty() && !self.scopes.contains(&scope) {
                self.scopes.push(scope);
            }
        }
        self
    }

    /// Sets the service identity for the JWT-bearer grant.
    pub fn service_identity(mut self, identity: ServiceIdentity) -> Self {
        self.service_identity = Some(identity);
        self
    }

    /// Finishes the credential set.
    pub fn build(self) -> Result<Credentials, IamError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(IamError::Config("client id and client secret are required".into()));
        }
        Ok(Credentials {
            client_id: self.client_id,
            client_secret: self.client_secret,
            shared_key: self.shared_key,
            secret_key: self.secret_key,
            scopes: self.scopes,
            service_identity: self.service_identity,
        })
    }
}

/// An IAM service identity able to mint JWT-bearer assertions.
#[derive(Clone)]
pub struct ServiceIdentity {
    /// Service id, used as issuer and subject of the assertion.
    pub service_id: String,
    /// PEM encoded RSA private key.
    pub private_key_pem: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

impl ServiceIdentity {
    /// Creates an identity from a service id and its PEM private key.
    pub fn new(service_id: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        ServiceIdentity {
            service_id: service_id.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    /// Mints an RS256 assertion for `audience`, valid for one hour from `now`.
    pub fn assertion(&self, audience: &str, now: DateTime<Utc>) -> Result<String, IamError> {
        if self.service_id.is_empty() {
            return Err(IamError::InvalidServiceIdentity("missing service id".into()));
        }
        let key = EncodingKey::from_rsa_pem(self.private_key_pem.as_bytes())
            .map_err(|e| IamError::InvalidServiceIdentity(e.to_string()))?;
        let claims = AssertionClaims {
            iss: &self.service_id,
            sub: &self.service_id,
            aud: audience,
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ASSERTION_LIFETIME_MINUTES)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| IamError::InvalidServiceIdentity(e.to_string()))
    }
}

impl std::fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceIdentity")
            .field("service_id", &self.service_id)
            .finish_non_exhaustive()
    }
}
