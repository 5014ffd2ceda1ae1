//! HSDP API request signing.
//!
//! A signed request carries two headers:
//!
//! - `SignedDate`: the signing instant, RFC 3339 UTC with second precision.
//! - `hsdp-api-signature`:
//!   `HmacSHA256;Credential:<shared key>;SignedHeaders:<parts>;Signature:<signature>`
//!
//! The signature is `base64(HMAC-SHA256("DHPWS" + secret key, base64(seed)))`
//! where the seed concatenates the optional signed parts (method, path, query,
//! body, selected header values, in that order) followed by the signed date.
//! With no optional parts the seed is the signed date alone, which is what the
//! HSDP gateways verify by default.

use std::sync::Arc;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tracing::{debug, instrument};
use super::credentials::Credentials;
use super::crypto::{hmac_sign, hmac_verify};
use super::error::IamError;
use super::http_client::HttpRequest;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "hsdp-api-signature";
/// Header carrying the signing date.
pub const SIGNED_DATE_HEADER: &str = "SignedDate";

const SIGNING_PREFIX: &str = "DHPWS";
const ALGORITHM: &str = "HmacSHA256";

/// Optional request parts covered by the signature in addition to the date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedPart {
    Method,
    Path,
    Query,
    Body,
    /// Value of the named header, empty when absent.
    Header(String),
}

impl SignedPart {
    fn name(&self) -> &str {
        match self {
            SignedPart::Method => "method",
            SignedPart::Path => "path",
            SignedPart::Query => "param",
            SignedPart::Body => "body",
            SignedPart::Header(name) => name,
        }
    }
}

/// Stateless signer over a credential set.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Arc<Credentials>,
    parts: Vec<SignedPart>,
}

impl RequestSigner {
    /// Signer covering only the signed date.
    pub fn new(credentials: Arc<Credentials>) -> Self {
        RequestSigner { credentials, parts: Vec::new() }
    }

    /// Adds request parts to the signature. Order of insertion does not matter.
    pub fn with_parts(mut self, parts: impl IntoIterator<Item = SignedPart>) -> Self {
        for part in parts {
            if !self.parts.contains(&part) {
                self.parts.push(part);
            }
        }
        self.parts.sort_by_key(|p| match p {
            SignedPart::Method => 0,
            SignedPart::Path => 1,
            SignedPart::Query => 2,
            SignedPart::Body => 3,
            SignedPart::Header(_) => 4,
        });
        self
    }

    /// Whether a key pair is available.
    pub fn is_enabled(&self) -> bool {
        self.credentials.signing_keys().is_some()
    }

    /// Adds the signature headers to `request`, signed as of `now`.
    #[instrument(skip_all, fields(method = %request.method, path = request.path()), level = "debug")]
    pub fn sign(&self, mut request: HttpRequest, now: DateTime<Utc>) -> Result<HttpRequest, IamError> {
        let (shared_key, secret_key) = self.credentials.signing_keys().ok_or(IamError::NoSigningKeyConfigured)?;
        let signed_date = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let seed = self.canonical_seed(&request, &signed_date);
        let signature = STANDARD.encode(hmac_sign(&signing_key(secret_key), STANDARD.encode(&seed).as_bytes()));
        let value = format!(
            "{ALGORITHM};Credential:{shared_key};SignedHeaders:{};Signature:{signature}",
            self.signed_headers()
        );
        request.set_header(SIGNED_DATE_HEADER, signed_date);
        request.set_header(SIGNATURE_HEADER, value);
        debug!("request signed");
        Ok(request)
    }

    /// Checks the signature headers of `request` against this signer's keys.
    ///
    /// Requests dated more than `max_skew` away from `now` are refused.
    pub fn validate(&self, request: &HttpRequest, now: DateTime<Utc>, max_skew: Duration) -> Result<(), IamError> {
        let (shared_key, secret_key) = self.credentials.signing_keys().ok_or(IamError::NoSigningKeyConfigured)?;
        let header = request.header(SIGNATURE_HEADER).ok_or(IamError::InvalidSignature)?;
        let signed_date = request.header(SIGNED_DATE_HEADER).ok_or(IamError::InvalidSignature)?;
        let parsed = ParsedSignature::parse(header).ok_or(IamError::InvalidSignature)?;
        if parsed.credential != shared_key || parsed.signed_headers != self.signed_headers() {
            return Err(IamError::InvalidSignature);
        }
        let date = DateTime::parse_from_rfc3339(signed_date)
            .map_err(|_| IamError::InvalidSignature)?
            .with_timezone(&Utc);
        if (now - date).abs() > max_skew {
            return Err(IamError::SignatureExpired);
        }
        let tag = STANDARD.decode(parsed.signature).map_err(|_| IamError::InvalidSignature)?;
        let seed = self.canonical_seed(request, signed_date);
        if hmac_verify(&signing_key(secret_key), STANDARD.encode(&seed).as_bytes(), &tag) {
            Ok(())
        } else {
            Err(IamError::InvalidSignature)
        }
    }

    fn signed_headers(&self) -> String {
        self.parts
            .iter()
            .map(SignedPart::name)
            .chain(std::iter::once(SIGNED_DATE_HEADER))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn canonical_seed(&self, request: &HttpRequest, signed_date: &str) -> Vec<u8> {
        let mut seed = Vec::new();
        for part in &self.parts {
            match part {
                SignedPart::Method => seed.extend_from_slice(request.method.as_str().as_bytes()),
                SignedPart::Path => seed.extend_from_slice(request.path().as_bytes()),
                SignedPart::Query => seed.extend_from_slice(request.query().as_bytes()),
                SignedPart::Body => seed.extend_from_slice(request.body.as_deref().unwrap_or_default()),
                SignedPart::Header(name) => {
                    seed.extend_from_slice(request.header(name).unwrap_or_default().as_bytes())
                }
            }
        }
        seed.extend_from_slice(signed_date.as_bytes());
        seed
    }
}

fn signing_key(secret_key: &str) -> Vec<u8> {
    format!("{SIGNING_PREFIX}{secret_key}").into_bytes()
}

struct ParsedSignature<'a> {
    credential: &'a str,
    signed_headers: &'a str,
    signature: &'a str,
}

impl<'a> ParsedSignature<'a> {
    fn parse(header: &'a str) -> Option<Self> {
        let mut fields = header.split(';');
        if fields.next()? != ALGORITHM {
            return None;
        }
        let credential = fields.next()?.strip_prefix("Credential:")?;
        let signed_headers = fields.next()?.strip_prefix("SignedHeaders:")?;
        let signature = fields.next()?.strip_prefix("Signature:")?;
        Some(ParsedSignature { credential, signed_headers, signature })
    }
}
