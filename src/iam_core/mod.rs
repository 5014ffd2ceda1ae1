//! HSDP IAM session core.
//!
//! Credentials, token state, grant execution, single-flight refresh, request
//! signing, introspection-based permission checks and the request builder used
//! by resource services.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod grant_helpers;
pub mod http_client;
pub mod permissions;
pub mod request;
pub mod session;
pub mod signer;
pub mod types;
