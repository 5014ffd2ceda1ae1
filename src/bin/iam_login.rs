//! Logs in with client credentials against `HSDP_IAM_URL` and reports the token lifetime.
//!
//! Reads `HSDP_IAM_CLIENT_ID` and `HSDP_IAM_CLIENT_SECRET`; `HSDP_IAM_SCOPES` is optional.

use std::sync::Arc;
use hsdp_iam::{Credentials, IamConfig, IamError, SessionManager};

fn env(key: &str) -> Result<String, IamError> {
    std::env::var(key).map_err(|_| IamError::Config(format!("{key} is not set")))
}

#[tokio::main]
async fn main() -> Result<(), IamError> {
    let config = IamConfig::from_env()?;
    let scopes = std::env::var("HSDP_IAM_SCOPES").unwrap_or_default();
    let credentials = Credentials::builder(env("HSDP_IAM_CLIENT_ID")?, env("HSDP_IAM_CLIENT_SECRET")?)
        .scopes(scopes.split_whitespace())
        .build()?;

    let session = SessionManager::connect(config, Arc::new(credentials))?;
    session.client_credentials_login().await?;

    let state = session.token_state().await;
    println!("authenticated, token expires at {:?}", state.expires_at);
    println!("granted scopes: {:?}", state.granted_scopes);
    Ok(())
}
