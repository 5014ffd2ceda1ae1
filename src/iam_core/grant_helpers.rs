use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use super::credentials::Credentials;
use super::error::IamError;
use super::http_client::{HttpMethod, HttpRequest, HttpResponse, IamHttpClient};
use super::types::{Grant, OAuthErrorResponse, TokenResponse};

/// application/x-www-form-urlencoded keeps unreserved characters as-is.
const FORM_URLENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encodes key/value pairs as an `application/x-www-form-urlencoded` body.
pub fn encode_form<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Vec<u8> {
    pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                percent_encode(k.as_ref().as_bytes(), FORM_URLENCODE_SET),
                percent_encode(v.as_ref().as_bytes(), FORM_URLENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
        .into_bytes()
}

/// Builds a form POST authenticated with the client's Basic credentials.
pub fn form_request<K: AsRef<str>, V: AsRef<str>>(
    url: &str,
    api_version: &str,
    credentials: &Credentials,
    form: &[(K, V)],
) -> HttpRequest {
    HttpRequest::new(HttpMethod::POST, url)
        .with_header("Content-Type", "application/x-www-form-urlencoded")
        .with_header("Accept", "application/json")
        .with_header("Api-Version", api_version)
        .with_header("Authorization", credentials.basic_auth())
        .with_body(encode_form(form))
}

/// Decodes a JSON body.
pub fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, serde_json::Error> {
    serde_json::from_slice(&response.body)
}

/// Calls to the OAuth2 token and revoke endpoints.
#[derive(Debug, Clone)]
pub struct TokenFlow {
    token_url: String,
    revoke_url: String,
    api_version: String,
}

impl TokenFlow {
    /// Constructs a token flow helper for the given endpoints.
    pub fn new(token_url: impl Into<String>, revoke_url: impl Into<String>, api_version: impl Into<String>) -> Self {
        TokenFlow {
            token_url: token_url.into(),
            revoke_url: revoke_url.into(),
            api_version: api_version.into(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Form body for `grant`, including requested scopes except on refresh.
    pub fn grant_form(&self, credentials: &Credentials, grant: &Grant) -> Vec<(&'static str, String)> {
        let mut form = vec![("grant_type", grant.grant_type().to_string())];
        form.extend(grant.form_fields());
        if !matches!(grant, Grant::RefreshToken { .. }) && !credentials.scopes().is_empty() {
            form.push(("scope", credentials.scopes().join(" ")));
        }
        form
    }

    /// Executes `grant` against the token endpoint and returns the decoded response.
    #[instrument(skip(self, http_client, credentials), fields(grant_type = grant.grant_type()), level = "debug")]
    pub async fn execute<C: IamHttpClient>(
        &self,
        http_client: &C,
        credentials: &Credentials,
        grant: &Grant,
    ) -> Result<TokenResponse, IamError> {
        let form = self.grant_form(credentials, grant);
        let request = form_request(&self.token_url, &self.api_version, credentials, &form);
        let resp = http_client
            .execute(request)
            .await
            .map_err(|e| IamError::Transport(e.to_string()))?;
        if resp.status != 200 {
            let error = decode_json::<OAuthErrorResponse>(&resp).ok().and_then(|e| e.error);
            warn!(status = resp.status, error = ?error, "token endpoint rejected grant");
            return Err(IamError::GrantRejected { status: resp.status, error });
        }
        let token: TokenResponse =
            decode_json(&resp).map_err(|e| IamError::MalformedTokenResponse(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(IamError::MalformedTokenResponse("missing access_token".into()));
        }
        debug!(expires_in = token.expires_in, "token endpoint issued access token");
        Ok(token)
    }

    /// Revokes `token` at the revoke endpoint.
    #[instrument(skip_all, level = "debug")]
    pub async fn revoke<C: IamHttpClient>(
        &self,
        http_client: &C,
        credentials: &Credentials,
        token: &str,
        token_type_hint: &str,
    ) -> Result<(), IamError> {
        let form = [("token", token), ("token_type_hint", token_type_hint)];
        let request = form_request(&self.revoke_url, &self.api_version, credentials, &form);
        let resp = http_client
            .execute(request)
            .await
            .map_err(|e| IamError::Transport(e.to_string()))?;
        match resp.status {
            200 | 204 => Ok(()),
            status => Err(IamError::from_status(status).unwrap_or(IamError::UnexpectedStatus(status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam_core::http_client::InMemoryHttpClient;
    use serde_json::json;

    const TOKEN_URL: &str = "https://iam.test/authorize/oauth2/token";

    fn flow() -> TokenFlow {
        TokenFlow::new(TOKEN_URL, "https://iam.test/authorize/oauth2/revoke", "2")
    }

    fn creds() -> Credentials {
        Credentials::builder("client", "secret").scopes(["openid", "mail"]).build().unwrap()
    }

    #[test]
    fn form_encoding_keeps_unreserved() {
        let body = encode_form(&[("username", "jane.doe@example.com"), ("password", "a b&c~-_")]);
        assert_eq!(String::from_utf8(body).unwrap(), "username=jane.doe%40example.com&password=a%20b%26c~-_");
    }

    #[test]
    fn grant_forms() {
        let form = flow().grant_form(&creds(), &Grant::Password { username: "u".into(), password: "p".into() });
        assert_eq!(
            form,
            vec![
                ("grant_type", "password".to_string()),
                ("username", "u".to_string()),
                ("password", "p".to_string()),
                ("scope", "openid mail".to_string()),
            ]
        );
        let form = flow().grant_form(&creds(), &Grant::RefreshToken { refresh_token: "R".into() });
        assert_eq!(form, vec![("grant_type", "refresh_token".to_string()), ("refresh_token", "R".to_string())]);
    }

    #[tokio::test]
    async fn execute_sends_basic_auth_and_api_version() {
        let client = InMemoryHttpClient::new();
        client.insert_response(TOKEN_URL, HttpResponse::json(200, &json!({"access_token": "T1", "expires_in": 1800})));
        let token = flow().execute(&client, &creds(), &Grant::ClientCredentials).await.unwrap();
        assert_eq!(token.access_token, "T1");

        let sent = &client.recorded_requests().await[0];
        assert_eq!(sent.header("Api-Version"), Some("2"));
        assert_eq!(sent.header("Authorization"), Some(creds().basic_auth().as_str()));
        assert_eq!(sent.header("Content-Type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(
            String::from_utf8(sent.body.clone().unwrap()).unwrap(),
            "grant_type=client_credentials&scope=openid%20mail"
        );
    }

    #[tokio::test]
    async fn execute_maps_failures() {
        let client = InMemoryHttpClient::new();
        client.insert_response(TOKEN_URL, HttpResponse::json(400, &json!({"error": "invalid_grant"})));
        let err = flow().execute(&client, &creds(), &Grant::ClientCredentials).await.unwrap_err();
        assert_eq!(err, IamError::GrantRejected { status: 400, error: Some("invalid_grant".into()) });

        let client = InMemoryHttpClient::new();
        client.insert_response(TOKEN_URL, HttpResponse::json(200, &json!({"expires_in": 1800})));
        let err = flow().execute(&client, &creds(), &Grant::ClientCredentials).await.unwrap_err();
        assert!(matches!(err, IamError::MalformedTokenResponse(_)));

        let client = InMemoryHttpClient::new();
        client.insert_response(TOKEN_URL, HttpResponse { status: 200, headers: vec![], body: b"<html>".to_vec() });
        let err = flow().execute(&client, &creds(), &Grant::ClientCredentials).await.unwrap_err();
        assert!(matches!(err, IamError::MalformedTokenResponse(_)));

        let client = InMemoryHttpClient::new();
        client.fail_url(TOKEN_URL, "dns failure");
        let err = flow().execute(&client, &creds(), &Grant::ClientCredentials).await.unwrap_err();
        assert!(matches!(err, IamError::Transport(_)));
    }
}
