//! OAuth 2.0 authorization-code flow and token refresh for Google.
//!
//! # Flow Overview
//!
//! 1. Generate a code verifier, its SHA-256 challenge and a random state
//! 2. Redirect the browser to Google's consent page
//! 3. Google redirects back to the server's callback with a code and the state
//! 4. The server checks the state and exchanges the code (with the verifier)
//!    for an access and refresh token
//! 5. The refresh token is used later to mint new access tokens

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::Rng as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, TokenRefresher};

use super::config::{GoogleConfig, OAuthCredentials};
use super::tokens::{RefreshedToken, TokenPair};

/// The PKCE code verifier length (in bytes, before base64 encoding).
const CODE_VERIFIER_LENGTH: usize = 32;

/// Length of the CSRF state (in bytes, before base64 encoding).
const STATE_LENGTH: usize = 16;

/// OAuth client for Google.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    credentials: OAuthCredentials,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a new OAuth client sharing the given HTTP client.
    pub fn new(config: &GoogleConfig, http_client: reqwest::Client) -> Self {
        Self {
            credentials: config.credentials.clone(),
            auth_url: config.endpoints.auth_url.clone(),
            token_url: config.endpoints.token_url.clone(),
            userinfo_url: config.endpoints.userinfo_url.clone(),
            http_client,
        }
    }

    /// Builds the consent page URL for a sign-in attempt.
    ///
    /// Requests offline access and forces the consent prompt so Google always
    /// hands out a refresh token.
    pub fn authorization_url(
        &self,
        flow: &PkceFlow,
        redirect_uri: &str,
        scopes: &[String],
    ) -> ProviderResult<String> {
        let scope = scopes.join(" ");
        let url = url::Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("code_challenge", flow.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", flow.state.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| ProviderError::configuration(format!("invalid auth URL: {}", e)))?;
        Ok(url.into())
    }

    /// Exchanges an authorization code for a token pair.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> ProviderResult<TokenPair> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ProviderError::authentication(format!(
                "token exchange failed ({}): {}",
                status, body
            ))
            .with_provider("oauth"));
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("invalid token response: {}", e))
        })?;

        let refresh_token = token_response.refresh_token.ok_or_else(|| {
            ProviderError::authentication("token response carried no refresh token")
                .with_provider("oauth")
        })?;

        info!("obtained tokens for new session");
        let mut pair = TokenPair::new(token_response.access_token, refresh_token);
        if let Some(secs) = token_response.expires_in {
            pair = pair.with_expires_at(Utc::now() + chrono::Duration::seconds(secs));
        }
        Ok(pair)
    }

    /// Requests a new access token using the refresh token.
    ///
    /// A timeout or other transport failure is reported as a network error
    /// and leaves the session alone. A non-2xx answer or a body that is not a
    /// token response is a refresh failure.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> ProviderResult<RefreshedToken> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(e).with_provider("oauth"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_transport(e).with_provider("oauth"))?;

        if !status.is_success() {
            warn!(%status, "token endpoint rejected refresh");
            return Err(ProviderError::refresh_failed(format!(
                "token refresh failed ({}): {}",
                status,
                refresh_error_reason(&body)
            ))
            .with_provider("oauth"));
        }

        let refreshed: RefreshedToken = serde_json::from_str(&body).map_err(|e| {
            ProviderError::refresh_failed(format!("invalid token response: {}", e))
                .with_provider("oauth")
        })?;

        debug!(
            rotated_refresh_token = refreshed.refresh_token.is_some(),
            "refreshed access token"
        );
        Ok(refreshed)
    }

    /// Looks up the signed-in account's profile.
    pub async fn user_info(&self, access_token: &str) -> ProviderResult<UserInfo> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::authentication("access token expired or invalid"));
        }
        if !status.is_success() {
            return Err(ProviderError::server(format!("userinfo failed ({})", status)));
        }

        response
            .json::<UserInfo>()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("invalid userinfo: {}", e)))
    }
}

impl TokenRefresher for OAuthClient {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RefreshedToken>> {
        Box::pin(self.refresh_access_token(refresh_token))
    }
}

/// Pulls the OAuth `error` field out of a token endpoint error body.
fn refresh_error_reason(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| "unreadable error body".to_string())
}

/// Profile of the signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// PKCE flow state and utilities.
///
/// Implements RFC 7636 (Proof Key for Code Exchange).
#[derive(Debug, Clone)]
pub struct PkceFlow {
    /// The code verifier (high-entropy random string).
    pub verifier: String,
    /// The code challenge (SHA-256 hash of verifier, base64url encoded).
    pub challenge: String,
    /// Random state for CSRF protection.
    pub state: String,
}

impl PkceFlow {
    /// Creates a new PKCE flow with random verifier and state.
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        let challenge = Self::compute_challenge(&verifier);
        let state = random_token(STATE_LENGTH);

        Self {
            verifier,
            challenge,
            state,
        }
    }

    /// Computes the SHA-256 challenge for a code verifier.
    fn compute_challenge(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates `len` random bytes, base64url encoded.
pub fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Response from Google's token endpoint for a code exchange.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use crate::google::config::GoogleEndpoints;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn client_for(server: &MockServer) -> OAuthClient {
        let config = GoogleConfig::new(OAuthCredentials::new(
            "test-client.apps.googleusercontent.com",
            "test-secret",
        ))
        .with_endpoints(GoogleEndpoints::with_base(&server.base_url()))
        .with_timeout(Duration::from_secs(2));
        let http = config.http_client().unwrap();
        OAuthClient::new(&config, http)
    }

    #[test]
    fn pkce_verifier_length() {
        let flow = PkceFlow::new();
        // Base64 encoding of 32 bytes = 43 characters (no padding)
        assert_eq!(flow.verifier.len(), 43);
    }

    #[test]
    fn pkce_challenge_is_deterministic() {
        let verifier = "test-verifier-string";
        assert_eq!(
            PkceFlow::compute_challenge(verifier),
            PkceFlow::compute_challenge(verifier)
        );
    }

    #[test]
    fn pkce_state_is_random() {
        let flow1 = PkceFlow::new();
        let flow2 = PkceFlow::new();
        assert_ne!(flow1.state, flow2.state);
        assert_ne!(flow1.challenge, flow2.challenge);
    }

    #[tokio::test]
    async fn auth_url_format() {
        let server = MockServer::start_async().await;
        let client = client_for(&server);
        let flow = PkceFlow::new();
        let url = client
            .authorization_url(
                &flow,
                "http://localhost:3000/api/auth/callback/google",
                &GoogleConfig::DEFAULT_SCOPES
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>(),
            )
            .unwrap();

        assert!(url.starts_with(&server.url("/o/oauth2/v2/auth")));
        assert!(url.contains("client_id=test-client.apps.googleusercontent.com"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&format!("state={}", flow.state)));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("auth%2Fdrive"));
    }

    #[tokio::test]
    async fn refresh_returns_new_access_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_contains("grant_type=refresh_token")
                    .body_contains("refresh_token=R1");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A2",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }));
            })
            .await;

        let refreshed = client_for(&server).refresh("R1").await.unwrap();
        assert_eq!(refreshed.access_token, "A2");
        assert_eq!(refreshed.expires_in, Some(3599));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_refresh_is_refresh_failed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400).json_body(serde_json::json!({
                    "error": "invalid_grant",
                    "error_description": "Token has been expired or revoked."
                }));
            })
            .await;

        let err = client_for(&server).refresh("R1").await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::RefreshFailed);
        assert!(err.message().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn malformed_refresh_body_is_refresh_failed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(200).body("not json");
            })
            .await;

        let err = client_for(&server).refresh("R1").await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::RefreshFailed);
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_network_error() {
        // Bind then drop a listener so the port refuses connections.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = GoogleConfig::new(OAuthCredentials::new("id", "secret"))
            .with_endpoints(GoogleEndpoints::with_base(&format!("http://127.0.0.1:{port}")))
            .with_timeout(Duration::from_secs(2));
        let client = OAuthClient::new(&config, config.http_client().unwrap());

        let err = client.refresh("R1").await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::NetworkError);
        assert_eq!(err.provider(), Some("oauth"));
    }

    #[tokio::test]
    async fn exchange_code_builds_token_pair() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_contains("grant_type=authorization_code")
                    .body_contains("code=auth-code");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A1",
                    "refresh_token": "R1",
                    "expires_in": 3600
                }));
            })
            .await;

        let pair = client_for(&server)
            .exchange_code("auth-code", "verifier", "http://localhost/cb")
            .await
            .unwrap();
        assert_eq!(pair.access_token, "A1");
        assert_eq!(pair.refresh_token, "R1");
        assert!(pair.expires_at.is_some());
    }

    #[tokio::test]
    async fn exchange_without_refresh_token_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(200)
                    .json_body(serde_json::json!({ "access_token": "A1" }));
            })
            .await;

        let err = client_for(&server)
            .exchange_code("auth-code", "verifier", "http://localhost/cb")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::AuthenticationFailed);
    }

    #[tokio::test]
    async fn user_info_reads_email() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/userinfo")
                    .header("authorization", "Bearer A1");
                then.status(200).json_body(serde_json::json!({
                    "sub": "123",
                    "email": "Alice@Example.com",
                    "name": "Alice"
                }));
            })
            .await;

        let info = client_for(&server).user_info("A1").await.unwrap();
        assert_eq!(info.email, "Alice@Example.com");
        assert_eq!(info.name.as_deref(), Some("Alice"));
    }
}
