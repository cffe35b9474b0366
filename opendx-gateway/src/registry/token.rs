//! Per-provider OAuth2 client-credentials token cache.
//!
//! The cell is a read/write lock: callers holding a fresh token return from
//! the read path without contention, while a single writer performs the
//! refresh and everyone else waits behind the lock. A refresh token is tried
//! first when one exists; client-credentials acquisition is retried a bounded
//! number of times with a fixed delay, and after exhaustion the cell is
//! cleared so the provider call fails fast for this request.

use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::configuration::CredentialPlacement;
use crate::configuration::Oauth2Config;
use crate::configuration::TokenTunables;

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub token_type: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
    pub refresh_token: Option<String>,
}

impl CachedToken {
    fn from_response(response: TokenResponse, now: Instant) -> Self {
        CachedToken {
            access_token: response.access_token,
            token_type: response.token_type,
            issued_at: now,
            expires_at: now + Duration::from_secs(response.expires_in),
            refresh_token: response.refresh_token,
        }
    }

    pub fn is_usable(&self, validation_buffer: Duration, now: Instant) -> bool {
        now + validation_buffer < self.expires_at
    }

    pub fn needs_refresh(&self, refresh_buffer: Duration, now: Instant) -> bool {
        now + refresh_buffer >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("token acquisition failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<TokenError>,
    },
    #[error("provider does not use OAuth2 client-credentials authentication")]
    UnsupportedAuth,
}

#[derive(Debug, Default)]
pub struct TokenCell {
    inner: RwLock<Option<CachedToken>>,
}

enum Grant<'a> {
    ClientCredentials,
    RefreshToken(&'a str),
}

impl TokenCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out an access token satisfying the validation buffer at the
    /// moment of use, refreshing or re-acquiring it first when needed.
    pub async fn bearer_token(
        &self,
        client: &reqwest::Client,
        oauth: &Oauth2Config,
        tunables: &TokenTunables,
    ) -> Result<String, TokenError> {
        {
            let guard = self.inner.read().await;
            if let Some(token) = guard.as_ref() {
                let now = Instant::now();
                if token.is_usable(tunables.validation_buffer, now)
                    && !token.needs_refresh(tunables.refresh_buffer, now)
                {
                    return Ok(token.access_token.clone());
                }
            }
        }

        // Single-flight: the writer re-checks staleness before fetching.
        let mut guard = self.inner.write().await;
        let now = Instant::now();
        if let Some(token) = guard.as_ref() {
            if token.is_usable(tunables.validation_buffer, now)
                && !token.needs_refresh(tunables.refresh_buffer, now)
            {
                return Ok(token.access_token.clone());
            }
        }

        if let Some(refresh_token) = guard.as_ref().and_then(|token| token.refresh_token.clone()) {
            match request_token(client, oauth, Grant::RefreshToken(&refresh_token)).await {
                Ok(token) => {
                    let access_token = token.access_token.clone();
                    *guard = Some(token);
                    return Ok(access_token);
                }
                Err(error) => {
                    tracing::warn!(
                        %error,
                        "refresh-token grant failed, falling back to client credentials"
                    );
                }
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match request_token(client, oauth, Grant::ClientCredentials).await {
                Ok(token) => {
                    let access_token = token.access_token.clone();
                    *guard = Some(token);
                    return Ok(access_token);
                }
                Err(error) if attempt < tunables.max_retries => {
                    tracing::warn!(attempt, %error, "token acquisition failed, retrying");
                    tokio::time::sleep(tunables.retry_delay).await;
                }
                Err(error) => {
                    *guard = None;
                    return Err(TokenError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(error),
                    });
                }
            }
        }
    }
}

async fn request_token(
    client: &reqwest::Client,
    oauth: &Oauth2Config,
    grant: Grant<'_>,
) -> Result<CachedToken, TokenError> {
    let mut form: Vec<(&str, String)> = Vec::new();
    match grant {
        Grant::ClientCredentials => {
            form.push(("grant_type", "client_credentials".to_owned()));
            if let Some(scope) = &oauth.scope {
                form.push(("scope", scope.clone()));
            }
        }
        Grant::RefreshToken(refresh_token) => {
            form.push(("grant_type", "refresh_token".to_owned()));
            form.push(("refresh_token", refresh_token.to_owned()));
        }
    }
    let mut request = client.post(oauth.token_url.clone());
    match oauth.placement {
        CredentialPlacement::Body => {
            form.push(("client_id", oauth.client_id.clone()));
            form.push(("client_secret", oauth.client_secret.clone()));
        }
        CredentialPlacement::Basic => {
            request = request.basic_auth(&oauth.client_id, Some(&oauth.client_secret));
        }
        CredentialPlacement::Bearer => {
            request = request.bearer_auth(&oauth.client_secret);
        }
    }
    let response = request.form(&form).send().await?;
    if !response.status().is_success() {
        return Err(TokenError::Status(response.status()));
    }
    let payload: TokenResponse = response.json().await?;
    Ok(CachedToken::from_response(payload, Instant::now()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::body_string_contains;
    use wiremock::matchers::method;

    use super::*;

    fn token(expires_in: Duration) -> CachedToken {
        let now = Instant::now();
        CachedToken {
            access_token: "token".to_owned(),
            token_type: "Bearer".to_owned(),
            issued_at: now,
            expires_at: now + expires_in,
            refresh_token: None,
        }
    }

    fn oauth_config(server_uri: &str) -> Oauth2Config {
        Oauth2Config {
            token_url: Url::parse(&format!("{server_uri}/oauth2/token")).unwrap(),
            client_id: "gateway".to_owned(),
            client_secret: "secret".to_owned(),
            scope: Some("read".to_owned()),
            placement: CredentialPlacement::Body,
        }
    }

    fn fast_tunables() -> TokenTunables {
        TokenTunables {
            refresh_buffer: Duration::from_secs(120),
            validation_buffer: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn buffer_arithmetic_matches_the_contract() {
        let now = Instant::now();
        // 60s left: usable (30s buffer) but within the 120s refresh window.
        let within_refresh_window = token(Duration::from_secs(60));
        assert!(within_refresh_window.is_usable(Duration::from_secs(30), now));
        assert!(within_refresh_window.needs_refresh(Duration::from_secs(120), now));

        let nearly_expired = token(Duration::from_secs(20));
        assert!(!nearly_expired.is_usable(Duration::from_secs(30), now));

        let fresh = token(Duration::from_secs(600));
        assert!(!fresh.needs_refresh(Duration::from_secs(120), now));
    }

    #[tokio::test]
    async fn acquires_and_caches_a_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=gateway"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "abc",
                "expires_in": 3600,
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cell = TokenCell::new();
        let client = reqwest::Client::new();
        let oauth = oauth_config(&server.uri());
        let tunables = fast_tunables();

        let first = cell.bearer_token(&client, &oauth, &tunables).await.unwrap();
        let second = cell.bearer_token(&client, &oauth, &tunables).await.unwrap();
        assert_eq!(first, "abc");
        assert_eq!(second, "abc");
    }

    #[tokio::test]
    async fn exhausted_retries_clear_the_cell_and_fail_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let cell = TokenCell::new();
        let client = reqwest::Client::new();
        let oauth = oauth_config(&server.uri());
        let err = cell
            .bearer_token(&client, &oauth, &fast_tunables())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TokenError::RetriesExhausted { attempts: 3, .. }
        ));
        assert!(cell.inner.read().await.is_none());
    }

    #[tokio::test]
    async fn refresh_grant_is_tried_before_client_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "refreshed",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cell = TokenCell::new();
        {
            let now = Instant::now();
            *cell.inner.write().await = Some(CachedToken {
                access_token: "stale".to_owned(),
                token_type: "Bearer".to_owned(),
                issued_at: now,
                // Inside the refresh window.
                expires_at: now + Duration::from_secs(60),
                refresh_token: Some("r1".to_owned()),
            });
        }
        let client = reqwest::Client::new();
        let oauth = oauth_config(&server.uri());
        let access = cell
            .bearer_token(&client, &oauth, &fast_tunables())
            .await
            .unwrap();
        assert_eq!(access, "refreshed");
    }

    #[tokio::test]
    async fn basic_placement_sends_an_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "abc",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cell = TokenCell::new();
        let client = reqwest::Client::new();
        let mut oauth = oauth_config(&server.uri());
        oauth.placement = CredentialPlacement::Basic;
        cell.bearer_token(&client, &oauth, &fast_tunables())
            .await
            .unwrap();
    }
}
