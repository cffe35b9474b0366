//! Concurrent provider fan-out: one task per `(providerKey, schemaId)`
//! sub-query, joined before composition. A provider that errors, times out
//! or returns malformed JSON contributes nothing; the others still do.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use apollo_compiler::ast;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::task::JoinSet;

use opendx_federation::FederationResponse;
use opendx_federation::GraphQLRequest;
use opendx_federation::GraphQLResponse;
use opendx_federation::ProviderRef;

use crate::configuration::AuthConfig;
use crate::registry::Provider;
use crate::registry::ProviderRegistry;
use crate::registry::TokenError;

pub struct FederatedExecutor {
    registry: Arc<ProviderRegistry>,
    client: reqwest::Client,
    provider_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
enum ProviderCallError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned status {0}")]
    Status(reqwest::StatusCode),
}

impl FederatedExecutor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        client: reqwest::Client,
        provider_timeout: Duration,
    ) -> Self {
        FederatedExecutor {
            registry,
            client,
            provider_timeout,
        }
    }

    /// Dispatches every sub-query and returns once every task has terminated,
    /// successfully or not. Dropping the returned future aborts the in-flight
    /// provider calls, which is how client-disconnect cancellation reaches
    /// them.
    pub async fn execute(
        &self,
        sub_queries: &IndexMap<ProviderRef, ast::Document>,
        deadline: Option<Instant>,
    ) -> FederationResponse {
        let results = Arc::new(Mutex::new(FederationResponse::new()));
        let mut tasks = JoinSet::new();
        for (provider_ref, document) in sub_queries {
            let query = document.serialize().no_indent().to_string();
            let provider_ref = provider_ref.clone();
            let registry = self.registry.clone();
            let client = self.client.clone();
            let results = results.clone();
            let timeout = self.effective_timeout(deadline);
            tasks.spawn(async move {
                let Some(provider) = registry.get(&provider_ref) else {
                    tracing::warn!(
                        provider = %provider_ref,
                        "provider is not registered, sub-query skipped"
                    );
                    return;
                };
                match call_provider(&client, &provider, query, timeout, &registry).await {
                    Ok(response) => {
                        if !response.errors.is_empty() {
                            tracing::warn!(
                                provider = %provider_ref,
                                errors = response.errors.len(),
                                "provider returned GraphQL errors"
                            );
                        }
                        results.lock().push(provider_ref, response);
                    }
                    Err(error) => {
                        tracing::warn!(
                            provider = %provider_ref,
                            %error,
                            "provider call failed, its fields will be absent"
                        );
                    }
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                // A panicking provider task must not take the request down.
                tracing::error!(%error, "provider task terminated abnormally");
            }
        }
        let taken = std::mem::take(&mut *results.lock());
        taken
    }

    fn effective_timeout(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.provider_timeout),
            None => self.provider_timeout,
        }
    }
}

async fn call_provider(
    client: &reqwest::Client,
    provider: &Provider,
    query: String,
    timeout: Duration,
    registry: &ProviderRegistry,
) -> Result<GraphQLResponse, ProviderCallError> {
    let mut request = client
        .post(provider.config.provider_url.clone())
        .timeout(timeout)
        .json(&GraphQLRequest::new(query));
    match &provider.config.auth {
        AuthConfig::None => {}
        AuthConfig::ApiKey(api_key) => {
            request = request.header(api_key.header.as_str(), api_key.key.as_str());
        }
        AuthConfig::Oauth2ClientCredentials(_) => {
            let token = provider.bearer_token(client, registry.tunables()).await?;
            request = request.bearer_auth(token);
        }
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(ProviderCallError::Status(response.status()));
    }
    Ok(response.json().await?)
}
