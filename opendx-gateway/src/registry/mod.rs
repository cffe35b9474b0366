//! Provider registry: `(providerKey, schemaId)` to a runtime provider handle
//! carrying its endpoint, auth configuration and OAuth2 token cell.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use opendx_federation::ProviderRef;

use crate::configuration::AuthConfig;
use crate::configuration::ProviderConfig;
use crate::configuration::TokenTunables;

mod token;

pub use token::CachedToken;
pub use token::TokenCell;
pub use token::TokenError;

#[derive(Debug)]
pub struct Provider {
    pub config: ProviderConfig,
    token: TokenCell,
}

impl Provider {
    pub fn new(config: ProviderConfig) -> Self {
        Provider {
            config,
            token: TokenCell::new(),
        }
    }

    pub fn provider_ref(&self) -> ProviderRef {
        ProviderRef::new(self.config.provider_key.clone(), self.config.schema_id.clone())
    }

    /// Valid only for OAuth2 client-credentials providers.
    pub async fn bearer_token(
        &self,
        client: &reqwest::Client,
        tunables: &TokenTunables,
    ) -> Result<String, TokenError> {
        match &self.config.auth {
            AuthConfig::Oauth2ClientCredentials(oauth) => {
                self.token.bearer_token(client, oauth, tunables).await
            }
            _ => Err(TokenError::UnsupportedAuth),
        }
    }
}

/// Mutations take the writer lock; per-request lookups take the reader lock
/// and clone the `Arc` handle.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderRef, Arc<Provider>>>,
    tunables: TokenTunables,
}

impl ProviderRegistry {
    pub fn new(configs: Vec<ProviderConfig>, tunables: TokenTunables) -> Self {
        let providers = configs
            .into_iter()
            .map(|config| {
                let provider = Provider::new(config);
                (provider.provider_ref(), Arc::new(provider))
            })
            .collect();
        ProviderRegistry {
            providers: RwLock::new(providers),
            tunables,
        }
    }

    pub fn get(&self, provider: &ProviderRef) -> Option<Arc<Provider>> {
        self.providers.read().get(provider).cloned()
    }

    pub fn insert(&self, config: ProviderConfig) {
        let provider = Provider::new(config);
        self.providers
            .write()
            .insert(provider.provider_ref(), Arc::new(provider));
    }

    pub fn tunables(&self) -> &TokenTunables {
        &self.tunables
    }
}
