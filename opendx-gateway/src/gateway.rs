//! Request orchestration: active schema, plan, authorize, fan out, compose.
//! No provider is contacted before the authorization pipeline permits, and
//! errors never escape as panics; every failure becomes a GraphQL error or a
//! logged absence.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use uuid::Uuid;

use opendx_federation::FederationError;
use opendx_federation::GraphQLError;
use opendx_federation::GraphQLRequest;
use opendx_federation::GraphQLResponse;
use opendx_federation::Planner;
use opendx_federation::compose::compose;

use crate::authz::AuthzInput;
use crate::authz::AuthzPipeline;
use crate::configuration::Configuration;
use crate::configuration::Profile;
use crate::executor::FederatedExecutor;
use crate::registry::ProviderRegistry;
use crate::schema_store::ActiveSchemaCache;
use crate::schema_store::MemorySchemaStore;
use crate::schema_store::SchemaStore;

const CLAIM_PREFIX: &str = "http://wso2.org/claims/";

/// Consumer identity as established by the upstream JWT validator. The
/// gateway trusts the injected assertion and only reads claims off it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerIdentity {
    pub consumer_id: String,
    pub app_id: String,
}

impl ConsumerIdentity {
    /// Fixed test consumer substituted in the local profile.
    pub fn local() -> Self {
        ConsumerIdentity {
            consumer_id: "local-consumer".to_owned(),
            app_id: "local-app".to_owned(),
        }
    }

    /// Reads the `subscriber` and application claims from a bearer token's
    /// payload. The signature was checked upstream; missing or unreadable
    /// claims degrade to empty identifiers rather than failing the request.
    pub fn from_bearer_claims(token: &str) -> Self {
        let claims = decode_claims(token).unwrap_or_default();
        let claim = |name: &str| {
            claims
                .get(&format!("{CLAIM_PREFIX}{name}"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let consumer_id = claim("subscriber");
        let mut app_id = claim("applicationUUId");
        if app_id.is_empty() {
            app_id = claim("applicationid");
        }
        if consumer_id.is_empty() {
            tracing::warn!("bearer token carries no subscriber claim");
        }
        ConsumerIdentity {
            consumer_id,
            app_id,
        }
    }
}

fn decode_claims(token: &str) -> Option<serde_json::Map<String, Value>> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    serde_json::from_slice(&decoded).ok()
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("could not build the HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub struct Gateway {
    cache: ActiveSchemaCache,
    store: Arc<dyn SchemaStore>,
    mappings: Vec<opendx_federation::ArgumentMapping>,
    authz: AuthzPipeline,
    executor: FederatedExecutor,
    profile: Profile,
    request_timeout: std::time::Duration,
}

impl Gateway {
    pub fn new(configuration: Configuration) -> Result<Self, GatewayError> {
        Self::with_store(configuration, Arc::new(MemorySchemaStore::new()))
    }

    pub fn with_store(
        configuration: Configuration,
        store: Arc<dyn SchemaStore>,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(configuration.provider_timeout)
            .build()?;
        let registry = Arc::new(ProviderRegistry::new(
            configuration.providers,
            configuration.token,
        ));
        let cache = ActiveSchemaCache::new(
            store.clone(),
            configuration.default_sdl,
            configuration.sdl_file,
        );
        Ok(Gateway {
            cache,
            store,
            mappings: configuration.argument_mappings,
            authz: AuthzPipeline::new(
                client.clone(),
                configuration.pdp_url,
                configuration.ce_url,
                configuration.consent_purpose,
            ),
            executor: FederatedExecutor::new(registry, client, configuration.provider_timeout),
            profile: configuration.profile,
            request_timeout: configuration.request_timeout,
        })
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn store(&self) -> &Arc<dyn SchemaStore> {
        &self.store
    }

    /// The active unified SDL, for the public SDL endpoint.
    pub fn active_sdl(&self) -> Result<String, FederationError> {
        Ok(self.cache.current()?.sdl().to_owned())
    }

    pub async fn handle(
        &self,
        request: GraphQLRequest,
        consumer: &ConsumerIdentity,
    ) -> GraphQLResponse {
        let request_id = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.request_timeout;
        tracing::info!(
            %request_id,
            consumer = %consumer.consumer_id,
            app = %consumer.app_id,
            "handling federated query"
        );

        let schema = match self.cache.current() {
            Ok(schema) => schema,
            Err(error) => {
                tracing::error!(%error, "no unified schema available");
                return GraphQLResponse::from_error(GraphQLError::new(error.to_string()));
            }
        };

        let planner = Planner::new(&schema, &self.mappings);
        let plan = match planner.plan(&request.query, &request.variables) {
            Ok(plan) => plan,
            Err(error) => {
                return GraphQLResponse::from_error(GraphQLError::new(error.to_string()));
            }
        };

        if plan.provider_fields.is_empty() {
            tracing::debug!(%request_id, "no provider-bound fields, nothing to authorize");
            return GraphQLResponse::from_data(Value::Object(serde_json::Map::new()));
        }

        let authz_input = AuthzInput {
            consumer_id: &consumer.consumer_id,
            app_id: &consumer.app_id,
            request_id: &request_id,
            provider_fields: &plan.provider_fields,
            owner_id: plan.owner_identifier(),
        };
        if let Err(error) = self.authz.authorize(authz_input).await {
            tracing::info!(%request_id, code = %error.code(), "request not permitted");
            return GraphQLResponse::from_error(error.to_graphql_error());
        }

        let federation = self.executor.execute(&plan.sub_queries, Some(deadline)).await;
        let data = compose(&plan.document, &plan.schema_info_map, &federation);
        GraphQLResponse::from_data(data)
    }
}
