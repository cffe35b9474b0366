//! Two-stage authorization: the policy decision point first, then, when the
//! decision asks for it, the consent engine. The pipeline short-circuits
//! deterministically: a PDP deny never reaches the consent engine, and no
//! provider is contacted unless this module permits.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use opendx_federation::ErrorCode;
use opendx_federation::GraphQLError;
use opendx_federation::plan::ProviderField;

/// Transport retry bounds for the idempotent PDP/CE calls. An explicit deny
/// is an application answer and is never retried.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(200);

pub struct AuthzPipeline {
    client: reqwest::Client,
    pdp_url: Url,
    ce_url: Url,
    consent_purpose: String,
}

pub struct AuthzInput<'a> {
    pub consumer_id: &'a str,
    pub app_id: &'a str,
    pub request_id: &'a str,
    pub provider_fields: &'a [ProviderField],
    pub owner_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("policy decision request failed: {0}")]
    Pdp(String),
    #[error("the policy decision point returned no decision")]
    PdpNoResponse,
    #[error("the policy decision point denied the request")]
    PdpNotAllowed,
    #[error("consent request failed: {0}")]
    Ce(String),
    #[error("consent is not approved (status: {status})")]
    CeNotApproved {
        status: ConsentStatus,
        portal_url: Option<String>,
    },
    #[error("no entity identifier could be extracted from the query arguments")]
    MissingEntityIdentifier,
}

impl AuthzError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthzError::Pdp(_) => ErrorCode::PdpError,
            AuthzError::PdpNoResponse => ErrorCode::PdpNoResponse,
            AuthzError::PdpNotAllowed => ErrorCode::PdpNotAllowed,
            AuthzError::Ce(_) => ErrorCode::CeError,
            AuthzError::CeNotApproved { .. } => ErrorCode::CeNotApproved,
            AuthzError::MissingEntityIdentifier => ErrorCode::MissingEntityIdentifier,
        }
    }

    pub fn to_graphql_error(&self) -> GraphQLError {
        let mut error = GraphQLError::new(self.to_string()).with_code(self.code());
        if let AuthzError::CeNotApproved { status, portal_url } = self {
            error = error.with_extension("consentStatus", Value::String(status.to_string()));
            if let Some(url) = portal_url {
                error = error.with_extension("consentPortalUrl", Value::String(url.clone()));
            }
        }
        error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsentStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Revoked,
}

#[derive(Debug, Serialize)]
struct PdpRequest<'a> {
    consumer_id: &'a str,
    app_id: &'a str,
    request_id: &'a str,
    required_fields: Vec<RequiredField<'a>>,
}

#[derive(Debug, Serialize)]
struct RequiredField<'a> {
    provider_key: &'a str,
    schema_id: &'a str,
    field_path: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct PdpResponse {
    allow: Option<bool>,
    #[serde(default)]
    consent_required: bool,
    #[serde(default)]
    consent_required_fields: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CeRequest<'a> {
    app_id: &'a str,
    purpose: &'a str,
    session_id: &'a str,
    data_fields: Vec<CeDataField<'a>>,
}

#[derive(Debug, Serialize)]
struct CeDataField<'a> {
    owner_type: &'a str,
    owner_id: &'a str,
    fields: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CeResponse {
    status: ConsentStatus,
    #[serde(default)]
    consent_portal_url: Option<String>,
}

impl AuthzPipeline {
    pub fn new(
        client: reqwest::Client,
        pdp_url: Url,
        ce_url: Url,
        consent_purpose: String,
    ) -> Self {
        AuthzPipeline {
            client,
            pdp_url,
            ce_url,
            consent_purpose,
        }
    }

    pub async fn authorize(&self, input: AuthzInput<'_>) -> Result<(), AuthzError> {
        let decision = self.decide(&input).await?;
        let Some(allow) = decision.allow else {
            return Err(AuthzError::PdpNoResponse);
        };
        if !allow {
            return Err(AuthzError::PdpNotAllowed);
        }
        if !decision.consent_required {
            return Ok(());
        }

        let owner_id = input
            .owner_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(AuthzError::MissingEntityIdentifier)?;
        let consent = self
            .request_consent(&input, &owner_id, &decision.consent_required_fields)
            .await?;
        match consent.status {
            ConsentStatus::Approved => Ok(()),
            status => Err(AuthzError::CeNotApproved {
                status,
                portal_url: consent.consent_portal_url,
            }),
        }
    }

    async fn decide(&self, input: &AuthzInput<'_>) -> Result<PdpResponse, AuthzError> {
        let request = PdpRequest {
            consumer_id: input.consumer_id,
            app_id: input.app_id,
            request_id: input.request_id,
            required_fields: input
                .provider_fields
                .iter()
                .map(|field| RequiredField {
                    provider_key: &field.provider.provider_key,
                    schema_id: &field.provider.schema_id,
                    field_path: &field.provider_field,
                })
                .collect(),
        };
        let url = endpoint(&self.pdp_url, "decide");
        let response = self
            .send_with_retry(&url, &request)
            .await
            .map_err(AuthzError::Pdp)?;
        let body = response
            .text()
            .await
            .map_err(|error| AuthzError::Pdp(error.to_string()))?;
        if body.trim().is_empty() {
            return Ok(PdpResponse::default());
        }
        serde_json::from_str(&body).map_err(|error| AuthzError::Pdp(error.to_string()))
    }

    async fn request_consent(
        &self,
        input: &AuthzInput<'_>,
        owner_id: &str,
        fields: &[String],
    ) -> Result<CeResponse, AuthzError> {
        let request = CeRequest {
            app_id: input.app_id,
            purpose: &self.consent_purpose,
            session_id: input.request_id,
            data_fields: vec![CeDataField {
                owner_type: "citizen",
                owner_id,
                fields,
            }],
        };
        let url = endpoint(&self.ce_url, "consents");
        let response = self
            .send_with_retry(&url, &request)
            .await
            .map_err(AuthzError::Ce)?;
        response
            .json()
            .await
            .map_err(|error| AuthzError::Ce(error.to_string()))
    }

    async fn send_with_retry<T: Serialize>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last_error = match self.client.post(url).json(body).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => format!("status {}", response.status()),
                Err(error) => error.to_string(),
            };
            if attempt >= RETRY_ATTEMPTS {
                return Err(last_error);
            }
            tracing::warn!(url, attempt, error = %last_error, "authorization call failed, retrying");
            tokio::time::sleep(RETRY_BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
        }
    }
}

fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{path}", base.as_str().trim_end_matches('/'))
}
