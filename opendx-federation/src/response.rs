//! Wire-level GraphQL request and response types shared by the consumer-facing
//! surface and the provider clients, plus the per-request federation response
//! that collects provider results before composition.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::error::ErrorCode;
use crate::schema::ProviderRef;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    /// Tolerates both an absent and an explicit-null variables member.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Map::is_empty"
    )]
    pub variables: Map<String, Value>,
}

fn null_as_default<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let variables = Option::<Map<String, Value>>::deserialize(deserializer)?;
    Ok(variables.unwrap_or_default())
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            variables: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl GraphQLResponse {
    pub fn from_data(data: Value) -> Self {
        GraphQLResponse {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn from_error(error: GraphQLError) -> Self {
        GraphQLResponse {
            data: None,
            errors: vec![error],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            extensions: Map::new(),
        }
    }

    pub fn with_code(self, code: ErrorCode) -> Self {
        self.with_extension("code", Value::String(code.to_string()))
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(Value::as_str)
    }
}

/// Provider results gathered by the federated executor. Entries arrive in
/// provider completion order; composition must not depend on it.
#[derive(Debug, Default)]
pub struct FederationResponse {
    entries: Vec<FederationEntry>,
}

#[derive(Debug)]
pub struct FederationEntry {
    pub provider: ProviderRef,
    pub response: GraphQLResponse,
}

impl FederationResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: ProviderRef, response: GraphQLResponse) {
        self.entries.push(FederationEntry { provider, response });
    }

    pub fn entries(&self) -> &[FederationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `data` payload contributed by a provider, if it responded with one.
    pub fn data_for(&self, provider: &ProviderRef) -> Option<&Value> {
        self.entries
            .iter()
            .filter(|entry| &entry.provider == provider)
            .find_map(|entry| entry.response.data.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn error_extensions_carry_code() {
        let error = GraphQLError::new("denied").with_code(ErrorCode::PdpNotAllowed);
        assert_eq!(error.code(), Some("PDP_NOT_ALLOWED"));
    }

    #[test]
    fn response_serialization_omits_empty_fields() {
        let response = GraphQLResponse::from_data(json!({"a": 1}));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded, json!({"data": {"a": 1}}));
    }

    #[test]
    fn data_for_skips_entries_without_data() {
        let provider = ProviderRef::new("drp", "drp-v1");
        let mut federation = FederationResponse::new();
        federation.push(provider.clone(), GraphQLResponse::default());
        assert!(federation.data_for(&provider).is_none());

        federation.push(provider.clone(), GraphQLResponse::from_data(json!({"x": 1})));
        assert_eq!(federation.data_for(&provider), Some(&json!({"x": 1})));
    }
}
