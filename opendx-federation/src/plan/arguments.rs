//! Routing of unified-query arguments onto provider sub-queries.
//!
//! The argument-mapping table is configuration: each entry names the unified
//! argument (`source_arg_name`) and the provider AST position it must be
//! injected at (`target_arg_path` + `target_arg_name`). The table is
//! immutable after load.

use apollo_compiler::Node;
use apollo_compiler::ast::Value;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;

use crate::error::FederationError;
use crate::plan::ProviderField;
use crate::schema::ProviderRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentMapping {
    pub provider_key: String,
    pub schema_id: String,
    /// Argument name as written in the unified query.
    pub source_arg_name: String,
    /// Dot-path of the provider query node the argument is attached to.
    pub target_arg_path: String,
    /// Argument name expected by the provider.
    pub target_arg_name: String,
}

impl ArgumentMapping {
    pub fn provider_ref(&self) -> ProviderRef {
        ProviderRef::new(self.provider_key.clone(), self.schema_id.clone())
    }
}

/// A mapping bound to the concrete argument value for this request.
#[derive(Debug, Clone)]
pub struct ArgumentBinding {
    pub mapping: ArgumentMapping,
    pub value: Node<Value>,
}

/// An argument encountered on a query field at any depth, in traversal order.
#[derive(Debug, Clone)]
pub(crate) struct CollectedArgument {
    pub name: String,
    pub value: Node<Value>,
}

/// A mapping is required when any provider-field path of its provider is
/// equal to, or prefixed by, its `target_arg_path`.
pub(crate) fn find_required_mappings<'a>(
    mappings: &'a [ArgumentMapping],
    provider_fields: &[ProviderField],
) -> Vec<&'a ArgumentMapping> {
    let mut required: Vec<&ArgumentMapping> = Vec::new();
    for mapping in mappings {
        if required.contains(&mapping) {
            continue;
        }
        let applies = provider_fields.iter().any(|field| {
            field.provider == mapping.provider_ref()
                && path_is_covered(&field.provider_field, &mapping.target_arg_path)
        });
        if applies {
            required.push(mapping);
        }
    }
    required
}

fn path_is_covered(provider_field: &str, target_arg_path: &str) -> bool {
    provider_field == target_arg_path
        || provider_field
            .strip_prefix(target_arg_path)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Binds each required mapping to the argument AST node carrying its source
/// argument. Variable references are replaced with the literal value supplied
/// in the request, when one is; only string, int, float and boolean kinds are
/// accepted.
pub(crate) fn extract_required_arguments(
    required: &[&ArgumentMapping],
    collected: &[CollectedArgument],
    variables: &Map<String, serde_json::Value>,
) -> Result<Vec<ArgumentBinding>, FederationError> {
    let mut bindings = Vec::new();
    for mapping in required {
        let Some(argument) = collected
            .iter()
            .find(|argument| argument.name == mapping.source_arg_name)
        else {
            tracing::debug!(
                source_arg = %mapping.source_arg_name,
                "required argument mapping has no matching argument in the query"
            );
            continue;
        };
        let value = match argument.value.as_ref() {
            Value::Variable(name) => match variables.get(name.as_str()) {
                Some(json) => Node::new(json_literal(name.as_str(), json)?),
                // Unsupplied variables pass through untouched.
                None => argument.value.clone(),
            },
            _ => argument.value.clone(),
        };
        bindings.push(ArgumentBinding {
            mapping: (*mapping).clone(),
            value,
        });
    }
    Ok(bindings)
}

fn json_literal(variable: &str, value: &serde_json::Value) -> Result<Value, FederationError> {
    let unsupported = |kind| FederationError::UnsupportedArgumentKind {
        variable: variable.to_owned(),
        kind,
    };
    match value {
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                let int = i32::try_from(int).map_err(|_| unsupported("64-bit integer"))?;
                Ok(Value::Int(int.into()))
            } else if let Some(float) = n.as_f64() {
                Ok(Value::Float(float.into()))
            } else {
                Err(unsupported("number"))
            }
        }
        serde_json::Value::Null => Err(unsupported("null")),
        serde_json::Value::Array(_) => Err(unsupported("list")),
        serde_json::Value::Object(_) => Err(unsupported("object")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn mapping(source: &str, target_path: &str, target_name: &str) -> ArgumentMapping {
        ArgumentMapping {
            provider_key: "drp".to_owned(),
            schema_id: "drp-v1".to_owned(),
            source_arg_name: source.to_owned(),
            target_arg_path: target_path.to_owned(),
            target_arg_name: target_name.to_owned(),
        }
    }

    fn provider_field(path: &str) -> ProviderField {
        ProviderField {
            provider: ProviderRef::new("drp", "drp-v1"),
            provider_field: path.to_owned(),
        }
    }

    #[test]
    fn mapping_is_required_when_a_path_is_covered() {
        let mappings = vec![mapping("nic", "person", "nic")];
        let fields = vec![provider_field("person.fullName")];
        assert_eq!(find_required_mappings(&mappings, &fields).len(), 1);

        let fields = vec![provider_field("personal.fullName")];
        assert!(find_required_mappings(&mappings, &fields).is_empty());

        let fields = vec![provider_field("person")];
        assert_eq!(find_required_mappings(&mappings, &fields).len(), 1);
    }

    #[test]
    fn mapping_for_another_provider_is_not_required() {
        let mut other = mapping("nic", "person", "nic");
        other.provider_key = "dmt".to_owned();
        let fields = vec![provider_field("person.fullName")];
        assert!(find_required_mappings(&[other], &fields).is_empty());
    }

    #[test]
    fn duplicate_mappings_are_deduplicated() {
        let mappings = vec![mapping("nic", "person", "nic"), mapping("nic", "person", "nic")];
        let fields = vec![provider_field("person.fullName")];
        assert_eq!(find_required_mappings(&mappings, &fields).len(), 1);
    }

    #[test]
    fn variables_substitute_literal_values() {
        let mapping = mapping("nic", "person", "nic");
        let required = vec![&mapping];
        let collected = vec![CollectedArgument {
            name: "nic".to_owned(),
            value: Node::new(Value::Variable(apollo_compiler::name!("nic"))),
        }];
        let mut variables = Map::new();
        variables.insert("nic".to_owned(), json!("199512345678"));
        let bindings = extract_required_arguments(&required, &collected, &variables).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings[0].value.as_ref(),
            &Value::String("199512345678".to_owned())
        );
    }

    #[test]
    fn scalar_kinds_are_translated() {
        assert_eq!(json_literal("v", &json!(true)).unwrap(), Value::Boolean(true));
        assert_eq!(json_literal("v", &json!(7)).unwrap(), Value::Int(7.into()));
        assert!(matches!(json_literal("v", &json!(2.5)).unwrap(), Value::Float(_)));
    }

    #[test]
    fn non_scalar_variable_kinds_are_rejected() {
        for value in [json!(null), json!([1, 2]), json!({"a": 1})] {
            let err = json_literal("owner", &value).unwrap_err();
            assert!(matches!(
                err,
                FederationError::UnsupportedArgumentKind { ref variable, .. } if variable == "owner"
            ));
        }
    }

    #[test]
    fn unsupplied_variables_pass_through() {
        let mapping = mapping("nic", "person", "nic");
        let required = vec![&mapping];
        let collected = vec![CollectedArgument {
            name: "nic".to_owned(),
            value: Node::new(Value::Variable(apollo_compiler::name!("nic"))),
        }];
        let bindings = extract_required_arguments(&required, &collected, &Map::new()).unwrap();
        assert!(matches!(bindings[0].value.as_ref(), Value::Variable(_)));
    }
}
