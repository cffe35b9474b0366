//! The `@sourceInfo` annotation binds a unified field to the provider field
//! that backs it. `providerField` is a dot-path into the provider's response
//! tree, e.g. `"vehicle.getVehicleInfos.data.registrationNumber"`.

use std::fmt;

use apollo_compiler::ast::Directive;
use apollo_compiler::ast::FieldDefinition;
use apollo_compiler::ast::Value;
use serde::Deserialize;
use serde::Serialize;

use crate::error::FederationError;

pub const SOURCE_INFO_DIRECTIVE_NAME: &str = "sourceInfo";

/// Definition injected into parsed unified schemas that do not carry their own.
pub(crate) const SOURCE_INFO_DIRECTIVE_DEFINITION: &str = "directive @sourceInfo(\
 providerKey: String!, providerField: String!, schemaId: String!\
) on FIELD_DEFINITION";

/// The authoritative routing key for everything downstream: registry lookups,
/// sub-query grouping and federation-response entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderRef {
    pub provider_key: String,
    pub schema_id: String,
}

impl ProviderRef {
    pub fn new(provider_key: impl Into<String>, schema_id: impl Into<String>) -> Self {
        ProviderRef {
            provider_key: provider_key.into(),
            schema_id: schema_id.into(),
        }
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_key, self.schema_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub provider_key: String,
    pub provider_field: String,
    pub schema_id: String,
}

impl SourceInfo {
    /// Reads the `@sourceInfo` directive off a unified field definition.
    /// Fields without the directive take no part in planning or composition.
    pub fn from_field_definition(
        location: &str,
        definition: &FieldDefinition,
    ) -> Result<Option<Self>, FederationError> {
        let Some(directive) = definition.directives.get(SOURCE_INFO_DIRECTIVE_NAME) else {
            return Ok(None);
        };
        Self::from_directive(location, directive).map(Some)
    }

    fn from_directive(location: &str, directive: &Directive) -> Result<Self, FederationError> {
        Ok(SourceInfo {
            provider_key: string_argument(location, directive, "providerKey")?,
            provider_field: string_argument(location, directive, "providerField")?,
            schema_id: string_argument(location, directive, "schemaId")?,
        })
    }

    pub fn provider_ref(&self) -> ProviderRef {
        ProviderRef::new(self.provider_key.clone(), self.schema_id.clone())
    }

    /// The last dot-segment of the provider path, used for fields selected
    /// inside an array element where paths are relative to the element.
    pub fn relative_provider_field(&self) -> &str {
        self.provider_field
            .rsplit('.')
            .next()
            .unwrap_or(&self.provider_field)
    }
}

fn string_argument(
    location: &str,
    directive: &Directive,
    name: &str,
) -> Result<String, FederationError> {
    directive
        .specified_argument_by_name(name)
        .and_then(|value| match value.as_ref() {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .ok_or_else(|| FederationError::MalformedSourceInfo {
            location: location.to_owned(),
            argument: name.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;

    use super::*;

    fn field_definition(
        sdl: &str,
        ty: &str,
        field: &str,
    ) -> apollo_compiler::schema::Component<FieldDefinition> {
        let schema = Schema::parse(sdl, "test.graphql").unwrap();
        schema.type_field(ty, field).unwrap().clone()
    }

    const SDL: &str = r#"
        directive @sourceInfo(providerKey: String!, providerField: String!, schemaId: String!) on FIELD_DEFINITION
        type Query { person: Person }
        type Person {
          fullName: String @sourceInfo(providerKey: "drp", providerField: "person.fullName", schemaId: "drp-v1")
          nickname: String
          age: Int @sourceInfo(providerKey: "drp", schemaId: "drp-v1")
        }
    "#;

    #[test]
    fn extracts_all_three_arguments() {
        let definition = field_definition(SDL, "Person", "fullName");
        let info = SourceInfo::from_field_definition("Person.fullName", &definition)
            .unwrap()
            .unwrap();
        assert_eq!(info.provider_key, "drp");
        assert_eq!(info.provider_field, "person.fullName");
        assert_eq!(info.schema_id, "drp-v1");
        assert_eq!(info.provider_ref(), ProviderRef::new("drp", "drp-v1"));
        assert_eq!(info.relative_provider_field(), "fullName");
    }

    #[test]
    fn unannotated_field_yields_none() {
        let definition = field_definition(SDL, "Person", "nickname");
        assert!(SourceInfo::from_field_definition("Person.nickname", &definition)
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_argument_is_an_error() {
        let definition = field_definition(SDL, "Person", "age");
        let err = SourceInfo::from_field_definition("Person.age", &definition).unwrap_err();
        assert!(matches!(
            err,
            FederationError::MalformedSourceInfo { ref argument, .. } if argument == "providerField"
        ));
    }
}
