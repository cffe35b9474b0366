//! The unified schema is the single GraphQL SDL presented to consumers.
//! [`UnifiedSchema`] wraps the parsed `apollo_compiler::Schema` together with
//! the original SDL text and its checksum; parsed instances are shared across
//! request tasks behind an `Arc` and are never mutated.

use apollo_compiler::Schema;
use apollo_compiler::ast::FieldDefinition;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::Component;
use sha2::Digest;
use sha2::Sha256;

use crate::error::FederationError;

mod compat;
mod source_info;

pub use compat::Change;
pub use compat::ChangeKind;
pub use compat::CompatibilityReport;
pub use compat::check_compatibility;
pub use source_info::ProviderRef;
pub use source_info::SOURCE_INFO_DIRECTIVE_NAME;
pub use source_info::SourceInfo;

#[derive(Debug)]
pub struct UnifiedSchema {
    schema: Schema,
    sdl: String,
    checksum: String,
}

impl UnifiedSchema {
    /// Parses the unified SDL. The `@sourceInfo` directive definition is
    /// injected when the document does not define it, so stored SDL may omit
    /// it. Parsing is lenient; full validation is not required for planning.
    pub fn parse(sdl: &str) -> Result<Self, FederationError> {
        let schema = parse_schema(sdl)?;
        let schema = if schema
            .directive_definitions
            .contains_key(source_info::SOURCE_INFO_DIRECTIVE_NAME)
        {
            schema
        } else {
            parse_schema(&format!(
                "{}\n{sdl}",
                source_info::SOURCE_INFO_DIRECTIVE_DEFINITION
            ))?
        };
        Ok(UnifiedSchema {
            schema,
            sdl: sdl.to_owned(),
            checksum: sdl_checksum(sdl),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The SDL text exactly as supplied, served on the public SDL endpoint.
    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn root_query_type(&self) -> Result<&str, FederationError> {
        self.schema
            .root_operation(OperationType::Query)
            .map(|name| name.as_str())
            .ok_or_else(|| FederationError::InvalidSchema {
                message: "the unified schema does not define a query root type".to_owned(),
            })
    }

    /// Resolves a field definition by enclosing type name. Absent definitions
    /// are skipped by the planner, so this is an `Option`, not an error.
    pub fn type_field(&self, type_name: &str, field_name: &str) -> Option<&Component<FieldDefinition>> {
        self.schema.type_field(type_name, field_name).ok()
    }
}

fn parse_schema(sdl: &str) -> Result<Schema, FederationError> {
    Schema::parse(sdl, "unified.graphql").map_err(|with_errors| FederationError::InvalidSchema {
        message: with_errors.errors.to_string(),
    })
}

/// Hex-encoded sha-256 of the SDL text, stored on every schema record.
pub fn sdl_checksum(sdl: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sdl.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type Query { personInfo(nic: String!): PersonInfo }
        type PersonInfo {
          fullName: String @sourceInfo(providerKey: "drp", providerField: "person.fullName", schemaId: "drp-v1")
        }
    "#;

    #[test]
    fn injects_source_info_definition_when_absent() {
        let schema = UnifiedSchema::parse(SDL).unwrap();
        assert!(schema
            .schema()
            .directive_definitions
            .contains_key(SOURCE_INFO_DIRECTIVE_NAME));
        assert_eq!(schema.root_query_type().unwrap(), "Query");
    }

    #[test]
    fn keeps_an_existing_definition() {
        let sdl = format!(
            "directive @sourceInfo(providerKey: String!, providerField: String!, schemaId: String!) on FIELD_DEFINITION\n{SDL}"
        );
        let schema = UnifiedSchema::parse(&sdl).unwrap();
        assert_eq!(schema.sdl(), sdl);
    }

    #[test]
    fn field_lookup_is_optional() {
        let schema = UnifiedSchema::parse(SDL).unwrap();
        assert!(schema.type_field("PersonInfo", "fullName").is_some());
        assert!(schema.type_field("PersonInfo", "unknown").is_none());
        assert!(schema.type_field("Unknown", "fullName").is_none());
    }

    #[test]
    fn checksum_is_stable_sha256() {
        let schema = UnifiedSchema::parse(SDL).unwrap();
        assert_eq!(schema.checksum(), sdl_checksum(SDL));
        assert_eq!(schema.checksum().len(), 64);
        assert_ne!(sdl_checksum("type Query { a: Int }"), sdl_checksum(SDL));
    }
}
