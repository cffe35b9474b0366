//! The query planner walks an incoming query against the active unified
//! schema, extracts `@sourceInfo` bindings and arguments, and derives one
//! provider-scoped sub-query per upstream together with the source-schema
//! map the composer uses to re-assemble provider data.

use apollo_compiler::ast;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Map;

use crate::error::FederationError;
use crate::schema::ProviderRef;
use crate::schema::SourceInfo;
use crate::schema::UnifiedSchema;

pub(crate) mod arguments;
mod subquery;

pub use arguments::ArgumentBinding;
pub use arguments::ArgumentMapping;

use arguments::CollectedArgument;

/// Flat provider-field entry, the unit handed to the policy decision point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderField {
    pub provider: ProviderRef,
    pub provider_field: String,
}

/// Where a unified field's data comes from. For array-typed fields,
/// `provider_field` locates the source array and `element_fields` maps each
/// selected sub-field to its path relative to one array element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSchemaInfo {
    pub provider: ProviderRef,
    pub provider_field: String,
    pub is_array: bool,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub element_fields: IndexMap<String, SourceSchemaInfo>,
}

/// Request-scoped output of planning; dropped when the response is returned.
#[derive(Debug)]
pub struct QueryPlan {
    /// The parsed original query, reused by the composer. Never mutated.
    pub document: ast::Document,
    pub provider_fields: Vec<ProviderField>,
    pub sub_queries: IndexMap<ProviderRef, ast::Document>,
    /// Keyed by unified dot-path.
    pub schema_info_map: IndexMap<String, SourceSchemaInfo>,
    pub arg_bindings: Vec<ArgumentBinding>,
}

impl QueryPlan {
    /// The owner identifier the consent engine is asked about: the first
    /// extracted argument with a scalar value.
    pub fn owner_identifier(&self) -> Option<String> {
        self.arg_bindings.iter().find_map(|binding| {
            match binding.value.as_ref() {
                ast::Value::String(s) => Some(s.clone()),
                ast::Value::Int(i) => Some(i.to_string()),
                ast::Value::Float(f) => Some(f.to_string()),
                ast::Value::Boolean(b) => Some(b.to_string()),
                _ => None,
            }
        })
    }
}

pub struct Planner<'a> {
    schema: &'a UnifiedSchema,
    mappings: &'a [ArgumentMapping],
}

#[derive(Default)]
struct Accumulator {
    provider_fields: Vec<ProviderField>,
    arguments: Vec<CollectedArgument>,
}

impl<'a> Planner<'a> {
    pub fn new(schema: &'a UnifiedSchema, mappings: &'a [ArgumentMapping]) -> Self {
        Planner { schema, mappings }
    }

    pub fn plan(
        &self,
        query: &str,
        variables: &Map<String, serde_json::Value>,
    ) -> Result<QueryPlan, FederationError> {
        let document = ast::Document::parse(query, "query.graphql").map_err(|with_errors| {
            FederationError::InvalidQuery {
                message: with_errors.errors.to_string(),
            }
        })?;
        let operation = single_query_operation(&document)?;

        let mut accumulator = Accumulator::default();
        let root_type = self.schema.root_query_type()?;
        let schema_info_map =
            self.visit_selection_set(root_type, &operation.selection_set, &mut accumulator)?;

        let required = arguments::find_required_mappings(self.mappings, &accumulator.provider_fields);
        let arg_bindings =
            arguments::extract_required_arguments(&required, &accumulator.arguments, variables)?;
        let sub_queries =
            subquery::build_provider_queries(&accumulator.provider_fields, &arg_bindings)?;

        Ok(QueryPlan {
            document,
            provider_fields: accumulator.provider_fields,
            sub_queries,
            schema_info_map,
            arg_bindings,
        })
    }

    /// Returns the source-schema entries for this selection set, keyed by
    /// dot-path relative to it. Parents either bubble the entries up with a
    /// prefix (plain objects) or fold them into an array entry's
    /// `element_fields` (list-typed fields).
    fn visit_selection_set(
        &self,
        parent_type: &str,
        selections: &[ast::Selection],
        accumulator: &mut Accumulator,
    ) -> Result<IndexMap<String, SourceSchemaInfo>, FederationError> {
        let mut entries = IndexMap::new();
        for selection in selections {
            let ast::Selection::Field(field) = selection else {
                tracing::debug!("skipping non-field selection");
                continue;
            };
            let Some(definition) = self.schema.type_field(parent_type, &field.name) else {
                tracing::debug!(
                    parent_type = %parent_type,
                    field = %field.name,
                    "field has no definition in the unified schema, skipping"
                );
                continue;
            };
            for argument in &field.arguments {
                accumulator.arguments.push(CollectedArgument {
                    name: argument.name.to_string(),
                    value: argument.value.clone(),
                });
            }
            let location = format!("{parent_type}.{}", field.name);
            let source_info = SourceInfo::from_field_definition(&location, definition)?;
            let is_list = definition.ty.is_list();

            if field.selection_set.is_empty() {
                let Some(info) = source_info else {
                    tracing::debug!(field = %location, "field carries no @sourceInfo, ignored");
                    continue;
                };
                accumulator.provider_fields.push(ProviderField {
                    provider: info.provider_ref(),
                    provider_field: info.provider_field.clone(),
                });
                entries.insert(
                    field.name.to_string(),
                    SourceSchemaInfo {
                        provider: info.provider_ref(),
                        provider_field: info.provider_field,
                        is_array: is_list,
                        element_fields: IndexMap::new(),
                    },
                );
                continue;
            }

            let element_type = definition.ty.inner_named_type();
            if is_list {
                // The array path itself comes from this field's annotation;
                // without it the subtree cannot be composed.
                let Some(info) = source_info else {
                    tracing::debug!(field = %location, "array field carries no @sourceInfo, ignored");
                    continue;
                };
                accumulator.provider_fields.push(ProviderField {
                    provider: info.provider_ref(),
                    provider_field: info.provider_field.clone(),
                });
                let children =
                    self.visit_selection_set(element_type, &field.selection_set, accumulator)?;
                let element_fields = children
                    .into_iter()
                    .map(|(key, mut child)| {
                        child.provider_field = last_segment(&child.provider_field).to_owned();
                        (key, child)
                    })
                    .collect();
                entries.insert(
                    field.name.to_string(),
                    SourceSchemaInfo {
                        provider: info.provider_ref(),
                        provider_field: info.provider_field,
                        is_array: true,
                        element_fields,
                    },
                );
            } else {
                if let Some(info) = source_info {
                    accumulator.provider_fields.push(ProviderField {
                        provider: info.provider_ref(),
                        provider_field: info.provider_field,
                    });
                }
                let children =
                    self.visit_selection_set(element_type, &field.selection_set, accumulator)?;
                for (key, child) in children {
                    entries.insert(format!("{}.{key}", field.name), child);
                }
            }
        }
        Ok(entries)
    }
}

fn single_query_operation(
    document: &ast::Document,
) -> Result<&apollo_compiler::Node<ast::OperationDefinition>, FederationError> {
    let mut operations = document.definitions.iter().filter_map(|definition| {
        match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        }
    });
    let operation = operations.next().ok_or(FederationError::NotSingleOperation)?;
    if operations.next().is_some() {
        return Err(FederationError::NotSingleOperation);
    }
    match operation.operation_type {
        ast::OperationType::Query => Ok(operation),
        ast::OperationType::Mutation => Err(FederationError::UnsupportedOperation {
            operation: "mutation".to_owned(),
        }),
        ast::OperationType::Subscription => Err(FederationError::UnsupportedOperation {
            operation: "subscription".to_owned(),
        }),
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}
