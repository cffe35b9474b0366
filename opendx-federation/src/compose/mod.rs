//! The response composer walks the original query in pre-order and writes
//! provider results back onto the query's field tree. Fields without a
//! source-schema entry, and providers that contributed no data, simply leave
//! their leaves absent; composition never fails a request.

use apollo_compiler::ast;
use indexmap::IndexMap;
use serde_json::Map;
use serde_json::Value;

use crate::plan::SourceSchemaInfo;
use crate::response::FederationResponse;

mod path;

pub use path::PathError;
pub use path::get_path;
pub use path::set_path;

pub fn compose(
    document: &ast::Document,
    schema_info_map: &IndexMap<String, SourceSchemaInfo>,
    federation: &FederationResponse,
) -> Value {
    let mut output = Value::Object(Map::new());
    for definition in &document.definitions {
        if let ast::Definition::OperationDefinition(operation) = definition {
            let mut stack = Vec::new();
            compose_selection_set(
                &operation.selection_set,
                &mut stack,
                schema_info_map,
                federation,
                &mut output,
            );
            break;
        }
    }
    output
}

fn compose_selection_set(
    selections: &[ast::Selection],
    stack: &mut Vec<String>,
    schema_info_map: &IndexMap<String, SourceSchemaInfo>,
    federation: &FederationResponse,
    output: &mut Value,
) {
    for selection in selections {
        let ast::Selection::Field(field) = selection else {
            continue;
        };
        stack.push(field.name.to_string());
        let unified_path = stack.join(".");
        if let Some(info) = schema_info_map.get(&unified_path) {
            let Some(data) = federation.data_for(&info.provider) else {
                tracing::debug!(
                    provider = %info.provider,
                    path = %unified_path,
                    "provider contributed no data, leaf left absent"
                );
                stack.pop();
                continue;
            };
            if let Some(value) = resolve_source(info, data) {
                set_path(output, &unified_path, value);
            }
        } else if !field.selection_set.is_empty() {
            compose_selection_set(&field.selection_set, stack, schema_info_map, federation, output);
        }
        stack.pop();
    }
}

/// Locates `info.provider_field` inside `context`. Scalar entries return the
/// located value as-is; array entries expand each source element into an
/// output object shaped by `element_fields`, preserving length and order.
fn resolve_source(info: &SourceSchemaInfo, context: &Value) -> Option<Value> {
    let located = match get_path(context, &info.provider_field) {
        Ok(value) => value,
        Err(error) => {
            tracing::debug!(%error, "provider value not found, leaf left absent");
            return None;
        }
    };
    if !info.is_array {
        return Some(located);
    }
    let Value::Array(items) = located else {
        tracing::debug!(
            path = %info.provider_field,
            "expected a list in the provider response, field skipped"
        );
        return None;
    };
    if info.element_fields.is_empty() {
        return Some(Value::Array(items));
    }
    let mut composed = Vec::with_capacity(items.len());
    for item in &items {
        let mut element = Value::Object(Map::new());
        for (sub_path, sub_info) in &info.element_fields {
            if let Some(value) = resolve_source(sub_info, item) {
                set_path(&mut element, sub_path, value);
            }
        }
        composed.push(element);
    }
    Some(Value::Array(composed))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::Map as JsonMap;
    use serde_json::json;

    use super::*;
    use crate::plan::Planner;
    use crate::response::GraphQLResponse;
    use crate::schema::ProviderRef;
    use crate::schema::UnifiedSchema;

    const SDL: &str = r#"
        type Query {
          personInfo(nic: String!): PersonInfo
        }
        type PersonInfo {
          fullName: String @sourceInfo(providerKey: "drp", providerField: "person.fullName", schemaId: "drp-v1")
          birthDate: String @sourceInfo(providerKey: "drp", providerField: "person.birthDate", schemaId: "drp-v1")
          ownedVehicles: [VehicleInfo] @sourceInfo(providerKey: "dmt", providerField: "vehicle.getVehicleInfos.data", schemaId: "dmt-v1")
        }
        type VehicleInfo {
          regNo: String @sourceInfo(providerKey: "dmt", providerField: "vehicle.getVehicleInfos.data.registrationNumber", schemaId: "dmt-v1")
          make: String @sourceInfo(providerKey: "dmt", providerField: "vehicle.getVehicleInfos.data.make", schemaId: "dmt-v1")
        }
    "#;

    fn plan_for(query: &str) -> crate::plan::QueryPlan {
        let schema = UnifiedSchema::parse(SDL).unwrap();
        Planner::new(&schema, &[]).plan(query, &JsonMap::new()).unwrap()
    }

    fn drp_response(data: Value) -> (ProviderRef, GraphQLResponse) {
        (ProviderRef::new("drp", "drp-v1"), GraphQLResponse::from_data(data))
    }

    #[test]
    fn composition_mirrors_the_query_shape() {
        let plan = plan_for("{ personInfo(nic: \"1\") { fullName birthDate } }");
        let mut federation = FederationResponse::new();
        let (provider, response) = drp_response(json!({
            "person": {"fullName": "Ada Lovelace", "birthDate": "1815-12-10"}
        }));
        federation.push(provider, response);

        let output = compose(&plan.document, &plan.schema_info_map, &federation);
        assert_eq!(
            output,
            json!({"personInfo": {"fullName": "Ada Lovelace", "birthDate": "1815-12-10"}})
        );
    }

    #[test]
    fn arrays_expand_each_source_element() {
        let plan = plan_for("{ personInfo(nic: \"1\") { ownedVehicles { regNo make } } }");
        let mut federation = FederationResponse::new();
        federation.push(
            ProviderRef::new("dmt", "dmt-v1"),
            GraphQLResponse::from_data(json!({
                "vehicle": {"getVehicleInfos": {"data": [
                    {"registrationNumber": "ABC123", "make": "Toyota"},
                    {"registrationNumber": "XYZ789", "make": "Honda"},
                ]}}
            })),
        );

        let output = compose(&plan.document, &plan.schema_info_map, &federation);
        assert_eq!(
            output,
            json!({"personInfo": {"ownedVehicles": [
                {"regNo": "ABC123", "make": "Toyota"},
                {"regNo": "XYZ789", "make": "Honda"},
            ]}})
        );
    }

    #[test]
    fn array_length_and_order_are_preserved_with_gaps() {
        let plan = plan_for("{ personInfo(nic: \"1\") { ownedVehicles { regNo make } } }");
        let mut federation = FederationResponse::new();
        federation.push(
            ProviderRef::new("dmt", "dmt-v1"),
            GraphQLResponse::from_data(json!({
                "vehicle": {"getVehicleInfos": {"data": [
                    {"registrationNumber": "ABC123"},
                    {"make": "Honda"},
                ]}}
            })),
        );

        let output = compose(&plan.document, &plan.schema_info_map, &federation);
        assert_eq!(
            output,
            json!({"personInfo": {"ownedVehicles": [
                {"regNo": "ABC123"},
                {"make": "Honda"},
            ]}})
        );
    }

    #[test]
    fn a_missing_provider_leaves_its_fields_absent() {
        let plan = plan_for("{ personInfo(nic: \"1\") { fullName ownedVehicles { regNo } } }");
        let mut federation = FederationResponse::new();
        let (provider, response) = drp_response(json!({"person": {"fullName": "Ada Lovelace"}}));
        federation.push(provider, response);

        let output = compose(&plan.document, &plan.schema_info_map, &federation);
        assert_eq!(output, json!({"personInfo": {"fullName": "Ada Lovelace"}}));
    }

    #[test]
    fn null_provider_subtrees_compose_to_nothing() {
        let plan = plan_for("{ personInfo(nic: \"1\") { fullName } }");
        let mut federation = FederationResponse::new();
        let (provider, response) = drp_response(json!({"person": null}));
        federation.push(provider, response);

        let output = compose(&plan.document, &plan.schema_info_map, &federation);
        assert_eq!(output, json!({}));
    }

    #[test]
    fn scalar_where_a_list_is_expected_is_skipped() {
        let plan = plan_for("{ personInfo(nic: \"1\") { ownedVehicles { regNo } } }");
        let mut federation = FederationResponse::new();
        federation.push(
            ProviderRef::new("dmt", "dmt-v1"),
            GraphQLResponse::from_data(json!({
                "vehicle": {"getVehicleInfos": {"data": "not-a-list"}}
            })),
        );

        let output = compose(&plan.document, &plan.schema_info_map, &federation);
        assert_eq!(output, json!({}));
    }

    #[test]
    fn an_empty_federation_response_composes_to_empty_data() {
        let plan = plan_for("{ personInfo(nic: \"1\") { fullName } }");
        let output = compose(&plan.document, &plan.schema_info_map, &FederationResponse::new());
        assert_eq!(output, json!({}));
    }
}
