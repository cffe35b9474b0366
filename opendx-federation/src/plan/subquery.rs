//! Construction of provider-level query documents.
//!
//! Provider field paths are grouped by `(providerKey, schemaId)`; each group
//! becomes a fresh `ast::Document` whose selection set mirrors the dot-paths,
//! with shared prefixes merged into shared selection sets. The incoming query
//! AST is never mutated.

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use indexmap::IndexMap;

use crate::error::FederationError;
use crate::plan::ProviderField;
use crate::plan::arguments::ArgumentBinding;
use crate::schema::ProviderRef;

#[derive(Debug, Default)]
struct PathTreeNode {
    children: IndexMap<String, PathTreeNode>,
}

impl PathTreeNode {
    fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.') {
            node = node.children.entry(segment.to_owned()).or_default();
        }
    }

    /// Every accumulated dot-path present in the tree.
    fn paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (segment, child) in &self.children {
            let path = join_path(prefix, segment);
            child.paths(&path, out);
            out.push(path);
        }
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_owned()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// One sub-query per distinct provider referenced by the plan, in traversal
/// order. Identical provider paths collapse so that a field mapped twice is
/// fetched once.
pub(crate) fn build_provider_queries(
    provider_fields: &[ProviderField],
    bindings: &[ArgumentBinding],
) -> Result<IndexMap<ProviderRef, ast::Document>, FederationError> {
    let mut groups: IndexMap<ProviderRef, Vec<&str>> = IndexMap::new();
    for field in provider_fields {
        let paths = groups.entry(field.provider.clone()).or_default();
        if !paths.contains(&field.provider_field.as_str()) {
            paths.push(&field.provider_field);
        }
    }

    let mut documents = IndexMap::new();
    for (provider, paths) in groups {
        let mut root = PathTreeNode::default();
        for path in paths {
            root.insert(path);
        }
        let arguments = arguments_by_path(&root, &provider, bindings)?;
        let selection_set = build_selection_set(&root, "", &arguments)?;
        let mut document = ast::Document::new();
        document
            .definitions
            .push(ast::Definition::OperationDefinition(Node::new(
                ast::OperationDefinition {
                    operation_type: OperationType::Query,
                    name: None,
                    variables: Vec::new(),
                    directives: Default::default(),
                    selection_set,
                },
            )));
        documents.insert(provider, document);
    }
    Ok(documents)
}

/// Resolves, per binding, the tree node the argument attaches to: the node
/// whose accumulated path equals `target_arg_path`, or failing that the
/// deepest node whose path prefixes it. Bindings for other providers or with
/// no covering node are left off this document.
fn arguments_by_path(
    root: &PathTreeNode,
    provider: &ProviderRef,
    bindings: &[ArgumentBinding],
) -> Result<IndexMap<String, Vec<Node<ast::Argument>>>, FederationError> {
    let mut node_paths = Vec::new();
    root.paths("", &mut node_paths);

    let mut by_path: IndexMap<String, Vec<Node<ast::Argument>>> = IndexMap::new();
    for binding in bindings {
        if &binding.mapping.provider_ref() != provider {
            continue;
        }
        let target = &binding.mapping.target_arg_path;
        let attach_at = if node_paths.iter().any(|path| path == target) {
            Some(target.clone())
        } else {
            node_paths
                .iter()
                .filter(|path| {
                    target
                        .strip_prefix(path.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
                })
                .max_by_key(|path| path.len())
                .cloned()
        };
        let Some(path) = attach_at else {
            tracing::debug!(
                target = %target,
                provider = %provider,
                "no sub-query node covers the argument target path"
            );
            continue;
        };
        let argument = ast::Argument {
            name: Name::new(&binding.mapping.target_arg_name)?,
            value: binding.value.clone(),
        };
        by_path.entry(path).or_default().push(Node::new(argument));
    }
    Ok(by_path)
}

fn build_selection_set(
    node: &PathTreeNode,
    prefix: &str,
    arguments: &IndexMap<String, Vec<Node<ast::Argument>>>,
) -> Result<Vec<ast::Selection>, FederationError> {
    let mut selections = Vec::new();
    for (segment, child) in &node.children {
        let path = join_path(prefix, segment);
        let field = ast::Field {
            alias: None,
            name: Name::new(segment)?,
            arguments: arguments.get(&path).cloned().unwrap_or_default(),
            directives: Default::default(),
            selection_set: build_selection_set(child, &path, arguments)?,
        };
        selections.push(ast::Selection::Field(Node::new(field)));
    }
    Ok(selections)
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ast::Value;

    use super::*;
    use crate::plan::arguments::ArgumentMapping;

    fn field(provider: &str, schema_id: &str, path: &str) -> ProviderField {
        ProviderField {
            provider: ProviderRef::new(provider, schema_id),
            provider_field: path.to_owned(),
        }
    }

    fn binding(target_path: &str, target_name: &str, value: Value) -> ArgumentBinding {
        ArgumentBinding {
            mapping: ArgumentMapping {
                provider_key: "drp".to_owned(),
                schema_id: "drp-v1".to_owned(),
                source_arg_name: "src".to_owned(),
                target_arg_path: target_path.to_owned(),
                target_arg_name: target_name.to_owned(),
            },
            value: Node::new(value),
        }
    }

    fn rendered(document: &ast::Document) -> String {
        document.serialize().no_indent().to_string()
    }

    fn expected(text: &str) -> String {
        rendered(&ast::Document::parse(text, "expected.graphql").unwrap())
    }

    #[test]
    fn shared_prefixes_merge_into_shared_selection_sets() {
        let fields = vec![
            field("drp", "drp-v1", "person.fullName"),
            field("drp", "drp-v1", "person.address.city"),
            field("drp", "drp-v1", "person.address.street"),
        ];
        let documents = build_provider_queries(&fields, &[]).unwrap();
        assert_eq!(documents.len(), 1);
        let document = &documents[&ProviderRef::new("drp", "drp-v1")];
        assert_eq!(
            rendered(document),
            expected("query { person { fullName address { city street } } }")
        );
    }

    #[test]
    fn one_document_per_distinct_provider() {
        let fields = vec![
            field("drp", "drp-v1", "person.fullName"),
            field("dmt", "dmt-v1", "vehicle.getVehicleInfos.data.make"),
            field("drp", "drp-v1", "person.birthDate"),
        ];
        let documents = build_provider_queries(&fields, &[]).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(
            rendered(&documents[&ProviderRef::new("dmt", "dmt-v1")]),
            expected("query { vehicle { getVehicleInfos { data { make } } } }")
        );
    }

    #[test]
    fn duplicate_provider_paths_collapse() {
        let fields = vec![
            field("drp", "drp-v1", "person.fullName"),
            field("drp", "drp-v1", "person.fullName"),
        ];
        let documents = build_provider_queries(&fields, &[]).unwrap();
        assert_eq!(
            rendered(&documents[&ProviderRef::new("drp", "drp-v1")]),
            expected("query { person { fullName } }")
        );
    }

    #[test]
    fn arguments_attach_at_the_target_path() {
        let fields = vec![field("drp", "drp-v1", "person.fullName")];
        let bindings = vec![binding("person", "nic", Value::String("199512345678".into()))];
        let documents = build_provider_queries(&fields, &bindings).unwrap();
        assert_eq!(
            rendered(&documents[&ProviderRef::new("drp", "drp-v1")]),
            expected(r#"query { person(nic: "199512345678") { fullName } }"#)
        );
    }

    #[test]
    fn argument_for_a_missing_node_falls_back_to_the_deepest_prefix() {
        let fields = vec![field("drp", "drp-v1", "person.fullName")];
        let bindings = vec![binding(
            "person.lookup",
            "nic",
            Value::String("199512345678".into()),
        )];
        let documents = build_provider_queries(&fields, &bindings).unwrap();
        assert_eq!(
            rendered(&documents[&ProviderRef::new("drp", "drp-v1")]),
            expected(r#"query { person(nic: "199512345678") { fullName } }"#)
        );
    }

    #[test]
    fn bindings_for_other_providers_are_ignored() {
        let fields = vec![field("dmt", "dmt-v1", "vehicle.data")];
        let bindings = vec![binding("vehicle", "nic", Value::String("x".into()))];
        let documents = build_provider_queries(&fields, &bindings).unwrap();
        assert_eq!(
            rendered(&documents[&ProviderRef::new("dmt", "dmt-v1")]),
            expected("query { vehicle { data } }")
        );
    }
}
