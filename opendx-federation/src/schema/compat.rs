//! SDL-against-SDL compatibility report. The checker advises; callers decide
//! whether activation gates on `compatible`.

use apollo_compiler::Name;
use apollo_compiler::ast::FieldDefinition;
use apollo_compiler::schema::ExtendedType;
use serde::Serialize;

use crate::error::FederationError;
use crate::schema::UnifiedSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    // Breaking.
    TypeRemoved,
    FieldRemoved,
    FieldTypeChanged,
    ArgumentRemoved,
    ArgumentTypeChanged,
    RequiredArgumentAdded,
    // Additive.
    TypeAdded,
    FieldAdded,
    OptionalArgumentAdded,
}

impl ChangeKind {
    pub fn is_breaking(&self) -> bool {
        matches!(
            self,
            ChangeKind::TypeRemoved
                | ChangeKind::FieldRemoved
                | ChangeKind::FieldTypeChanged
                | ChangeKind::ArgumentRemoved
                | ChangeKind::ArgumentTypeChanged
                | ChangeKind::RequiredArgumentAdded
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub kind: ChangeKind,
    /// `Type`, `Type.field` or `Type.field(arg:)`.
    pub location: String,
    pub detail: String,
}

#[derive(Debug, Default, Serialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub breaking_changes: Vec<Change>,
    pub additive_changes: Vec<Change>,
    pub warnings: Vec<String>,
}

struct Checker {
    breaking: Vec<Change>,
    additive: Vec<Change>,
    warnings: Vec<String>,
}

pub fn check_compatibility(
    old_sdl: &str,
    new_sdl: &str,
) -> Result<CompatibilityReport, FederationError> {
    let old = UnifiedSchema::parse(old_sdl)?;
    let new = UnifiedSchema::parse(new_sdl)?;
    let mut checker = Checker {
        breaking: Vec::new(),
        additive: Vec::new(),
        warnings: Vec::new(),
    };
    checker.compare_types(old.schema(), new.schema());
    checker.collect_deprecations(new.schema());
    Ok(CompatibilityReport {
        compatible: checker.breaking.is_empty(),
        breaking_changes: checker.breaking,
        additive_changes: checker.additive,
        warnings: checker.warnings,
    })
}

impl Checker {
    fn record(&mut self, kind: ChangeKind, location: impl Into<String>, detail: impl Into<String>) {
        let change = Change {
            kind,
            location: location.into(),
            detail: detail.into(),
        };
        if kind.is_breaking() {
            self.breaking.push(change);
        } else {
            self.additive.push(change);
        }
    }

    fn compare_types(
        &mut self,
        old: &apollo_compiler::Schema,
        new: &apollo_compiler::Schema,
    ) {
        for (name, old_type) in &old.types {
            if old_type.is_built_in() {
                continue;
            }
            let Some(new_type) = new.types.get(name) else {
                self.record(ChangeKind::TypeRemoved, name.as_str(), "type removed");
                continue;
            };
            self.compare_type(name, old_type, new_type);
        }
        for (name, new_type) in &new.types {
            if !new_type.is_built_in() && !old.types.contains_key(name) {
                self.record(ChangeKind::TypeAdded, name.as_str(), "new type");
            }
        }
    }

    fn compare_type(&mut self, name: &Name, old: &ExtendedType, new: &ExtendedType) {
        match (old, new) {
            (ExtendedType::Object(old), ExtendedType::Object(new)) => {
                self.compare_fields(name, old.fields.iter(), new.fields.iter());
            }
            (ExtendedType::Interface(old), ExtendedType::Interface(new)) => {
                self.compare_fields(name, old.fields.iter(), new.fields.iter());
            }
            (ExtendedType::InputObject(old), ExtendedType::InputObject(new)) => {
                for (field_name, old_field) in &old.fields {
                    let location = format!("{name}.{field_name}");
                    match new.fields.get(field_name) {
                        None => {
                            self.record(ChangeKind::FieldRemoved, location, "input field removed")
                        }
                        Some(new_field) if *old_field.ty != *new_field.ty => self.record(
                            ChangeKind::FieldTypeChanged,
                            location,
                            format!("was {}, now {}", old_field.ty, new_field.ty),
                        ),
                        Some(_) => {}
                    }
                }
                for (field_name, new_field) in &new.fields {
                    if old.fields.contains_key(field_name) {
                        continue;
                    }
                    let location = format!("{name}.{field_name}");
                    if new_field.is_required() {
                        self.record(
                            ChangeKind::RequiredArgumentAdded,
                            location,
                            "new required input field",
                        );
                    } else {
                        self.record(ChangeKind::FieldAdded, location, "new input field");
                    }
                }
            }
            (ExtendedType::Enum(old), ExtendedType::Enum(new)) => {
                for value_name in old.values.keys() {
                    if !new.values.contains_key(value_name) {
                        self.record(
                            ChangeKind::FieldRemoved,
                            format!("{name}.{value_name}"),
                            "enum value removed",
                        );
                    }
                }
                for value_name in new.values.keys() {
                    if !old.values.contains_key(value_name) {
                        self.record(
                            ChangeKind::FieldAdded,
                            format!("{name}.{value_name}"),
                            "new enum value",
                        );
                    }
                }
            }
            (ExtendedType::Union(old), ExtendedType::Union(new)) => {
                let new_members: Vec<&str> =
                    new.members.iter().map(|m| m.name.as_str()).collect();
                let old_members: Vec<&str> =
                    old.members.iter().map(|m| m.name.as_str()).collect();
                for member in &old_members {
                    if !new_members.contains(member) {
                        self.record(
                            ChangeKind::FieldRemoved,
                            format!("{name}.{member}"),
                            "union member removed",
                        );
                    }
                }
                for member in &new_members {
                    if !old_members.contains(member) {
                        self.record(
                            ChangeKind::FieldAdded,
                            format!("{name}.{member}"),
                            "new union member",
                        );
                    }
                }
            }
            (ExtendedType::Scalar(_), ExtendedType::Scalar(_)) => {}
            _ => {
                self.record(
                    ChangeKind::TypeRemoved,
                    name.as_str(),
                    format!("type kind changed to {}", describe_kind(new)),
                );
                self.record(
                    ChangeKind::TypeAdded,
                    name.as_str(),
                    format!("new {} type", describe_kind(new)),
                );
            }
        }
    }

    fn compare_fields<'a>(
        &mut self,
        type_name: &Name,
        old_fields: impl Iterator<Item = (&'a Name, &'a apollo_compiler::schema::Component<FieldDefinition>)>,
        new_fields: impl Iterator<Item = (&'a Name, &'a apollo_compiler::schema::Component<FieldDefinition>)>,
    ) {
        let old_fields: Vec<_> = old_fields.collect();
        let new_fields: Vec<_> = new_fields.collect();
        for (field_name, old_field) in &old_fields {
            let location = format!("{type_name}.{field_name}");
            let Some((_, new_field)) = new_fields.iter().find(|(name, _)| name == field_name)
            else {
                self.record(ChangeKind::FieldRemoved, location, "field removed");
                continue;
            };
            if old_field.ty != new_field.ty {
                self.record(
                    ChangeKind::FieldTypeChanged,
                    location.clone(),
                    format!("was {}, now {}", old_field.ty, new_field.ty),
                );
            }
            self.compare_arguments(&location, old_field, new_field);
        }
        for (field_name, _) in &new_fields {
            if !old_fields.iter().any(|(name, _)| name == field_name) {
                self.record(
                    ChangeKind::FieldAdded,
                    format!("{type_name}.{field_name}"),
                    "new field",
                );
            }
        }
    }

    fn compare_arguments(
        &mut self,
        field_location: &str,
        old_field: &FieldDefinition,
        new_field: &FieldDefinition,
    ) {
        for old_arg in &old_field.arguments {
            let location = format!("{field_location}({}:)", old_arg.name);
            match new_field.argument_by_name(&old_arg.name) {
                None => self.record(ChangeKind::ArgumentRemoved, location, "argument removed"),
                Some(new_arg) if *old_arg.ty != *new_arg.ty => self.record(
                    ChangeKind::ArgumentTypeChanged,
                    location,
                    format!("was {}, now {}", old_arg.ty, new_arg.ty),
                ),
                Some(_) => {}
            }
        }
        for new_arg in &new_field.arguments {
            if old_field.argument_by_name(&new_arg.name).is_some() {
                continue;
            }
            let location = format!("{field_location}({}:)", new_arg.name);
            if new_arg.is_required() {
                self.record(
                    ChangeKind::RequiredArgumentAdded,
                    location,
                    "new required argument",
                );
            } else {
                self.record(
                    ChangeKind::OptionalArgumentAdded,
                    location,
                    "new optional argument",
                );
            }
        }
    }

    fn collect_deprecations(&mut self, schema: &apollo_compiler::Schema) {
        for (type_name, type_) in &schema.types {
            if type_.is_built_in() {
                continue;
            }
            if type_.directives().get("deprecated").is_some() {
                self.warnings.push(format!("{type_name} is marked @deprecated"));
            }
            let fields: Vec<(&Name, &apollo_compiler::ast::DirectiveList)> = match type_ {
                ExtendedType::Object(object) => object
                    .fields
                    .iter()
                    .map(|(name, field)| (name, &field.directives))
                    .collect(),
                ExtendedType::Interface(interface) => interface
                    .fields
                    .iter()
                    .map(|(name, field)| (name, &field.directives))
                    .collect(),
                ExtendedType::Enum(enum_) => enum_
                    .values
                    .iter()
                    .map(|(name, value)| (name, &value.directives))
                    .collect(),
                _ => Vec::new(),
            };
            for (field_name, directives) in fields {
                if directives.get("deprecated").is_some() {
                    self.warnings
                        .push(format!("{type_name}.{field_name} is marked @deprecated"));
                }
            }
        }
    }
}

fn describe_kind(type_: &ExtendedType) -> &'static str {
    match type_ {
        ExtendedType::Scalar(_) => "scalar",
        ExtendedType::Object(_) => "object",
        ExtendedType::Interface(_) => "interface",
        ExtendedType::Union(_) => "union",
        ExtendedType::Enum(_) => "enum",
        ExtendedType::InputObject(_) => "input object",
    }
}
