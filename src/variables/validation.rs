//! Validation of the variables a ClusterClass declares

use std::collections::HashSet;

use crate::crd::ClusterClassVariable;
use crate::field::{FieldError, FieldErrorList, FieldPath};
use crate::schema::structural::{validate_defaults, validate_structural};
use crate::BUILTIN_VARIABLE_PREFIX;

/// Types a variable may declare at its top level
pub const VARIABLE_TYPES: &[&str] = &["string", "number", "integer", "boolean"];

/// Validate a ClusterClass's variable declarations
///
/// Names are checked first, then uniqueness, then each schema's type,
/// structure and defaults. All problems are returned together.
pub fn validate_cluster_class_variables(
    variables: &[ClusterClassVariable],
    path: &FieldPath,
) -> FieldErrorList {
    let mut errs = FieldErrorList::new();

    for (i, variable) in variables.iter().enumerate() {
        errs.append(validate_name(&variable.name, &path.index(i).child("name")));
    }

    let mut seen = HashSet::new();
    for (i, variable) in variables.iter().enumerate() {
        if !seen.insert(variable.name.as_str()) {
            errs.push(FieldError::duplicate(
                &path.index(i).child("name"),
                format!("\"{}\"", variable.name),
            ));
        }
    }

    for (i, variable) in variables.iter().enumerate() {
        errs.append(validate_schema(variable, &path.index(i)));
    }

    errs
}

fn validate_name(name: &str, path: &FieldPath) -> FieldErrorList {
    let mut errs = FieldErrorList::new();
    if name.is_empty() {
        errs.push(FieldError::required(path, "variable name must be defined"));
    } else if name.starts_with(BUILTIN_VARIABLE_PREFIX) {
        errs.push(FieldError::invalid(
            path,
            format!("\"{name}\""),
            format!("variable name cannot start with \"{BUILTIN_VARIABLE_PREFIX}\""),
        ));
    }
    errs
}

fn validate_schema(variable: &ClusterClassVariable, path: &FieldPath) -> FieldErrorList {
    let schema_path = path.child("schema").child("openAPIV3Schema");
    let schema = &variable.schema.open_api_v3_schema;
    let mut errs = FieldErrorList::new();

    let type_path = schema_path.child("type");
    match schema.type_.as_str() {
        "" => errs.push(FieldError::required(&type_path, "type cannot be empty")),
        "null" => errs.push(FieldError::forbidden(
            &type_path,
            "type cannot be set to null, use nullable as an alternative",
        )),
        t if !VARIABLE_TYPES.contains(&t) => {
            errs.push(FieldError::not_supported(&type_path, format!("\"{t}\""), VARIABLE_TYPES))
        }
        _ => {}
    }
    if !errs.is_empty() {
        return errs;
    }

    errs.append(validate_structural(schema, &schema_path));
    if errs.is_empty() {
        errs.append(validate_defaults(schema, &schema_path));
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{JsonSchemaProps, VariableSchema};
    use serde_json::json;

    fn variable(name: &str, schema: serde_json::Value) -> ClusterClassVariable {
        ClusterClassVariable {
            name: name.to_string(),
            required: false,
            schema: VariableSchema {
                open_api_v3_schema: serde_json::from_value(schema).unwrap(),
            },
        }
    }

    fn path() -> FieldPath {
        FieldPath::new(["spec", "variables"])
    }

    #[test]
    fn valid_declarations_pass() {
        let vars = vec![
            variable("cpu", json!({"type": "integer", "minimum": 1, "default": 2})),
            variable("region", json!({"type": "string", "enum": ["us-east", "us-west"]})),
            variable("proxy", json!({"type": "string", "nullable": true})),
        ];
        assert!(validate_cluster_class_variables(&vars, &path()).is_empty());
    }

    #[test]
    fn empty_and_reserved_names_are_rejected() {
        let vars = vec![
            variable("", json!({"type": "string"})),
            variable("builtinThing", json!({"type": "string"})),
        ];
        let rendered = validate_cluster_class_variables(&vars, &path()).to_string();
        assert!(rendered.contains("spec.variables[0].name: Required value"));
        assert!(rendered.contains("spec.variables[1].name: Invalid value: \"builtinThing\""));
    }

    /// Every repeat after the first is reported at its own index.
    #[test]
    fn duplicate_names_are_reported_per_repeat() {
        let vars = vec![
            variable("cpu", json!({"type": "integer"})),
            variable("cpu", json!({"type": "integer"})),
            variable("cpu", json!({"type": "integer"})),
        ];
        let errs = validate_cluster_class_variables(&vars, &path());
        assert_eq!(errs.len(), 2);
        let rendered = errs.to_string();
        assert!(rendered.contains("spec.variables[1].name: Duplicate value"));
        assert!(rendered.contains("spec.variables[2].name: Duplicate value"));
    }

    #[test]
    fn type_rules() {
        let vars = vec![
            variable("a", json!({})),
            variable("b", json!({"type": "null"})),
            variable("c", json!({"type": "object"})),
        ];
        let rendered = validate_cluster_class_variables(&vars, &path()).to_string();
        assert!(rendered.contains("spec.variables[0].schema.openAPIV3Schema.type: Required value"));
        assert!(rendered.contains("spec.variables[1].schema.openAPIV3Schema.type: Forbidden"));
        assert!(rendered.contains("use nullable"));
        let expected =
            "spec.variables[2].schema.openAPIV3Schema.type: Unsupported value: \"object\"";
        assert!(rendered.contains(expected));
    }

    #[test]
    fn invalid_default_is_rejected() {
        let vars = vec![variable("cpu", json!({"type": "integer", "maximum": 4, "default": 8}))];
        let rendered = validate_cluster_class_variables(&vars, &path()).to_string();
        assert!(rendered
            .starts_with("spec.variables[0].schema.openAPIV3Schema.default: Invalid value: 8"));
    }

    #[test]
    fn misplaced_keywords_are_structural_errors() {
        let mut schema = JsonSchemaProps::typed("boolean");
        schema.pattern = Some("^x$".to_string());
        let vars = vec![ClusterClassVariable {
            name: "flag".to_string(),
            required: true,
            schema: VariableSchema {
                open_api_v3_schema: schema,
            },
        }];
        let rendered = validate_cluster_class_variables(&vars, &path()).to_string();
        assert!(rendered.contains("openAPIV3Schema.pattern: Forbidden"));
    }
}
