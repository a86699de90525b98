//! Structural schema handling over JSON values
//!
//! Variables are declared with a subset of OpenAPI v3 and their values are
//! plain `serde_json::Value` trees. Everything here is a pure function of a
//! [`JsonSchemaProps`] and a value:
//!
//! - [`structural`] checks that a schema is well-formed and unambiguous
//! - [`defaulting`] fills defaults through the declared shape
//! - [`validation`] checks a value against a schema
//!
//! The Kubernetes structural-schema rules only allow `type: object` at the
//! root, so single variables are wrapped into a one-property object schema
//! with [`wrap`] before being checked or defaulted.

pub mod defaulting;
pub mod structural;
pub mod validation;

use crate::crd::JsonSchemaProps;

/// JSON types a schema node may declare
pub const SCHEMA_TYPES: &[&str] = &["object", "array", "string", "number", "integer", "boolean"];

/// Wrap a schema as the only property of an object schema
pub fn wrap(property: &str, schema: &JsonSchemaProps) -> JsonSchemaProps {
    let mut wrapped = JsonSchemaProps::typed("object");
    wrapped
        .properties
        .insert(property.to_string(), schema.clone());
    wrapped
}

/// Name of the JSON type of a value, as used in error messages
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_nests_the_schema_under_one_property() {
        let wrapped = wrap("cpu", &JsonSchemaProps::typed("integer"));
        assert_eq!(wrapped.type_, "object");
        assert_eq!(wrapped.properties.len(), 1);
        assert_eq!(wrapped.properties["cpu"].type_, "integer");
    }

    #[test]
    fn json_type_names() {
        assert_eq!(json_type_name(&serde_json::json!(1)), "integer");
        assert_eq!(json_type_name(&serde_json::json!(1.5)), "number");
        assert_eq!(json_type_name(&serde_json::json!(null)), "null");
    }
}
