//! Value validation against a schema

use regex::Regex;
use serde_json::{Number, Value};

use crate::crd::JsonSchemaProps;
use crate::field::{FieldError, FieldErrorList, FieldPath};

use super::json_type_name;

/// Validate a value against a schema, collecting every violation
///
/// Objects with declared `properties` reject fields the schema does not
/// declare; objects without declared properties accept anything.
pub fn validate_value(value: &Value, schema: &JsonSchemaProps, path: &FieldPath) -> FieldErrorList {
    let mut errs = FieldErrorList::new();
    validate_into(value, schema, path, &mut errs);
    errs
}

fn validate_into(
    value: &Value,
    schema: &JsonSchemaProps,
    path: &FieldPath,
    errs: &mut FieldErrorList,
) {
    if value.is_null() {
        if !schema.nullable {
            errs.push(FieldError::invalid(path, "null", "must not be null"));
        }
        return;
    }

    if !schema.type_.is_empty() && !type_matches(value, &schema.type_) {
        errs.push(FieldError::invalid(
            path,
            value,
            format!("must be of type {}, got {}", schema.type_, json_type_name(value)),
        ));
        return;
    }

    if !schema.enum_.is_empty() && !schema.enum_.iter().any(|e| values_equal(e, value)) {
        let supported: Vec<String> = schema.enum_.iter().map(display_value).collect();
        let supported: Vec<&str> = supported.iter().map(String::as_str).collect();
        errs.push(FieldError::not_supported(path, value, &supported));
    }

    match value {
        Value::Number(n) => validate_number(n, schema, path, errs),
        Value::String(s) => validate_string(s, schema, path, errs),
        Value::Array(items) => validate_array(items, schema, path, errs),
        Value::Object(map) => {
            for required in &schema.required {
                if !map.contains_key(required) {
                    errs.push(FieldError::required(
                        &path.child(required.as_str()),
                        "required property is missing",
                    ));
                }
            }
            if schema.properties.is_empty() {
                return;
            }
            for (key, child) in map {
                match schema.properties.get(key) {
                    Some(prop) => validate_into(child, prop, &path.child(key.as_str()), errs),
                    None => errs.push(FieldError::invalid(
                        &path.child(key.as_str()),
                        child,
                        "field not declared in schema",
                    )),
                }
            }
        }
        _ => {}
    }
}

/// Whether a value has the given JSON schema type
pub fn type_matches(value: &Value, type_: &str) -> bool {
    match type_ {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.as_number().is_some_and(is_integral),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => false,
    }
}

/// Whole numbers, including ones written with a zero fraction (`3.0`)
fn is_integral(n: &Number) -> bool {
    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
}

/// JSON equality where 1 and 1.0 are the same number
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn validate_number(
    n: &Number,
    schema: &JsonSchemaProps,
    path: &FieldPath,
    errs: &mut FieldErrorList,
) {
    let Some(x) = n.as_f64() else { return };

    if let Some(max) = schema.maximum {
        if schema.exclusive_maximum && x >= max {
            errs.push(FieldError::invalid(path, n, format!("should be less than {max}")));
        } else if x > max {
            errs.push(FieldError::invalid(
                path,
                n,
                format!("should be less than or equal to {max}"),
            ));
        }
    }
    if let Some(min) = schema.minimum {
        if schema.exclusive_minimum && x <= min {
            errs.push(FieldError::invalid(path, n, format!("should be greater than {min}")));
        } else if x < min {
            errs.push(FieldError::invalid(
                path,
                n,
                format!("should be greater than or equal to {min}"),
            ));
        }
    }
}

fn validate_string(s: &str, schema: &JsonSchemaProps, path: &FieldPath, errs: &mut FieldErrorList) {
    let len = s.chars().count() as u64;
    if let Some(max) = schema.max_length {
        if len > max {
            errs.push(FieldError::invalid(
                path,
                format!("\"{s}\""),
                format!("may not be longer than {max}"),
            ));
        }
    }
    if let Some(min) = schema.min_length {
        if len < min {
            errs.push(FieldError::invalid(
                path,
                format!("\"{s}\""),
                format!("should be at least {min} chars long"),
            ));
        }
    }
    if let Some(pattern) = &schema.pattern {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(s) => errs.push(FieldError::invalid(
                path,
                format!("\"{s}\""),
                format!("should match '{pattern}'"),
            )),
            Ok(_) => {}
            Err(e) => errs.push(FieldError::invalid(
                path,
                format!("\"{pattern}\""),
                format!("invalid pattern: {e}"),
            )),
        }
    }
}

fn validate_array(
    items: &[Value],
    schema: &JsonSchemaProps,
    path: &FieldPath,
    errs: &mut FieldErrorList,
) {
    let len = items.len() as u64;
    if let Some(max) = schema.max_items {
        if len > max {
            errs.push(FieldError::invalid(
                path,
                len,
                format!("must have at most {max} items"),
            ));
        }
    }
    if let Some(min) = schema.min_items {
        if len < min {
            errs.push(FieldError::invalid(
                path,
                len,
                format!("must have at least {min} items"),
            ));
        }
    }
    if schema.unique_items {
        for (i, item) in items.iter().enumerate() {
            if items[..i].iter().any(|earlier| values_equal(earlier, item)) {
                errs.push(FieldError::duplicate(&path.index(i), item));
            }
        }
    }
    if let Some(item_schema) = &schema.items {
        for (i, item) in items.iter().enumerate() {
            validate_into(item, item_schema, &path.index(i), errs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path() -> FieldPath {
        FieldPath::new(["value"])
    }

    fn schema(v: Value) -> JsonSchemaProps {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn integers_accept_whole_numbers_only() {
        let s = schema(json!({"type": "integer"}));
        assert!(validate_value(&json!(3), &s, &path()).is_empty());
        assert!(validate_value(&json!(3.0), &s, &path()).is_empty());
        assert_eq!(validate_value(&json!(3.5), &s, &path()).len(), 1);
        assert_eq!(validate_value(&json!("3"), &s, &path()).len(), 1);
    }

    #[test]
    fn null_is_rejected_unless_nullable() {
        let s = schema(json!({"type": "string"}));
        assert_eq!(validate_value(&Value::Null, &s, &path()).len(), 1);

        let s = schema(json!({"type": "string", "nullable": true}));
        assert!(validate_value(&Value::Null, &s, &path()).is_empty());
    }

    #[test]
    fn enum_membership_is_enforced() {
        let s = schema(json!({"type": "string", "enum": ["us-east", "us-west"]}));
        assert!(validate_value(&json!("us-east"), &s, &path()).is_empty());

        let errs = validate_value(&json!("eu-central"), &s, &path());
        assert_eq!(errs.len(), 1);
        assert!(errs.to_string().contains("\"us-east\", \"us-west\""));
    }

    #[test]
    fn numeric_bounds_respect_exclusivity() {
        let s = schema(json!({
            "type": "number",
            "minimum": 0,
            "maximum": 10,
            "exclusiveMaximum": true
        }));
        assert!(validate_value(&json!(0), &s, &path()).is_empty());
        assert!(validate_value(&json!(9.99), &s, &path()).is_empty());
        assert_eq!(validate_value(&json!(10), &s, &path()).len(), 1);
        assert_eq!(validate_value(&json!(-1), &s, &path()).len(), 1);
    }

    #[test]
    fn string_length_and_pattern() {
        let s = schema(json!({
            "type": "string",
            "minLength": 2,
            "maxLength": 4,
            "pattern": "^[a-z]+$"
        }));
        assert!(validate_value(&json!("abc"), &s, &path()).is_empty());
        assert_eq!(validate_value(&json!("a"), &s, &path()).len(), 1);
        assert_eq!(validate_value(&json!("abcde"), &s, &path()).len(), 1);
        assert_eq!(validate_value(&json!("AB"), &s, &path()).len(), 1);
    }

    #[test]
    fn nested_objects_report_full_paths() {
        let s = schema(json!({
            "type": "object",
            "required": ["host"],
            "properties": {
                "host": {"type": "string"},
                "port": {"type": "integer", "maximum": 65535}
            }
        }));
        let errs = validate_value(&json!({"port": 70000, "extra": true}), &s, &path());
        let rendered = errs.to_string();
        assert_eq!(errs.len(), 3, "{rendered}");
        assert!(rendered.contains("value.host: Required value"));
        assert!(rendered.contains("value.port: Invalid value: 70000"));
        assert!(
            rendered.contains("value.extra: Invalid value: true: field not declared in schema")
        );
    }

    #[test]
    fn arrays_check_items_and_uniqueness() {
        let s = schema(json!({
            "type": "array",
            "maxItems": 3,
            "uniqueItems": true,
            "items": {"type": "string"}
        }));
        assert!(validate_value(&json!(["a", "b"]), &s, &path()).is_empty());

        let errs = validate_value(&json!(["a", "a", 1, "c"]), &s, &path());
        let rendered = errs.to_string();
        assert!(rendered.contains("must have at most 3 items"));
        assert!(rendered.contains("value[1]: Duplicate value"));
        assert!(rendered.contains("value[2]: Invalid value: 1: must be of type string"));
    }
}
