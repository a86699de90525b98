//! Structural defaulting
//!
//! Follows the API server's rules: a property default is applied when the
//! property is absent, or when it is `null` and the property is not
//! nullable. Defaults are applied top-down, so a defaulted object is itself
//! walked for nested defaults.

use serde_json::{Map, Value};

use crate::crd::JsonSchemaProps;

use super::wrap;

/// Apply schema defaults to a value in place
pub fn apply_defaults(value: &mut Value, schema: &JsonSchemaProps) {
    match value {
        Value::Object(map) => default_object(map, schema),
        Value::Array(items) => {
            let Some(item_schema) = schema.items.as_deref() else {
                return;
            };
            for item in items.iter_mut() {
                if item.is_null() && !item_schema.nullable {
                    if let Some(default) = &item_schema.default {
                        *item = default.clone();
                    }
                }
                apply_defaults(item, item_schema);
            }
        }
        _ => {}
    }
}

fn default_object(map: &mut Map<String, Value>, schema: &JsonSchemaProps) {
    for (name, prop) in &schema.properties {
        let Some(default) = &prop.default else {
            continue;
        };
        let needs_default = match map.get(name) {
            None => true,
            Some(Value::Null) => !prop.nullable,
            Some(_) => false,
        };
        if needs_default {
            map.insert(name.clone(), default.clone());
        }
    }

    for (name, child) in map.iter_mut() {
        if let Some(prop) = schema.properties.get(name) {
            apply_defaults(child, prop);
        }
    }
}

/// Compute the defaulted value of a variable that has no value at all
///
/// The schema is wrapped as the only property of an object so the
/// property-level defaulting rules apply. Returns `None` when the schema
/// declares no top-level default.
pub fn default_for(name: &str, schema: &JsonSchemaProps) -> Option<Value> {
    let wrapped = wrap(name, schema);
    let mut holder = Value::Object(Map::new());
    apply_defaults(&mut holder, &wrapped);
    match holder {
        Value::Object(mut map) => map.remove(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(v: Value) -> JsonSchemaProps {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn scalar_default_is_used_when_absent() {
        let s = schema(json!({"type": "integer", "default": 1}));
        assert_eq!(default_for("cpu", &s), Some(json!(1)));
    }

    #[test]
    fn no_default_means_no_value() {
        let s = schema(json!({"type": "string"}));
        assert_eq!(default_for("region", &s), None);
    }

    /// A defaulted object is walked again so its own nested defaults land.
    #[test]
    fn nested_defaults_fill_a_defaulted_object() {
        let s = schema(json!({
            "type": "object",
            "default": {"host": "proxy.local"},
            "properties": {
                "host": {"type": "string"},
                "port": {"type": "integer", "default": 3128}
            }
        }));
        assert_eq!(
            default_for("proxy", &s),
            Some(json!({"host": "proxy.local", "port": 3128}))
        );
    }

    #[test]
    fn null_is_replaced_only_when_not_nullable() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "a": {"type": "string", "default": "x"},
                "b": {"type": "string", "default": "y", "nullable": true}
            }
        }));
        let mut value = json!({"a": null, "b": null});
        apply_defaults(&mut value, &s);
        assert_eq!(value, json!({"a": "x", "b": null}));
    }

    #[test]
    fn array_items_are_defaulted() {
        let s = schema(json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "weight": {"type": "integer", "default": 10}
                }
            }
        }));
        let mut value = json!([{"name": "a"}, {"name": "b", "weight": 3}]);
        apply_defaults(&mut value, &s);
        assert_eq!(
            value,
            json!([{"name": "a", "weight": 10}, {"name": "b", "weight": 3}])
        );
    }

    #[test]
    fn present_values_are_never_overwritten() {
        let s = schema(json!({
            "type": "object",
            "properties": {"a": {"type": "string", "default": "x"}}
        }));
        let mut value = json!({"a": "mine"});
        apply_defaults(&mut value, &s);
        assert_eq!(value, json!({"a": "mine"}));
    }
}
