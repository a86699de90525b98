//! Variable declarations (on ClusterClass) and values (on Cluster)

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A variable a ClusterClass accepts
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClassVariable {
    /// Variable name; must be unique within the class
    pub name: String,

    /// Whether every Cluster must provide (or default) a value
    #[serde(default)]
    pub required: bool,

    /// Schema constraining the value
    pub schema: VariableSchema,
}

/// Wrapper holding the OpenAPI v3 schema of a variable
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VariableSchema {
    /// The schema itself
    #[serde(rename = "openAPIV3Schema")]
    #[schemars(schema_with = "super::arbitrary_json")]
    pub open_api_v3_schema: JsonSchemaProps,
}

/// Subset of OpenAPI v3 used to declare variables
///
/// Only the scalar types are accepted at the top level of a variable, but
/// `properties` and `items` are modeled so nested defaults are computed
/// structurally.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JsonSchemaProps {
    /// JSON type (string, number, integer, boolean, object, array)
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub type_: String,

    /// Format hint (not enforced)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether JSON null is an accepted value
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,

    /// Value used when none is provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_: Vec<Value>,

    /// Upper numeric bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Whether `maximum` itself is excluded
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_maximum: bool,

    /// Lower numeric bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Whether `minimum` itself is excluded
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_minimum: bool,

    /// Maximum string length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,

    /// Minimum string length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,

    /// Regular expression strings must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Maximum number of array items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,

    /// Minimum number of array items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,

    /// Whether array items must be distinct
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique_items: bool,

    /// Schema of array items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchemaProps>>,

    /// Schemas of object properties
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, JsonSchemaProps>,

    /// Properties that must be present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl JsonSchemaProps {
    /// Schema of the given type with nothing else set
    pub fn typed(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            ..Default::default()
        }
    }
}

/// A variable value set on a Cluster topology
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ClusterVariable {
    /// Name of the variable
    pub name: String,

    /// Value; may be any JSON including null
    #[schemars(schema_with = "super::arbitrary_json")]
    pub value: Value,
}

impl ClusterVariable {
    /// Create a variable value
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
