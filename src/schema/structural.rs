//! Structural schema checks
//!
//! A structural schema declares a type at every level and only uses the
//! keywords that make sense for that type. These are the rules the API
//! server enforces on CRD schemas, restricted to the keywords
//! [`JsonSchemaProps`] models.

use regex::Regex;

use crate::crd::JsonSchemaProps;
use crate::field::{FieldError, FieldErrorList, FieldPath};

use super::defaulting::apply_defaults;
use super::validation::{type_matches, validate_value};
use super::SCHEMA_TYPES;

/// Check that a schema is structural
pub fn validate_structural(schema: &JsonSchemaProps, path: &FieldPath) -> FieldErrorList {
    let mut errs = FieldErrorList::new();
    check_node(schema, path, &mut errs);
    errs
}

fn check_node(schema: &JsonSchemaProps, path: &FieldPath, errs: &mut FieldErrorList) {
    let type_ = schema.type_.as_str();
    if type_.is_empty() {
        errs.push(FieldError::required(
            &path.child("type"),
            "must not be empty for specified schema",
        ));
    } else if !SCHEMA_TYPES.contains(&type_) {
        errs.push(FieldError::not_supported(
            &path.child("type"),
            format!("\"{type_}\""),
            SCHEMA_TYPES,
        ));
    }

    let is_object = type_ == "object";
    let is_array = type_ == "array";
    let is_string = type_ == "string";
    let is_numeric = type_ == "number" || type_ == "integer";

    if !is_object {
        forbid(!schema.properties.is_empty(), path, "properties", "object", errs);
        forbid(!schema.required.is_empty(), path, "required", "object", errs);
    }
    if !is_array {
        forbid(schema.items.is_some(), path, "items", "array", errs);
        forbid(schema.max_items.is_some(), path, "maxItems", "array", errs);
        forbid(schema.min_items.is_some(), path, "minItems", "array", errs);
        forbid(schema.unique_items, path, "uniqueItems", "array", errs);
    } else if schema.items.is_none() {
        errs.push(FieldError::required(&path.child("items"), "must be specified for arrays"));
    }
    if !is_string {
        forbid(schema.max_length.is_some(), path, "maxLength", "string", errs);
        forbid(schema.min_length.is_some(), path, "minLength", "string", errs);
        forbid(schema.pattern.is_some(), path, "pattern", "string", errs);
    }
    if !is_numeric {
        forbid(schema.maximum.is_some(), path, "maximum", "number or integer", errs);
        forbid(schema.minimum.is_some(), path, "minimum", "number or integer", errs);
        forbid(schema.exclusive_maximum, path, "exclusiveMaximum", "number or integer", errs);
        forbid(schema.exclusive_minimum, path, "exclusiveMinimum", "number or integer", errs);
    }

    if schema.exclusive_maximum && schema.maximum.is_none() {
        errs.push(FieldError::required(
            &path.child("maximum"),
            "must be set when exclusiveMaximum is true",
        ));
    }
    if schema.exclusive_minimum && schema.minimum.is_none() {
        errs.push(FieldError::required(
            &path.child("minimum"),
            "must be set when exclusiveMinimum is true",
        ));
    }
    if let (Some(min), Some(max)) = (schema.minimum, schema.maximum) {
        if min > max {
            errs.push(FieldError::invalid(
                &path.child("minimum"),
                min,
                "must not be greater than maximum",
            ));
        }
    }
    if let (Some(min), Some(max)) = (schema.min_length, schema.max_length) {
        if min > max {
            errs.push(FieldError::invalid(
                &path.child("minLength"),
                min,
                "must not be greater than maxLength",
            ));
        }
    }
    if let (Some(min), Some(max)) = (schema.min_items, schema.max_items) {
        if min > max {
            errs.push(FieldError::invalid(
                &path.child("minItems"),
                min,
                "must not be greater than maxItems",
            ));
        }
    }

    if let Some(pattern) = &schema.pattern {
        if let Err(e) = Regex::new(pattern) {
            errs.push(FieldError::invalid(
                &path.child("pattern"),
                format!("\"{pattern}\""),
                format!("must be a valid regular expression: {e}"),
            ));
        }
    }

    if SCHEMA_TYPES.contains(&type_) {
        for (i, member) in schema.enum_.iter().enumerate() {
            let allowed_null = member.is_null() && schema.nullable;
            if !allowed_null && !type_matches(member, type_) {
                errs.push(FieldError::invalid(
                    &path.child("enum").index(i),
                    member,
                    format!("must be of type {type_}"),
                ));
            }
        }
    }

    for name in &schema.required {
        if !schema.properties.is_empty() && !schema.properties.contains_key(name) {
            errs.push(FieldError::invalid(
                &path.child("required"),
                format!("\"{name}\""),
                "must be declared in properties",
            ));
        }
    }

    for (name, prop) in &schema.properties {
        check_node(prop, &path.child("properties").key(name.as_str()), errs);
    }
    if let Some(items) = &schema.items {
        check_node(items, &path.child("items"), errs);
    }
}

fn forbid(set: bool, path: &FieldPath, keyword: &str, type_: &str, errs: &mut FieldErrorList) {
    if set {
        errs.push(FieldError::forbidden(
            &path.child(keyword),
            format!("must only be used with type {type_}"),
        ));
    }
}

/// Check that every default in a schema is a valid value for its node
///
/// Each default is first walked with the defaults nested below it, matching
/// what the value will look like once applied.
pub fn validate_defaults(schema: &JsonSchemaProps, path: &FieldPath) -> FieldErrorList {
    let mut errs = FieldErrorList::new();
    check_defaults(schema, path, &mut errs);
    errs
}

fn check_defaults(schema: &JsonSchemaProps, path: &FieldPath, errs: &mut FieldErrorList) {
    if let Some(default) = &schema.default {
        let mut effective = default.clone();
        apply_defaults(&mut effective, schema);
        errs.append(validate_value(&effective, schema, &path.child("default")));
    }
    for (name, prop) in &schema.properties {
        check_defaults(prop, &path.child("properties").key(name.as_str()), errs);
    }
    if let Some(items) = &schema.items {
        check_defaults(items, &path.child("items"), errs);
    }
}
