//! Validation of the variable values a Cluster sets

use std::collections::{HashMap, HashSet};

use crate::crd::{ClusterClassVariable, ClusterVariable};
use crate::field::{FieldError, FieldErrorList, FieldPath};
use crate::schema::validation::validate_value;

/// Validate resolved variable values against the class declarations
///
/// Every required variable must have a value, every value must name a
/// declared variable, names must be unique, and each value must satisfy its
/// schema.
pub fn validate_cluster_variables(
    values: &[ClusterVariable],
    class_variables: &[ClusterClassVariable],
    path: &FieldPath,
) -> FieldErrorList {
    let mut seen = HashSet::new();
    let mut errs = validate_entries(values, class_variables, path, &mut seen);

    for variable in class_variables.iter().filter(|v| v.required) {
        if !seen.contains(variable.name.as_str()) {
            errs.push(FieldError::required(
                path,
                format!("required variable \"{}\" must be set", variable.name),
            ));
        }
    }

    errs
}

/// Validate a worker group's overrides on their own
///
/// Same checks as [`validate_cluster_variables`] minus required values, which
/// the Cluster's values satisfy. Errors point at the override's own index.
pub fn validate_variable_overrides(
    overrides: &[ClusterVariable],
    class_variables: &[ClusterClassVariable],
    path: &FieldPath,
) -> FieldErrorList {
    validate_entries(overrides, class_variables, path, &mut HashSet::new())
}

fn validate_entries<'a>(
    values: &'a [ClusterVariable],
    class_variables: &[ClusterClassVariable],
    path: &FieldPath,
    seen: &mut HashSet<&'a str>,
) -> FieldErrorList {
    let mut errs = FieldErrorList::new();
    let declared: HashMap<&str, &ClusterClassVariable> = class_variables
        .iter()
        .map(|v| (v.name.as_str(), v))
        .collect();

    for (i, value) in values.iter().enumerate() {
        let entry = path.index(i);
        if !seen.insert(value.name.as_str()) {
            errs.push(FieldError::duplicate(
                &entry.child("name"),
                format!("\"{}\"", value.name),
            ));
            continue;
        }
        let Some(variable) = declared.get(value.name.as_str()) else {
            errs.push(FieldError::invalid(
                &entry.child("name"),
                format!("\"{}\"", value.name),
                "variable is not defined in the ClusterClass",
            ));
            continue;
        };
        errs.append(validate_value(
            &value.value,
            &variable.schema.open_api_v3_schema,
            &entry.child("value"),
        ));
    }
    errs
}
