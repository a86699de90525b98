//! Resolving a Cluster's variable set from its values and the class schemas

use std::collections::{HashMap, HashSet};

use crate::crd::{ClusterClassVariable, ClusterVariable};
use crate::field::{FieldError, FieldErrorList, FieldPath};
use crate::schema::defaulting::default_for;

/// Default a Cluster's variables against the class declarations
///
/// The result holds every provided value in its original order, followed by
/// a defaulted value for each declared variable that was not provided and
/// has a default, in declaration order. Provided values are kept verbatim,
/// including explicit `null` and names the class does not declare. A name
/// provided more than once is reported and only its first value is kept.
pub fn default_cluster_variables(
    values: &[ClusterVariable],
    class_variables: &[ClusterClassVariable],
    path: &FieldPath,
) -> (Vec<ClusterVariable>, FieldErrorList) {
    let mut errs = FieldErrorList::new();
    let mut resolved = Vec::with_capacity(values.len().max(class_variables.len()));
    let mut provided = HashSet::new();

    for (i, value) in values.iter().enumerate() {
        if provided.insert(value.name.as_str()) {
            resolved.push(value.clone());
        } else {
            errs.push(FieldError::duplicate(
                &path.index(i).child("name"),
                format!("\"{}\"", value.name),
            ));
        }
    }

    for variable in class_variables {
        if provided.contains(variable.name.as_str()) {
            continue;
        }
        if let Some(value) = default_for(&variable.name, &variable.schema.open_api_v3_schema) {
            provided.insert(variable.name.as_str());
            resolved.push(ClusterVariable::new(variable.name.clone(), value));
        }
    }

    (resolved, errs)
}

/// Overlay per-group overrides onto Cluster-level values
///
/// Overrides replace values of the same name in place; overrides naming a
/// variable the Cluster does not set are appended in their own order.
pub fn overlay_variables(
    base: &[ClusterVariable],
    overrides: &[ClusterVariable],
) -> Vec<ClusterVariable> {
    let by_name: HashMap<&str, &ClusterVariable> =
        overrides.iter().map(|v| (v.name.as_str(), v)).collect();

    let mut merged: Vec<ClusterVariable> = base
        .iter()
        .map(|v| by_name.get(v.name.as_str()).copied().unwrap_or(v).clone())
        .collect();

    let base_names: HashSet<&str> = base.iter().map(|v| v.name.as_str()).collect();
    merged.extend(
        overrides
            .iter()
            .filter(|v| !base_names.contains(v.name.as_str()))
            .cloned(),
    );
    merged
}
