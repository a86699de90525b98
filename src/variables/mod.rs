//! ClusterClass variables
//!
//! A ClusterClass declares variables with schemas; a Cluster sets values,
//! optionally overridden per worker group. Resolution is always default
//! first, then validate, so validation sees exactly what extensions will.

pub mod builtin;
pub mod defaulting;
pub mod validation;
pub mod values;

pub use builtin::Builtins;
pub use defaulting::{default_cluster_variables, overlay_variables};
pub use validation::{validate_cluster_class_variables, VARIABLE_TYPES};
pub use values::{validate_cluster_variables, validate_variable_overrides};

use crate::crd::{ClusterClassVariable, ClusterVariable};
use crate::field::{FieldErrorList, FieldPath};

/// Default and validate a set of values in one step
///
/// Returns the resolved set, or every defaulting and validation error.
pub fn resolve_variables(
    values: &[ClusterVariable],
    class_variables: &[ClusterClassVariable],
    path: &FieldPath,
) -> Result<Vec<ClusterVariable>, FieldErrorList> {
    let (resolved, mut errs) = default_cluster_variables(values, class_variables, path);
    errs.append(validate_cluster_variables(&resolved, class_variables, path));
    if errs.is_empty() {
        Ok(resolved)
    } else {
        Err(errs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::VariableSchema;
    use serde_json::json;

    fn cpu() -> ClusterClassVariable {
        ClusterClassVariable {
            name: "cpu".to_string(),
            required: true,
            schema: VariableSchema {
                open_api_v3_schema: serde_json::from_value(
                    json!({"type": "integer", "default": 1, "maximum": 8}),
                )
                .unwrap(),
            },
        }
    }

    fn path() -> FieldPath {
        FieldPath::new(["spec", "topology", "variables"])
    }

    #[test]
    fn required_variable_is_satisfied_by_its_default() {
        let resolved = resolve_variables(&[], &[cpu()], &path()).unwrap();
        assert_eq!(resolved, vec![ClusterVariable::new("cpu", json!(1))]);
    }

    #[test]
    fn out_of_range_value_fails_resolution() {
        let values = vec![ClusterVariable::new("cpu", json!(32))];
        let errs = resolve_variables(&values, &[cpu()], &path()).unwrap_err();
        assert_eq!(errs.len(), 1);
    }
}
