//! Stateless ClusterClass checks
//!
//! Everything here looks at one or two ClusterClass specs and nothing else.
//! Checks that need live Clusters live in [`super::cluster_class`].

use std::collections::HashSet;

use crate::crd::{ClusterClass, ClusterClassSpec, ObjectReference};
use crate::field::{FieldError, FieldErrorList, FieldPath};
use crate::variables::validate_cluster_class_variables;

/// One place in a ClusterClass that holds a template reference
#[derive(Clone, Debug)]
pub struct TemplateSlot<'a> {
    /// JSON path segments of the `ref` object
    pub tokens: Vec<String>,
    /// The reference, if set
    pub reference: Option<&'a ObjectReference>,
}

impl<'a> TemplateSlot<'a> {
    fn new(tokens: &[&str], reference: Option<&'a ObjectReference>) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            reference,
        }
    }

    /// Field path of the `ref` object
    pub fn path(&self) -> FieldPath {
        self.tokens
            .iter()
            .fold(FieldPath::root(), |path, token| match token.parse::<usize>() {
                Ok(i) => path.index(i),
                Err(_) => path.child(token.as_str()),
            })
    }
}

/// Every template reference a ClusterClass holds
///
/// The control plane machine infrastructure slot is only present when the
/// class declares one.
pub fn template_slots(spec: &ClusterClassSpec) -> Vec<TemplateSlot<'_>> {
    let mut slots = vec![
        TemplateSlot::new(&["spec", "infrastructure", "ref"], spec.infrastructure.ref_.as_ref()),
        TemplateSlot::new(&["spec", "controlPlane", "ref"], spec.control_plane.ref_.as_ref()),
    ];
    if let Some(machine_infra) = &spec.control_plane.machine_infrastructure {
        slots.push(TemplateSlot::new(
            &["spec", "controlPlane", "machineInfrastructure", "ref"],
            machine_infra.ref_.as_ref(),
        ));
    }
    for (i, md) in spec.workers.machine_deployments.iter().enumerate() {
        let index = i.to_string();
        let prefix = ["spec", "workers", "machineDeployments", index.as_str(), "template"];
        let templates = [
            ("bootstrap", &md.template.bootstrap),
            ("infrastructure", &md.template.infrastructure),
        ];
        for (part, template) in templates {
            let mut tokens = prefix.to_vec();
            tokens.extend([part, "ref"]);
            slots.push(TemplateSlot::new(&tokens, template.ref_.as_ref()));
        }
    }
    slots
}

/// Check one reference for completeness and namespace
pub fn validate_reference(
    reference: Option<&ObjectReference>,
    class_namespace: &str,
    path: &FieldPath,
) -> FieldErrorList {
    let mut errs = FieldErrorList::new();
    let Some(reference) = reference else {
        errs.push(FieldError::required(path, "template reference must be set"));
        return errs;
    };

    if reference.api_version.is_empty() {
        errs.push(FieldError::required(&path.child("apiVersion"), "apiVersion must be set"));
    } else if reference.group().is_empty() {
        errs.push(FieldError::invalid(
            &path.child("apiVersion"),
            format!("\"{}\"", reference.api_version),
            "apiVersion must include an API group",
        ));
    }
    if reference.kind.is_empty() {
        errs.push(FieldError::required(&path.child("kind"), "kind must be set"));
    }
    if reference.name.is_empty() {
        errs.push(FieldError::required(&path.child("name"), "name must be set"));
    }
    if let Some(ns) = reference.namespace.as_deref() {
        if !ns.is_empty() && ns != class_namespace {
            errs.push(FieldError::invalid(
                &path.child("namespace"),
                format!("\"{ns}\""),
                "must be empty or match the ClusterClass namespace",
            ));
        }
    }
    errs
}

/// Worker class names must be set and unique
pub fn validate_worker_classes(spec: &ClusterClassSpec) -> FieldErrorList {
    let path = FieldPath::new(["spec", "workers", "machineDeployments"]);
    let mut errs = FieldErrorList::new();
    let mut seen = HashSet::new();
    for (i, md) in spec.workers.machine_deployments.iter().enumerate() {
        let class_path = path.index(i).child("class");
        if md.class.is_empty() {
            errs.push(FieldError::required(&class_path, "class name must be set"));
        } else if !seen.insert(md.class.as_str()) {
            errs.push(FieldError::duplicate(&class_path, format!("\"{}\"", md.class)));
        }
    }
    errs
}

/// Checks every ClusterClass must pass on its own
pub fn validate_class(class: &ClusterClass) -> FieldErrorList {
    let namespace = class.metadata.namespace.as_deref().unwrap_or_default();
    let mut errs = FieldErrorList::new();
    for slot in template_slots(&class.spec) {
        errs.append(validate_reference(slot.reference, namespace, &slot.path()));
    }
    errs.append(validate_worker_classes(&class.spec));
    errs.append(validate_cluster_class_variables(
        &class.spec.variables,
        &FieldPath::new(["spec", "variables"]),
    ));
    errs
}

/// Worker classes present in `old` but gone from `new`
pub fn removed_worker_classes(old: &ClusterClassSpec, new: &ClusterClassSpec) -> Vec<String> {
    old.workers
        .machine_deployments
        .iter()
        .filter(|md| new.machine_deployment_class(&md.class).is_none())
        .map(|md| md.class.clone())
        .collect()
}

/// Which changes between two versions of a ClusterClass are allowed
///
/// Injected into the validator so deployments can tighten or relax the
/// rules without touching the admission flow.
pub trait CompatibilityPolicy: Send + Sync {
    /// Report every incompatible change from `old` to `new`
    fn check(&self, old: &ClusterClassSpec, new: &ClusterClassSpec) -> FieldErrorList;
}

/// Templates may be renamed or re-versioned but never change API group or
/// kind, since live objects were generated from the old ones
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceCompatibility;

impl ReferenceCompatibility {
    fn compare(
        old: Option<&ObjectReference>,
        new: Option<&ObjectReference>,
        path: &FieldPath,
    ) -> Option<FieldError> {
        let (old, new) = (old?, new?);
        if old.group() == new.group() && old.kind == new.kind {
            return None;
        }
        Some(FieldError::forbidden(
            path,
            format!(
                "cannot change template from {} {} to {} {}",
                old.group(),
                old.kind,
                new.group(),
                new.kind
            ),
        ))
    }
}

impl CompatibilityPolicy for ReferenceCompatibility {
    fn check(&self, old: &ClusterClassSpec, new: &ClusterClassSpec) -> FieldErrorList {
        let mut errs = FieldErrorList::new();
        let spec = FieldPath::new(["spec"]);

        errs.extend(Self::compare(
            old.infrastructure.ref_.as_ref(),
            new.infrastructure.ref_.as_ref(),
            &spec.child("infrastructure").child("ref"),
        ));
        errs.extend(Self::compare(
            old.control_plane.ref_.as_ref(),
            new.control_plane.ref_.as_ref(),
            &spec.child("controlPlane").child("ref"),
        ));
        errs.extend(Self::compare(
            old.control_plane_machine_infrastructure(),
            new.control_plane_machine_infrastructure(),
            &spec.child("controlPlane").child("machineInfrastructure").child("ref"),
        ));

        let workers = spec.child("workers").child("machineDeployments");
        for (i, new_md) in new.workers.machine_deployments.iter().enumerate() {
            let Some(old_md) = old.machine_deployment_class(&new_md.class) else {
                continue;
            };
            let template = workers.index(i).child("template");
            errs.extend(Self::compare(
                old_md.template.bootstrap.ref_.as_ref(),
                new_md.template.bootstrap.ref_.as_ref(),
                &template.child("bootstrap").child("ref"),
            ));
            errs.extend(Self::compare(
                old_md.template.infrastructure.ref_.as_ref(),
                new_md.template.infrastructure.ref_.as_ref(),
                &template.child("infrastructure").child("ref"),
            ));
        }
        errs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterClassVariable, JsonSchemaProps, MachineDeploymentClass, VariableSchema};
    use crate::test_fixtures::{cluster_class, reference, INFRA_API, NS};

    fn rendered(errs: &FieldErrorList) -> Vec<String> {
        errs.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn slots_cover_every_template_reference() {
        let class = cluster_class();
        let paths: Vec<String> = template_slots(&class.spec)
            .iter()
            .map(|s| s.path().to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "spec.infrastructure.ref",
                "spec.controlPlane.ref",
                "spec.controlPlane.machineInfrastructure.ref",
                "spec.workers.machineDeployments[0].template.bootstrap.ref",
                "spec.workers.machineDeployments[0].template.infrastructure.ref",
            ]
        );
    }

    /// Story: A well-formed class passes every stateless check
    #[test]
    fn story_quick_start_class_is_valid() {
        assert!(validate_class(&cluster_class()).is_empty());
    }

    #[test]
    fn references_need_group_kind_and_name() {
        let path = FieldPath::new(["spec", "infrastructure", "ref"]);
        let reference = ObjectReference {
            api_version: "v1".to_string(),
            ..Default::default()
        };

        let errs = validate_reference(Some(&reference), NS, &path);

        assert_eq!(errs.len(), 3);
        let messages = rendered(&errs);
        assert!(messages[0].contains("must include an API group"));
        assert!(messages[1].starts_with("spec.infrastructure.ref.kind"));
        assert!(messages[2].starts_with("spec.infrastructure.ref.name"));
    }

    #[test]
    fn references_cannot_point_into_other_namespaces() {
        let mut reference = reference(INFRA_API, "DockerClusterTemplate", "quick-start");
        reference.namespace = Some("elsewhere".to_string());
        let errs = validate_reference(Some(&reference), NS, &FieldPath::root().child("ref"));
        assert!(rendered(&errs)[0].contains("match the ClusterClass namespace"));

        reference.namespace = Some(NS.to_string());
        assert!(validate_reference(Some(&reference), NS, &FieldPath::root()).is_empty());
    }

    #[test]
    fn missing_references_are_required() {
        let mut class = cluster_class();
        class.spec.control_plane.ref_ = None;
        let errs = validate_class(&class);
        assert_eq!(
            rendered(&errs),
            vec!["spec.controlPlane.ref: Required value: template reference must be set"]
        );
    }

    /// Story: Two worker classes with the same name are ambiguous for Clusters
    #[test]
    fn story_duplicate_worker_classes_are_rejected() {
        let mut class = cluster_class();
        let copy = class.spec.workers.machine_deployments[0].clone();
        class.spec.workers.machine_deployments.push(copy);

        let errs = validate_class(&class);

        assert_eq!(errs.len(), 1);
        assert!(rendered(&errs)[0]
            .starts_with("spec.workers.machineDeployments[1].class: Duplicate value"));
    }

    #[test]
    fn invalid_variable_schemas_fail_the_class() {
        let mut class = cluster_class();
        class.spec.variables.push(ClusterClassVariable {
            name: "builtin".to_string(),
            required: false,
            schema: VariableSchema {
                open_api_v3_schema: JsonSchemaProps {
                    type_: "string".to_string(),
                    ..Default::default()
                },
            },
        });

        let errs = validate_class(&class);
        assert!(rendered(&errs)[0].starts_with("spec.variables[1].name"));
    }

    #[test]
    fn removed_worker_classes_are_detected() {
        let old = cluster_class();
        let mut new = old.clone();
        new.spec.workers.machine_deployments = vec![MachineDeploymentClass {
            class: "gpu-worker".to_string(),
            template: old.spec.workers.machine_deployments[0].template.clone(),
        }];
        assert_eq!(removed_worker_classes(&old.spec, &new.spec), vec!["default-worker"]);
        assert!(removed_worker_classes(&new.spec, &new.spec).is_empty());
    }

    /// Story: Bumping a template's version or name is fine, swapping its kind
    /// is not
    #[test]
    fn story_reference_compatibility() {
        let old = cluster_class();
        let mut renamed = old.clone();
        if let Some(r) = renamed.spec.infrastructure.ref_.as_mut() {
            r.name = "quick-start-v2".to_string();
            r.api_version = "infrastructure.cluster.x-k8s.io/v1beta2".to_string();
        }
        assert!(ReferenceCompatibility.check(&old.spec, &renamed.spec).is_empty());

        let mut swapped = old.clone();
        let worker = &mut swapped.spec.workers.machine_deployments[0];
        if let Some(r) = worker.template.infrastructure.ref_.as_mut() {
            r.kind = "AWSMachineTemplate".to_string();
        }
        let errs = ReferenceCompatibility.check(&old.spec, &swapped.spec);
        assert_eq!(errs.len(), 1);
        let expected = "spec.workers.machineDeployments[0].template.infrastructure.ref: Forbidden";
        assert!(rendered(&errs)[0].starts_with(expected));
    }
}
