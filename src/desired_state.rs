//! Desired object graph of a Cluster
//!
//! Computed in three steps: [`read_blueprint`] fetches every template the
//! ClusterClass references, [`DesiredState::compute`] instantiates them for
//! one Cluster, and after runtime extensions have patched the result
//! [`DesiredState::finalize_templates`] names the machine and bootstrap
//! templates and links their referrers to them.
//!
//! Template objects are immutable once created. A template whose content
//! changed gets a new name derived from a hash of its spec, so referrers roll
//! over to the new template instead of the old one being mutated.

use std::collections::BTreeMap;

use aws_lc_rs::digest::{digest, SHA256};
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::{json, Map, Value};

use crate::crd::{Cluster, ClusterClass, ClusterVariable, ObjectMetaTemplate, ObjectReference};
use crate::current_state::ClusterState;
use crate::field::{FieldError, FieldErrorList, FieldPath};
use crate::objects::{
    add_labels, get_path, kind_of, new_object, set_path, set_reference, ControlPlaneFamily,
    InfrastructureClusterFamily, KindFamily, MachineDeploymentFamily, ReferenceField,
    TemplateFamily, CLUSTER_CONTROL_PLANE_REF, CLUSTER_INFRASTRUCTURE_REF,
    CONTROL_PLANE_INFRASTRUCTURE_REF, MACHINE_DEPLOYMENT_BOOTSTRAP_REF,
    MACHINE_DEPLOYMENT_INFRASTRUCTURE_REF, MACHINE_DEPLOYMENT_KIND,
};
use crate::runtime::hooks::HolderReference;
use crate::store::ObjectStore;
use crate::variables::{
    overlay_variables, resolve_variables, validate_variable_overrides, Builtins,
};
use crate::{Error, Result, CLUSTER_API_VERSION, CLUSTER_NAME_LABEL, DEPLOYMENT_NAME_LABEL};

/// Every template a ClusterClass references, fetched
#[derive(Clone, Debug)]
pub struct ClusterBlueprint {
    /// The class itself
    pub class: ClusterClass,
    /// Template of the infrastructure cluster
    pub infrastructure_cluster_template: DynamicObject,
    /// Control plane templates
    pub control_plane: ControlPlaneBlueprint,
    /// Worker class templates by class name
    pub machine_deployments: BTreeMap<String, MachineDeploymentBlueprint>,
}

/// Control plane templates of a class
#[derive(Clone, Debug)]
pub struct ControlPlaneBlueprint {
    /// Metadata applied to the control plane object
    pub metadata: ObjectMetaTemplate,
    /// Control plane template
    pub template: DynamicObject,
    /// Machine infrastructure template, when the control plane runs on machines
    pub infrastructure_machine_template: Option<DynamicObject>,
}

/// Templates of one worker class
#[derive(Clone, Debug)]
pub struct MachineDeploymentBlueprint {
    /// Metadata applied to MachineDeployments of this class
    pub metadata: ObjectMetaTemplate,
    /// Bootstrap config template
    pub bootstrap_template: DynamicObject,
    /// Machine infrastructure template
    pub infrastructure_machine_template: DynamicObject,
}

/// Fetch every template referenced by a class
///
/// A reference the class does not set is invalid; a referenced template that
/// does not exist is not found.
pub async fn read_blueprint(
    store: &dyn ObjectStore,
    class: &ClusterClass,
) -> Result<ClusterBlueprint> {
    let spec = &class.spec;
    let infrastructure_cluster_template = fetch_class_template(
        store,
        class,
        spec.infrastructure.ref_.as_ref(),
        FieldPath::new(["spec", "infrastructure", "ref"]),
    )
    .await?;

    let template = fetch_class_template(
        store,
        class,
        spec.control_plane.ref_.as_ref(),
        FieldPath::new(["spec", "controlPlane", "ref"]),
    )
    .await?;
    let infrastructure_machine_template = match &spec.control_plane.machine_infrastructure {
        Some(t) => Some(
            fetch_class_template(
                store,
                class,
                t.ref_.as_ref(),
                FieldPath::new(["spec", "controlPlane", "machineInfrastructure", "ref"]),
            )
            .await?,
        ),
        None => None,
    };

    let mut machine_deployments = BTreeMap::new();
    let workers = FieldPath::new(["spec", "workers", "machineDeployments"]);
    for (i, md) in spec.workers.machine_deployments.iter().enumerate() {
        let path = workers.index(i).child("template");
        let bootstrap_template = fetch_class_template(
            store,
            class,
            md.template.bootstrap.ref_.as_ref(),
            path.child("bootstrap").child("ref"),
        )
        .await?;
        let infrastructure_machine_template = fetch_class_template(
            store,
            class,
            md.template.infrastructure.ref_.as_ref(),
            path.child("infrastructure").child("ref"),
        )
        .await?;
        machine_deployments.insert(
            md.class.clone(),
            MachineDeploymentBlueprint {
                metadata: md.template.metadata.clone(),
                bootstrap_template,
                infrastructure_machine_template,
            },
        );
    }

    Ok(ClusterBlueprint {
        class: class.clone(),
        infrastructure_cluster_template,
        control_plane: ControlPlaneBlueprint {
            metadata: spec.control_plane.metadata.clone(),
            template,
            infrastructure_machine_template,
        },
        machine_deployments,
    })
}

async fn fetch_class_template(
    store: &dyn ObjectStore,
    class: &ClusterClass,
    reference: Option<&ObjectReference>,
    path: FieldPath,
) -> Result<DynamicObject> {
    let reference = reference.ok_or_else(|| {
        Error::invalid(
            "ClusterClass",
            class.name_any(),
            FieldError::required(&path, "template reference must be set").into(),
        )
    })?;
    let namespace = class.namespace().unwrap_or_default();
    let namespace = reference.namespace_or(&namespace);
    store
        .get(&reference.gvk(), namespace, &reference.name)
        .await?
        .ok_or_else(|| Error::not_found(&reference.kind, namespace, &reference.name))
}

/// Defaulted and validated variables of a Cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedVariables {
    /// Cluster-level values
    pub cluster: Vec<ClusterVariable>,
    /// Values of worker groups that override anything, by worker group name
    pub machine_deployments: BTreeMap<String, Vec<ClusterVariable>>,
}

impl ResolvedVariables {
    /// Resolve the Cluster's values, then every worker group's overrides
    /// layered on top of them
    ///
    /// All errors across the Cluster and its worker groups are reported
    /// together.
    pub fn resolve(cluster: &Cluster, class: &ClusterClass) -> Result<Self> {
        let Some(topology) = &cluster.spec.topology else {
            return Ok(Self::default());
        };
        let class_variables = &class.spec.variables;
        let mut errs = FieldErrorList::new();

        let path = FieldPath::new(["spec", "topology", "variables"]);
        let cluster_values = resolve_variables(&topology.variables, class_variables, &path)
            .map_err(|e| errs.append(e))
            .ok();

        let workers = FieldPath::new(["spec", "topology", "workers", "machineDeployments"]);
        let mut machine_deployments = BTreeMap::new();
        for (i, md) in topology.machine_deployments().iter().enumerate() {
            let overrides = md
                .variables
                .as_ref()
                .map(|v| v.overrides.as_slice())
                .unwrap_or_default();
            if overrides.is_empty() {
                continue;
            }
            let overrides_path = workers.index(i).child("variables").child("overrides");
            let override_errs =
                validate_variable_overrides(overrides, class_variables, &overrides_path);
            if !override_errs.is_empty() {
                errs.append(override_errs);
                continue;
            }
            if cluster_values.is_none() {
                continue;
            }
            // Cluster values keep their index in the overlay.
            let merged = overlay_variables(&topology.variables, overrides);
            match resolve_variables(&merged, class_variables, &path) {
                Ok(values) => {
                    machine_deployments.insert(md.name.clone(), values);
                }
                Err(e) => errs.append(e),
            }
        }

        let Some(cluster_values) = cluster_values.filter(|_| errs.is_empty()) else {
            return Err(Error::invalid("Cluster", cluster.name_any(), errs));
        };
        Ok(Self {
            cluster: cluster_values,
            machine_deployments,
        })
    }

    /// Effective values of a worker group
    pub fn for_machine_deployment(&self, name: &str) -> &[ClusterVariable] {
        self.machine_deployments
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(self.cluster.as_slice())
    }
}

/// A generated object extensions may patch
#[derive(Clone, Debug)]
pub struct DesiredObject {
    /// The object
    pub object: DynamicObject,
    /// Object and field that reference it
    pub holder: HolderReference,
    /// Item-level variables (builtins and worker group values)
    pub variables: Vec<ClusterVariable>,
}

/// Desired objects of one worker group
#[derive(Clone, Debug)]
pub struct DesiredMachineDeployment {
    /// The MachineDeployment
    pub object: DynamicObject,
    /// Its bootstrap config template
    pub bootstrap_template: DesiredObject,
    /// Its machine infrastructure template
    pub infrastructure_machine_template: DesiredObject,
}

/// Addresses one patchable object in a [`DesiredState`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemTarget {
    /// The infrastructure cluster
    InfrastructureCluster,
    /// The control plane
    ControlPlane,
    /// The control plane machine infrastructure template
    ControlPlaneMachineTemplate,
    /// Bootstrap template of a worker group
    BootstrapTemplate(String),
    /// Machine infrastructure template of a worker group
    InfrastructureMachineTemplate(String),
}

/// Every object a Cluster should own
#[derive(Clone, Debug)]
pub struct DesiredState {
    /// Cluster name
    pub cluster_name: String,
    /// Cluster namespace
    pub namespace: String,
    /// Cluster-level variables sent with every request
    pub variables: Vec<ClusterVariable>,
    /// Infrastructure cluster
    pub infrastructure_cluster: DesiredObject,
    /// Control plane
    pub control_plane: DesiredObject,
    /// Control plane machine infrastructure template
    pub control_plane_machine_template: Option<DesiredObject>,
    /// Worker groups by topology name
    pub machine_deployments: BTreeMap<String, DesiredMachineDeployment>,
}

impl DesiredState {
    /// Instantiate a blueprint for a Cluster
    ///
    /// Existing objects keep their names. `control_plane_version` is the
    /// version the control plane should run this pass, which lags the
    /// topology version while an upgrade is held. Workers follow the
    /// topology version only once the control plane runs it.
    pub fn compute(
        cluster: &Cluster,
        blueprint: &ClusterBlueprint,
        current: &ClusterState,
        variables: &ResolvedVariables,
        control_plane_version: &str,
    ) -> Result<Self> {
        let cluster_name = cluster.name_any();
        let topology = cluster.spec.topology.as_ref().ok_or_else(|| {
            Error::internal("desired_state", format!("Cluster {cluster_name} has no topology"))
        })?;
        let namespace = cluster.namespace().unwrap_or_default();
        let builtins = Builtins::for_cluster(cluster, &namespace, &topology.version);
        let cluster_holder = |field: &ReferenceField| HolderReference {
            api_version: CLUSTER_API_VERSION.to_string(),
            kind: "Cluster".to_string(),
            namespace: namespace.clone(),
            name: cluster_name.clone(),
            field_path: field.path.join("."),
        };

        let infra_name = current
            .infrastructure_cluster
            .as_ref()
            .map(ResourceExt::name_any)
            .unwrap_or_else(|| cluster_name.clone());
        let mut infra =
            instantiate(&blueprint.infrastructure_cluster_template, &namespace, &infra_name)?;
        add_labels(&mut infra, &InfrastructureClusterFamily.owner_labels(&cluster_name, None));
        let infrastructure_cluster = DesiredObject {
            object: infra,
            holder: cluster_holder(&CLUSTER_INFRASTRUCTURE_REF),
            variables: vec![builtins.to_variable()?],
        };

        let cp_replicas = topology.control_plane.replicas;
        let cp_builtin = builtins
            .clone()
            .with_control_plane(control_plane_version, cp_replicas)
            .to_variable()?;
        let cp_name = current
            .control_plane
            .object
            .as_ref()
            .map(ResourceExt::name_any)
            .unwrap_or_else(|| cluster_name.clone());
        let mut cp = instantiate(&blueprint.control_plane.template, &namespace, &cp_name)?;
        set_path(&mut cp.data, &["spec", "version"], json!(control_plane_version))?;
        if let Some(replicas) = cp_replicas {
            set_path(&mut cp.data, &["spec", "replicas"], json!(replicas))?;
        }
        apply_metadata(
            &mut cp,
            &blueprint.control_plane.metadata.merged(&topology.control_plane.metadata),
        );
        add_labels(&mut cp, &ControlPlaneFamily.owner_labels(&cluster_name, None));
        let cp_holder = object_holder(&cp, &CONTROL_PLANE_INFRASTRUCTURE_REF);
        let control_plane = DesiredObject {
            object: cp,
            holder: cluster_holder(&CLUSTER_CONTROL_PLANE_REF),
            variables: vec![cp_builtin.clone()],
        };

        let control_plane_machine_template = blueprint
            .control_plane
            .infrastructure_machine_template
            .as_ref()
            .map(|template| {
                let name = format!("{cluster_name}-control-plane");
                let mut object = copy_template(template, &namespace, &name);
                add_labels(&mut object, &TemplateFamily.owner_labels(&cluster_name, None));
                DesiredObject {
                    object,
                    holder: cp_holder.clone(),
                    variables: vec![cp_builtin.clone()],
                }
            });

        let upgrading = current
            .control_plane
            .version()
            .is_some_and(|v| v != topology.version);
        let workers = FieldPath::new(["spec", "topology", "workers", "machineDeployments"]);
        let mut machine_deployments = BTreeMap::new();
        for (i, md) in topology.machine_deployments().iter().enumerate() {
            let md_blueprint = blueprint.machine_deployments.get(&md.class).ok_or_else(|| {
                Error::invalid(
                    "Cluster",
                    &cluster_name,
                    FieldError::invalid(
                        &workers.index(i).child("class"),
                        &md.class,
                        "class is not defined in the ClusterClass",
                    )
                    .into(),
                )
            })?;
            if machine_deployments.contains_key(&md.name) {
                let path = workers.index(i).child("name");
                let error = FieldError::duplicate(&path, format!("\"{}\"", md.name));
                return Err(Error::invalid("Cluster", &cluster_name, error.into()));
            }

            let live = current.machine_deployments.get(&md.name);
            let md_name = live
                .map(|s| s.object.name_any())
                .unwrap_or_else(|| format!("{cluster_name}-{}", md.name));
            let version = if upgrading {
                live.and_then(|s| {
                    get_path(&s.object.data, &["spec", "template", "spec", "version"])
                })
                .and_then(Value::as_str)
                    .unwrap_or(control_plane_version)
            } else {
                topology.version.as_str()
            };

            let mut object =
                new_object(CLUSTER_API_VERSION, MACHINE_DEPLOYMENT_KIND, &namespace, &md_name);
            let selector = BTreeMap::from([
                (CLUSTER_NAME_LABEL.to_string(), cluster_name.clone()),
                (DEPLOYMENT_NAME_LABEL.to_string(), md.name.clone()),
            ]);
            let metadata = md_blueprint.metadata.merged(&md.metadata);
            let mut template_labels = metadata.labels.clone();
            template_labels.extend(selector.clone());
            object.data = json!({
                "spec": {
                    "clusterName": cluster_name,
                    "selector": {"matchLabels": selector},
                    "template": {
                        "metadata": {"labels": template_labels},
                        "spec": {
                            "clusterName": cluster_name,
                            "version": version,
                        }
                    }
                }
            });
            if let Some(replicas) = md.replicas {
                set_path(&mut object.data, &["spec", "replicas"], json!(replicas))?;
            }
            apply_metadata(&mut object, &metadata);
            let owner = MachineDeploymentFamily.owner_labels(&cluster_name, Some(&md.name));
            add_labels(&mut object, &owner);

            let mut item_variables = vec![builtins
                .clone()
                .with_machine_deployment(md, &md_name, version)
                .to_variable()?];
            if let Some(overrides) = variables.machine_deployments.get(&md.name) {
                item_variables.extend(overrides.iter().cloned());
            }

            let template_labels = TemplateFamily.owner_labels(&cluster_name, Some(&md.name));
            let mut bootstrap = copy_template(
                &md_blueprint.bootstrap_template,
                &namespace,
                &format!("{md_name}-bootstrap"),
            );
            add_labels(&mut bootstrap, &template_labels);
            let mut infra_machine = copy_template(
                &md_blueprint.infrastructure_machine_template,
                &namespace,
                &format!("{md_name}-infra"),
            );
            add_labels(&mut infra_machine, &template_labels);

            machine_deployments.insert(
                md.name.clone(),
                DesiredMachineDeployment {
                    bootstrap_template: DesiredObject {
                        object: bootstrap,
                        holder: object_holder(&object, &MACHINE_DEPLOYMENT_BOOTSTRAP_REF),
                        variables: item_variables.clone(),
                    },
                    infrastructure_machine_template: DesiredObject {
                        object: infra_machine,
                        holder: object_holder(&object, &MACHINE_DEPLOYMENT_INFRASTRUCTURE_REF),
                        variables: item_variables,
                    },
                    object,
                },
            );
        }

        Ok(Self {
            cluster_name,
            namespace,
            variables: variables.cluster.clone(),
            infrastructure_cluster,
            control_plane,
            control_plane_machine_template,
            machine_deployments,
        })
    }

    /// Every patchable object, in the order extensions see them
    pub fn patch_targets(&self) -> Vec<ItemTarget> {
        let mut targets = vec![ItemTarget::InfrastructureCluster, ItemTarget::ControlPlane];
        if self.control_plane_machine_template.is_some() {
            targets.push(ItemTarget::ControlPlaneMachineTemplate);
        }
        for name in self.machine_deployments.keys() {
            targets.push(ItemTarget::BootstrapTemplate(name.clone()));
            targets.push(ItemTarget::InfrastructureMachineTemplate(name.clone()));
        }
        targets
    }

    /// Look up a patchable object
    pub fn target(&self, target: &ItemTarget) -> Option<&DesiredObject> {
        match target {
            ItemTarget::InfrastructureCluster => Some(&self.infrastructure_cluster),
            ItemTarget::ControlPlane => Some(&self.control_plane),
            ItemTarget::ControlPlaneMachineTemplate => self.control_plane_machine_template.as_ref(),
            ItemTarget::BootstrapTemplate(md) => {
                self.machine_deployments.get(md).map(|m| &m.bootstrap_template)
            }
            ItemTarget::InfrastructureMachineTemplate(md) => self
                .machine_deployments
                .get(md)
                .map(|m| &m.infrastructure_machine_template),
        }
    }

    /// Look up a patchable object for modification
    pub fn target_mut(&mut self, target: &ItemTarget) -> Option<&mut DesiredObject> {
        match target {
            ItemTarget::InfrastructureCluster => Some(&mut self.infrastructure_cluster),
            ItemTarget::ControlPlane => Some(&mut self.control_plane),
            ItemTarget::ControlPlaneMachineTemplate => self.control_plane_machine_template.as_mut(),
            ItemTarget::BootstrapTemplate(md) => self
                .machine_deployments
                .get_mut(md)
                .map(|m| &mut m.bootstrap_template),
            ItemTarget::InfrastructureMachineTemplate(md) => self
                .machine_deployments
                .get_mut(md)
                .map(|m| &mut m.infrastructure_machine_template),
        }
    }

    /// Name every template and point its referrer at it
    ///
    /// Must run after all patches are applied: the name depends on the final
    /// template content.
    pub fn finalize_templates(&mut self, current: &ClusterState) -> Result<()> {
        if let Some(template) = &mut self.control_plane_machine_template {
            name_template(
                &TemplateFamily,
                &mut template.object,
                current.control_plane.infrastructure_machine_template.as_ref(),
                &format!("{}-control-plane", self.cluster_name),
            )?;
            set_reference(
                &mut self.control_plane.object,
                &CONTROL_PLANE_INFRASTRUCTURE_REF,
                &ObjectReference::to_object(&template.object),
            )?;
        }

        for (name, md) in &mut self.machine_deployments {
            let live = current.machine_deployments.get(name);
            let md_name = md.object.name_any();
            name_template(
                &TemplateFamily,
                &mut md.bootstrap_template.object,
                live.map(|s| &s.bootstrap_template),
                &format!("{md_name}-bootstrap"),
            )?;
            name_template(
                &TemplateFamily,
                &mut md.infrastructure_machine_template.object,
                live.map(|s| &s.infrastructure_machine_template),
                &format!("{md_name}-infra"),
            )?;
            set_reference(
                &mut md.object,
                &MACHINE_DEPLOYMENT_BOOTSTRAP_REF,
                &ObjectReference::to_object(&md.bootstrap_template.object),
            )?;
            set_reference(
                &mut md.object,
                &MACHINE_DEPLOYMENT_INFRASTRUCTURE_REF,
                &ObjectReference::to_object(&md.infrastructure_machine_template.object),
            )?;
        }
        Ok(())
    }

    /// Reference the Cluster should hold to its infrastructure cluster
    pub fn infrastructure_ref(&self) -> ObjectReference {
        ObjectReference::to_object(&self.infrastructure_cluster.object)
    }

    /// Reference the Cluster should hold to its control plane
    pub fn control_plane_ref(&self) -> ObjectReference {
        ObjectReference::to_object(&self.control_plane.object)
    }
}

/// Object of the templated kind (`FooTemplate` becomes `Foo`) with the
/// template's `spec.template.spec` as its spec
fn instantiate(template: &DynamicObject, namespace: &str, name: &str) -> Result<DynamicObject> {
    let types = template.types.as_ref().ok_or_else(|| {
        Error::internal(
            "desired_state",
            format!("template {} has no apiVersion/kind", template.name_any()),
        )
    })?;
    let kind = types.kind.strip_suffix("Template").unwrap_or(&types.kind);
    let mut object = new_object(&types.api_version, kind, namespace, name);
    let spec = get_path(&template.data, &["spec", "template", "spec"])
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    object.data = json!({ "spec": spec });
    Ok(object)
}

/// Copy of a template under a new name, keeping only its spec
fn copy_template(template: &DynamicObject, namespace: &str, name: &str) -> DynamicObject {
    let (api_version, kind) = template
        .types
        .as_ref()
        .map(|t| (t.api_version.as_str(), t.kind.as_str()))
        .unwrap_or_default();
    let mut object = new_object(api_version, kind, namespace, name);
    let spec = template
        .data
        .get("spec")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    object.data = json!({ "spec": spec });
    object
}

fn apply_metadata(object: &mut DynamicObject, metadata: &ObjectMetaTemplate) {
    add_labels(object, &metadata.labels);
    object.annotations_mut().extend(
        metadata
            .annotations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
}

fn object_holder(object: &DynamicObject, field: &ReferenceField) -> HolderReference {
    let reference = ObjectReference::to_object(object);
    HolderReference {
        api_version: reference.api_version,
        kind: reference.kind,
        namespace: reference.namespace.unwrap_or_default(),
        name: reference.name,
        field_path: field.path.join("."),
    }
}

/// Keep the live name unless the family rotates and the content changed;
/// new names are derived from the content
fn name_template(
    family: &dyn KindFamily,
    object: &mut DynamicObject,
    live: Option<&DynamicObject>,
    prefix: &str,
) -> Result<()> {
    let spec = object.data.get("spec").cloned().unwrap_or(Value::Null);
    if let Some(live) = live.filter(|live| kind_of(live) == kind_of(object)) {
        if !family.rotates_on_change() || live.data.get("spec") == Some(&spec) {
            object.metadata.name = live.metadata.name.clone();
            return Ok(());
        }
    }
    object.metadata.name = Some(format!("{prefix}-{}", content_hash(&spec)?));
    Ok(())
}

fn content_hash(spec: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(spec)?;
    let sum = digest(&SHA256, &bytes);
    Ok(sum.as_ref().iter().take(4).map(|b| format!("{b:02x}")).collect())
}
