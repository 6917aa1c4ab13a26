//! Create-or-update of owned children.
//!
//! [`ensure`] fetches a child (or starts from an empty one), lets a mutation
//! closure overwrite the fields the operator owns and persists only when the
//! result differs from what is stored. The `overlay_*` functions are the
//! mutations for the workload kinds; they start from [`TemplateCache`]
//! defaults for new objects and leave fields they do not own alone.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{
            Container, ContainerPort, EmptyDirVolumeSource, EnvVar, LocalObjectReference, PodSpec,
            ResourceRequirements, Service, ServicePort, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference},
        util::intstr::IntOrString,
    },
};
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    crd::{
        Backend, ResourceLimits, ResourceSpec,
        traefik::{IngressRoute, Route},
    },
    error::{Error, Result},
    event::Outcome,
    store::{Store, StoreObject},
    templates::{APP_CONTAINER, HTTP_PORT_NAME, TemplateCache},
};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "webhost-operator";
pub const HOST_LABEL: &str = "webhost.jedimindtricks.example/host";
pub const BACKEND_LABEL: &str = "webhost.jedimindtricks.example/backend";

pub const CONTENT_VOLUME: &str = "content";
/// Static images keep their files under this directory.
pub const STATIC_SOURCE_DIR: &str = "/content";
const CONTENT_STAGING_DIR: &str = "/srv/content";
const STATIC_SERVE_DIR: &str = "/usr/share/nginx/html";

pub const SERVICE_PORT: i32 = 80;

/// The controlling parent of synthesized children.
#[derive(Debug, Clone)]
pub struct Owner {
    reference: OwnerReference,
    namespace: Option<String>,
}

impl Owner {
    pub fn of<K: Resource<DynamicType = ()>>(resource: &K) -> Result<Self> {
        let reference = resource
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey("metadata.uid"))?;
        Ok(Self {
            reference,
            namespace: resource.meta().namespace.clone(),
        })
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn reference(&self) -> &OwnerReference {
        &self.reference
    }
}

/// Brings child `name` of `owner` to the state `mutate` describes.
///
/// The name, namespace and controller owner reference are set before
/// `mutate` runs. Returns the stored object.
pub async fn ensure<K, F>(store: &Store, owner: &Owner, name: &str, mutate: F) -> Result<(Outcome, K)>
where
    K: StoreObject + Default,
    F: FnOnce(&mut K) -> Result<()>,
{
    let existing = store.get::<K>(owner.namespace(), name).await?;
    let mut object = existing.clone().unwrap_or_default();

    let meta = object.meta_mut();
    meta.name = Some(name.into());
    meta.namespace = owner.namespace.clone();
    upsert_owner(meta.owner_references.get_or_insert_with(Vec::new), &owner.reference);
    mutate(&mut object)?;

    let kind = K::kind(&());
    match existing {
        None => {
            let created = store.create(&object).await?;
            info!(%kind, name, "created");
            Ok((Outcome::Created, created))
        }
        Some(existing) if serde_json::to_value(&existing)? == serde_json::to_value(&object)? => {
            debug!(%kind, name, "unchanged");
            Ok((Outcome::NoOp, existing))
        }
        Some(_) => {
            let replaced = store.replace(&object).await?;
            info!(%kind, name, "updated");
            Ok((Outcome::Updated, replaced))
        }
    }
}

fn upsert_owner(owners: &mut Vec<OwnerReference>, owner: &OwnerReference) {
    match owners.iter_mut().find(|o| o.uid == owner.uid) {
        Some(existing) => *existing = owner.clone(),
        None => owners.push(owner.clone()),
    }
}

/// Deletes children of `K` labelled for `host` whose names are not in
/// `keep`. Returns the deleted names.
pub async fn sweep<K: StoreObject>(
    store: &Store,
    namespace: Option<&str>,
    host: &str,
    keep: &BTreeSet<String>,
) -> Result<Vec<String>> {
    let selector = format!("{MANAGED_BY_LABEL}={MANAGER},{HOST_LABEL}={host}");
    let mut removed = Vec::new();
    for object in store.list::<K>(namespace, Some(&selector)).await? {
        let name = object.name_any();
        if keep.contains(&name) {
            continue;
        }
        if store.delete::<K>(namespace, &name).await? {
            info!(kind = %K::kind(&()), %name, "deleted obsolete child");
            removed.push(name);
        }
    }
    Ok(removed)
}

pub fn host_labels(host: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGER.to_string()),
        (HOST_LABEL.to_string(), host.to_string()),
    ])
}

pub fn merge_labels(meta: &mut ObjectMeta, labels: &BTreeMap<String, String>) {
    let current = meta.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in labels {
        current.insert(key.clone(), value.clone());
    }
}

/// List entries keyed by name.
pub trait Named {
    fn name(&self) -> Option<&str>;
}

macro_rules! named {
    ($($item:ty => $field:ident),* $(,)?) => {
        $(
            impl Named for $item {
                fn name(&self) -> Option<&str> {
                    Some(self.$field.as_str())
                }
            }
        )*
    };
}

named!(Container => name, EnvVar => name, Volume => name, VolumeMount => name);

impl Named for ContainerPort {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Named for ServicePort {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Returns the entry called `name`, appending `make()` when there is none.
pub fn upsert<'a, T: Named>(items: &'a mut Vec<T>, name: &str, make: impl FnOnce() -> T) -> &'a mut T {
    let index = match items.iter().position(|item| item.name() == Some(name)) {
        Some(index) => index,
        None => {
            items.push(make());
            items.len() - 1
        }
    };
    &mut items[index]
}

pub fn set_env(env: &mut Vec<EnvVar>, name: &str, value: &str) {
    let var = upsert(env, name, || EnvVar {
        name: name.into(),
        ..Default::default()
    });
    var.value = Some(value.into());
    var.value_from = None;
}

fn named_container(name: &str) -> Container {
    Container {
        name: name.into(),
        ..Default::default()
    }
}

pub fn local_reference(name: &str) -> Result<LocalObjectReference> {
    Ok(serde_json::from_value(json!({ "name": name }))?)
}

fn quantities(limits: &ResourceLimits) -> Option<BTreeMap<String, Quantity>> {
    let mut map = BTreeMap::new();
    if let Some(cpu) = &limits.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &limits.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    (!map.is_empty()).then_some(map)
}

fn resource_requirements(spec: &ResourceSpec) -> ResourceRequirements {
    ResourceRequirements {
        limits: spec.limits.as_ref().and_then(quantities),
        requests: spec.requests.as_ref().and_then(quantities),
        ..Default::default()
    }
}

/// Owned fields of a backend's Deployment.
pub fn overlay_deployment(
    deployment: &mut Deployment,
    templates: &TemplateCache,
    labels: &BTreeMap<String, String>,
    backend: &Backend,
    static_server_image: &str,
) -> Result<()> {
    merge_labels(&mut deployment.metadata, labels);
    let spec = deployment
        .spec
        .get_or_insert_with(|| templates.deployment().spec.unwrap_or_default());
    spec.replicas = Some(backend.replicas());
    spec.selector = LabelSelector {
        match_labels: Some(labels.clone()),
        match_expressions: None,
    };

    let template = &mut spec.template;
    merge_labels(template.metadata.get_or_insert_with(ObjectMeta::default), labels);
    let pod = template.spec.get_or_insert_with(PodSpec::default);
    pod.image_pull_secrets = if backend.image_pull_secrets.is_empty() {
        None
    } else {
        Some(
            backend
                .image_pull_secrets
                .iter()
                .map(|name| local_reference(name))
                .collect::<Result<_>>()?,
        )
    };

    let app = upsert(&mut pod.containers, APP_CONTAINER, || named_container(APP_CONTAINER));
    app.image_pull_policy = Some(backend.pull_policy());
    app.resources = backend.resources.as_ref().map(resource_requirements);
    let port = upsert(app.ports.get_or_insert_with(Vec::new), HTTP_PORT_NAME, || ContainerPort {
        name: Some(HTTP_PORT_NAME.into()),
        ..Default::default()
    });
    port.container_port = backend.port();
    port.protocol = Some("TCP".into());
    set_env(app.env.get_or_insert_with(Vec::new), "PORT", &backend.port().to_string());

    match (&backend.server_image, &backend.static_image) {
        (Some(server), _) => {
            app.image = Some(server.clone());
            if let Some(mounts) = app.volume_mounts.as_mut() {
                mounts.retain(|m| m.name != CONTENT_VOLUME);
            }
            if let Some(init) = pod.init_containers.as_mut() {
                init.retain(|c| c.name != CONTENT_VOLUME);
            }
            if let Some(volumes) = pod.volumes.as_mut() {
                volumes.retain(|v| v.name != CONTENT_VOLUME);
            }
        }
        (None, Some(content)) => {
            app.image = Some(static_server_image.into());
            mount_content(app, STATIC_SERVE_DIR);
            serve_static(pod, content, &backend.pull_policy());
        }
        (None, None) => {
            return Err(Error::InvalidSpec(
                "backend needs a serverImage or a staticImage".into(),
            ));
        }
    }
    Ok(())
}

fn mount_content(container: &mut Container, path: &str) {
    let mount = upsert(container.volume_mounts.get_or_insert_with(Vec::new), CONTENT_VOLUME, || {
        VolumeMount {
            name: CONTENT_VOLUME.into(),
            ..Default::default()
        }
    });
    mount.mount_path = path.into();
    mount.read_only = None;
}

/// Copies the static image's content into a shared emptyDir before the
/// static server starts.
fn serve_static(pod: &mut PodSpec, content_image: &str, pull_policy: &str) {
    let volume = upsert(pod.volumes.get_or_insert_with(Vec::new), CONTENT_VOLUME, || Volume {
        name: CONTENT_VOLUME.into(),
        ..Default::default()
    });
    volume.empty_dir = Some(EmptyDirVolumeSource::default());

    let init = upsert(pod.init_containers.get_or_insert_with(Vec::new), CONTENT_VOLUME, || {
        named_container(CONTENT_VOLUME)
    });
    init.image = Some(content_image.into());
    init.image_pull_policy = Some(pull_policy.into());
    init.command = Some(vec![
        "cp".into(),
        "-R".into(),
        format!("{STATIC_SOURCE_DIR}/."),
        CONTENT_STAGING_DIR.into(),
    ]);
    mount_content(init, CONTENT_STAGING_DIR);
}

/// Owned fields of a backend's Service.
pub fn overlay_service(service: &mut Service, templates: &TemplateCache, labels: &BTreeMap<String, String>) {
    merge_labels(&mut service.metadata, labels);
    let spec = service
        .spec
        .get_or_insert_with(|| templates.service().spec.unwrap_or_default());
    spec.selector = Some(labels.clone());
    let port = upsert(spec.ports.get_or_insert_with(Vec::new), HTTP_PORT_NAME, || ServicePort {
        name: Some(HTTP_PORT_NAME.into()),
        ..Default::default()
    });
    port.port = SERVICE_PORT;
    port.protocol = Some("TCP".into());
    port.target_port = Some(IntOrString::String(HTTP_PORT_NAME.into()));
}

/// Owned fields of a host's IngressRoute. Entry points come from the
/// template only when the route is new.
pub fn overlay_ingress_route(
    route: &mut IngressRoute,
    templates: &TemplateCache,
    labels: &BTreeMap<String, String>,
    routes: Vec<Route>,
) {
    merge_labels(&mut route.metadata, labels);
    if route.metadata.resource_version.is_none() {
        route.spec = templates.ingress_route().spec;
    }
    route.spec.routes = routes;
}
