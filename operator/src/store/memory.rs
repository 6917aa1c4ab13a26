use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use kube::{
    api::{ApiResource, DynamicObject},
    core::{ErrorResponse, TypeMeta},
};
use serde_json::Value;

use super::ObjectStore;
use crate::error::{Error, Result};

/// In-process [`ObjectStore`] with the API server behaviour the reconcilers
/// lean on: uids, resourceVersion preconditions, generation bumps on spec
/// changes, immutable ConfigMaps and Job templates, and background
/// garbage collection of owned objects.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    revision: u64,
    writes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl Key {
    fn new(resource: &ApiResource, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
            namespace: namespace.map(String::from),
            name: name.into(),
        }
    }

    fn is_a(&self, resource: &ApiResource) -> bool {
        self.api_version == resource.api_version && self.kind == resource.kind
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every mutating call so far, as `"<verb> <Kind> <name>"`.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn record(&mut self, verb: &str, resource: &ApiResource, name: &str) {
        self.writes.push(format!("{verb} {} {name}", resource.kind));
    }

    fn current(&self, key: &Key) -> Result<&DynamicObject> {
        self.objects
            .get(key)
            .ok_or_else(|| not_found(&key.kind, &key.name))
    }
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    }))
}

fn not_found(kind: &str, name: &str) -> Error {
    api_error(404, "NotFound", format!("{kind} \"{name}\" not found"))
}

fn name_of(object: &DynamicObject) -> Result<&str> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey("metadata.name"))
}

fn check_version(current: &DynamicObject, object: &DynamicObject, name: &str) -> Result<()> {
    match &object.metadata.resource_version {
        Some(version) if current.metadata.resource_version.as_ref() != Some(version) => {
            Err(api_error(
                409,
                "Conflict",
                format!(
                    "Operation cannot be fulfilled on \"{name}\": the object has been modified; please apply your changes to the latest version and try again"
                ),
            ))
        }
        _ => Ok(()),
    }
}

fn check_immutable(
    resource: &ApiResource,
    current: &DynamicObject,
    object: &DynamicObject,
    name: &str,
) -> Result<()> {
    let sealed = current.data.get("immutable") == Some(&Value::Bool(true));
    let changed_data = current.data.get("data") != object.data.get("data")
        || current.data.get("binaryData") != object.data.get("binaryData");
    if sealed && changed_data {
        return Err(api_error(
            422,
            "Invalid",
            format!(
                "{} \"{name}\" is invalid: data: Forbidden: field is immutable when `immutable` is set",
                resource.kind
            ),
        ));
    }
    if resource.kind == "Job"
        && current.data.pointer("/spec/template") != object.data.pointer("/spec/template")
    {
        return Err(api_error(
            422,
            "Invalid",
            format!("Job.batch \"{name}\" is invalid: spec.template: Invalid value: field is immutable"),
        ));
    }
    Ok(())
}

fn set_status(object: &mut DynamicObject, status: Option<&Value>) {
    if let Some(fields) = object.data.as_object_mut() {
        match status {
            Some(status) => {
                fields.insert("status".into(), status.clone());
            }
            None => {
                fields.remove("status");
            }
        }
    }
}

fn parse_selector(selector: Option<&str>) -> Result<Vec<(String, String)>> {
    let Some(selector) = selector else {
        return Ok(Vec::new());
    };
    selector
        .split(',')
        .filter(|term| !term.trim().is_empty())
        .map(|term| {
            term.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| {
                    api_error(400, "BadRequest", format!("unsupported label selector {term}"))
                })
        })
        .collect()
}

fn matches(object: &DynamicObject, selector: &[(String, String)]) -> bool {
    let labels = object.metadata.labels.as_ref();
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|labels| labels.get(key))
            .is_some_and(|actual| actual == value)
    })
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let key = Key::new(resource, namespace, name);
        Ok(self.lock().objects.get(&key).cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let selector = parse_selector(selector)?;
        let state = self.lock();
        Ok(state
            .objects
            .iter()
            .filter(|(key, object)| {
                key.is_a(resource)
                    && namespace.is_none_or(|ns| key.namespace.as_deref() == Some(ns))
                    && matches(object, &selector)
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = name_of(object)?;
        let key = Key::new(resource, namespace, name);
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{name}\" already exists", resource.kind),
            ));
        }

        let mut stored = object.clone();
        let revision = state.next_revision();
        stored.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
        stored.metadata.namespace = namespace.map(String::from);
        stored.metadata.uid = Some(format!("uid-{revision}"));
        stored.metadata.resource_version = Some(revision);
        stored.metadata.generation = Some(1);
        set_status(&mut stored, object.data.get("status").filter(|s| !s.is_null()));

        state.record("create", resource, name);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = name_of(object)?;
        let key = Key::new(resource, namespace, name);
        let mut state = self.lock();
        let current = state.current(&key)?;
        check_version(current, object, name)?;
        check_immutable(resource, current, object, name)?;

        let mut stored = object.clone();
        let generation = current.metadata.generation.unwrap_or(1);
        let spec_changed = current.data.get("spec") != object.data.get("spec");
        stored.types = current.types.clone();
        stored.metadata.namespace = current.metadata.namespace.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.generation = Some(if spec_changed { generation + 1 } else { generation });
        set_status(&mut stored, current.data.get("status"));
        stored.metadata.resource_version = Some(state.next_revision());

        state.record("replace", resource, name);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = name_of(object)?;
        let key = Key::new(resource, namespace, name);
        let mut state = self.lock();
        let current = state.current(&key)?;
        check_version(current, object, name)?;

        let mut stored = current.clone();
        set_status(&mut stored, object.data.get("status"));
        stored.metadata.resource_version = Some(state.next_revision());

        state.record("status", resource, name);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        let key = Key::new(resource, namespace, name);
        let mut state = self.lock();
        let removed = state
            .objects
            .remove(&key)
            .ok_or_else(|| not_found(&resource.kind, name))?;
        state.record("delete", resource, name);

        let mut orphans: Vec<String> = removed.metadata.uid.into_iter().collect();
        while let Some(uid) = orphans.pop() {
            let owned: Vec<Key> = state
                .objects
                .iter()
                .filter(|(_, object)| {
                    object
                        .metadata
                        .owner_references
                        .iter()
                        .flatten()
                        .any(|owner| owner.uid == uid)
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in owned {
                if let Some(child) = state.objects.remove(&key) {
                    orphans.extend(child.metadata.uid);
                }
            }
        }
        Ok(())
    }
}
