//! Routes changes of a referenced resource back to the resources that
//! reference it.
//!
//! Reconcilers record their outgoing references each pass; the controller
//! watches consult the reverse index to decide whom to wake up.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{PoisonError, RwLock},
};

use kube::{Resource, ResourceExt, runtime::reflector::ObjectRef};

use crate::{crd::ObjectReference, resolver::ReferenceKind};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.map(String::from),
            name: name.into(),
        }
    }

    pub fn of<K: Resource<DynamicType = ()>>(object: &K) -> Self {
        Self {
            kind: K::kind(&()).into_owned(),
            namespace: object.namespace(),
            name: object.name_any(),
        }
    }

    /// The key `reference` points at when held by a resource in
    /// `namespace`. Unknown kinds have no key.
    pub fn referenced(namespace: Option<&str>, reference: &ObjectReference) -> Option<Self> {
        let kind = ReferenceKind::parse(&reference.kind).ok()?;
        let namespace = if kind.is_cluster_scoped() {
            None
        } else {
            reference.namespace.as_deref().or(namespace)
        };
        Some(Self::new(kind.as_str(), namespace, &reference.name))
    }
}

/// Reverse reference index: referent -> referrers.
#[derive(Debug, Default)]
pub struct RouteIndex {
    edges: RwLock<BTreeMap<ObjectKey, BTreeSet<ObjectKey>>>,
}

impl RouteIndex {
    /// Replaces every edge out of `referrer` with edges to `referents`.
    pub fn record(&self, referrer: &ObjectKey, referents: impl IntoIterator<Item = ObjectKey>) {
        let mut edges = self.edges.write().unwrap_or_else(PoisonError::into_inner);
        edges.retain(|_, referrers| {
            referrers.remove(referrer);
            !referrers.is_empty()
        });
        for referent in referents {
            edges.entry(referent).or_default().insert(referrer.clone());
        }
    }

    /// Adds edges out of `referrer` without dropping the existing ones.
    pub fn extend(&self, referrer: &ObjectKey, referents: impl IntoIterator<Item = ObjectKey>) {
        let mut edges = self.edges.write().unwrap_or_else(PoisonError::into_inner);
        for referent in referents {
            edges.entry(referent).or_default().insert(referrer.clone());
        }
    }

    pub fn forget(&self, referrer: &ObjectKey) {
        self.record(referrer, []);
    }

    pub fn referrers(&self, referent: &ObjectKey) -> Vec<ObjectKey> {
        let edges = self.edges.read().unwrap_or_else(PoisonError::into_inner);
        edges.get(referent).map(|r| r.iter().cloned().collect()).unwrap_or_default()
    }

    /// Reconcile requests for the referrers of `referent` that are of kind
    /// `K`.
    pub fn requests<K: Resource<DynamicType = ()>>(&self, referent: &ObjectKey) -> Vec<ObjectRef<K>> {
        let kind = K::kind(&());
        self.referrers(referent)
            .into_iter()
            .filter(|key| key.kind == kind)
            .map(|key| {
                let request = ObjectRef::new(&key.name);
                match &key.namespace {
                    Some(namespace) => request.within(namespace),
                    None => request,
                }
            })
            .collect()
    }
}

/// Request for the host a binding, translation or function hangs off.
pub fn host_request<K: Resource<DynamicType = ()>>(host_ref: &str, object: &K) -> Option<ObjectRef<crate::crd::Host>> {
    let namespace = object.namespace()?;
    Some(ObjectRef::new(host_ref).within(&namespace))
}
