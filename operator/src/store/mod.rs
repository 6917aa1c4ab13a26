//! The cluster object store, seen through the handful of verbs the
//! reconcilers need.
//!
//! [`ObjectStore`] works on untyped [`DynamicObject`]s so it stays object
//! safe; [`Store`] is the typed facade reconcilers call.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{
    Resource, ResourceExt,
    api::{ApiResource, DynamicObject},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result, is_not_found};

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// `namespace: None` lists across all namespaces. `selector` is an
    /// equality label selector such as `a=b,c=d`.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replaces everything but status. Fails with a conflict when the
    /// object's resourceVersion is stale.
    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replaces only status, with the same resourceVersion precondition.
    async fn replace_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Deletes with background propagation.
    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str)
    -> Result<()>;
}

/// Anything the typed [`Store`] can read and write.
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn ObjectStore>,
}

impl Store {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    pub async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let resource = ApiResource::erase::<K>(&());
        self.inner
            .get(&resource, namespace, name)
            .await?
            .map(from_dynamic)
            .transpose()
    }

    pub async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let resource = ApiResource::erase::<K>(&());
        self.inner
            .list(&resource, namespace, selector)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    pub async fn create<K: StoreObject>(&self, object: &K) -> Result<K> {
        let resource = ApiResource::erase::<K>(&());
        let namespace = object.namespace();
        let created = self
            .inner
            .create(&resource, namespace.as_deref(), &to_dynamic(object)?)
            .await?;
        from_dynamic(created)
    }

    pub async fn replace<K: StoreObject>(&self, object: &K) -> Result<K> {
        let resource = ApiResource::erase::<K>(&());
        let namespace = object.namespace();
        let replaced = self
            .inner
            .replace(&resource, namespace.as_deref(), &to_dynamic(object)?)
            .await?;
        from_dynamic(replaced)
    }

    pub async fn replace_status<K: StoreObject>(&self, object: &K) -> Result<K> {
        let resource = ApiResource::erase::<K>(&());
        let namespace = object.namespace();
        let replaced = self
            .inner
            .replace_status(&resource, namespace.as_deref(), &to_dynamic(object)?)
            .await?;
        from_dynamic(replaced)
    }

    /// Returns whether something was deleted; a missing object is not an
    /// error.
    pub async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<bool> {
        let resource = ApiResource::erase::<K>(&());
        match self.inner.delete(&resource, namespace, name).await {
            Ok(()) => Ok(true),
            Err(Error::Kube(err)) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn to_dynamic<K: Serialize>(object: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}
