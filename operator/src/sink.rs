//! Publishes each host's resolved configuration to the serving layer.

use std::{collections::BTreeMap, fmt, sync::Arc};

use arc_swap::ArcSwap;
use tracing::debug;

use crate::{
    aggregate::FunctionRoute,
    crd::{HostSpec, PackageReference, ScriptDefinition},
    resolver::ThemeAssets,
};

/// OIDC client settings with the secret already resolved.
#[derive(Clone, PartialEq)]
pub struct AuthConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Everything the page server needs to serve one host.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub spec: HostSpec,
    pub package_refs: Vec<PackageReference>,
    pub theme_assets: Option<ThemeAssets>,
    pub scripts: Vec<ScriptDefinition>,
    pub import_map: Option<serde_json::Value>,
    pub initial_paths: Vec<String>,
    pub functions: Vec<FunctionRoute>,
    /// Redirect URI the auth code is exchanged at.
    pub auth_exchanger: Option<String>,
    pub auth_config: Option<AuthConfig>,
    /// language -> key -> text
    pub translations: BTreeMap<String, BTreeMap<String, String>>,
}

pub trait HostSink: Send + Sync {
    fn set_host(&self, namespace: &str, name: &str, config: HostConfig);

    fn remove_host(&self, namespace: &str, name: &str);
}

type HostMap = BTreeMap<(String, String), Arc<HostConfig>>;

/// Lock-free snapshot of every published host. Readers never block the
/// reconcilers.
#[derive(Default)]
pub struct HostRegistry {
    hosts: ArcSwap<HostMap>,
}

impl HostRegistry {
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<HostConfig>> {
        self.hosts
            .load()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn snapshot(&self) -> Arc<HostMap> {
        self.hosts.load_full()
    }
}

impl HostSink for HostRegistry {
    fn set_host(&self, namespace: &str, name: &str, config: HostConfig) {
        let key = (namespace.to_string(), name.to_string());
        let config = Arc::new(config);
        self.hosts.rcu(|hosts| {
            let mut hosts = HostMap::clone(hosts);
            hosts.insert(key.clone(), config.clone());
            hosts
        });
        debug!(namespace, host = name, "published host configuration");
    }

    fn remove_host(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        self.hosts.rcu(|hosts| {
            let mut hosts = HostMap::clone(hosts);
            hosts.remove(&key);
            hosts
        });
    }
}
