use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Backend;

/// Mounts a page on a host path. Without a backend the host renders the page
/// itself; with one, the backend serves the path.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "webhost.jedimindtricks.example",
    version = "v1alpha1",
    kind = "PageBinding",
    plural = "pagebindings",
    derive = "Default",
    namespaced
)]
pub struct PageBindingSpec {
    pub host_ref: String,
    pub path: String,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub backend: Option<Backend>,
}
