use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Condition, PackageReference};

/// A bundle of browser packages built into one content-addressed image plus
/// an import map. Usually synthesized by a host, one per host.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "webhost.jedimindtricks.example",
    version = "v1alpha1",
    kind = "PackageReferences",
    plural = "packagereferences",
    derive = "Default",
    status = "PackageReferencesStatus",
    shortname = "pkgs",
    namespaced,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".status.attributes.image"}"#
)]
pub struct PackageReferencesSpec {
    #[serde(default)]
    pub package_references: Vec<PackageReference>,

    /// Image repository the bundle is pushed to.
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageReferencesStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub detail: Option<String>,
}
