use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "webhost.jedimindtricks.example",
    version = "v1alpha1",
    kind = "Translation",
    plural = "translations",
    derive = "Default",
    namespaced
)]
pub struct TranslationSpec {
    pub host_ref: String,
    pub language: String,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}
