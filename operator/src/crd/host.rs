use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Backend, Condition, ObjectReference, PackageReference, SecretKeyReference, default_true};

/// A routable site: one domain, the backends mounted under it and the
/// theme/script assets its pages render with.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "webhost.jedimindtricks.example",
    version = "v1alpha1",
    kind = "Host",
    plural = "hosts",
    derive = "Default",
    status = "HostStatus",
    shortname = "wh",
    namespaced,
    printcolumn = r#"{"name":"Domain", "type":"string", "jsonPath":".spec.domain"}"#,
    printcolumn = r#"{"name":"Detail", "type":"string", "jsonPath":".status.detail"}"#
)]
pub struct HostSpec {
    pub domain: String,

    /// Backend served by the host itself.
    #[serde(default)]
    pub backend: Option<Backend>,

    #[serde(default)]
    pub theme_ref: Option<ObjectReference>,

    #[serde(default)]
    pub script_library_ref: Option<ObjectReference>,

    /// Apps (or other backend carrying kinds) that must be mounted.
    #[serde(default)]
    pub requires: Vec<ObjectReference>,

    #[serde(default)]
    pub package_references: Vec<PackageReference>,

    /// Reserve the built-in utility pages under `/_/`.
    #[serde(default = "default_true")]
    pub utility_pages: bool,

    #[serde(default)]
    pub auth: Option<AuthSpec>,
}

impl Default for HostSpec {
    fn default() -> Self {
        Self {
            domain: String::new(),
            backend: None,
            theme_ref: None,
            script_library_ref: None,
            requires: Vec::new(),
            package_references: Vec::new(),
            utility_pages: default_true(),
            auth: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: SecretKeyReference,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reserves_utility_pages_like_an_empty_manifest() {
        let parsed: HostSpec = serde_json::from_str(r#"{"domain": ""}"#).expect("parse");
        let default = HostSpec::default();
        assert!(default.utility_pages);
        assert_eq!(parsed.utility_pages, default.utility_pages);
        assert!(parsed.requires.is_empty() && parsed.backend.is_none());
    }
}
