//! Custom resource definitions served by the operator, plus the shared
//! building blocks (backends, references, conditions) their specs embed.

use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod app;
mod faas;
mod function;
mod host;
mod package;
mod page;
mod script_library;
mod theme;
pub mod traefik;
mod translation;

pub use app::{App, AppSpec, ClusterApp, ClusterAppSpec};
pub use faas::{ClusterFaasAdaptor, ClusterFaasAdaptorSpec, FaasAdaptor, FaasAdaptorSpec};
pub use function::{Function, FunctionSpec, FunctionStatus, PipelineStage};
pub use host::{AuthSpec, Host, HostSpec, HostStatus};
pub use package::{PackageReferences, PackageReferencesSpec, PackageReferencesStatus};
pub use page::{PageBinding, PageBindingSpec};
pub use script_library::{
    ClusterScriptLibrary, ClusterScriptLibrarySpec, ScriptLibrary, ScriptLibrarySpec,
};
pub use theme::{ClusterTheme, ClusterThemeSpec, Theme, ThemeSpec};
pub use translation::{Translation, TranslationSpec};

pub const GROUP: &str = "webhost.jedimindtricks.example";

/// Every CRD this operator owns. The Traefik mirror is deliberately absent:
/// that definition belongs to Traefik.
pub fn all() -> Vec<CustomResourceDefinition> {
    vec![
        Host::crd(),
        Function::crd(),
        PackageReferences::crd(),
        Theme::crd(),
        ClusterTheme::crd(),
        ScriptLibrary::crd(),
        ClusterScriptLibrary::crd(),
        App::crd(),
        ClusterApp::crd(),
        FaasAdaptor::crd(),
        ClusterFaasAdaptor::crd(),
        PageBinding::crd(),
        Translation::crd(),
    ]
}

/// Typed pointer at a sibling resource. `namespace` defaults to the
/// referrer's own namespace for namespaced kinds.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ObjectReference {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }
}

/// One routable workload, whatever resource it came from.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub ingress_path: String,

    /// Image that serves HTTP itself.
    #[serde(default)]
    pub server_image: Option<String>,

    /// Image whose filesystem holds static content; served by the configured
    /// static server.
    #[serde(default)]
    pub static_image: Option<String>,

    #[serde(default)]
    pub image_pull_policy: Option<String>,

    #[serde(default)]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub resources: Option<ResourceSpec>,

    #[serde(default)]
    pub image_pull_secrets: Vec<String>,

    #[serde(default)]
    pub port: Option<i32>,
}

impl Backend {
    pub fn replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }

    pub fn port(&self) -> i32 {
        self.port.unwrap_or(8080)
    }

    pub fn pull_policy(&self) -> String {
        self.image_pull_policy
            .clone()
            .unwrap_or_else(|| "IfNotPresent".into())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub limits: Option<ResourceLimits>,
    pub requests: Option<ResourceLimits>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageReference {
    pub name: String,
    pub version: String,
}

impl PackageReference {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A script the host injects into rendered pages.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDefinition {
    pub name: String,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub module: bool,
}

/// Recipe for the code generation job of a function.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyReference {
    pub name: String,
    pub key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Status shared by the referenceable sibling kinds.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BasicStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub observed_generation: Option<i64>,
}

pub(crate) fn default_true() -> bool {
    true
}
