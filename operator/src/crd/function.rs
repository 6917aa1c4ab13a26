use std::{collections::BTreeMap, fmt::Display};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Condition, GeneratorConfig, ObjectReference};

/// An HTTP function mounted on a host. The operator generates, builds and
/// deploys it through a fixed pipeline of batch jobs.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "webhost.jedimindtricks.example",
    version = "v1alpha1",
    kind = "Function",
    plural = "functions",
    derive = "Default",
    status = "FunctionStatus",
    shortname = "fn",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".status.url"}"#
)]
pub struct FunctionSpec {
    /// Name of the host (same namespace) this function is mounted on.
    pub host_ref: String,

    pub ingress_path: String,

    pub language: String,

    pub environment: String,

    #[serde(default)]
    pub faas_adaptor_ref: Option<ObjectReference>,

    /// Overrides the generator the adaptor would pick.
    #[serde(default)]
    pub generator_config: Option<GeneratorConfig>,

    /// Pre-built source; skips code generation.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub open_api_url: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, JsonSchema, Default, PartialEq, Eq)]
pub enum PipelineStage {
    #[default]
    Pending,
    #[serde(rename = "OpenAPIValid")]
    OpenApiValid,
    BuildValid,
    SourceAvailable,
    SourceGenerated,
    ExecutableAvailable,
    Ready,
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Pending => "Pending",
            PipelineStage::OpenApiValid => "OpenAPIValid",
            PipelineStage::BuildValid => "BuildValid",
            PipelineStage::SourceAvailable => "SourceAvailable",
            PipelineStage::SourceGenerated => "SourceGenerated",
            PipelineStage::ExecutableAvailable => "ExecutableAvailable",
            PipelineStage::Ready => "Ready",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    #[serde(default)]
    pub state: PipelineStage,
    pub open_api_url: Option<String>,
    pub generator_config: Option<GeneratorConfig>,
    pub source: Option<String>,
    pub executable: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub detail: Option<String>,
}

impl FunctionStatus {
    /// Forget everything derived from an older spec.
    pub fn reset(&mut self) {
        self.state = PipelineStage::Pending;
        self.open_api_url = None;
        self.generator_config = None;
        self.source = None;
        self.executable = None;
        self.url = None;
        self.attributes.clear();
    }
}
