use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Backend, BasicStatus, PackageReference, ScriptDefinition};

macro_rules! script_library_kind {
    ($spec:ident, $kind:tt, $plural:tt $(, $scope:ident)?) => {
        /// Scripts and browser packages shared by the pages of one or more hosts.
        #[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
        #[serde(rename_all = "camelCase")]
        #[kube(
            group = "webhost.jedimindtricks.example",
            version = "v1alpha1",
            kind = $kind,
            plural = $plural,
            derive = "Default",
            status = "BasicStatus"
            $(, $scope)?
        )]
        pub struct $spec {
            #[serde(default)]
            pub backend: Option<Backend>,

            #[serde(default)]
            pub package_references: Vec<PackageReference>,

            #[serde(default)]
            pub scripts: Vec<ScriptDefinition>,
        }
    };
}

script_library_kind!(ScriptLibrarySpec, "ScriptLibrary", "scriptlibraries", namespaced);
script_library_kind!(
    ClusterScriptLibrarySpec,
    "ClusterScriptLibrary",
    "clusterscriptlibraries"
);
