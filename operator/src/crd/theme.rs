use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Backend, BasicStatus, ObjectReference, PackageReference};

// Theme and ClusterTheme share one shape; only their scope differs.
macro_rules! theme_kind {
    ($spec:ident, $kind:tt, $plural:tt $(, $scope:ident)?) => {
        /// Look and feel of a host: stylesheets, design variables, an optional
        /// asset backend and the script library its pages load.
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
            pub script_library_ref: Option<ObjectReference>,

            #[serde(default)]
            pub package_references: Vec<PackageReference>,

            #[serde(default)]
            pub stylesheets: Vec<String>,

            #[serde(default)]
            pub variables: BTreeMap<String, String>,
        }
    };
}

theme_kind!(ThemeSpec, "Theme", "themes", namespaced);
theme_kind!(ClusterThemeSpec, "ClusterTheme", "clusterthemes");
