use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Backend, BasicStatus};

macro_rules! app_kind {
    ($spec:ident, $kind:tt, $plural:tt $(, $scope:ident)?) => {
        /// A standalone backend that hosts can require.
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
            pub backend: Backend,
        }
    };
}

app_kind!(AppSpec, "App", "apps", namespaced);
app_kind!(ClusterAppSpec, "ClusterApp", "clusterapps");
