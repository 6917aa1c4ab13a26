use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{BasicStatus, GeneratorConfig};

macro_rules! faas_adaptor_kind {
    ($spec:ident, $kind:tt, $plural:tt $(, $scope:ident)?) => {
        /// Binds functions to a FaaS platform: which generator to run per
        /// `language/environment`, and which images build and deploy the result.
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
            /// Keyed by `{language}/{environment}`.
            #[serde(default)]
            pub generators: BTreeMap<String, GeneratorConfig>,

            #[serde(default)]
            pub builder_image: Option<String>,

            #[serde(default)]
            pub deployer_image: Option<String>,
        }
    };
}

faas_adaptor_kind!(FaasAdaptorSpec, "FaasAdaptor", "faasadaptors", namespaced);
faas_adaptor_kind!(
    ClusterFaasAdaptorSpec,
    "ClusterFaasAdaptor",
    "clusterfaasadaptors"
);
