use std::time::Duration;

/// The single host a controller process is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocalHost {
    pub namespace: String,
    pub name: String,
}

impl FocalHost {
    pub fn matches(&self, namespace: Option<&str>, name: &str) -> bool {
        namespace == Some(self.namespace.as_str()) && name == self.name
    }
}

/// Runtime settings. `main` fills these from flags and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// When set, hosts other than this one (and their dependents) are
    /// ignored.
    pub focal_host: Option<FocalHost>,
    /// Restricts namespaced watches; `None` watches the whole cluster.
    pub watch_namespace: Option<String>,
    pub concurrency: u16,

    /// Registry function images are pushed to.
    pub registry: String,
    pub installer_image: String,
    pub import_map_image: String,
    pub package_builder_image: String,
    pub builder_image: String,
    pub deployer_image: String,
    pub static_server_image: String,

    /// Service that renders host pages; the catch-all route points here.
    pub server_service: String,
    pub server_port: i32,
    pub function_port: i32,

    pub job_poll_requeue: Duration,
    pub missing_reference_requeue: Duration,
    pub immutable_retry_requeue: Duration,
    pub stale_job_requeue: Duration,
    pub job_backoff_limit: i32,

    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            focal_host: None,
            watch_namespace: None,
            concurrency: 4,
            registry: "registry.webhost.svc:5000".into(),
            installer_image: "ghcr.io/jedimindtricks/package-installer:latest".into(),
            import_map_image: "ghcr.io/jedimindtricks/import-map-generator:latest".into(),
            package_builder_image: "gcr.io/kaniko-project/executor:latest".into(),
            builder_image: "gcr.io/kaniko-project/executor:latest".into(),
            deployer_image: "ghcr.io/jedimindtricks/function-deployer:latest".into(),
            static_server_image: "nginxinc/nginx-unprivileged:stable".into(),
            server_service: "webhost-server".into(),
            server_port: 8080,
            function_port: 8080,
            job_poll_requeue: Duration::from_secs(10),
            missing_reference_requeue: Duration::from_secs(10),
            immutable_retry_requeue: Duration::from_secs(5),
            stale_job_requeue: Duration::from_secs(2),
            job_backoff_limit: 2,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}
