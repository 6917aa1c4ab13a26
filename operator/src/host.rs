//! The Host reconciler: resolves everything a host is built from, claims
//! its paths, then brings its workloads, route and package bundle in line
//! and publishes the result to the page server.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{Resource, ResourceExt, runtime::controller::Action};
use tracing::{debug, info, instrument};

use crate::{
    aggregate::{AUTH_CALLBACK_PATH, Aggregation, PACKAGES_BACKEND, PACKAGES_PATH, ResolvedBackend, Siblings, aggregate},
    conditions::{ConditionTriple, set_conditions},
    crd::{
        Backend, Function, Host, HostStatus, PackageReferences, PageBinding, Translation,
        traefik::{IngressRoute, Route, RouteService},
    },
    error::{Error, Result},
    event::{Ctx, with_event},
    packages::{self, FINGERPRINT_ATTRIBUTE, IMAGE_ATTRIBUTE, IMPORT_MAP_ATTRIBUTE, bundle_name},
    proceed,
    reconcile::{Flow, Reconcile},
    resolver::{ReferenceKind, Referrer, resolve, resolve_all, resolve_secret_key},
    router::ObjectKey,
    sink::{AuthConfig, HostConfig},
    synthesize::{
        BACKEND_LABEL, Owner, SERVICE_PORT, ensure, host_labels, merge_labels, overlay_deployment,
        overlay_ingress_route, overlay_service, sweep,
    },
};

pub const PACKAGES_BUILDING: &str = "PackagesBuilding";
pub const FUNCTIONS_PENDING: &str = "FunctionsPending";

/// The bundle's image and import map, once built for the current package
/// list.
struct BuiltBundle {
    image: String,
    import_map: Option<serde_json::Value>,
}

fn built_bundle(bundle: &PackageReferences, fingerprint: &str) -> Option<BuiltBundle> {
    let attributes = &bundle.status.as_ref()?.attributes;
    if attributes.get(FINGERPRINT_ATTRIBUTE).map(String::as_str) != Some(fingerprint) {
        return None;
    }
    Some(BuiltBundle {
        image: attributes.get(IMAGE_ATTRIBUTE)?.clone(),
        import_map: attributes
            .get(IMPORT_MAP_ATTRIBUTE)
            .and_then(|m| serde_json::from_str(m).ok()),
    })
}

/// `Host(`domain`) && PathPrefix(`path`)`
pub fn route_match(domain: &str, path: &str) -> String {
    format!("Host(`{domain}`) && PathPrefix(`{path}`)")
}

fn route(matcher: String, service: &str, port: i32) -> Route {
    Route {
        match_: matcher,
        kind: "Rule".into(),
        priority: None,
        services: vec![RouteService {
            name: service.into(),
            kind: None,
            port: Some(port),
        }],
    }
}

/// Routes for every backend and Ready function, then the catch-all to the
/// page server.
pub fn routes(ctx: &Ctx, host: &str, domain: &str, aggregation: &Aggregation, backends: &[ResolvedBackend]) -> Vec<Route> {
    let mut routes: Vec<Route> = backends
        .iter()
        .map(|b| route(route_match(domain, &b.backend.ingress_path), &b.child_name(host), SERVICE_PORT))
        .collect();
    routes.extend(
        aggregation
            .functions
            .iter()
            .filter(|f| f.ready)
            .map(|f| route(route_match(domain, &f.path), &f.name, ctx.settings.function_port)),
    );
    routes.push(route(
        format!("Host(`{domain}`)"),
        &ctx.settings.server_service,
        ctx.settings.server_port,
    ));
    routes
}

fn translations(items: &[Translation]) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut items: Vec<&Translation> = items.iter().collect();
    items.sort_by_key(|t| t.name_any());
    let mut merged: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for translation in items {
        merged
            .entry(translation.spec.language.clone())
            .or_default()
            .extend(translation.spec.entries.clone());
    }
    merged
}

impl Host {
    fn key(&self) -> ObjectKey {
        ObjectKey::of(self)
    }

    /// Resolves the theme, its library, the host's library and every
    /// required backend, and collects bindings and functions that name this
    /// host.
    async fn siblings(&self, ctx: &Ctx, referrer: &Referrer, status: &mut HostStatus) -> Result<Flow<Siblings>> {
        let conditions = &mut status.conditions;
        let spec = &self.spec;
        let theme = proceed!(
            resolve(ctx, referrer, conditions, spec.theme_ref.as_ref(), ReferenceKind::THEMES, "themeRef").await?
        );

        let mut theme_library = None;
        if let Some(theme) = &theme {
            // the theme's reference is relative to the theme, not the host
            let theme_referrer = Referrer {
                description: theme.describe(),
                namespace: theme.namespace(),
                generation: referrer.generation,
            };
            let reference = theme.script_library_ref();
            ctx.router.extend(
                &self.key(),
                reference.and_then(|r| ObjectKey::referenced(theme_referrer.namespace.as_deref(), r)),
            );
            theme_library = proceed!(
                resolve(ctx, &theme_referrer, conditions, reference, ReferenceKind::SCRIPT_LIBRARIES, "themeRef.scriptLibraryRef")
                    .await?
            );
        }

        let library = proceed!(
            resolve(
                ctx,
                referrer,
                conditions,
                spec.script_library_ref.as_ref(),
                ReferenceKind::SCRIPT_LIBRARIES,
                "scriptLibraryRef",
            )
            .await?
        );
        let required = proceed!(
            resolve_all(ctx, referrer, conditions, &spec.requires, ReferenceKind::BACKENDS, "requires").await?
        );

        let name = self.name_any();
        let namespace = referrer.namespace.as_deref();
        let pages = ctx
            .store
            .list::<PageBinding>(namespace, None)
            .await?
            .into_iter()
            .filter(|p| p.spec.host_ref == name)
            .collect();
        let functions = ctx
            .store
            .list::<Function>(namespace, None)
            .await?
            .into_iter()
            .filter(|f| f.spec.host_ref == name)
            .collect();

        Ok(Flow::Continue(Siblings {
            theme,
            theme_library,
            library,
            pages,
            required,
            functions,
        }))
    }

    async fn auth(&self, ctx: &Ctx, referrer: &Referrer, status: &mut HostStatus) -> Result<Flow<Option<AuthConfig>>> {
        let Some(auth) = &self.spec.auth else {
            return Ok(Flow::Continue(None));
        };
        let client_secret =
            proceed!(resolve_secret_key(ctx, referrer, &mut status.conditions, &auth.client_secret).await?);
        Ok(Flow::Continue(Some(AuthConfig {
            issuer_url: auth.issuer_url.clone(),
            client_id: auth.client_id.clone(),
            client_secret,
            scopes: auth.scopes.clone(),
        })))
    }

    /// Keeps the package bundle child in line with the aggregated package
    /// list. Returns the bundle once it has been built for that list.
    async fn bundle(&self, ctx: &Ctx, owner: &Owner, aggregation: &Aggregation) -> Result<Option<BuiltBundle>> {
        let name = bundle_name(&self.name_any());
        let namespace = owner.namespace();
        if aggregation.package_refs.is_empty() {
            if ctx.store.delete::<PackageReferences>(namespace, &name).await? {
                info!(bundle = %name, "removed package bundle");
            }
            return Ok(None);
        }

        let labels = host_labels(&self.name_any());
        let (_, bundle) = with_event(
            ctx,
            self,
            "Applied package bundle",
            "PackagesFailed",
            ensure(&ctx.store, owner, &name, |bundle: &mut PackageReferences| {
                merge_labels(&mut bundle.metadata, &labels);
                bundle.spec.package_references = aggregation.package_refs.clone();
                Ok(())
            }),
        )
        .await?;
        let fingerprint = packages::fingerprint(&aggregation.package_refs)?;
        Ok(built_bundle(&bundle, &fingerprint))
    }

    async fn workload(&self, ctx: &Ctx, owner: &Owner, backend: &ResolvedBackend) -> Result<()> {
        let host = self.name_any();
        let child = backend.child_name(&host);
        let mut labels = host_labels(&host);
        labels.insert(BACKEND_LABEL.into(), backend.name.clone());

        with_event(
            ctx,
            self,
            &format!("Applied Deployment {child}"),
            "DeploymentFailed",
            ensure(&ctx.store, owner, &child, |deployment: &mut Deployment| {
                overlay_deployment(
                    deployment,
                    &ctx.templates,
                    &labels,
                    &backend.backend,
                    &ctx.settings.static_server_image,
                )
            }),
        )
        .await?;
        with_event(
            ctx,
            self,
            &format!("Applied Service {child}"),
            "ServiceFailed",
            ensure(&ctx.store, owner, &child, |service: &mut Service| {
                overlay_service(service, &ctx.templates, &labels);
                Ok(())
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Reconcile for Host {
    #[instrument(skip_all, fields(host = %self.name_any()))]
    async fn apply(&self, status: &mut HostStatus, ctx: &Ctx) -> Result<Action> {
        let name = self.name_any();
        let namespace = self.namespace().unwrap_or_default();
        let generation = self.meta().generation;
        let referrer = Referrer::of(self);
        let owner = Owner::of(self)?;

        let spec = &self.spec;
        let mut edges: Vec<ObjectKey> = spec
            .theme_ref
            .iter()
            .chain(&spec.script_library_ref)
            .chain(&spec.requires)
            .filter_map(|r| ObjectKey::referenced(Some(&namespace), r))
            .collect();
        if let Some(auth) = &spec.auth {
            edges.push(ObjectKey::new("Secret", Some(&namespace), &auth.client_secret.name));
        }
        ctx.router.record(&self.key(), edges);

        // nothing below may run for a host whose references are not Ready
        // or whose paths collide
        let siblings = proceed!(self.siblings(ctx, &referrer, status).await?);
        let auth = proceed!(self.auth(ctx, &referrer, status).await?);
        let aggregation = aggregate(self, &siblings)?;

        let mut backends = aggregation.backends.clone();
        let mut children = BTreeSet::new();
        for backend in &backends {
            if !children.insert(backend.child_name(&name)) {
                return Err(Error::InvalidSpec(format!(
                    "two backends named {} would share workload {}",
                    backend.name,
                    backend.child_name(&name)
                )));
            }
        }

        let packages_child = format!("{name}-{PACKAGES_BACKEND}");
        if !aggregation.package_refs.is_empty() && children.contains(&packages_child) {
            return Err(Error::InvalidSpec(format!(
                "backend {PACKAGES_BACKEND} would share workload {packages_child} with the package bundle"
            )));
        }

        let bundle = self.bundle(ctx, &owner, &aggregation).await?;
        if let Some(bundle) = &bundle {
            let packages = ResolvedBackend {
                kind: "PackageReferences".into(),
                name: PACKAGES_BACKEND.into(),
                namespace: Some(namespace.clone()),
                backend: Backend {
                    ingress_path: PACKAGES_PATH.into(),
                    static_image: Some(bundle.image.clone()),
                    ..Default::default()
                },
            };
            children.insert(packages.child_name(&name));
            backends.push(packages);
        }

        for backend in &backends {
            self.workload(ctx, &owner, backend).await?;
        }

        let labels = host_labels(&name);
        let routes = routes(ctx, &name, &spec.domain, &aggregation, &backends);
        with_event(
            ctx,
            self,
            "Applied IngressRoute",
            "IngressRouteFailed",
            ensure(&ctx.store, &owner, &name, |route: &mut IngressRoute| {
                overlay_ingress_route(route, &ctx.templates, &labels, routes);
                Ok(())
            }),
        )
        .await?;

        let namespace_ref = Some(namespace.as_str());
        for removed in sweep::<Deployment>(&ctx.store, namespace_ref, &name, &children).await? {
            debug!(deployment = %removed, "swept");
        }
        sweep::<Service>(&ctx.store, namespace_ref, &name, &children).await?;

        let translations = translations(
            &ctx.store
                .list::<Translation>(namespace_ref, None)
                .await?
                .into_iter()
                .filter(|t| t.spec.host_ref == name)
                .collect::<Vec<_>>(),
        );
        let pending_functions: Vec<&str> = aggregation
            .functions
            .iter()
            .filter(|f| !f.ready)
            .map(|f| f.name.as_str())
            .collect();
        let packages_pending = !aggregation.package_refs.is_empty() && bundle.is_none();

        ctx.sink.set_host(
            &namespace,
            &name,
            HostConfig {
                spec: spec.clone(),
                package_refs: aggregation.package_refs.clone(),
                theme_assets: aggregation.theme_assets.clone(),
                scripts: aggregation.scripts.clone(),
                import_map: bundle.and_then(|b| b.import_map),
                initial_paths: aggregation.initial_paths.clone(),
                functions: aggregation.functions.clone(),
                auth_exchanger: auth
                    .as_ref()
                    .map(|_| format!("https://{}{AUTH_CALLBACK_PATH}", spec.domain)),
                auth_config: auth,
                translations,
            },
        );

        status.attributes = aggregation.paths.clone();
        status.detail = Some(format!(
            "{} backends, {} functions, {} pages",
            backends.len(),
            aggregation.functions.len(),
            aggregation.initial_paths.len()
        ));
        if packages_pending {
            set_conditions(
                &mut status.conditions,
                ConditionTriple::PROGRESSING,
                PACKAGES_BUILDING,
                "waiting for the package bundle",
                generation,
            );
        } else if !pending_functions.is_empty() {
            set_conditions(
                &mut status.conditions,
                ConditionTriple::PROGRESSING,
                FUNCTIONS_PENDING,
                &format!("waiting for functions: {}", pending_functions.join(", ")),
                generation,
            );
        } else {
            set_conditions(&mut status.conditions, ConditionTriple::READY, "Reconciled", "", generation);
        }
        Ok(Action::await_change())
    }

    fn is_focal(&self, ctx: &Ctx) -> bool {
        ctx.settings
            .focal_host
            .as_ref()
            .is_none_or(|focal| focal.matches(self.namespace().as_deref(), &self.name_any()))
    }

    fn forget(ctx: &Ctx, namespace: Option<&str>, name: &str) {
        ctx.router.forget(&ObjectKey::new("Host", namespace, name));
        if let Some(namespace) = namespace {
            ctx.sink.remove_host(namespace, name);
            info!(host = name, "unpublished deleted host");
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Secret;

    use super::*;
    use crate::{
        aggregate::HEALTH_PATH,
        conditions::{self, PROGRESSING},
        config::FocalHost,
        crd::{App, AppSpec, AuthSpec, ObjectReference, PackageReference, PageBindingSpec, SecretKeyReference, TranslationSpec},
        reconcile::reconcile_object,
        sink::HostRegistry,
        testing::{self, NAMESPACE, server},
    };

    async fn app(ctx: &Ctx, name: &str, path: &str) {
        let app = App {
            metadata: testing::meta(name),
            spec: AppSpec {
                backend: server(path, &format!("{name}:1")),
            },
            status: None,
        };
        ctx.store.create(&app).await.expect("app");
        testing::mark_ready::<App>(&ctx.store, Some(NAMESPACE), name).await;
    }

    async fn pass(ctx: &Ctx) -> Result<Action> {
        reconcile_object::<Host>(ctx, Some(NAMESPACE), "site").await
    }

    async fn stored(ctx: &Ctx) -> HostStatus {
        let host: Host = ctx.store.get(Some(NAMESPACE), "site").await.expect("get").expect("host");
        host.status.unwrap_or_default()
    }

    fn with_registry() -> (std::sync::Arc<crate::store::MemoryStore>, Ctx, std::sync::Arc<HostRegistry>) {
        let (memory, ctx) = testing::ctx();
        let registry = std::sync::Arc::new(HostRegistry::default());
        let ctx = ctx.with_sink(registry.clone());
        (memory, ctx, registry)
    }

    #[test]
    fn catch_all_route_comes_last() {
        let (_, ctx) = testing::ctx();
        let aggregation = Aggregation::default();
        let backend = ResolvedBackend {
            kind: "App".into(),
            name: "docs".into(),
            namespace: Some(NAMESPACE.into()),
            backend: server("/docs", "docs:1"),
        };
        let routes = routes(&ctx, "site", "site.example", &aggregation, &[backend]);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].match_, "Host(`site.example`) && PathPrefix(`/docs`)");
        assert_eq!(routes[0].services[0].name, "site-docs");
        assert_eq!(routes[1].match_, "Host(`site.example`)");
        assert_eq!(routes[1].services[0].name, ctx.settings.server_service);
    }

    #[tokio::test]
    async fn synthesizes_workloads_routes_and_config() {
        let (memory, ctx, registry) = with_registry();
        app(&ctx, "docs", "/docs").await;
        let mut host = testing::host("site", "site.example");
        host.spec.backend = Some(server("/", "site:1"));
        host.spec.requires = vec![ObjectReference::new("App", "docs")];
        ctx.store.create(&host).await.expect("host");
        let binding = PageBinding {
            metadata: testing::meta("about"),
            spec: PageBindingSpec {
                host_ref: "site".into(),
                path: "/about".into(),
                page: Some("about".into()),
                backend: None,
            },
        };
        ctx.store.create(&binding).await.expect("binding");
        let translation = Translation {
            metadata: testing::meta("site-de"),
            spec: TranslationSpec {
                host_ref: "site".into(),
                language: "de".into(),
                entries: BTreeMap::from([("hello".to_string(), "hallo".to_string())]),
            },
        };
        ctx.store.create(&translation).await.expect("translation");

        assert_eq!(pass(&ctx).await.expect("reconcile"), Action::await_change());

        for name in ["site-main", "site-docs"] {
            let deployment: Option<Deployment> = ctx.store.get(Some(NAMESPACE), name).await.expect("get");
            assert!(deployment.is_some(), "{name}");
            let service: Option<Service> = ctx.store.get(Some(NAMESPACE), name).await.expect("get");
            assert!(service.is_some(), "{name}");
        }
        let route: IngressRoute = ctx.store.get(Some(NAMESPACE), "site").await.expect("get").expect("route");
        assert_eq!(route.spec.entry_points, vec!["websecure".to_string()]);
        assert_eq!(route.spec.routes.len(), 3);

        let status = stored(&ctx).await;
        assert!(conditions::is_ready(&status.conditions));
        assert_eq!(status.attributes.get("/docs").map(String::as_str), Some("App/docs"));
        assert_eq!(status.attributes.get(HEALTH_PATH).map(String::as_str), Some("Host/site"));

        let config = registry.get(NAMESPACE, "site").expect("published");
        assert_eq!(config.initial_paths, vec!["/about".to_string()]);
        assert_eq!(config.translations["de"]["hello"], "hallo");

        memory.clear_writes();
        pass(&ctx).await.expect("second pass");
        assert!(memory.writes().is_empty(), "{:?}", memory.writes());
    }

    #[tokio::test]
    async fn removed_requirements_are_swept() {
        let (_, ctx) = testing::ctx();
        app(&ctx, "docs", "/docs").await;
        let mut host = testing::host("site", "site.example");
        host.spec.requires = vec![ObjectReference::new("App", "docs")];
        ctx.store.create(&host).await.expect("host");
        pass(&ctx).await.expect("first pass");

        let mut host: Host = ctx.store.get(Some(NAMESPACE), "site").await.expect("get").expect("host");
        host.spec.requires.clear();
        ctx.store.replace(&host).await.expect("replace");
        pass(&ctx).await.expect("second pass");

        let deployment: Option<Deployment> = ctx.store.get(Some(NAMESPACE), "site-docs").await.expect("get");
        assert!(deployment.is_none());
        let service: Option<Service> = ctx.store.get(Some(NAMESPACE), "site-docs").await.expect("get");
        assert!(service.is_none());
    }

    #[tokio::test]
    async fn waits_for_the_package_bundle() {
        let (_, ctx) = testing::ctx();
        let mut host = testing::host("site", "site.example");
        host.spec.package_references = vec![PackageReference::new("htmx", "1.9.0")];
        ctx.store.create(&host).await.expect("host");

        pass(&ctx).await.expect("reconcile");
        let bundle: PackageReferences = ctx
            .store
            .get(Some(NAMESPACE), "site-packages")
            .await
            .expect("get")
            .expect("bundle");
        assert_eq!(bundle.spec.package_references, vec![PackageReference::new("htmx", "1.9.0")]);
        let status = stored(&ctx).await;
        let progressing = conditions::find(&status.conditions, PROGRESSING).expect("progressing");
        assert_eq!(progressing.reason.as_deref(), Some(PACKAGES_BUILDING));
        assert_eq!(status.attributes.get(PACKAGES_PATH).map(String::as_str), Some("PackageReferences/site-packages"));

        let mut host: Host = ctx.store.get(Some(NAMESPACE), "site").await.expect("get").expect("host");
        host.spec.package_references.clear();
        ctx.store.replace(&host).await.expect("replace");
        pass(&ctx).await.expect("reconcile");
        let bundle: Option<PackageReferences> = ctx.store.get(Some(NAMESPACE), "site-packages").await.expect("get");
        assert!(bundle.is_none());
        assert!(conditions::is_ready(&stored(&ctx).await.conditions));
    }

    #[tokio::test]
    async fn backend_named_packages_clashes_with_the_bundle() {
        let (memory, ctx) = testing::ctx();
        app(&ctx, "packages", "/docs").await;
        let mut host = testing::host("site", "site.example");
        host.spec.requires = vec![ObjectReference::new("App", "packages")];
        host.spec.package_references = vec![PackageReference::new("htmx", "1.9.0")];
        ctx.store.create(&host).await.expect("host");
        memory.clear_writes();

        let err = pass(&ctx).await.expect_err("clash");
        assert!(matches!(err, Error::InvalidSpec(ref message) if message.contains("site-packages")));
        assert_eq!(memory.writes(), vec!["status Host site".to_string()]);
        let deployment: Option<Deployment> = ctx.store.get(Some(NAMESPACE), "site-packages").await.expect("get");
        assert!(deployment.is_none());
        let bundle: Option<PackageReferences> = ctx.store.get(Some(NAMESPACE), "site-packages").await.expect("get");
        assert!(bundle.is_none());
    }

    #[tokio::test]
    async fn auth_waits_for_its_secret() {
        let (_, ctx, registry) = with_registry();
        let mut host = testing::host("site", "site.example");
        host.spec.auth = Some(AuthSpec {
            issuer_url: "https://id.example".into(),
            client_id: "site".into(),
            client_secret: SecretKeyReference {
                name: "site-oidc".into(),
                key: "secret".into(),
            },
            scopes: vec!["openid".into()],
        });
        ctx.store.create(&host).await.expect("host");

        let action = pass(&ctx).await.expect("reconcile");
        assert_eq!(action, Action::requeue(ctx.settings.missing_reference_requeue));
        assert!(registry.get(NAMESPACE, "site").is_none());

        let secret = Secret {
            metadata: testing::meta("site-oidc"),
            string_data: Some(BTreeMap::from([("secret".to_string(), "hunter2".to_string())])),
            ..Default::default()
        };
        ctx.store.create(&secret).await.expect("secret");
        pass(&ctx).await.expect("reconcile");

        let config = registry.get(NAMESPACE, "site").expect("published");
        let auth = config.auth_config.as_ref().expect("auth");
        assert_eq!(auth.client_secret, "hunter2");
        assert_eq!(config.auth_exchanger.as_deref(), Some("https://site.example/_/auth/callback"));
    }

    #[tokio::test]
    async fn deleted_hosts_are_unpublished() {
        let (_, ctx, registry) = with_registry();
        ctx.store.create(&testing::host("site", "site.example")).await.expect("host");
        pass(&ctx).await.expect("reconcile");
        assert!(registry.get(NAMESPACE, "site").is_some());

        ctx.store.delete::<Host>(Some(NAMESPACE), "site").await.expect("delete");
        assert_eq!(pass(&ctx).await.expect("reconcile"), Action::await_change());
        assert!(registry.get(NAMESPACE, "site").is_none());
        let route: Option<IngressRoute> = ctx.store.get(Some(NAMESPACE), "site").await.expect("get");
        assert!(route.is_none());
    }

    #[tokio::test]
    async fn other_hosts_are_ignored_when_pinned() {
        let (memory, ctx) = testing::ctx();
        let mut settings = ctx.settings.clone();
        settings.focal_host = Some(FocalHost {
            namespace: NAMESPACE.into(),
            name: "blog".into(),
        });
        let ctx = Ctx::new(ctx.store.clone(), settings);
        ctx.store.create(&testing::host("site", "site.example")).await.expect("host");
        memory.clear_writes();

        pass(&ctx).await.expect("reconcile");
        assert!(memory.writes().is_empty(), "{:?}", memory.writes());
        let route: Option<IngressRoute> = ctx.store.get(Some(NAMESPACE), "site").await.expect("get");
        assert!(route.is_none());
    }
}
