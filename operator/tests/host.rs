use std::sync::Arc;

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::runtime::{controller::Action, reflector::ObjectRef};
use webhost_operator::{
    Error,
    conditions::{self, PROGRESSING},
    crd::{
        App, AppSpec, Function, FunctionSpec, FunctionStatus, Host, ObjectReference, PackageReference,
        PackageReferences, PageBinding, PageBindingSpec, PipelineStage, ScriptDefinition, ScriptLibrary,
        ScriptLibrarySpec, Theme, ThemeSpec, traefik::IngressRoute,
    },
    event::Ctx,
    host::{FUNCTIONS_PENDING, PACKAGES_BUILDING},
    resolver::REFERENCE_NOT_READY,
    router::ObjectKey,
    sink::HostRegistry,
    testing::{DIGEST, NAMESPACE, ctx, finish_job, get, host, mark_ready, meta, reconcile, server},
};

fn with_registry() -> (Arc<webhost_operator::store::MemoryStore>, Ctx, Arc<HostRegistry>) {
    let (memory, ctx) = ctx();
    let registry = Arc::new(HostRegistry::default());
    let ctx = ctx.with_sink(registry.clone());
    (memory, ctx, registry)
}

async fn app(ctx: &Ctx, name: &str, path: &str) {
    let app = App {
        metadata: meta(name),
        spec: AppSpec {
            backend: server(path, &format!("{name}:1")),
        },
        status: None,
    };
    ctx.store.create(&app).await.expect("app");
    mark_ready::<App>(&ctx.store, Some(NAMESPACE), name).await;
}

async fn host_status(ctx: &Ctx) -> webhost_operator::crd::HostStatus {
    get::<Host>(ctx, "site").await.expect("host").status.unwrap_or_default()
}

fn progressing_reason(status: &webhost_operator::crd::HostStatus) -> Option<String> {
    conditions::find(&status.conditions, PROGRESSING).and_then(|c| c.reason.clone())
}

#[tokio::test]
async fn colliding_paths_leave_children_untouched() {
    let (memory, ctx) = ctx();
    app(&ctx, "docs", "/docs").await;
    let mut site = host("site", "site.example");
    site.spec.requires = vec![ObjectReference::new("App", "docs")];
    ctx.store.create(&site).await.expect("host");
    reconcile::<Host>(&ctx, "site").await.expect("converge");
    assert!(get::<Deployment>(&ctx, "site-docs").await.is_some());
    let route_before: IngressRoute = get(&ctx, "site").await.expect("route");

    let binding = PageBinding {
        metadata: meta("docs-page"),
        spec: PageBindingSpec {
            host_ref: "site".into(),
            path: "/docs/".into(),
            page: Some("docs".into()),
            backend: None,
        },
    };
    ctx.store.create(&binding).await.expect("binding");
    memory.clear_writes();

    let err = reconcile::<Host>(&ctx, "site").await.expect_err("collision");
    match err {
        Error::PathCollision { path, first, second } => {
            assert_eq!(path, "/docs");
            assert_eq!(first, "PageBinding/docs-page");
            assert_eq!(second, "App/docs");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(memory.writes(), vec!["status Host site".to_string()]);
    assert!(!conditions::is_ready(&host_status(&ctx).await.conditions));
    assert!(get::<Deployment>(&ctx, "site-docs").await.is_some());
    let route_after: IngressRoute = get(&ctx, "site").await.expect("route");
    assert_eq!(route_before.spec, route_after.spec);

    // the same failure again changes nothing at all
    memory.clear_writes();
    reconcile::<Host>(&ctx, "site").await.expect_err("collision");
    assert!(memory.writes().is_empty(), "{:?}", memory.writes());
}

#[tokio::test]
async fn readiness_flows_from_library_to_theme_to_host() {
    let (_, ctx, registry) = with_registry();
    let library = ScriptLibrary {
        metadata: meta("widgets"),
        spec: ScriptLibrarySpec {
            scripts: vec![ScriptDefinition {
                name: "menu".into(),
                src: Some("/static/menu.js".into()),
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    };
    let theme = Theme {
        metadata: meta("blue"),
        spec: ThemeSpec {
            script_library_ref: Some(ObjectReference::new("ScriptLibrary", "widgets")),
            stylesheets: vec!["/static/blue.css".into()],
            ..Default::default()
        },
        status: None,
    };
    let mut site = host("site", "site.example");
    site.spec.theme_ref = Some(ObjectReference::new("Theme", "blue"));
    ctx.store.create(&library).await.expect("library");
    ctx.store.create(&theme).await.expect("theme");
    ctx.store.create(&site).await.expect("host");

    let waiting = Action::requeue(ctx.settings.missing_reference_requeue);
    assert_eq!(reconcile::<Host>(&ctx, "site").await.expect("host"), waiting);
    let status = host_status(&ctx).await;
    assert!(!conditions::is_ready(&status.conditions));
    assert_eq!(progressing_reason(&status).as_deref(), Some(REFERENCE_NOT_READY));
    assert_eq!(reconcile::<Theme>(&ctx, "blue").await.expect("theme"), waiting);
    assert!(registry.get(NAMESPACE, "site").is_none());

    reconcile::<ScriptLibrary>(&ctx, "widgets").await.expect("library");
    reconcile::<Theme>(&ctx, "blue").await.expect("theme");
    let theme: Theme = get(&ctx, "blue").await.expect("theme");
    assert!(conditions::is_ready(&theme.status.expect("status").conditions));

    assert_eq!(reconcile::<Host>(&ctx, "site").await.expect("host"), Action::await_change());
    assert!(conditions::is_ready(&host_status(&ctx).await.conditions));
    let config = registry.get(NAMESPACE, "site").expect("published");
    assert_eq!(config.scripts.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["menu"]);

    // a library change wakes both the theme and the host using it
    let library_key = ObjectKey::new("ScriptLibrary", Some(NAMESPACE), "widgets");
    assert_eq!(
        ctx.router.requests::<Host>(&library_key),
        vec![ObjectRef::<Host>::new("site").within(NAMESPACE)]
    );
    assert_eq!(
        ctx.router.requests::<Theme>(&library_key),
        vec![ObjectRef::<Theme>::new("blue").within(NAMESPACE)]
    );
}

#[tokio::test]
async fn built_bundle_is_served_under_the_packages_path() {
    let (_, ctx, registry) = with_registry();
    let mut site = host("site", "site.example");
    site.spec.package_references = vec![PackageReference::new("htmx", "1.9.0")];
    ctx.store.create(&site).await.expect("host");

    reconcile::<Host>(&ctx, "site").await.expect("host");
    assert_eq!(progressing_reason(&host_status(&ctx).await).as_deref(), Some(PACKAGES_BUILDING));
    assert!(get::<Deployment>(&ctx, "site-packages").await.is_none());

    reconcile::<PackageReferences>(&ctx, "site-packages").await.expect("bundle");
    finish_job(
        &ctx.store,
        "site-packages-build",
        &[("generator", r#"{"imports":{"htmx":"/_/packages/htmx.js"}}"#), ("builder", DIGEST)],
    )
    .await;
    reconcile::<PackageReferences>(&ctx, "site-packages").await.expect("bundle");

    reconcile::<Host>(&ctx, "site").await.expect("host");
    assert!(conditions::is_ready(&host_status(&ctx).await.conditions));

    let image = format!("{}/web/site-packages@{DIGEST}", ctx.settings.registry);
    let deployment: Deployment = get(&ctx, "site-packages").await.expect("deployment");
    let rendered = serde_json::to_string(&deployment).expect("json");
    assert!(rendered.contains(&image), "{rendered}");
    assert!(get::<Service>(&ctx, "site-packages").await.is_some());

    let route: IngressRoute = get(&ctx, "site").await.expect("route");
    let packages = route
        .spec
        .routes
        .iter()
        .find(|r| r.match_.contains("PathPrefix(`/_/packages`)"))
        .expect("packages route");
    assert_eq!(packages.services[0].name, "site-packages");

    let config = registry.get(NAMESPACE, "site").expect("published");
    let import_map = config.import_map.as_ref().expect("import map");
    assert_eq!(import_map["imports"]["htmx"], "/_/packages/htmx.js");
}

#[tokio::test]
async fn functions_gate_readiness_and_routes() {
    let (memory, ctx) = ctx();
    ctx.store.create(&host("site", "site.example")).await.expect("host");
    let function = Function {
        metadata: meta("hello"),
        spec: FunctionSpec {
            host_ref: "site".into(),
            ingress_path: "/api/hello".into(),
            language: "python".into(),
            environment: "3.12".into(),
            ..Default::default()
        },
        status: None,
    };
    ctx.store.create(&function).await.expect("function");

    reconcile::<Host>(&ctx, "site").await.expect("host");
    let status = host_status(&ctx).await;
    assert_eq!(progressing_reason(&status).as_deref(), Some(FUNCTIONS_PENDING));
    assert_eq!(status.attributes.get("/api/hello").map(String::as_str), Some("Function/hello"));
    let route: IngressRoute = get(&ctx, "site").await.expect("route");
    assert!(route.spec.routes.iter().all(|r| !r.match_.contains("/api/hello")));

    let mut function: Function = get(&ctx, "hello").await.expect("function");
    function.status = Some(FunctionStatus {
        state: PipelineStage::Ready,
        url: Some("https://fn.example/web/hello".into()),
        ..Default::default()
    });
    ctx.store.replace_status(&function).await.expect("status");

    reconcile::<Host>(&ctx, "site").await.expect("host");
    assert!(conditions::is_ready(&host_status(&ctx).await.conditions));
    let route: IngressRoute = get(&ctx, "site").await.expect("route");
    let hello = route
        .spec
        .routes
        .iter()
        .find(|r| r.match_ == "Host(`site.example`) && PathPrefix(`/api/hello`)")
        .expect("function route");
    assert_eq!(hello.services[0].name, "hello");
    assert_eq!(hello.services[0].port, Some(ctx.settings.function_port));
    assert_eq!(route.spec.routes.last().map(|r| r.match_.as_str()), Some("Host(`site.example`)"));

    memory.clear_writes();
    reconcile::<Host>(&ctx, "site").await.expect("host");
    assert!(memory.writes().is_empty(), "{:?}", memory.writes());
}
