//! Wires one `kube::runtime::Controller` per kind to the shared context.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::{StreamExt, future};
use k8s_openapi::{
    NamespaceResourceScope,
    api::{
        apps::v1::Deployment,
        batch::v1::Job,
        core::v1::{ConfigMap, Secret, Service},
    },
};
use kube::{
    Api, Client, Resource, ResourceExt,
    runtime::{
        Controller,
        controller::{self, Action},
        reflector::ObjectRef,
        watcher,
    },
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::Settings,
    crd::{
        App, ClusterApp, ClusterFaasAdaptor, ClusterScriptLibrary, ClusterTheme, FaasAdaptor,
        Function, Host, PackageReferences, PageBinding, ScriptLibrary, Theme, Translation,
        traefik::IngressRoute,
    },
    error::{Error, Result},
    event::Ctx,
    reconcile::{Reconcile, reconcile_object},
    router::{ObjectKey, host_request},
    store::{KubeStore, Store},
};

/// Per-object exponential backoff for failed reconciles.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// `min(base * 2^failures, max)`, counting this failure.
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.clone()).or_insert(0);
        let factor = 2u32.checked_pow(*count).unwrap_or(u32::MAX);
        *count = count.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[instrument(skip_all, fields(kind = %K::kind(&()), name = %object.name_any()))]
async fn reconcile<K: Reconcile>(object: Arc<K>, ctx: Arc<Ctx>) -> Result<Action> {
    let key = ObjectKey::of(object.as_ref());
    let action = reconcile_object::<K>(&ctx, object.namespace().as_deref(), &object.name_any()).await?;
    ctx.backoff.reset(&key);
    debug!(?action, "reconciled");
    Ok(action)
}

fn error_policy<K: Reconcile>(object: Arc<K>, error: &Error, ctx: Arc<Ctx>) -> Action {
    let delay = ctx.backoff.next_delay(&ObjectKey::of(object.as_ref()));
    warn!(
        kind = %K::kind(&()),
        name = %object.name_any(),
        %error,
        retry_in = ?delay,
        "reconcile failed"
    );
    Action::requeue(delay)
}

fn namespaced<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Maps a change of a referenced object to its referrers of kind `R`.
fn referrers<W, R>(ctx: &Arc<Ctx>) -> impl Fn(W) -> Vec<ObjectRef<R>> + Send + Sync + 'static
where
    W: Resource<DynamicType = ()>,
    R: Resource<DynamicType = ()>,
{
    let ctx = ctx.clone();
    move |object| ctx.router.requests::<R>(&ObjectKey::of(&object))
}

async fn drive<K, S, E>(stream: S)
where
    K: Resource<DynamicType = ()>,
    S: futures::Stream<Item = std::result::Result<(ObjectRef<K>, Action), controller::Error<Error, E>>>,
    E: std::error::Error + 'static,
{
    stream
        .for_each(|result| {
            if let Err(err) = result {
                debug!(error = %err, "controller event");
            }
            future::ready(())
        })
        .await
}

fn base<K>(api: Api<K>, settings: &Settings) -> Controller<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    Controller::new(api, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(settings.concurrency))
}

/// Runs every controller until the process is asked to stop.
pub async fn run(client: Client, settings: Settings) -> Result<()> {
    let ns = settings.watch_namespace.clone();
    let ns = ns.as_deref();
    let store = Store::new(Arc::new(KubeStore::new(client.clone())));
    let ctx = Arc::new(Ctx::new(store, settings.clone()).with_recorder(client.clone()));
    let config = watcher::Config::default();
    let jobs = watcher::Config::default().labels(&format!(
        "{}={}",
        crate::synthesize::MANAGED_BY_LABEL,
        crate::synthesize::MANAGER
    ));

    info!(namespace = ?ns, concurrency = settings.concurrency, "starting controllers");

    let hosts = base(namespaced::<Host>(&client, ns), &settings)
        .owns(namespaced::<Deployment>(&client, ns), config.clone())
        .owns(namespaced::<Service>(&client, ns), config.clone())
        .owns(namespaced::<IngressRoute>(&client, ns), config.clone())
        .owns(namespaced::<PackageReferences>(&client, ns), config.clone())
        .watches(namespaced::<Theme>(&client, ns), config.clone(), referrers::<Theme, Host>(&ctx))
        .watches(Api::<ClusterTheme>::all(client.clone()), config.clone(), referrers::<ClusterTheme, Host>(&ctx))
        .watches(namespaced::<ScriptLibrary>(&client, ns), config.clone(), referrers::<ScriptLibrary, Host>(&ctx))
        .watches(
            Api::<ClusterScriptLibrary>::all(client.clone()),
            config.clone(),
            referrers::<ClusterScriptLibrary, Host>(&ctx),
        )
        .watches(namespaced::<App>(&client, ns), config.clone(), referrers::<App, Host>(&ctx))
        .watches(Api::<ClusterApp>::all(client.clone()), config.clone(), referrers::<ClusterApp, Host>(&ctx))
        .watches(namespaced::<Secret>(&client, ns), config.clone(), referrers::<Secret, Host>(&ctx))
        .watches(namespaced::<PageBinding>(&client, ns), config.clone(), |binding: PageBinding| {
            host_request(&binding.spec.host_ref, &binding)
        })
        .watches(namespaced::<Translation>(&client, ns), config.clone(), |translation: Translation| {
            host_request(&translation.spec.host_ref, &translation)
        })
        .watches(namespaced::<Function>(&client, ns), config.clone(), |function: Function| {
            host_request(&function.spec.host_ref, &function)
        })
        .shutdown_on_signal()
        .run(reconcile::<Host>, error_policy::<Host>, ctx.clone());

    let functions = base(namespaced::<Function>(&client, ns), &settings)
        .owns(namespaced::<Job>(&client, ns), jobs.clone())
        .owns(namespaced::<ConfigMap>(&client, ns), jobs.clone())
        .watches(namespaced::<FaasAdaptor>(&client, ns), config.clone(), referrers::<FaasAdaptor, Function>(&ctx))
        .watches(
            Api::<ClusterFaasAdaptor>::all(client.clone()),
            config.clone(),
            referrers::<ClusterFaasAdaptor, Function>(&ctx),
        )
        .watches(namespaced::<Host>(&client, ns), config.clone(), referrers::<Host, Function>(&ctx))
        .shutdown_on_signal()
        .run(reconcile::<Function>, error_policy::<Function>, ctx.clone());

    let bundles = base(namespaced::<PackageReferences>(&client, ns), &settings)
        .owns(namespaced::<Job>(&client, ns), jobs.clone())
        .owns(namespaced::<ConfigMap>(&client, ns), jobs)
        .shutdown_on_signal()
        .run(reconcile::<PackageReferences>, error_policy::<PackageReferences>, ctx.clone());

    let themes = base(namespaced::<Theme>(&client, ns), &settings)
        .watches(namespaced::<ScriptLibrary>(&client, ns), config.clone(), referrers::<ScriptLibrary, Theme>(&ctx))
        .watches(
            Api::<ClusterScriptLibrary>::all(client.clone()),
            config.clone(),
            referrers::<ClusterScriptLibrary, Theme>(&ctx),
        )
        .shutdown_on_signal()
        .run(reconcile::<Theme>, error_policy::<Theme>, ctx.clone());
    let cluster_themes = base(Api::<ClusterTheme>::all(client.clone()), &settings)
        .watches(
            Api::<ClusterScriptLibrary>::all(client.clone()),
            config.clone(),
            referrers::<ClusterScriptLibrary, ClusterTheme>(&ctx),
        )
        .shutdown_on_signal()
        .run(reconcile::<ClusterTheme>, error_policy::<ClusterTheme>, ctx.clone());

    let libraries = base(namespaced::<ScriptLibrary>(&client, ns), &settings)
        .shutdown_on_signal()
        .run(reconcile::<ScriptLibrary>, error_policy::<ScriptLibrary>, ctx.clone());
    let cluster_libraries = base(Api::<ClusterScriptLibrary>::all(client.clone()), &settings)
        .shutdown_on_signal()
        .run(reconcile::<ClusterScriptLibrary>, error_policy::<ClusterScriptLibrary>, ctx.clone());
    let apps = base(namespaced::<App>(&client, ns), &settings)
        .shutdown_on_signal()
        .run(reconcile::<App>, error_policy::<App>, ctx.clone());
    let cluster_apps = base(Api::<ClusterApp>::all(client.clone()), &settings)
        .shutdown_on_signal()
        .run(reconcile::<ClusterApp>, error_policy::<ClusterApp>, ctx.clone());
    let adaptors = base(namespaced::<FaasAdaptor>(&client, ns), &settings)
        .shutdown_on_signal()
        .run(reconcile::<FaasAdaptor>, error_policy::<FaasAdaptor>, ctx.clone());
    let cluster_adaptors = base(Api::<ClusterFaasAdaptor>::all(client.clone()), &settings)
        .shutdown_on_signal()
        .run(reconcile::<ClusterFaasAdaptor>, error_policy::<ClusterFaasAdaptor>, ctx.clone());

    tokio::join!(
        drive(hosts),
        drive(functions),
        drive(bundles),
        drive(themes),
        drive(cluster_themes),
        drive(libraries),
        drive(cluster_libraries),
        drive(apps),
        drive(cluster_apps),
        drive(adaptors),
        drive(cluster_adaptors),
    );
    info!("controllers stopped");
    Ok(())
}
