//! Resolution of typed references between resources.
//!
//! A reference that cannot be satisfied yet (the referent is missing or not
//! Ready) is a soft failure: the referrer is marked as waiting and the
//! reconcile stops with a bounded requeue. Readiness therefore propagates
//! through chains of references.

use std::{collections::BTreeMap, fmt};

use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt, runtime::controller::Action};
use tracing::debug;

use crate::{
    conditions::{ConditionTriple, is_ready, set_conditions},
    crd::{
        App, Backend, ClusterApp, ClusterFaasAdaptor, ClusterScriptLibrary, ClusterTheme,
        Condition, FaasAdaptor, GeneratorConfig, Host, ObjectReference, PackageReference,
        ScriptDefinition, ScriptLibrary, SecretKeyReference, Theme,
    },
    error::{Error, Result},
    event::Ctx,
    reconcile::Flow,
    store::Store,
};

pub const REFERENCE_NOT_FOUND: &str = "ReferenceNotFound";
pub const REFERENCE_NOT_READY: &str = "ReferenceNotReady";
pub const SECRET_NOT_FOUND: &str = "SecretNotFound";

/// Every kind a reference may name. Scope is a property of the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReferenceKind {
    Theme,
    ClusterTheme,
    ScriptLibrary,
    ClusterScriptLibrary,
    App,
    ClusterApp,
    FaasAdaptor,
    ClusterFaasAdaptor,
}

impl ReferenceKind {
    pub const THEMES: &'static [Self] = &[Self::Theme, Self::ClusterTheme];
    pub const SCRIPT_LIBRARIES: &'static [Self] = &[Self::ScriptLibrary, Self::ClusterScriptLibrary];
    pub const FAAS_ADAPTORS: &'static [Self] = &[Self::FaasAdaptor, Self::ClusterFaasAdaptor];
    /// Kinds a host may list under `requires`.
    pub const BACKENDS: &'static [Self] = &[
        Self::App,
        Self::ClusterApp,
        Self::Theme,
        Self::ClusterTheme,
        Self::ScriptLibrary,
        Self::ClusterScriptLibrary,
    ];

    pub fn parse(kind: &str) -> Result<Self> {
        Ok(match kind {
            "Theme" => Self::Theme,
            "ClusterTheme" => Self::ClusterTheme,
            "ScriptLibrary" => Self::ScriptLibrary,
            "ClusterScriptLibrary" => Self::ClusterScriptLibrary,
            "App" => Self::App,
            "ClusterApp" => Self::ClusterApp,
            "FaasAdaptor" => Self::FaasAdaptor,
            "ClusterFaasAdaptor" => Self::ClusterFaasAdaptor,
            other => return Err(Error::UnknownReferenceKind(other.into())),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theme => "Theme",
            Self::ClusterTheme => "ClusterTheme",
            Self::ScriptLibrary => "ScriptLibrary",
            Self::ClusterScriptLibrary => "ClusterScriptLibrary",
            Self::App => "App",
            Self::ClusterApp => "ClusterApp",
            Self::FaasAdaptor => "FaasAdaptor",
            Self::ClusterFaasAdaptor => "ClusterFaasAdaptor",
        }
    }

    pub fn is_cluster_scoped(self) -> bool {
        match self {
            Self::Theme | Self::ScriptLibrary | Self::App | Self::FaasAdaptor => false,
            Self::ClusterTheme
            | Self::ClusterScriptLibrary
            | Self::ClusterApp
            | Self::ClusterFaasAdaptor => true,
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stylesheets and design variables a theme hands to the serving layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThemeAssets {
    pub stylesheets: Vec<String>,
    pub variables: BTreeMap<String, String>,
}

/// A resolved sibling resource.
#[derive(Debug, Clone)]
pub enum Referent {
    Theme(Theme),
    ClusterTheme(ClusterTheme),
    ScriptLibrary(ScriptLibrary),
    ClusterScriptLibrary(ClusterScriptLibrary),
    App(App),
    ClusterApp(ClusterApp),
    FaasAdaptor(FaasAdaptor),
    ClusterFaasAdaptor(ClusterFaasAdaptor),
}

/// Expands to `$body` with `$object` bound to the wrapped resource, for
/// accessors that read the same metadata from every variant.
macro_rules! each_referent {
    ($referent:expr, $object:ident => $body:expr) => {
        match $referent {
            Referent::Theme($object) => $body,
            Referent::ClusterTheme($object) => $body,
            Referent::ScriptLibrary($object) => $body,
            Referent::ClusterScriptLibrary($object) => $body,
            Referent::App($object) => $body,
            Referent::ClusterApp($object) => $body,
            Referent::FaasAdaptor($object) => $body,
            Referent::ClusterFaasAdaptor($object) => $body,
        }
    };
}

impl Referent {
    pub fn kind(&self) -> ReferenceKind {
        match self {
            Referent::Theme(_) => ReferenceKind::Theme,
            Referent::ClusterTheme(_) => ReferenceKind::ClusterTheme,
            Referent::ScriptLibrary(_) => ReferenceKind::ScriptLibrary,
            Referent::ClusterScriptLibrary(_) => ReferenceKind::ClusterScriptLibrary,
            Referent::App(_) => ReferenceKind::App,
            Referent::ClusterApp(_) => ReferenceKind::ClusterApp,
            Referent::FaasAdaptor(_) => ReferenceKind::FaasAdaptor,
            Referent::ClusterFaasAdaptor(_) => ReferenceKind::ClusterFaasAdaptor,
        }
    }

    pub fn name(&self) -> String {
        each_referent!(self, object => object.name_any())
    }

    pub fn namespace(&self) -> Option<String> {
        each_referent!(self, object => object.namespace())
    }

    pub fn conditions(&self) -> &[Condition] {
        each_referent!(self, object => object.status.as_ref().map_or(&[][..], |s| &s.conditions[..]))
    }

    /// `"Kind/name"`, used to name owners in errors and attributes.
    pub fn describe(&self) -> String {
        format!("{}/{}", self.kind(), self.name())
    }

    pub fn backend(&self) -> Option<&Backend> {
        match self {
            Referent::Theme(t) => t.spec.backend.as_ref(),
            Referent::ClusterTheme(t) => t.spec.backend.as_ref(),
            Referent::ScriptLibrary(l) => l.spec.backend.as_ref(),
            Referent::ClusterScriptLibrary(l) => l.spec.backend.as_ref(),
            Referent::App(a) => Some(&a.spec.backend),
            Referent::ClusterApp(a) => Some(&a.spec.backend),
            Referent::FaasAdaptor(_) | Referent::ClusterFaasAdaptor(_) => None,
        }
    }

    pub fn package_references(&self) -> &[PackageReference] {
        match self {
            Referent::Theme(t) => &t.spec.package_references,
            Referent::ClusterTheme(t) => &t.spec.package_references,
            Referent::ScriptLibrary(l) => &l.spec.package_references,
            Referent::ClusterScriptLibrary(l) => &l.spec.package_references,
            Referent::App(_)
            | Referent::ClusterApp(_)
            | Referent::FaasAdaptor(_)
            | Referent::ClusterFaasAdaptor(_) => &[],
        }
    }

    pub fn scripts(&self) -> &[ScriptDefinition] {
        match self {
            Referent::ScriptLibrary(l) => &l.spec.scripts,
            Referent::ClusterScriptLibrary(l) => &l.spec.scripts,
            _ => &[],
        }
    }

    pub fn script_library_ref(&self) -> Option<&ObjectReference> {
        match self {
            Referent::Theme(t) => t.spec.script_library_ref.as_ref(),
            Referent::ClusterTheme(t) => t.spec.script_library_ref.as_ref(),
            _ => None,
        }
    }

    pub fn generators(&self) -> Option<&BTreeMap<String, GeneratorConfig>> {
        match self {
            Referent::FaasAdaptor(a) => Some(&a.spec.generators),
            Referent::ClusterFaasAdaptor(a) => Some(&a.spec.generators),
            _ => None,
        }
    }

    pub fn builder_image(&self) -> Option<&str> {
        match self {
            Referent::FaasAdaptor(a) => a.spec.builder_image.as_deref(),
            Referent::ClusterFaasAdaptor(a) => a.spec.builder_image.as_deref(),
            _ => None,
        }
    }

    pub fn deployer_image(&self) -> Option<&str> {
        match self {
            Referent::FaasAdaptor(a) => a.spec.deployer_image.as_deref(),
            Referent::ClusterFaasAdaptor(a) => a.spec.deployer_image.as_deref(),
            _ => None,
        }
    }

    pub fn theme_assets(&self) -> Option<ThemeAssets> {
        let spec = match self {
            Referent::Theme(t) => (&t.spec.stylesheets, &t.spec.variables),
            Referent::ClusterTheme(t) => (&t.spec.stylesheets, &t.spec.variables),
            _ => return None,
        };
        Some(ThemeAssets {
            stylesheets: spec.0.clone(),
            variables: spec.1.clone(),
        })
    }
}

async fn fetch(
    store: &Store,
    kind: ReferenceKind,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<Referent>> {
    Ok(match kind {
        ReferenceKind::Theme => store.get::<Theme>(namespace, name).await?.map(Referent::Theme),
        ReferenceKind::ClusterTheme => store
            .get::<ClusterTheme>(None, name)
            .await?
            .map(Referent::ClusterTheme),
        ReferenceKind::ScriptLibrary => store
            .get::<ScriptLibrary>(namespace, name)
            .await?
            .map(Referent::ScriptLibrary),
        ReferenceKind::ClusterScriptLibrary => store
            .get::<ClusterScriptLibrary>(None, name)
            .await?
            .map(Referent::ClusterScriptLibrary),
        ReferenceKind::App => store.get::<App>(namespace, name).await?.map(Referent::App),
        ReferenceKind::ClusterApp => store
            .get::<ClusterApp>(None, name)
            .await?
            .map(Referent::ClusterApp),
        ReferenceKind::FaasAdaptor => store
            .get::<FaasAdaptor>(namespace, name)
            .await?
            .map(Referent::FaasAdaptor),
        ReferenceKind::ClusterFaasAdaptor => store
            .get::<ClusterFaasAdaptor>(None, name)
            .await?
            .map(Referent::ClusterFaasAdaptor),
    })
}

/// The resource holding a reference.
#[derive(Debug, Clone)]
pub struct Referrer {
    pub description: String,
    /// `None` for cluster-scoped referrers.
    pub namespace: Option<String>,
    pub generation: Option<i64>,
}

impl Referrer {
    pub fn of<K: Resource<DynamicType = ()>>(object: &K) -> Self {
        Self {
            description: format!("{}/{}", K::kind(&()), object.meta().name.clone().unwrap_or_default()),
            namespace: object.meta().namespace.clone(),
            generation: object.meta().generation,
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_none()
    }
}

fn referent_namespace(
    referrer: &Referrer,
    reference: &ObjectReference,
    kind: ReferenceKind,
) -> Option<String> {
    if kind.is_cluster_scoped() {
        None
    } else {
        reference.namespace.clone().or_else(|| referrer.namespace.clone())
    }
}

fn wait<T>(
    ctx: &Ctx,
    referrer: &Referrer,
    conditions: &mut Vec<Condition>,
    reason: &str,
    message: String,
) -> Flow<T> {
    debug!(referrer = %referrer.description, reason, %message, "waiting on reference");
    set_conditions(conditions, ConditionTriple::WAITING, reason, &message, referrer.generation);
    Flow::Stop(Action::requeue(ctx.settings.missing_reference_requeue))
}

/// Resolves `reference` to a Ready referent of one of the `accepted` kinds.
///
/// `None` resolves to `None`. A missing or unready referent marks
/// `conditions` as waiting and stops. `field` names the referring field in
/// errors.
pub async fn resolve(
    ctx: &Ctx,
    referrer: &Referrer,
    conditions: &mut Vec<Condition>,
    reference: Option<&ObjectReference>,
    accepted: &[ReferenceKind],
    field: &'static str,
) -> Result<Flow<Option<Referent>>> {
    let Some(reference) = reference else {
        return Ok(Flow::Continue(None));
    };
    let kind = ReferenceKind::parse(&reference.kind)?;
    if !accepted.contains(&kind) {
        return Err(Error::UnexpectedReferenceKind {
            field,
            kind: reference.kind.clone(),
        });
    }
    if referrer.is_cluster_scoped() && !kind.is_cluster_scoped() {
        return Err(Error::ScopeViolation {
            referrer: referrer.description.clone(),
            kind: reference.kind.clone(),
            name: reference.name.clone(),
        });
    }

    let namespace = referent_namespace(referrer, reference, kind);
    let Some(referent) = fetch(&ctx.store, kind, namespace.as_deref(), &reference.name).await? else {
        let message = format!("{field}: {kind} {} not found", reference.name);
        return Ok(wait(ctx, referrer, conditions, REFERENCE_NOT_FOUND, message));
    };
    if !is_ready(referent.conditions()) {
        let message = format!("{field}: {kind} {} is not ready", reference.name);
        return Ok(wait(ctx, referrer, conditions, REFERENCE_NOT_READY, message));
    }
    Ok(Flow::Continue(Some(referent)))
}

/// Resolves every reference in `references`, stopping at the first one
/// that is not satisfied.
pub async fn resolve_all(
    ctx: &Ctx,
    referrer: &Referrer,
    conditions: &mut Vec<Condition>,
    references: &[ObjectReference],
    accepted: &[ReferenceKind],
    field: &'static str,
) -> Result<Flow<Vec<Referent>>> {
    let mut resolved = Vec::with_capacity(references.len());
    for reference in references {
        if let Some(referent) =
            crate::proceed!(resolve(ctx, referrer, conditions, Some(reference), accepted, field).await?)
        {
            resolved.push(referent);
        }
    }
    Ok(Flow::Continue(resolved))
}

/// Resolves the host a function or binding is mounted on. Hosts are not
/// required to be Ready: a host waits on its functions, not the reverse.
pub async fn resolve_host(
    ctx: &Ctx,
    referrer: &Referrer,
    conditions: &mut Vec<Condition>,
    name: &str,
) -> Result<Flow<Host>> {
    match ctx.store.get::<Host>(referrer.namespace.as_deref(), name).await? {
        Some(host) => Ok(Flow::Continue(host)),
        None => {
            let message = format!("hostRef: Host {name} not found");
            Ok(wait(ctx, referrer, conditions, REFERENCE_NOT_FOUND, message))
        }
    }
}

/// Reads one value out of a Secret in the referrer's namespace.
pub async fn resolve_secret_key(
    ctx: &Ctx,
    referrer: &Referrer,
    conditions: &mut Vec<Condition>,
    reference: &SecretKeyReference,
) -> Result<Flow<String>> {
    let Some(secret) = ctx
        .store
        .get::<Secret>(referrer.namespace.as_deref(), &reference.name)
        .await?
    else {
        let message = format!("Secret {} not found", reference.name);
        return Ok(wait(ctx, referrer, conditions, SECRET_NOT_FOUND, message));
    };

    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&reference.key))
        .map(|bytes| String::from_utf8(bytes.0.clone()));
    let value = match from_data {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            return Err(Error::InvalidSpec(format!(
                "key {} of Secret {} is not UTF-8",
                reference.key, reference.name
            )));
        }
        None => secret
            .string_data
            .as_ref()
            .and_then(|data| data.get(&reference.key))
            .cloned()
            .ok_or_else(|| Error::MissingSecretKey {
                name: reference.name.clone(),
                key: reference.key.clone(),
            })?,
    };
    Ok(Flow::Continue(value))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;

    use super::*;
    use crate::{
        conditions::{self, DEGRADED, PROGRESSING},
        config::Settings,
        crd::{AppSpec, BasicStatus, ClusterAppSpec},
        store::MemoryStore,
    };

    fn ctx() -> Ctx {
        Ctx::new(Store::new(Arc::new(MemoryStore::new())), Settings::default())
    }

    fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: namespace.map(String::from),
            ..Default::default()
        }
    }

    fn ready_status() -> BasicStatus {
        let mut status = BasicStatus::default();
        set_conditions(&mut status.conditions, ConditionTriple::READY, "Reconciled", "", Some(1));
        status
    }

    async fn app(ctx: &Ctx, name: &str, ready: bool) {
        let mut app = ctx
            .store
            .create(&App {
                metadata: meta(name, Some("web")),
                spec: AppSpec {
                    backend: Backend {
                        ingress_path: format!("/{name}"),
                        server_image: Some("app:1".into()),
                        ..Default::default()
                    },
                },
                status: None,
            })
            .await
            .expect("create app");
        if ready {
            app.status = Some(ready_status());
            ctx.store.replace_status(&app).await.expect("status");
        }
    }

    fn host_referrer() -> Referrer {
        Referrer {
            description: "Host/site".into(),
            namespace: Some("web".into()),
            generation: Some(3),
        }
    }

    #[tokio::test]
    async fn absent_reference_resolves_to_nothing() {
        let ctx = ctx();
        let mut conditions = Vec::new();
        let flow = resolve(&ctx, &host_referrer(), &mut conditions, None, ReferenceKind::BACKENDS, "requires")
            .await
            .expect("resolve");
        assert!(matches!(flow, Flow::Continue(None)));
        assert!(conditions.is_empty());
    }

    #[tokio::test]
    async fn missing_referent_waits_with_a_requeue() {
        let ctx = ctx();
        let mut conditions = Vec::new();
        let reference = ObjectReference::new("App", "docs");
        let flow = resolve(&ctx, &host_referrer(), &mut conditions, Some(&reference), ReferenceKind::BACKENDS, "requires")
            .await
            .expect("resolve");

        assert!(matches!(flow, Flow::Stop(action) if action == Action::requeue(Duration::from_secs(10))));
        let degraded = conditions::find(&conditions, DEGRADED).expect("degraded");
        assert_eq!(degraded.status, "True");
        assert_eq!(degraded.reason.as_deref(), Some(REFERENCE_NOT_FOUND));
        assert_eq!(degraded.observed_generation, Some(3));
        assert_eq!(conditions::find(&conditions, PROGRESSING).map(|c| c.status.as_str()), Some("True"));
    }

    #[tokio::test]
    async fn unready_referent_is_treated_like_a_missing_one() {
        let ctx = ctx();
        app(&ctx, "docs", false).await;
        let mut conditions = Vec::new();
        let reference = ObjectReference::new("App", "docs");
        let flow = resolve(&ctx, &host_referrer(), &mut conditions, Some(&reference), ReferenceKind::BACKENDS, "requires")
            .await
            .expect("resolve");

        assert!(matches!(flow, Flow::Stop(_)));
        let ready = conditions::find(&conditions, conditions::READY).expect("ready");
        assert_eq!(ready.reason.as_deref(), Some(REFERENCE_NOT_READY));
    }

    #[tokio::test]
    async fn ready_referent_defaults_to_the_referrer_namespace() {
        let ctx = ctx();
        app(&ctx, "docs", true).await;
        let mut conditions = Vec::new();
        let reference = ObjectReference::new("App", "docs");
        let flow = resolve(&ctx, &host_referrer(), &mut conditions, Some(&reference), ReferenceKind::BACKENDS, "requires")
            .await
            .expect("resolve");

        let Flow::Continue(Some(referent)) = flow else {
            panic!("expected a referent");
        };
        assert_eq!(referent.kind(), ReferenceKind::App);
        assert_eq!(referent.namespace().as_deref(), Some("web"));
        assert_eq!(referent.backend().map(|b| b.ingress_path.as_str()), Some("/docs"));
    }

    #[tokio::test]
    async fn cluster_scoped_kinds_ignore_reference_namespaces() {
        let ctx = ctx();
        let mut shared = ctx
            .store
            .create(&ClusterApp {
                metadata: meta("shared", None),
                spec: ClusterAppSpec {
                    backend: Backend {
                        ingress_path: "/shared".into(),
                        server_image: Some("shared:1".into()),
                        ..Default::default()
                    },
                },
                status: None,
            })
            .await
            .expect("create");
        shared.status = Some(ready_status());
        ctx.store.replace_status(&shared).await.expect("status");

        let mut reference = ObjectReference::new("ClusterApp", "shared");
        reference.namespace = Some("elsewhere".into());
        let mut conditions = Vec::new();
        let flow = resolve(&ctx, &host_referrer(), &mut conditions, Some(&reference), ReferenceKind::BACKENDS, "requires")
            .await
            .expect("resolve");
        assert!(matches!(flow, Flow::Continue(Some(Referent::ClusterApp(_)))));
    }

    #[tokio::test]
    async fn cluster_scoped_referrers_cannot_reach_into_namespaces() {
        let ctx = ctx();
        let referrer = Referrer {
            description: "ClusterTheme/base".into(),
            namespace: None,
            generation: Some(1),
        };
        let reference = ObjectReference::new("ScriptLibrary", "scripts");
        let err = resolve(&ctx, &referrer, &mut Vec::new(), Some(&reference), ReferenceKind::SCRIPT_LIBRARIES, "scriptLibraryRef")
            .await
            .expect_err("scope");
        assert!(matches!(err, Error::ScopeViolation { .. }));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn unknown_and_unexpected_kinds_are_terminal() {
        let ctx = ctx();
        let reference = ObjectReference::new("Gadget", "x");
        let err = resolve(&ctx, &host_referrer(), &mut Vec::new(), Some(&reference), ReferenceKind::THEMES, "themeRef")
            .await
            .expect_err("unknown kind");
        assert!(matches!(err, Error::UnknownReferenceKind(kind) if kind == "Gadget"));

        let reference = ObjectReference::new("App", "x");
        let err = resolve(&ctx, &host_referrer(), &mut Vec::new(), Some(&reference), ReferenceKind::THEMES, "themeRef")
            .await
            .expect_err("unexpected kind");
        assert!(matches!(err, Error::UnexpectedReferenceKind { field: "themeRef", .. }));
    }

    #[test]
    fn scope_is_per_kind() {
        for kind in ["Theme", "ScriptLibrary", "App", "FaasAdaptor"] {
            let parsed = ReferenceKind::parse(kind).expect("known");
            assert!(!parsed.is_cluster_scoped());
            assert_eq!(parsed.as_str(), kind);
        }
        for kind in ["ClusterTheme", "ClusterScriptLibrary", "ClusterApp", "ClusterFaasAdaptor"] {
            assert!(ReferenceKind::parse(kind).expect("known").is_cluster_scoped());
        }
    }

    #[tokio::test]
    async fn secret_values_come_from_data() {
        let ctx = ctx();
        let secret = Secret {
            metadata: meta("oidc", Some("web")),
            data: Some(BTreeMap::from([(
                "clientSecret".to_string(),
                ByteString(b"hunter2".to_vec()),
            )])),
            ..Default::default()
        };
        ctx.store.create(&secret).await.expect("create");

        let mut conditions = Vec::new();
        let reference = SecretKeyReference {
            name: "oidc".into(),
            key: "clientSecret".into(),
        };
        let flow = resolve_secret_key(&ctx, &host_referrer(), &mut conditions, &reference)
            .await
            .expect("resolve");
        assert_eq!(flow, Flow::Continue("hunter2".to_string()));

        let missing_key = SecretKeyReference {
            name: "oidc".into(),
            key: "other".into(),
        };
        let err = resolve_secret_key(&ctx, &host_referrer(), &mut conditions, &missing_key)
            .await
            .expect_err("missing key");
        assert!(matches!(err, Error::MissingSecretKey { .. }));
    }

    #[tokio::test]
    async fn missing_host_is_a_soft_failure() {
        let ctx = ctx();
        let referrer = Referrer {
            description: "Function/hello".into(),
            namespace: Some("web".into()),
            generation: Some(1),
        };
        let mut conditions = Vec::new();
        let flow = resolve_host(&ctx, &referrer, &mut conditions, "site").await.expect("resolve");
        assert!(matches!(flow, Flow::Stop(_)));
        assert!(!conditions.is_empty());
    }
}
