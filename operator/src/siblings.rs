//! Reconcilers for the kinds hosts and functions reference: themes, script
//! libraries, apps and FaaS adaptors, in both scopes.
//!
//! None of them creates children. Each validates its spec, resolves its own
//! references and reports Ready, which is what their referrers wait on.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::{Resource, runtime::controller::Action};

use crate::{
    aggregate::normalize_path,
    conditions::{ConditionTriple, set_conditions},
    crd::{
        App, Backend, BasicStatus, ClusterApp, ClusterFaasAdaptor, ClusterScriptLibrary, ClusterTheme,
        FaasAdaptor, GeneratorConfig, ObjectReference, PackageReference, ScriptDefinition,
        ScriptLibrary, Theme,
    },
    error::{Error, Result},
    event::Ctx,
    proceed,
    reconcile::Reconcile,
    resolver::{ReferenceKind, Referrer, resolve},
    router::ObjectKey,
};

/// A backend needs an absolute path and exactly one of `serverImage` and
/// `staticImage`.
pub fn validate_backend(backend: &Backend) -> Result<()> {
    normalize_path(&backend.ingress_path)?;
    match (&backend.server_image, &backend.static_image) {
        (Some(_), None) | (None, Some(_)) => {}
        _ => {
            return Err(Error::InvalidSpec(format!(
                "backend at {} needs exactly one of serverImage and staticImage",
                backend.ingress_path
            )));
        }
    }
    if backend.replicas.is_some_and(|r| r < 0) {
        return Err(Error::InvalidSpec("replicas must not be negative".into()));
    }
    Ok(())
}

fn validate_packages(references: &[PackageReference]) -> Result<()> {
    match references.iter().find(|r| r.name.is_empty() || r.version.is_empty()) {
        Some(r) => Err(Error::InvalidSpec(format!("package reference {:?} needs a name and a version", r.name))),
        None => Ok(()),
    }
}

fn validate_scripts(scripts: &[ScriptDefinition]) -> Result<()> {
    for script in scripts {
        if script.src.is_some() == script.content.is_some() {
            return Err(Error::InvalidSpec(format!(
                "script {} needs exactly one of src and content",
                script.name
            )));
        }
    }
    Ok(())
}

fn validate_generators(generators: &BTreeMap<String, GeneratorConfig>) -> Result<()> {
    for (recipe, generator) in generators {
        let well_formed = recipe
            .split_once('/')
            .is_some_and(|(language, environment)| {
                !language.is_empty() && !environment.is_empty() && !environment.contains('/')
            });
        if !well_formed {
            return Err(Error::InvalidSpec(format!(
                "generator key {recipe:?} is not language/environment"
            )));
        }
        if generator.image.is_empty() {
            return Err(Error::InvalidSpec(format!("generator {recipe} has no image")));
        }
    }
    Ok(())
}

fn ready(status: &mut BasicStatus, generation: Option<i64>) -> Action {
    set_conditions(&mut status.conditions, ConditionTriple::READY, "Reconciled", "", generation);
    Action::await_change()
}

async fn reconcile_theme<K: Resource<DynamicType = ()> + Sync>(
    theme: &K,
    status: &mut BasicStatus,
    ctx: &Ctx,
    backend: Option<&Backend>,
    packages: &[PackageReference],
    library: Option<&ObjectReference>,
) -> Result<Action> {
    backend.map(validate_backend).transpose()?;
    validate_packages(packages)?;

    let referrer = Referrer::of(theme);
    ctx.router.record(
        &ObjectKey::of(theme),
        library.and_then(|r| ObjectKey::referenced(referrer.namespace.as_deref(), r)),
    );
    proceed!(
        resolve(ctx, &referrer, &mut status.conditions, library, ReferenceKind::SCRIPT_LIBRARIES, "scriptLibraryRef")
            .await?
    );
    Ok(ready(status, referrer.generation))
}

macro_rules! reconcile_themes {
    ($($kind:ty),*) => {
        $(
            #[async_trait]
            impl Reconcile for $kind {
                async fn apply(&self, status: &mut BasicStatus, ctx: &Ctx) -> Result<Action> {
                    reconcile_theme(
                        self,
                        status,
                        ctx,
                        self.spec.backend.as_ref(),
                        &self.spec.package_references,
                        self.spec.script_library_ref.as_ref(),
                    )
                    .await
                }
            }
        )*
    };
}

reconcile_themes!(Theme, ClusterTheme);

macro_rules! reconcile_libraries {
    ($($kind:ty),*) => {
        $(
            #[async_trait]
            impl Reconcile for $kind {
                async fn apply(&self, status: &mut BasicStatus, _ctx: &Ctx) -> Result<Action> {
                    self.spec.backend.as_ref().map(validate_backend).transpose()?;
                    validate_packages(&self.spec.package_references)?;
                    validate_scripts(&self.spec.scripts)?;
                    Ok(ready(status, self.meta().generation))
                }
            }
        )*
    };
}

reconcile_libraries!(ScriptLibrary, ClusterScriptLibrary);

macro_rules! reconcile_apps {
    ($($kind:ty),*) => {
        $(
            #[async_trait]
            impl Reconcile for $kind {
                async fn apply(&self, status: &mut BasicStatus, _ctx: &Ctx) -> Result<Action> {
                    validate_backend(&self.spec.backend)?;
                    Ok(ready(status, self.meta().generation))
                }
            }
        )*
    };
}

reconcile_apps!(App, ClusterApp);

macro_rules! reconcile_adaptors {
    ($($kind:ty),*) => {
        $(
            #[async_trait]
            impl Reconcile for $kind {
                async fn apply(&self, status: &mut BasicStatus, _ctx: &Ctx) -> Result<Action> {
                    validate_generators(&self.spec.generators)?;
                    Ok(ready(status, self.meta().generation))
                }
            }
        )*
    };
}

reconcile_adaptors!(FaasAdaptor, ClusterFaasAdaptor);

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kube::api::ObjectMeta;

    use super::*;
    use crate::{
        conditions::{self, DEGRADED, PROGRESSING},
        crd::{ClusterThemeSpec, FaasAdaptorSpec, ScriptLibrarySpec, ThemeSpec},
        reconcile::reconcile_object,
        resolver::REFERENCE_NOT_FOUND,
        testing::{self, NAMESPACE},
    };

    fn server(path: &str) -> Backend {
        Backend {
            ingress_path: path.into(),
            server_image: Some("site:1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn backends_need_one_image_and_an_absolute_path() {
        assert!(validate_backend(&server("/docs")).is_ok());
        assert!(matches!(validate_backend(&server("docs")), Err(Error::InvalidSpec(_))));

        let both = Backend {
            static_image: Some("content:1".into()),
            ..server("/docs")
        };
        assert!(validate_backend(&both).is_err());
        let neither = Backend {
            server_image: None,
            ..server("/docs")
        };
        assert!(validate_backend(&neither).is_err());
    }

    #[test]
    fn generator_keys_name_language_and_environment() {
        let generator = GeneratorConfig {
            image: "gen:1".into(),
            ..Default::default()
        };
        let valid = BTreeMap::from([("rust/wasm".to_string(), generator.clone())]);
        assert!(validate_generators(&valid).is_ok());
        for key in ["rust", "/wasm", "rust/", "rust/wasm/extra"] {
            let invalid = BTreeMap::from([(key.to_string(), generator.clone())]);
            assert!(validate_generators(&invalid).is_err(), "{key}");
        }
    }

    #[test]
    fn scripts_need_a_source_or_inline_content() {
        let script = |src: Option<&str>, content: Option<&str>| ScriptDefinition {
            name: "analytics".into(),
            src: src.map(String::from),
            content: content.map(String::from),
            module: false,
        };
        assert!(validate_scripts(&[script(Some("/a.js"), None)]).is_ok());
        assert!(validate_scripts(&[script(None, Some("run()"))]).is_ok());
        assert!(validate_scripts(&[script(None, None)]).is_err());
        assert!(validate_scripts(&[script(Some("/a.js"), Some("run()"))]).is_err());
    }

    #[tokio::test]
    async fn theme_waits_for_its_library() {
        let (_, ctx) = testing::ctx();
        let theme = Theme {
            metadata: testing::meta("blue"),
            spec: ThemeSpec {
                script_library_ref: Some(ObjectReference::new("ScriptLibrary", "widgets")),
                ..Default::default()
            },
            status: None,
        };
        ctx.store.create(&theme).await.expect("theme");

        let action = reconcile_object::<Theme>(&ctx, Some(NAMESPACE), "blue").await.expect("reconcile");
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        let stored: Theme = ctx.store.get(Some(NAMESPACE), "blue").await.expect("get").expect("theme");
        let status = stored.status.expect("status");
        let progressing = conditions::find(&status.conditions, PROGRESSING).expect("progressing");
        assert_eq!(progressing.reason.as_deref(), Some(REFERENCE_NOT_FOUND));
        assert_eq!(conditions::find(&status.conditions, DEGRADED).map(|c| c.status.as_str()), Some("True"));

        let widgets = ObjectKey::new("ScriptLibrary", Some(NAMESPACE), "widgets");
        assert_eq!(ctx.router.referrers(&widgets), vec![ObjectKey::new("Theme", Some(NAMESPACE), "blue")]);

        let library = ScriptLibrary {
            metadata: testing::meta("widgets"),
            spec: ScriptLibrarySpec::default(),
            status: None,
        };
        ctx.store.create(&library).await.expect("library");
        reconcile_object::<ScriptLibrary>(&ctx, Some(NAMESPACE), "widgets").await.expect("library");

        let action = reconcile_object::<Theme>(&ctx, Some(NAMESPACE), "blue").await.expect("reconcile");
        assert_eq!(action, Action::await_change());
        let stored: Theme = ctx.store.get(Some(NAMESPACE), "blue").await.expect("get").expect("theme");
        assert!(conditions::is_ready(&stored.status.expect("status").conditions));
    }

    #[tokio::test]
    async fn cluster_theme_cannot_use_a_namespaced_library() {
        let (_, ctx) = testing::ctx();
        let theme = ClusterTheme {
            metadata: ObjectMeta {
                name: Some("dark".into()),
                ..Default::default()
            },
            spec: ClusterThemeSpec {
                script_library_ref: Some(ObjectReference::new("ScriptLibrary", "widgets")),
                ..Default::default()
            },
            status: None,
        };
        ctx.store.create(&theme).await.expect("theme");

        let err = reconcile_object::<ClusterTheme>(&ctx, None, "dark").await.expect_err("scope");
        assert!(matches!(err, Error::ScopeViolation { .. }));
    }

    #[tokio::test]
    async fn adaptor_with_malformed_recipe_is_degraded() {
        let (_, ctx) = testing::ctx();
        let adaptor = FaasAdaptor {
            metadata: testing::meta("openfaas"),
            spec: FaasAdaptorSpec {
                generators: BTreeMap::from([(
                    "rust".to_string(),
                    GeneratorConfig {
                        image: "gen:1".into(),
                        ..Default::default()
                    },
                )]),
                ..Default::default()
            },
            status: None,
        };
        ctx.store.create(&adaptor).await.expect("adaptor");

        let err = reconcile_object::<FaasAdaptor>(&ctx, Some(NAMESPACE), "openfaas")
            .await
            .expect_err("invalid");
        assert_eq!(err.reason(), "InvalidSpec");
    }
}
