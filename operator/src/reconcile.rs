//! The outer reconcile wrapper shared by every kind.
//!
//! Each kind implements [`Reconcile::apply`] against a scratch copy of its
//! status. [`reconcile_object`] runs it and then persists the status exactly
//! once, whichever way `apply` returned.

use async_trait::async_trait;
use kube::{
    core::object::HasStatus,
    runtime::{controller::Action, events::EventType},
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{
    conditions::{ConditionTriple, HasConditions, set_conditions},
    crd::{BasicStatus, FunctionStatus, HostStatus, PackageReferencesStatus},
    error::Result,
    event::{Ctx, emit_event},
    router::ObjectKey,
    store::StoreObject,
};

/// Outcome of a helper that may end the reconcile early without failing it.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<T> {
    Continue(T),
    Stop(Action),
}

impl<T> From<Action> for Flow<T> {
    fn from(action: Action) -> Self {
        Flow::Stop(action)
    }
}

/// Unwraps a [`Flow`], returning `Ok(action)` from the enclosing function on
/// [`Flow::Stop`]. Works in functions returning `Result<Action>` as well as
/// `Result<Flow<_>>`.
#[macro_export]
macro_rules! proceed {
    ($flow:expr) => {
        match $flow {
            $crate::reconcile::Flow::Continue(value) => value,
            $crate::reconcile::Flow::Stop(action) => return Ok(action.into()),
        }
    };
}

/// Status types the wrapper can manage.
pub trait ObjectStatus:
    HasConditions + Default + Clone + PartialEq + Serialize + Send + Sync + 'static
{
    fn set_observed_generation(&mut self, generation: Option<i64>);
}

macro_rules! impl_object_status {
    ($($status:ty),*) => {
        $(
            impl ObjectStatus for $status {
                fn set_observed_generation(&mut self, generation: Option<i64>) {
                    self.observed_generation = generation;
                }
            }
        )*
    };
}

impl_object_status!(HostStatus, FunctionStatus, PackageReferencesStatus, BasicStatus);

#[async_trait]
pub trait Reconcile: StoreObject + HasStatus<Status: ObjectStatus> {
    /// Drives the object one step toward its desired state. Only `status`
    /// may be changed; the wrapper writes it back.
    async fn apply(&self, status: &mut Self::Status, ctx: &Ctx) -> Result<Action>;

    /// Whether this process owns the object. Objects it does not own are
    /// left untouched, status included.
    fn is_focal(&self, _ctx: &Ctx) -> bool {
        true
    }

    /// Drops process-local state held for an object that no longer exists.
    fn forget(ctx: &Ctx, namespace: Option<&str>, name: &str) {
        ctx.router.forget(&ObjectKey::new(&Self::kind(&()), namespace, name));
    }
}

/// Fetches `namespace/name`, runs [`Reconcile::apply`] and persists status.
///
/// A missing object or one owned by another process is a no-op. Errors are recorded on the condition triple
/// (Degraded for terminal errors, Progressing otherwise) before they are
/// returned, and `observedGeneration` is always advanced. A failed status
/// write replaces whatever `apply` returned.
#[instrument(skip(ctx), fields(kind = %K::kind(&())))]
pub async fn reconcile_object<K: Reconcile>(
    ctx: &Ctx,
    namespace: Option<&str>,
    name: &str,
) -> Result<Action> {
    let Some(mut object) = ctx.store.get::<K>(namespace, name).await? else {
        debug!("object is gone");
        K::forget(ctx, namespace, name);
        return Ok(Action::await_change());
    };
    if !object.is_focal(ctx) {
        debug!("owned by another host's process");
        return Ok(Action::await_change());
    }
    let generation = object.meta().generation;
    let before = object.status().cloned();
    let mut status = before.clone().unwrap_or_default();

    let result = object.apply(&mut status, ctx).await;

    if let Err(err) = &result {
        let triple = if err.is_terminal() {
            ConditionTriple::DEGRADED
        } else {
            ConditionTriple::PROGRESSING
        };
        warn!(error = %err, terminal = err.is_terminal(), "reconcile failed");
        set_conditions(status.conditions_mut(), triple, err.reason(), &err.to_string(), generation);
    }
    status.set_observed_generation(generation);

    if before.as_ref() != Some(&status) {
        *object.status_mut() = Some(status);
        ctx.store.replace_status(&object).await?;
        if let Err(err) = &result {
            let _ = emit_event(ctx, &object, err.reason(), &err.to_string(), EventType::Warning).await;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kube::api::ObjectMeta;

    use super::*;
    use crate::{
        conditions::{self, DEGRADED, READY},
        config::Settings,
        crd::{App, AppSpec, Backend},
        error::Error,
        store::{MemoryStore, Store},
    };

    fn ctx() -> (Arc<MemoryStore>, Ctx) {
        let memory = Arc::new(MemoryStore::new());
        let ctx = Ctx::new(Store::new(memory.clone()), Settings::default());
        (memory, ctx)
    }

    fn app(path: &str) -> App {
        App {
            metadata: ObjectMeta {
                name: Some("docs".into()),
                namespace: Some("web".into()),
                ..Default::default()
            },
            spec: AppSpec {
                backend: Backend {
                    ingress_path: path.into(),
                    server_image: Some("docs:1".into()),
                    ..Default::default()
                },
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn missing_object_is_a_no_op() {
        let (memory, ctx) = ctx();
        let action = reconcile_object::<App>(&ctx, Some("web"), "nothing").await.expect("reconcile");
        assert_eq!(action, Action::await_change());
        assert!(memory.writes().is_empty());
    }

    #[tokio::test]
    async fn second_pass_writes_nothing() {
        let (memory, ctx) = ctx();
        ctx.store.create(&app("/docs")).await.expect("create");
        memory.clear_writes();

        reconcile_object::<App>(&ctx, Some("web"), "docs").await.expect("first pass");
        assert_eq!(memory.writes(), vec!["status App docs".to_string()]);

        memory.clear_writes();
        reconcile_object::<App>(&ctx, Some("web"), "docs").await.expect("second pass");
        assert!(memory.writes().is_empty());
    }

    #[tokio::test]
    async fn terminal_errors_land_in_status() {
        let (_, ctx) = ctx();
        ctx.store.create(&app("docs")).await.expect("create");

        let err = reconcile_object::<App>(&ctx, Some("web"), "docs")
            .await
            .expect_err("relative path is invalid");
        assert!(matches!(err, Error::InvalidSpec(_)));

        let stored: App = ctx.store.get(Some("web"), "docs").await.expect("get").expect("exists");
        let status = stored.status.expect("status written");
        assert_eq!(status.observed_generation, Some(1));
        let degraded = conditions::find(&status.conditions, DEGRADED).expect("degraded");
        assert_eq!(degraded.status, "True");
        assert_eq!(degraded.reason.as_deref(), Some("InvalidSpec"));
        assert!(!conditions::is_ready(&status.conditions));
        assert!(conditions::find(&status.conditions, READY).is_some());
    }
}
