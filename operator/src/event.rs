use std::sync::Arc;

use kube::runtime::events::{Event, EventType};
use kube::{Client, Resource};
use kube_runtime::events::{Recorder, Reporter};

use crate::{
    config::Settings,
    controller::Backoff,
    error::Error,
    router::RouteIndex,
    sink::{HostRegistry, HostSink},
    store::Store,
    templates::TemplateCache,
};

/// Everything a reconcile needs besides the object itself.
pub struct Ctx {
    pub store: Store,
    /// `None` when events are not published, as in tests.
    pub recorder: Option<Recorder>,
    pub settings: Settings,
    pub templates: TemplateCache,
    pub router: RouteIndex,
    pub sink: Arc<dyn HostSink>,
    pub backoff: Backoff,
}

impl Ctx {
    pub fn new(store: Store, settings: Settings) -> Self {
        let backoff = Backoff::new(settings.backoff_base, settings.backoff_max);
        Self {
            store,
            recorder: None,
            settings,
            templates: TemplateCache::default(),
            router: RouteIndex::default(),
            sink: Arc::new(HostRegistry::default()),
            backoff,
        }
    }

    pub fn with_recorder(mut self, client: Client) -> Self {
        self.recorder = Some(Recorder::new(client, make_reporter()));
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn HostSink>) -> Self {
        self.sink = sink;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NoOp,
    Created,
    Updated,
}

pub fn make_reporter() -> Reporter {
    Reporter {
        controller: "webhost-operator".into(),
        instance: std::env::var("POD_NAME").ok(),
    }
}

pub async fn emit_event<K>(
    ctx: &Ctx,
    obj: &K,
    reason: &str,
    note: &str,
    event_type: EventType,
) -> Result<(), Error>
where
    K: Resource<DynamicType = ()>,
{
    let Some(recorder) = &ctx.recorder else {
        return Ok(());
    };
    recorder
        .publish(
            &Event {
                type_: event_type,
                reason: reason.into(),
                note: Some(note.into()),
                action: reason.into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await?;

    Ok(())
}

/// Runs `op`, publishing a Normal event when it changed something and a
/// Warning event when it failed. Event failures are ignored.
pub async fn with_event<T, K>(
    ctx: &Ctx,
    obj: &K,
    success_msg: &str,
    fail_reason: &str,
    op: impl std::future::Future<Output = Result<(Outcome, T), Error>>,
) -> Result<(Outcome, T), Error>
where
    K: Resource<DynamicType = ()>,
{
    match op.await {
        Ok((outcome, value)) => {
            let reason = match outcome {
                Outcome::Created => Some("Created"),
                Outcome::Updated => Some("Updated"),
                Outcome::NoOp => None,
            };
            if let Some(reason) = reason {
                let _ = emit_event(ctx, obj, reason, success_msg, EventType::Normal).await;
            }
            Ok((outcome, value))
        }
        Err(e) => {
            let _ = emit_event(ctx, obj, fail_reason, &e.to_string(), EventType::Warning).await;
            Err(e)
        }
    }
}
