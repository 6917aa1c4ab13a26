//! Fixtures for unit and integration tests: a context over [`MemoryStore`]
//! and helpers that play the part of the Job controller and kubelet.
//!
//! Built for `cargo test` and under the `testing` feature.

use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::api::{
    batch::v1::{Job, JobCondition, JobStatus},
    core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
    },
};
use kube::{Resource, api::ObjectMeta, core::object::HasStatus, runtime::controller::Action};

use crate::{
    conditions::{ConditionTriple, HasConditions, set_conditions},
    config::Settings,
    crd::{Backend, Host, HostSpec},
    error::Result,
    event::Ctx,
    jobs::JOB_NAME_LABEL,
    reconcile::{ObjectStatus, Reconcile, reconcile_object},
    store::{MemoryStore, Store, StoreObject},
    synthesize::Owner,
};

pub const NAMESPACE: &str = "web";
pub const DIGEST: &str = "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

pub fn ctx() -> (Arc<MemoryStore>, Ctx) {
    let memory = Arc::new(MemoryStore::new());
    let ctx = Ctx::new(Store::new(memory.clone()), Settings::default());
    (memory, ctx)
}

pub fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(NAMESPACE.into()),
        ..Default::default()
    }
}

pub fn server(path: &str, image: &str) -> Backend {
    Backend {
        ingress_path: path.into(),
        server_image: Some(image.into()),
        ..Default::default()
    }
}

/// One reconcile pass over `name` in the test namespace.
pub async fn reconcile<K: Reconcile>(ctx: &Ctx, name: &str) -> Result<Action> {
    reconcile_object::<K>(ctx, Some(NAMESPACE), name).await
}

pub async fn get<K: StoreObject>(ctx: &Ctx, name: &str) -> Option<K> {
    ctx.store.get(Some(NAMESPACE), name).await.expect("get")
}

pub fn host(name: &str, domain: &str) -> Host {
    Host {
        metadata: meta(name),
        spec: HostSpec {
            domain: domain.into(),
            utility_pages: true,
            ..Default::default()
        },
        status: None,
    }
}

/// Stores a host and returns it as an owner for children.
pub async fn owner_host(store: &Store) -> Owner {
    let host = store.create(&host("site", "site.example")).await.expect("create host");
    Owner::of(&host).expect("owner")
}

pub async fn mark_ready<K>(store: &Store, namespace: Option<&str>, name: &str)
where
    K: StoreObject + HasStatus<Status: ObjectStatus>,
{
    let mut object: K = store.get(namespace, name).await.expect("get").expect("exists");
    let mut status = object.status().cloned().unwrap_or_default();
    let generation = object.meta().generation;
    set_conditions(status.conditions_mut(), ConditionTriple::READY, "Reconciled", "", generation);
    status.set_observed_generation(generation);
    *object.status_mut() = Some(status);
    store.replace_status(&object).await.expect("status");
}

fn job_condition(kind: &str, message: &str) -> JobCondition {
    JobCondition {
        type_: kind.into(),
        status: "True".into(),
        message: Some(message.into()),
        ..Default::default()
    }
}

pub async fn fail_job(store: &Store, name: &str, message: &str) {
    let mut job: Job = store.get(Some(NAMESPACE), name).await.expect("get").expect("job");
    job.status = Some(JobStatus {
        failed: Some(1),
        conditions: Some(vec![job_condition("Failed", message)]),
        ..Default::default()
    });
    store.replace_status(&job).await.expect("status");
}

/// Plays the Job controller: marks the job complete without any pod yet.
pub async fn complete_job(store: &Store, name: &str) -> Job {
    let mut job: Job = store.get(Some(NAMESPACE), name).await.expect("get").expect("job");
    job.status = Some(JobStatus {
        succeeded: Some(1),
        conditions: Some(vec![job_condition("Complete", "")]),
        ..Default::default()
    });
    store.replace_status(&job).await.expect("status")
}

fn terminated(container: &str, message: &str) -> ContainerStatus {
    ContainerStatus {
        name: container.into(),
        state: Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 0,
                message: Some(message.into()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Plays the kubelet: records the job's succeeded pod with one termination
/// message per container.
pub async fn record_pod(store: &Store, job: &Job, messages: &[(&str, &str)]) {
    let name = job.metadata.name.clone().unwrap_or_default();
    let init_names: Vec<&str> = job
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.init_containers.as_ref())
        .map(|init| init.iter().map(|c| c.name.as_str()).collect())
        .unwrap_or_default();
    let (init, main): (Vec<_>, Vec<_>) = messages
        .iter()
        .partition(|&&(container, _)| init_names.contains(&container));
    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(format!("{name}-{}", job.metadata.uid.clone().unwrap_or_default())),
            namespace: Some(NAMESPACE.into()),
            owner_references: job.controller_owner_ref(&()).map(|owner| vec![owner]),
            labels: Some(BTreeMap::from([(JOB_NAME_LABEL.to_string(), name.clone())])),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some("Succeeded".into()),
            container_statuses: Some(main.iter().map(|(c, m)| terminated(c, m)).collect()),
            init_container_statuses: Some(init.iter().map(|(c, m)| terminated(c, m)).collect()),
            ..Default::default()
        }),
        ..Default::default()
    };
    store.create(&pod).await.expect("create pod");
}

/// Marks job `name` complete and records a succeeded pod whose containers
/// exited with the given termination messages.
pub async fn finish_job(store: &Store, name: &str, messages: &[(&str, &str)]) {
    let job = complete_job(store, name).await;
    record_pod(store, &job, messages).await;
}
