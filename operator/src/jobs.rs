//! One-shot batch jobs tied to a parent generation, and harvesting of their
//! results.
//!
//! Every container of a job reports its single result through its
//! termination message. A job is never updated: when its generation or
//! input fingerprint no longer matches, it is deleted and recreated on a
//! later pass.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{ContainerStatus, Pod, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    store::Store,
    synthesize::Owner,
};

pub const GENERATION_LABEL: &str = "webhost.jedimindtricks.example/generation";
pub const FINGERPRINT_ANNOTATION: &str = "webhost.jedimindtricks.example/fingerprint";
/// Set on pods by the Job controller.
pub const JOB_NAME_LABEL: &str = "job-name";
/// Kubernetes truncates termination messages at 4096 bytes; anything that
/// long was cut short.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// What a job for one parent generation should look like.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub name: String,
    pub generation: i64,
    /// Identifies the job's inputs; a different fingerprint makes the
    /// existing job stale.
    pub fingerprint: String,
    pub pod: PodSpec,
    pub labels: BTreeMap<String, String>,
    pub backoff_limit: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Created,
    Running,
    /// A stale job was deleted; the caller requeues to create a fresh one.
    Replaced,
    /// The job succeeded but not every result is readable yet.
    AwaitingResults,
    /// Results keyed by container name, trimmed.
    Succeeded(BTreeMap<String, String>),
}

/// Drives the job described by `request` and harvests the termination
/// messages of `containers` (main or init) once it has succeeded.
pub async fn ensure_job(
    store: &Store,
    owner: &Owner,
    request: &JobRequest,
    containers: &[&str],
) -> Result<JobState> {
    let namespace = owner.namespace();
    let Some(job) = store.get::<Job>(namespace, &request.name).await? else {
        store.create(&build_job(owner, request)).await?;
        info!(job = %request.name, generation = request.generation, "created job");
        return Ok(JobState::Created);
    };

    if is_stale(&job, request) {
        store.delete::<Job>(namespace, &request.name).await?;
        info!(job = %request.name, generation = request.generation, "deleted stale job");
        return Ok(JobState::Replaced);
    }
    if let Some(message) = failure(&job) {
        return Err(Error::JobFailed {
            job: request.name.clone(),
            message,
        });
    }
    if !succeeded(&job) {
        debug!(job = %request.name, "job still running");
        return Ok(JobState::Running);
    }
    harvest(store, namespace, &request.name, containers).await
}

fn build_job(owner: &Owner, request: &JobRequest) -> Job {
    let mut labels = request.labels.clone();
    labels.insert(GENERATION_LABEL.into(), request.generation.to_string());

    let mut pod = request.pod.clone();
    pod.restart_policy = Some("Never".into());
    for container in pod
        .containers
        .iter_mut()
        .chain(pod.init_containers.iter_mut().flatten())
    {
        container.termination_message_policy = Some("File".into());
    }

    Job {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            namespace: owner.namespace().map(String::from),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                FINGERPRINT_ANNOTATION.to_string(),
                request.fingerprint.clone(),
            )])),
            owner_references: Some(vec![owner.reference().clone()]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(request.backoff_limit),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn is_stale(job: &Job, request: &JobRequest) -> bool {
    let generation = job.labels().get(GENERATION_LABEL);
    let fingerprint = job.annotations().get(FINGERPRINT_ANNOTATION);
    generation != Some(&request.generation.to_string()) || fingerprint != Some(&request.fingerprint)
}

fn condition_is_true(job: &Job, kind: &str) -> Option<(Option<String>, Option<String>)> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == kind && c.status == "True")
        .map(|c| (c.reason.clone(), c.message.clone()))
}

fn failure(job: &Job) -> Option<String> {
    condition_is_true(job, "Failed").map(|(reason, message)| {
        message
            .or(reason)
            .unwrap_or_else(|| "job failed".to_string())
    })
}

fn succeeded(job: &Job) -> bool {
    condition_is_true(job, "Complete").is_some()
        || job.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0) > 0
}

async fn harvest(
    store: &Store,
    namespace: Option<&str>,
    job: &str,
    containers: &[&str],
) -> Result<JobState> {
    let selector = format!("{JOB_NAME_LABEL}={job}");
    let pods = store.list::<Pod>(namespace, Some(&selector)).await?;
    let Some(status) = pods
        .into_iter()
        .filter_map(|pod| pod.status)
        .find(|status| status.phase.as_deref() == Some("Succeeded"))
    else {
        return Ok(JobState::AwaitingResults);
    };

    let statuses: Vec<ContainerStatus> = status
        .container_statuses
        .into_iter()
        .flatten()
        .chain(status.init_container_statuses.into_iter().flatten())
        .collect();

    let mut results = BTreeMap::new();
    for container in containers {
        let message = statuses
            .iter()
            .find(|s| s.name == *container)
            .and_then(|s| s.state.as_ref()?.terminated.as_ref()?.message.as_deref());
        let Some(message) = message.filter(|m| !m.trim().is_empty()) else {
            debug!(job, container, "termination message not yet available");
            return Ok(JobState::AwaitingResults);
        };
        if message.len() >= MAX_MESSAGE_BYTES {
            return Err(invalid(job, container, "termination message was truncated"));
        }
        results.insert(container.to_string(), message.trim().to_string());
    }
    Ok(JobState::Succeeded(results))
}

fn invalid(job: &str, container: &str, reason: &str) -> Error {
    Error::InvalidJobResult {
        job: job.into(),
        container: container.into(),
        reason: reason.into(),
    }
}

/// Removes the result of `container` from harvested `results`.
pub fn take_result(results: &mut BTreeMap<String, String>, job: &str, container: &str) -> Result<String> {
    results
        .remove(container)
        .ok_or_else(|| invalid(job, container, "no result"))
}

/// An image digest: `sha256:` and 64 lowercase hex digits.
pub fn validate_digest(job: &str, container: &str, value: &str) -> Result<()> {
    let valid = value.strip_prefix("sha256:").is_some_and(|hex| {
        hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    });
    if valid {
        Ok(())
    } else {
        Err(invalid(job, container, "not a sha256 digest"))
    }
}

pub fn validate_json_object(job: &str, container: &str, value: &str) -> Result<()> {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(serde_json::Value::Object(_)) => Ok(()),
        Ok(_) => Err(invalid(job, container, "not a JSON object")),
        Err(err) => Err(invalid(job, container, &format!("invalid JSON: {err}"))),
    }
}

pub fn validate_url(job: &str, container: &str, value: &str) -> Result<()> {
    let valid = ["https://", "http://"]
        .iter()
        .any(|scheme| value.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty() && !rest.contains(char::is_whitespace)));
    if valid {
        Ok(())
    } else {
        Err(invalid(job, container, "not an http(s) URL"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::Container;

    use super::*;
    use crate::{
        store::MemoryStore,
        testing::{self, DIGEST},
    };

    fn request(generation: i64, fingerprint: &str) -> JobRequest {
        JobRequest {
            name: "pkg-build".into(),
            generation,
            fingerprint: fingerprint.into(),
            pod: PodSpec {
                init_containers: Some(vec![Container {
                    name: "generator".into(),
                    image: Some("gen:1".into()),
                    ..Default::default()
                }]),
                containers: vec![Container {
                    name: "builder".into(),
                    image: Some("build:1".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
            labels: BTreeMap::new(),
            backoff_limit: 2,
        }
    }

    async fn setup() -> (Arc<MemoryStore>, Store, Owner) {
        let memory = Arc::new(MemoryStore::new());
        let store = Store::new(memory.clone());
        let owner = testing::owner_host(&store).await;
        (memory, store, owner)
    }

    #[tokio::test]
    async fn creates_once_and_reports_running() {
        let (memory, store, owner) = setup().await;
        memory.clear_writes();
        let state = ensure_job(&store, &owner, &request(1, "a"), &["builder"]).await.expect("ensure");
        assert_eq!(state, JobState::Created);

        let job: Job = store.get(Some("web"), "pkg-build").await.expect("get").expect("job");
        assert_eq!(job.labels().get(GENERATION_LABEL).map(String::as_str), Some("1"));
        let pod = job.spec.and_then(|s| s.template.spec).expect("pod");
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));

        let state = ensure_job(&store, &owner, &request(1, "a"), &["builder"]).await.expect("ensure");
        assert_eq!(state, JobState::Running);
        assert_eq!(memory.writes(), vec!["create Job pkg-build".to_string()]);
    }

    #[tokio::test]
    async fn stale_jobs_are_deleted_never_updated() {
        let (memory, store, owner) = setup().await;
        ensure_job(&store, &owner, &request(1, "a"), &["builder"]).await.expect("ensure");
        memory.clear_writes();

        let state = ensure_job(&store, &owner, &request(2, "a"), &["builder"]).await.expect("ensure");
        assert_eq!(state, JobState::Replaced);
        let state = ensure_job(&store, &owner, &request(2, "a"), &["builder"]).await.expect("ensure");
        assert_eq!(state, JobState::Created);

        let state = ensure_job(&store, &owner, &request(2, "b"), &["builder"]).await.expect("ensure");
        assert_eq!(state, JobState::Replaced);
        assert_eq!(
            memory.writes(),
            vec![
                "delete Job pkg-build".to_string(),
                "create Job pkg-build".to_string(),
                "delete Job pkg-build".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn failed_jobs_are_terminal() {
        let (_, store, owner) = setup().await;
        ensure_job(&store, &owner, &request(1, "a"), &["builder"]).await.expect("ensure");
        testing::fail_job(&store, "pkg-build", "BackoffLimitExceeded").await;

        let err = ensure_job(&store, &owner, &request(1, "a"), &["builder"]).await.expect_err("failed");
        assert!(matches!(err, Error::JobFailed { ref message, .. } if message == "BackoffLimitExceeded"));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn harvests_main_and_init_container_messages() {
        let (_, store, owner) = setup().await;
        ensure_job(&store, &owner, &request(1, "a"), &["generator", "builder"]).await.expect("ensure");
        testing::finish_job(&store, "pkg-build", &[("generator", " {\"imports\":{}}\n"), ("builder", DIGEST)]).await;

        let state = ensure_job(&store, &owner, &request(1, "a"), &["generator", "builder"])
            .await
            .expect("ensure");
        let JobState::Succeeded(mut results) = state else {
            panic!("expected results, got {state:?}");
        };
        assert_eq!(take_result(&mut results, "pkg-build", "generator").expect("import map"), "{\"imports\":{}}");
        assert_eq!(take_result(&mut results, "pkg-build", "builder").expect("digest"), DIGEST);
    }

    #[tokio::test]
    async fn empty_messages_are_not_yet_observable() {
        let (_, store, owner) = setup().await;
        ensure_job(&store, &owner, &request(1, "a"), &["generator", "builder"]).await.expect("ensure");
        testing::finish_job(&store, "pkg-build", &[("generator", ""), ("builder", DIGEST)]).await;

        let state = ensure_job(&store, &owner, &request(1, "a"), &["generator", "builder"])
            .await
            .expect("ensure");
        assert_eq!(state, JobState::AwaitingResults);
    }

    #[tokio::test]
    async fn truncated_messages_are_rejected() {
        let (_, store, owner) = setup().await;
        ensure_job(&store, &owner, &request(1, "a"), &["builder"]).await.expect("ensure");
        let huge = "x".repeat(MAX_MESSAGE_BYTES);
        testing::finish_job(&store, "pkg-build", &[("builder", &huge)]).await;

        let err = ensure_job(&store, &owner, &request(1, "a"), &["builder"]).await.expect_err("too long");
        assert!(matches!(err, Error::InvalidJobResult { .. }));
    }

    #[test]
    fn validates_result_contracts() {
        assert!(validate_digest("j", "c", DIGEST).is_ok());
        assert!(validate_digest("j", "c", "sha256:abc").is_err());
        assert!(validate_digest("j", "c", &DIGEST.to_uppercase()).is_err());
        assert!(validate_json_object("j", "c", "{\"imports\":{}}").is_ok());
        assert!(validate_json_object("j", "c", "[1]").is_err());
        assert!(validate_json_object("j", "c", "error: out of memory").is_err());
        assert!(validate_url("j", "c", "https://fn.example/hello").is_ok());
        assert!(validate_url("j", "c", "ftp://fn.example").is_err());
        assert!(validate_url("j", "c", "https://").is_err());
    }
}
