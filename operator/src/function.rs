//! The Function pipeline: OpenAPI schema, generator recipe, source, image,
//! deployment.
//!
//! The pipeline is recomputed on every reconcile from `status.state`.
//! Synchronous stages run back to back; a stage that needs a job stops the
//! pass and is resumed when the job changes. A new spec generation throws
//! away everything derived from the old one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, PodSpec, Volume, VolumeMount};
use kube::{Resource, ResourceExt, runtime::controller::Action};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{
    conditions::{ConditionTriple, set_conditions},
    crd::{Function, FunctionStatus, GeneratorConfig, PipelineStage},
    error::{Error, Result, is_immutable_field},
    event::{Ctx, with_event},
    jobs::{
        JobRequest, JobState, ensure_job, take_result, validate_digest, validate_url,
    },
    proceed,
    reconcile::{Flow, Reconcile},
    resolver::{ReferenceKind, Referent, Referrer, resolve, resolve_host},
    router::ObjectKey,
    synthesize::{MANAGED_BY_LABEL, MANAGER, Owner, ensure, merge_labels},
};

pub const FUNCTION_LABEL: &str = "webhost.jedimindtricks.example/function";
pub const GENERATION_ATTRIBUTE: &str = "generation";
pub const DIGEST_ATTRIBUTE: &str = "imageDigest";

const GENERATOR: &str = "generator";
const BUILDER: &str = "builder";
const DEPLOYER: &str = "deployer";
const RECIPE_KEY: &str = "recipe.json";
const RECIPE_DIR: &str = "/recipe";

/// `https://{domain}/{path}/openapi.json` with exactly one slash between
/// segments.
pub fn open_api_url(domain: &str, ingress_path: &str) -> String {
    let domain = domain.trim_end_matches('/');
    match ingress_path.trim_matches('/') {
        "" => format!("https://{domain}/openapi.json"),
        path => format!("https://{domain}/{path}/openapi.json"),
    }
}

fn sha256_hex(value: &serde_json::Value) -> Result<String> {
    Ok(hex::encode(Sha256::digest(serde_json::to_vec(value)?)))
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Where a stage goes after its job reports back.
fn job_flow(
    ctx: &Ctx,
    state: JobState,
    status: &mut FunctionStatus,
    reason: &str,
    generation: Option<i64>,
) -> Flow<BTreeMap<String, String>> {
    let message = format!("{} job is running", status.state);
    match state {
        JobState::Succeeded(results) => Flow::Continue(results),
        JobState::Created | JobState::Running => {
            set_conditions(&mut status.conditions, ConditionTriple::PROGRESSING, reason, &message, generation);
            Flow::Stop(Action::await_change())
        }
        JobState::AwaitingResults => {
            set_conditions(&mut status.conditions, ConditionTriple::PROGRESSING, reason, &message, generation);
            Flow::Stop(Action::requeue(ctx.settings.job_poll_requeue))
        }
        JobState::Replaced => {
            set_conditions(&mut status.conditions, ConditionTriple::PROGRESSING, reason, "replacing a stale job", generation);
            Flow::Stop(Action::requeue(ctx.settings.stale_job_requeue))
        }
    }
}

struct Pipeline<'a> {
    function: &'a Function,
    ctx: &'a Ctx,
    referrer: Referrer,
    owner: Owner,
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
}

impl Pipeline<'_> {
    fn generation(&self) -> Option<i64> {
        self.referrer.generation
    }

    async fn adaptor(&self, status: &mut FunctionStatus) -> Result<Flow<Option<Referent>>> {
        resolve(
            self.ctx,
            &self.referrer,
            &mut status.conditions,
            self.function.spec.faas_adaptor_ref.as_ref(),
            ReferenceKind::FAAS_ADAPTORS,
            "faasAdaptorRef",
        )
        .await
    }

    fn job(&self, suffix: &str, fingerprint: String, pod: PodSpec) -> JobRequest {
        JobRequest {
            name: format!("{}-{suffix}", self.name),
            generation: self.generation().unwrap_or_default(),
            fingerprint,
            pod,
            labels: self.labels.clone(),
            backoff_limit: self.ctx.settings.job_backoff_limit,
        }
    }

    /// Pending: the schema URL is `spec.openApiUrl` or derived from the host's domain.
    async fn schema(&self, status: &mut FunctionStatus) -> Result<Flow<PipelineStage>> {
        let spec = &self.function.spec;
        let url = match &spec.open_api_url {
            Some(url) => url.clone(),
            None => {
                let host = proceed!(
                    resolve_host(self.ctx, &self.referrer, &mut status.conditions, &spec.host_ref).await?
                );
                open_api_url(&host.spec.domain, &spec.ingress_path)
            }
        };
        status.open_api_url = Some(url);
        Ok(Flow::Continue(PipelineStage::OpenApiValid))
    }

    /// OpenAPIValid: an explicit generator wins over the adaptor's table.
    async fn recipe(&self, status: &mut FunctionStatus) -> Result<Flow<PipelineStage>> {
        let spec = &self.function.spec;
        let generator = match &spec.generator_config {
            Some(generator) => generator.clone(),
            None => {
                let recipe = format!("{}/{}", spec.language, spec.environment);
                let adaptor = proceed!(self.adaptor(status).await?);
                adaptor
                    .as_ref()
                    .and_then(|a| a.generators()?.get(&recipe).cloned())
                    .ok_or_else(|| Error::UnknownGenerator {
                        recipe,
                        adaptor: adaptor
                            .as_ref()
                            .map_or_else(|| "no faasAdaptorRef".to_string(), Referent::describe),
                    })?
            }
        };
        status.generator_config = Some(generator);
        Ok(Flow::Continue(PipelineStage::BuildValid))
    }

    /// BuildValid: given source is used as is, otherwise a job generates it.
    async fn source(&self, status: &mut FunctionStatus) -> Result<Flow<PipelineStage>> {
        if let Some(source) = &self.function.spec.source {
            status.source = Some(source.clone());
            return Ok(Flow::Continue(PipelineStage::SourceAvailable));
        }
        let generator = status.generator_config.clone().unwrap_or_default();
        let open_api_url = status.open_api_url.clone().unwrap_or_default();
        let fingerprint = sha256_hex(&json!({ "generator": generator, "openApiUrl": open_api_url }))?;
        let request = self.job("generate", fingerprint, self.generator_pod(&generator, &open_api_url));

        let state = ensure_job(&self.ctx.store, &self.owner, &request, &[GENERATOR]).await?;
        let mut results = proceed!(job_flow(self.ctx, state, status, "Generating", self.generation()));
        let source = take_result(&mut results, &request.name, GENERATOR)?;
        status.source = Some(source);
        Ok(Flow::Continue(PipelineStage::SourceGenerated))
    }

    fn generator_pod(&self, generator: &GeneratorConfig, open_api_url: &str) -> PodSpec {
        let spec = &self.function.spec;
        let mut env_vars = vec![
            env("FUNCTION_NAME", &self.name),
            env("OPENAPI_URL", open_api_url),
            env("LANGUAGE", &spec.language),
            env("ENVIRONMENT", &spec.environment),
        ];
        env_vars.extend(generator.env.iter().map(|(k, v)| env(k, v)));
        PodSpec {
            containers: vec![Container {
                name: GENERATOR.into(),
                image: Some(generator.image.clone()),
                args: (!generator.args.is_empty()).then(|| generator.args.clone()),
                env: Some(env_vars),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn repository(&self) -> String {
        format!("{}/{}/{}", self.ctx.settings.registry, self.namespace, self.name)
    }

    /// Source*: writes the immutable build recipe, then builds the image.
    async fn build(&self, status: &mut FunctionStatus) -> Result<Flow<PipelineStage>> {
        let adaptor = proceed!(self.adaptor(status).await?);
        let builder_image = adaptor
            .as_ref()
            .and_then(Referent::builder_image)
            .unwrap_or(&self.ctx.settings.builder_image)
            .to_string();

        let spec = &self.function.spec;
        let recipe = json!({
            "function": self.name,
            "language": spec.language,
            "environment": spec.environment,
            "source": status.source,
            "destination": self.repository(),
        });
        let recipe_name = format!("{}-build", self.name);
        let recipe_text = serde_json::to_string_pretty(&recipe)?;
        let written = with_event(
            self.ctx,
            self.function,
            "Wrote build recipe",
            "RecipeFailed",
            ensure(&self.ctx.store, &self.owner, &recipe_name, |map: &mut ConfigMap| {
                merge_labels(&mut map.metadata, &self.labels);
                map.immutable = Some(true);
                map.data = Some(BTreeMap::from([(RECIPE_KEY.to_string(), recipe_text)]));
                Ok(())
            }),
        )
        .await;
        match written {
            Ok(_) => {}
            Err(err) if is_immutable_field(&err) => {
                info!(recipe = %recipe_name, "build recipe is outdated; replacing it");
                self.ctx.store.delete::<ConfigMap>(Some(&self.namespace), &recipe_name).await?;
                set_conditions(
                    &mut status.conditions,
                    ConditionTriple::PROGRESSING,
                    "RecipeReplaced",
                    "replacing the outdated build recipe",
                    self.generation(),
                );
                return Ok(Flow::Stop(Action::requeue(self.ctx.settings.immutable_retry_requeue)));
            }
            Err(err) => return Err(err),
        }

        let volume: Volume =
            serde_json::from_value(json!({ "name": "recipe", "configMap": { "name": recipe_name } }))?;
        let pod = PodSpec {
            volumes: Some(vec![volume]),
            containers: vec![Container {
                name: BUILDER.into(),
                image: Some(builder_image),
                env: Some(vec![env("RECIPE", &format!("{RECIPE_DIR}/{RECIPE_KEY}"))]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "recipe".into(),
                    mount_path: RECIPE_DIR.into(),
                    read_only: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        };
        let request = self.job("build", sha256_hex(&recipe)?, pod);

        let state = ensure_job(&self.ctx.store, &self.owner, &request, &[BUILDER]).await?;
        let mut results = proceed!(job_flow(self.ctx, state, status, "Building", self.generation()));
        let digest = take_result(&mut results, &request.name, BUILDER)?;
        validate_digest(&request.name, BUILDER, &digest)?;

        status.executable = Some(format!("{}@{digest}", self.repository()));
        status.attributes.insert(DIGEST_ATTRIBUTE.into(), digest);
        status
            .attributes
            .insert(GENERATION_ATTRIBUTE.into(), request.generation.to_string());
        Ok(Flow::Continue(PipelineStage::ExecutableAvailable))
    }

    /// ExecutableAvailable: deploys the image; the deployer reports the URL.
    async fn deploy(&self, status: &mut FunctionStatus) -> Result<Flow<PipelineStage>> {
        let adaptor = proceed!(self.adaptor(status).await?);
        let deployer_image = adaptor
            .as_ref()
            .and_then(Referent::deployer_image)
            .unwrap_or(&self.ctx.settings.deployer_image)
            .to_string();

        let executable = status.executable.clone().unwrap_or_default();
        let spec = &self.function.spec;
        let mut env_vars = vec![
            env("FUNCTION_NAME", &self.name),
            env("FUNCTION_NAMESPACE", &self.namespace),
            env("EXECUTABLE", &executable),
        ];
        env_vars.extend(spec.env.iter().map(|(k, v)| env(&format!("FUNCTION_ENV_{k}"), v)));
        let fingerprint = sha256_hex(&json!({ "executable": executable, "env": spec.env }))?;
        let pod = PodSpec {
            containers: vec![Container {
                name: DEPLOYER.into(),
                image: Some(deployer_image),
                env: Some(env_vars),
                ..Default::default()
            }],
            ..Default::default()
        };
        let request = self.job("deploy", fingerprint, pod);

        let state = ensure_job(&self.ctx.store, &self.owner, &request, &[DEPLOYER]).await?;
        let mut results = proceed!(job_flow(self.ctx, state, status, "Deploying", self.generation()));
        let url = take_result(&mut results, &request.name, DEPLOYER)?;
        validate_url(&request.name, DEPLOYER, &url)?;
        status.url = Some(url);
        Ok(Flow::Continue(PipelineStage::Ready))
    }
}

#[async_trait]
impl Reconcile for Function {
    fn is_focal(&self, ctx: &Ctx) -> bool {
        ctx.settings
            .focal_host
            .as_ref()
            .is_none_or(|focal| focal.matches(self.namespace().as_deref(), &self.spec.host_ref))
    }

    async fn apply(&self, status: &mut FunctionStatus, ctx: &Ctx) -> Result<Action> {
        let generation = self.meta().generation;
        if status.observed_generation.is_some() && status.observed_generation != generation {
            info!(from = ?status.observed_generation, to = ?generation, "spec changed; restarting pipeline");
            status.reset();
        }

        let name = self.name_any();
        ctx.router.record(
            &ObjectKey::of(self),
            self.spec
                .faas_adaptor_ref
                .as_ref()
                .and_then(|r| ObjectKey::referenced(self.namespace().as_deref(), r))
                .into_iter()
                .chain([ObjectKey::new("Host", self.namespace().as_deref(), &self.spec.host_ref)]),
        );
        let pipeline = Pipeline {
            function: self,
            ctx,
            referrer: Referrer::of(self),
            owner: Owner::of(self)?,
            namespace: self.namespace().unwrap_or_default(),
            labels: BTreeMap::from([
                (MANAGED_BY_LABEL.to_string(), MANAGER.to_string()),
                (FUNCTION_LABEL.to_string(), name.clone()),
            ]),
            name,
        };

        loop {
            let next = match status.state {
                PipelineStage::Pending => proceed!(pipeline.schema(status).await?),
                PipelineStage::OpenApiValid => proceed!(pipeline.recipe(status).await?),
                PipelineStage::BuildValid => proceed!(pipeline.source(status).await?),
                PipelineStage::SourceAvailable | PipelineStage::SourceGenerated => {
                    proceed!(pipeline.build(status).await?)
                }
                PipelineStage::ExecutableAvailable => proceed!(pipeline.deploy(status).await?),
                PipelineStage::Ready => {
                    let url = status.url.clone().unwrap_or_default();
                    status.detail = Some(url.clone());
                    set_conditions(&mut status.conditions, ConditionTriple::READY, "Deployed", &url, generation);
                    return Ok(Action::await_change());
                }
            };
            debug!(from = %status.state, to = %next, "pipeline advanced");
            status.state = next;
        }
    }
}
