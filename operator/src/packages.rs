//! Builds a `PackageReferences` bundle: one job installs the packages,
//! generates the import map and pushes a content-addressed image.
//!
//! The harvested image and import map are cached in `status.attributes`
//! under the fingerprint of the normalized package list, so an unchanged
//! list is built at most once.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, PodSpec, Volume, VolumeMount};
use kube::{Resource, ResourceExt, runtime::controller::Action};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    conditions::{ConditionTriple, set_conditions},
    crd::{PackageReference, PackageReferences, PackageReferencesStatus},
    error::{Error, Result},
    event::{Ctx, with_event},
    jobs::{JobRequest, JobState, ensure_job, take_result, validate_digest, validate_json_object},
    reconcile::Reconcile,
    synthesize::{MANAGED_BY_LABEL, MANAGER, Owner, ensure, merge_labels},
};

pub const IMAGE_ATTRIBUTE: &str = "image";
pub const IMPORT_MAP_ATTRIBUTE: &str = "importmap";
pub const FINGERPRINT_ATTRIBUTE: &str = "fingerprint";
pub const GENERATION_ATTRIBUTE: &str = "generation";

const INSTALLER: &str = "installer";
const GENERATOR: &str = "generator";
const BUILDER: &str = "builder";

const MANIFEST_KEY: &str = "package.json";
const MANIFEST_DIR: &str = "/manifest";
const WORKSPACE_DIR: &str = "/workspace";

/// Sorted by `(name, version)` with duplicates removed, so the same set
/// always serializes the same way.
pub fn normalized(references: &[PackageReference]) -> Vec<PackageReference> {
    let mut references = references.to_vec();
    references.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
    references.dedup();
    references
}

pub fn fingerprint(references: &[PackageReference]) -> Result<String> {
    let bytes = serde_json::to_vec(&normalized(references))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// The `package.json` the installer container consumes.
pub fn package_json(name: &str, references: &[PackageReference]) -> Result<String> {
    let references = normalized(references);
    let dependencies: BTreeMap<&str, &str> = references
        .iter()
        .map(|r| (r.name.as_str(), r.version.as_str()))
        .collect();
    let manifest = json!({
        "name": name,
        "private": true,
        "dependencies": dependencies,
    });
    Ok(serde_json::to_string_pretty(&manifest)?)
}

/// Name of the bundle a host synthesizes for itself.
pub fn bundle_name(host: &str) -> String {
    format!("{host}-packages")
}

fn harvested(status: &PackageReferencesStatus, fingerprint: &str) -> bool {
    let attributes = &status.attributes;
    attributes.get(FINGERPRINT_ATTRIBUTE).map(String::as_str) == Some(fingerprint)
        && attributes.contains_key(IMAGE_ATTRIBUTE)
        && attributes.contains_key(IMPORT_MAP_ATTRIBUTE)
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        ..Default::default()
    }
}

fn build_pod(ctx: &Ctx, manifest: &str, repository: &str) -> Result<PodSpec> {
    let settings = &ctx.settings;
    let volumes: Vec<Volume> = vec![
        serde_json::from_value(json!({ "name": "workspace", "emptyDir": {} }))?,
        serde_json::from_value(json!({ "name": "manifest", "configMap": { "name": manifest } }))?,
    ];
    let workspace = || mount("workspace", WORKSPACE_DIR);

    Ok(PodSpec {
        volumes: Some(volumes),
        init_containers: Some(vec![
            Container {
                name: INSTALLER.into(),
                image: Some(settings.installer_image.clone()),
                working_dir: Some(WORKSPACE_DIR.into()),
                env: Some(vec![EnvVar {
                    name: "PACKAGE_MANIFEST".into(),
                    value: Some(format!("{MANIFEST_DIR}/{MANIFEST_KEY}")),
                    ..Default::default()
                }]),
                volume_mounts: Some(vec![workspace(), mount("manifest", MANIFEST_DIR)]),
                ..Default::default()
            },
            Container {
                name: GENERATOR.into(),
                image: Some(settings.import_map_image.clone()),
                working_dir: Some(WORKSPACE_DIR.into()),
                volume_mounts: Some(vec![workspace()]),
                ..Default::default()
            },
        ]),
        containers: vec![Container {
            name: BUILDER.into(),
            image: Some(settings.package_builder_image.clone()),
            args: Some(vec![
                format!("--context=dir://{WORKSPACE_DIR}"),
                format!("--destination={repository}"),
                "--digest-file=/dev/termination-log".into(),
            ]),
            volume_mounts: Some(vec![workspace()]),
            ..Default::default()
        }],
        ..Default::default()
    })
}

#[async_trait]
impl Reconcile for PackageReferences {
    async fn apply(&self, status: &mut PackageReferencesStatus, ctx: &Ctx) -> Result<Action> {
        let generation = self.meta().generation;
        if self.spec.package_references.is_empty() {
            return Err(Error::InvalidSpec("packageReferences must not be empty".into()));
        }
        let fingerprint = fingerprint(&self.spec.package_references)?;
        if harvested(status, &fingerprint) {
            set_conditions(&mut status.conditions, ConditionTriple::READY, "Built", "bundle is up to date", generation);
            return Ok(Action::await_change());
        }

        let name = self.name_any();
        let namespace = self.namespace().unwrap_or_default();
        let owner = Owner::of(self)?;
        let labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGER.to_string())]);
        let repository = self
            .spec
            .repository
            .clone()
            .unwrap_or_else(|| format!("{}/{namespace}/{name}", ctx.settings.registry));

        let manifest_name = format!("{name}-manifest");
        let manifest = package_json(&name, &self.spec.package_references)?;
        with_event(
            ctx,
            self,
            "Wrote package manifest",
            "ManifestFailed",
            ensure(&ctx.store, &owner, &manifest_name, |map: &mut ConfigMap| {
                merge_labels(&mut map.metadata, &labels);
                map.data = Some(BTreeMap::from([(MANIFEST_KEY.to_string(), manifest)]));
                Ok(())
            }),
        )
        .await?;

        let request = JobRequest {
            name: format!("{name}-build"),
            generation: generation.unwrap_or_default(),
            fingerprint: fingerprint.clone(),
            pod: build_pod(ctx, &manifest_name, &repository)?,
            labels,
            backoff_limit: ctx.settings.job_backoff_limit,
        };
        let poll = Action::requeue(ctx.settings.job_poll_requeue);
        match ensure_job(&ctx.store, &owner, &request, &[GENERATOR, BUILDER]).await? {
            JobState::Created | JobState::Running | JobState::AwaitingResults => {
                status.detail = Some(format!("building {repository}"));
                set_conditions(&mut status.conditions, ConditionTriple::PROGRESSING, "Building", "package job is running", generation);
                Ok(poll)
            }
            JobState::Replaced => {
                set_conditions(&mut status.conditions, ConditionTriple::PROGRESSING, "Rebuilding", "package list changed", generation);
                Ok(Action::requeue(ctx.settings.stale_job_requeue))
            }
            JobState::Succeeded(mut results) => {
                let import_map = take_result(&mut results, &request.name, GENERATOR)?;
                validate_json_object(&request.name, GENERATOR, &import_map)?;
                let digest = take_result(&mut results, &request.name, BUILDER)?;
                validate_digest(&request.name, BUILDER, &digest)?;

                let image = format!("{repository}@{digest}");
                info!(%image, "package bundle built");
                let attributes = &mut status.attributes;
                attributes.insert(IMAGE_ATTRIBUTE.into(), image.clone());
                attributes.insert(IMPORT_MAP_ATTRIBUTE.into(), import_map);
                attributes.insert(FINGERPRINT_ATTRIBUTE.into(), fingerprint);
                attributes.insert(GENERATION_ATTRIBUTE.into(), request.generation.to_string());
                status.detail = Some(image);
                set_conditions(&mut status.conditions, ConditionTriple::READY, "Built", "bundle is up to date", generation);
                Ok(Action::await_change())
            }
        }
    }
}
