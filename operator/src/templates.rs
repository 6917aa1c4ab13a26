//! Memoized default objects the synthesizer overlays its owned fields onto.
//!
//! Each template is built at most once per process, lazily, and handed out
//! as a fresh copy so callers can mutate freely.

use std::sync::{Arc, PoisonError, RwLock};

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment},
        core::v1::{
            Container, ContainerPort, PodSecurityContext, PodSpec, PodTemplateSpec, Service,
            ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};

use crate::crd::traefik::{IngressRoute, IngressRouteSpec};

pub const HTTP_PORT_NAME: &str = "http";
pub const APP_CONTAINER: &str = "app";

#[derive(Default)]
pub struct TemplateCache {
    deployment: RwLock<Option<Arc<Deployment>>>,
    service: RwLock<Option<Arc<Service>>>,
    ingress_route: RwLock<Option<Arc<IngressRoute>>>,
}

impl TemplateCache {
    pub fn deployment(&self) -> Deployment {
        memoized(&self.deployment, default_deployment)
    }

    pub fn service(&self) -> Service {
        memoized(&self.service, default_service)
    }

    pub fn ingress_route(&self) -> IngressRoute {
        memoized(&self.ingress_route, default_ingress_route)
    }
}

fn memoized<T: Clone>(slot: &RwLock<Option<Arc<T>>>, build: fn() -> T) -> T {
    let cached = slot.read().unwrap_or_else(PoisonError::into_inner).clone();
    if let Some(template) = cached {
        return T::clone(&template);
    }
    // another reconcile may have filled the slot since the read
    let mut slot = slot.write().unwrap_or_else(PoisonError::into_inner);
    let template = slot.get_or_insert_with(|| Arc::new(build()));
    T::clone(template)
}

fn default_deployment() -> Deployment {
    let container = Container {
        name: APP_CONTAINER.into(),
        image_pull_policy: Some("IfNotPresent".into()),
        ports: Some(vec![ContainerPort {
            name: Some(HTTP_PORT_NAME.into()),
            container_port: 8080,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta::default(),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            revision_history_limit: Some(3),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".into()),
                rolling_update: Some(RollingUpdateDeployment::default()),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta::default()),
                spec: Some(PodSpec {
                    containers: vec![container],
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn default_service() -> Service {
    Service {
        metadata: ObjectMeta::default(),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            ports: Some(vec![ServicePort {
                name: Some(HTTP_PORT_NAME.into()),
                port: 80,
                protocol: Some("TCP".into()),
                target_port: Some(IntOrString::String(HTTP_PORT_NAME.into())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn default_ingress_route() -> IngressRoute {
    IngressRoute {
        metadata: ObjectMeta::default(),
        spec: IngressRouteSpec {
            entry_points: vec!["websecure".into()],
            routes: Vec::new(),
        },
    }
}
