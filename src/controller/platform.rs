//! Orchestration platform boundary
//!
//! The driver talks to Kubernetes only through the [`Platform`] trait, which
//! covers the handful of namespaced kinds an instance is made of. The
//! kube-backed implementation maps API status codes onto the driver's
//! error vocabulary: 409 becomes [`Error::Conflict`] and 404 becomes
//! [`Error::NotFound`].

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Endpoints, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Object kinds managed by the driver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Deployment,
    Service,
    Ingress,
    PersistentVolumeClaim,
    Secret,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Secret => "Secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform object of one of the managed kinds
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ManagedObject {
    Pod(Pod),
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Secret(Secret),
}

impl ManagedObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManagedObject::Pod(_) => ResourceKind::Pod,
            ManagedObject::Deployment(_) => ResourceKind::Deployment,
            ManagedObject::Service(_) => ResourceKind::Service,
            ManagedObject::Ingress(_) => ResourceKind::Ingress,
            ManagedObject::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            ManagedObject::Secret(_) => ResourceKind::Secret,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Pod(o) => &o.metadata,
            ManagedObject::Deployment(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::Ingress(o) => &o.metadata,
            ManagedObject::PersistentVolumeClaim(o) => &o.metadata,
            ManagedObject::Secret(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::Pod(o) => &mut o.metadata,
            ManagedObject::Deployment(o) => &mut o.metadata,
            ManagedObject::Service(o) => &mut o.metadata,
            ManagedObject::Ingress(o) => &mut o.metadata,
            ManagedObject::PersistentVolumeClaim(o) => &mut o.metadata,
            ManagedObject::Secret(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// The object's spec as JSON; Secrets compare their data instead
    pub fn spec_value(&self) -> Result<serde_json::Value> {
        let value = match self {
            ManagedObject::Pod(o) => serde_json::to_value(&o.spec)?,
            ManagedObject::Deployment(o) => serde_json::to_value(&o.spec)?,
            ManagedObject::Service(o) => serde_json::to_value(&o.spec)?,
            ManagedObject::Ingress(o) => serde_json::to_value(&o.spec)?,
            ManagedObject::PersistentVolumeClaim(o) => serde_json::to_value(&o.spec)?,
            ManagedObject::Secret(o) => serde_json::to_value((&o.data, &o.string_data))?,
        };
        Ok(value)
    }

    pub fn as_deployment(&self) -> Option<&Deployment> {
        match self {
            ManagedObject::Deployment(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_pod(&self) -> Option<&Pod> {
        match self {
            ManagedObject::Pod(p) => Some(p),
            _ => None,
        }
    }
}

/// Namespaced create/get/replace/delete for managed kinds
#[async_trait]
pub trait Platform: Send + Sync {
    /// Create an object; fails with [`Error::Conflict`] when it already exists
    async fn create(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject>;

    /// Read an object; fails with [`Error::NotFound`] when absent
    async fn get(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<ManagedObject>;

    /// Replace an object wholesale
    async fn replace(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject>;

    /// Delete an object; fails with [`Error::NotFound`] when absent
    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<()>;

    /// Pod IPs currently backing a Service
    async fn endpoint_addresses(&self, namespace: &str, service: &str) -> Result<Vec<String>>;
}

/// [`Platform`] backed by a kube client
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn classify(kind: ResourceKind, name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(e) if e.code == 409 => Error::Conflict {
            kind: kind.as_str(),
            name: name.to_string(),
        },
        kube::Error::Api(e) if e.code == 404 => Error::NotFound {
            kind: kind.as_str(),
            name: name.to_string(),
        },
        e => Error::KubeError(e),
    }
}

#[async_trait]
impl Platform for KubePlatform {
    #[instrument(skip(self, object), fields(kind = %object.kind(), name = %object.name()))]
    async fn create(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject> {
        let pp = PostParams::default();
        let name = object.name();
        let kind = object.kind();
        let created = match object {
            ManagedObject::Pod(o) => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                ManagedObject::Pod(api.create(&pp, o).await.map_err(|e| classify(kind, name, e))?)
            }
            ManagedObject::Deployment(o) => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                ManagedObject::Deployment(
                    api.create(&pp, o).await.map_err(|e| classify(kind, name, e))?,
                )
            }
            ManagedObject::Service(o) => {
                let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
                ManagedObject::Service(
                    api.create(&pp, o).await.map_err(|e| classify(kind, name, e))?,
                )
            }
            ManagedObject::Ingress(o) => {
                let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
                ManagedObject::Ingress(
                    api.create(&pp, o).await.map_err(|e| classify(kind, name, e))?,
                )
            }
            ManagedObject::PersistentVolumeClaim(o) => {
                let api: Api<PersistentVolumeClaim> =
                    Api::namespaced(self.client.clone(), namespace);
                ManagedObject::PersistentVolumeClaim(
                    api.create(&pp, o).await.map_err(|e| classify(kind, name, e))?,
                )
            }
            ManagedObject::Secret(o) => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                ManagedObject::Secret(
                    api.create(&pp, o).await.map_err(|e| classify(kind, name, e))?,
                )
            }
        };
        debug!("Created {} {}", kind, name);
        Ok(created)
    }

    async fn get(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<ManagedObject> {
        let client = self.client.clone();
        let object = match kind {
            ResourceKind::Pod => ManagedObject::Pod(
                Api::<Pod>::namespaced(client, namespace)
                    .get(name)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ResourceKind::Deployment => ManagedObject::Deployment(
                Api::<Deployment>::namespaced(client, namespace)
                    .get(name)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ResourceKind::Service => ManagedObject::Service(
                Api::<Service>::namespaced(client, namespace)
                    .get(name)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ResourceKind::Ingress => ManagedObject::Ingress(
                Api::<Ingress>::namespaced(client, namespace)
                    .get(name)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ResourceKind::PersistentVolumeClaim => ManagedObject::PersistentVolumeClaim(
                Api::<PersistentVolumeClaim>::namespaced(client, namespace)
                    .get(name)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ResourceKind::Secret => ManagedObject::Secret(
                Api::<Secret>::namespaced(client, namespace)
                    .get(name)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
        };
        Ok(object)
    }

    #[instrument(skip(self, object), fields(kind = %object.kind(), name = %object.name()))]
    async fn replace(&self, namespace: &str, object: &ManagedObject) -> Result<ManagedObject> {
        let pp = PostParams::default();
        let name = object.name();
        let kind = object.kind();
        let client = self.client.clone();
        let replaced = match object {
            ManagedObject::Pod(o) => ManagedObject::Pod(
                Api::<Pod>::namespaced(client, namespace)
                    .replace(name, &pp, o)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ManagedObject::Deployment(o) => ManagedObject::Deployment(
                Api::<Deployment>::namespaced(client, namespace)
                    .replace(name, &pp, o)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ManagedObject::Service(o) => ManagedObject::Service(
                Api::<Service>::namespaced(client, namespace)
                    .replace(name, &pp, o)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ManagedObject::Ingress(o) => ManagedObject::Ingress(
                Api::<Ingress>::namespaced(client, namespace)
                    .replace(name, &pp, o)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ManagedObject::PersistentVolumeClaim(o) => ManagedObject::PersistentVolumeClaim(
                Api::<PersistentVolumeClaim>::namespaced(client, namespace)
                    .replace(name, &pp, o)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
            ManagedObject::Secret(o) => ManagedObject::Secret(
                Api::<Secret>::namespaced(client, namespace)
                    .replace(name, &pp, o)
                    .await
                    .map_err(|e| classify(kind, name, e))?,
            ),
        };
        Ok(replaced)
    }

    #[instrument(skip(self))]
    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<()> {
        let dp = DeleteParams::default();
        let client = self.client.clone();
        match kind {
            ResourceKind::Pod => Api::<Pod>::namespaced(client, namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::Deployment => Api::<Deployment>::namespaced(client, namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::Service => Api::<Service>::namespaced(client, namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::Ingress => Api::<Ingress>::namespaced(client, namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::PersistentVolumeClaim => {
                Api::<PersistentVolumeClaim>::namespaced(client, namespace)
                    .delete(name, &dp)
                    .await
                    .map(|_| ())
            }
            ResourceKind::Secret => Api::<Secret>::namespaced(client, namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
        }
        .map_err(|e| classify(kind, name, e))?;
        debug!("Deleted {} {}", kind, name);
        Ok(())
    }

    async fn endpoint_addresses(&self, namespace: &str, service: &str) -> Result<Vec<String>> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let endpoints = api.get(service).await.map_err(|e| match e {
            kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
                kind: "Endpoints",
                name: service.to_string(),
            },
            e => Error::KubeError(e),
        })?;

        let addresses = endpoints
            .subsets
            .unwrap_or_default()
            .into_iter()
            .flat_map(|subset| subset.addresses.unwrap_or_default())
            .map(|address| address.ip)
            .collect();
        Ok(addresses)
    }
}
