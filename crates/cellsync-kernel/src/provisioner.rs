//! Container provisioner.
//!
//! Every kernel runs as a one-replica workload `rt-{document}-{kind}` behind a
//! service `svc-{document}-{kind}` exposing the five kernel ports 1:1. The
//! owner's data volume `vol-{user}` is shared by all of their kernels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cellsync_config::KernelsConfig;
use cellsync_protocols::{KernelKey, KernelKind, UserId};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{KernelError, PlatformError};
use crate::platform::{ContainerPlatform, PodUsage, ResourceKind};

/// The five fixed ports of a kernel container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelPorts {
    pub shell: u16,
    pub iopub: u16,
    pub stdin: u16,
    pub control: u16,
    pub hb: u16,
}

impl KernelPorts {
    /// Consecutive ports starting at `base`.
    pub fn from_base(base: u16) -> Self {
        Self {
            shell: base,
            iopub: base + 1,
            stdin: base + 2,
            control: base + 3,
            hb: base + 4,
        }
    }

    pub fn named(&self) -> [(&'static str, u16); 5] {
        [
            ("shell", self.shell),
            ("iopub", self.iopub),
            ("stdin", self.stdin),
            ("control", self.control),
            ("hb", self.hb),
        ]
    }
}

/// Network location of a provisioned kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelEndpoint {
    pub host: String,
    pub ports: KernelPorts,
}

impl KernelEndpoint {
    pub fn address(&self, port: u16) -> String {
        format!("tcp://{}:{}", self.host, port)
    }
}

/// Provisioning parameters shared by all kernels.
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub namespace: String,
    pub ports: KernelPorts,
    pub memory_limit_mb: u64,
    pub signing_key: String,
    pub service_domain: String,
    pub shared_cache_claim: String,
    pub public_assets_claim: String,
    pub user_volume_size: String,
    pub images: HashMap<KernelKind, String>,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
    pub readiness_connect_timeout: Duration,
}

impl ProvisionSettings {
    pub fn from_config(config: &KernelsConfig) -> Self {
        let images = KernelKind::ALL
            .iter()
            .filter_map(|kind| config.image_for(*kind).map(|image| (*kind, image.to_string())))
            .collect();
        Self {
            namespace: config.namespace.clone(),
            ports: KernelPorts::from_base(config.port_base),
            memory_limit_mb: config.memory_limit_mb,
            signing_key: config.signing_key.clone(),
            service_domain: config.service_domain.clone(),
            shared_cache_claim: config.shared_cache_claim.clone(),
            public_assets_claim: config.public_assets_claim.clone(),
            user_volume_size: config.user_volume_size.clone(),
            images,
            readiness_attempts: config.readiness_attempts,
            readiness_interval: config.readiness_interval(),
            readiness_connect_timeout: config.readiness_connect_timeout(),
        }
    }

    pub fn image(&self, kind: KernelKind) -> Result<&str, KernelError> {
        self.images
            .get(&kind)
            .map(String::as_str)
            .ok_or_else(|| KernelError::UnknownImage(kind.to_string()))
    }
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self::from_config(&KernelsConfig::default())
    }
}

pub fn workload_name(key: &KernelKey) -> String {
    format!("rt-{}", key.resource_suffix())
}

pub fn service_name(key: &KernelKey) -> String {
    format!("svc-{}", key.resource_suffix())
}

pub fn volume_name(user: &UserId) -> String {
    format!("vol-{}", user)
}

/// Label selector matching the pods of a kernel.
pub fn selector(key: &KernelKey) -> String {
    format!("app={}", workload_name(key))
}

/// Container infrastructure lifecycle of kernels.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create or update the infrastructure of a kernel and return its endpoint.
    async fn ensure(&self, key: &KernelKey, owner: &UserId) -> Result<KernelEndpoint, KernelError>;

    /// Wait until every kernel port accepts connections.
    async fn wait_ready(
        &self,
        endpoint: &KernelEndpoint,
        cancel: &CancellationToken,
    ) -> Result<(), KernelError>;

    /// Delete the infrastructure of a kernel. Already deleted resources are fine.
    async fn teardown(&self, key: &KernelKey) -> Result<(), KernelError>;

    /// Current resource usage of a kernel.
    async fn usage(&self, key: &KernelKey) -> Result<Option<PodUsage>, KernelError>;
}

/// [`Provisioner`] backed by a [`ContainerPlatform`].
pub struct ContainerProvisioner {
    platform: Arc<dyn ContainerPlatform>,
    settings: ProvisionSettings,
}

impl ContainerProvisioner {
    pub fn new(platform: Arc<dyn ContainerPlatform>, settings: ProvisionSettings) -> Self {
        Self { platform, settings }
    }

    pub fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    pub fn endpoint(&self, key: &KernelKey) -> KernelEndpoint {
        KernelEndpoint {
            host: format!(
                "{}.{}.{}",
                service_name(key),
                self.settings.namespace,
                self.settings.service_domain
            ),
            ports: self.settings.ports,
        }
    }

    fn labels(key: &KernelKey) -> Value {
        json!({
            "app": workload_name(key),
            "cellsync/document": key.document.as_str(),
            "cellsync/kernel": key.kind.as_str(),
        })
    }

    pub fn workload_spec(&self, key: &KernelKey, owner: &UserId, image: &str) -> Value {
        let name = workload_name(key);
        let labels = Self::labels(key);
        let ports = &self.settings.ports;
        let container_ports: Vec<Value> = ports
            .named()
            .iter()
            .map(|(name, port)| json!({ "name": name, "containerPort": port, "protocol": "TCP" }))
            .collect();
        let memory_kb = self.settings.memory_limit_mb * 1024;

        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name, "labels": labels },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { "app": name } },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "containers": [{
                            "name": "kernel",
                            "image": image,
                            "args": [
                                format!("--ulimit-memory={}", memory_kb),
                                format!("--shell-port={}", ports.shell),
                                format!("--iopub-port={}", ports.iopub),
                                format!("--stdin-port={}", ports.stdin),
                                format!("--control-port={}", ports.control),
                                format!("--hb-port={}", ports.hb),
                            ],
                            "env": [{ "name": "KERNEL_SIGNING_KEY", "value": self.settings.signing_key }],
                            "ports": container_ports,
                            "volumeMounts": [
                                { "name": "user-data", "mountPath": "/home/user" },
                                { "name": "shared-cache", "mountPath": "/cache" },
                                { "name": "public-assets", "mountPath": "/public", "readOnly": true },
                            ],
                        }],
                        "volumes": [
                            { "name": "user-data", "persistentVolumeClaim": { "claimName": volume_name(owner) } },
                            { "name": "shared-cache", "persistentVolumeClaim": { "claimName": self.settings.shared_cache_claim } },
                            {
                                "name": "public-assets",
                                "persistentVolumeClaim": { "claimName": self.settings.public_assets_claim, "readOnly": true },
                            },
                        ],
                    },
                },
            },
        })
    }

    pub fn service_spec(&self, key: &KernelKey) -> Value {
        let ports: Vec<Value> = self
            .settings
            .ports
            .named()
            .iter()
            .map(|(name, port)| {
                json!({ "name": name, "port": port, "targetPort": port, "protocol": "TCP" })
            })
            .collect();
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": service_name(key), "labels": Self::labels(key) },
            "spec": {
                "selector": { "app": workload_name(key) },
                "ports": ports,
            },
        })
    }

    pub fn volume_spec(&self, owner: &UserId) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": { "name": volume_name(owner) },
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "resources": { "requests": { "storage": self.settings.user_volume_size } },
            },
        })
    }

    /// Create a resource, merge-patching it when it already exists.
    async fn upsert(&self, kind: ResourceKind, name: &str, spec: &Value) -> Result<(), PlatformError> {
        let namespace = &self.settings.namespace;
        match self.platform.create(kind, namespace, spec).await {
            Err(PlatformError::AlreadyExists(_)) => {
                debug!("{:?} {} exists, patching", kind, name);
                self.platform.patch(kind, namespace, name, spec).await
            }
            other => other,
        }
    }

    async fn delete_tolerant(&self, kind: ResourceKind, name: &str) -> Result<(), PlatformError> {
        match self.platform.delete(kind, &self.settings.namespace, name).await {
            Err(PlatformError::NotFound(_)) => {
                debug!("{:?} {} already gone", kind, name);
                Ok(())
            }
            other => other,
        }
    }
}

async fn probe(host: &str, port: u16, connect_timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[async_trait]
impl Provisioner for ContainerProvisioner {
    async fn ensure(&self, key: &KernelKey, owner: &UserId) -> Result<KernelEndpoint, KernelError> {
        let image = self.settings.image(key.kind)?;

        match self
            .platform
            .create(
                ResourceKind::PersistentVolumeClaim,
                &self.settings.namespace,
                &self.volume_spec(owner),
            )
            .await
        {
            Ok(()) | Err(PlatformError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.upsert(
            ResourceKind::Deployment,
            &workload_name(key),
            &self.workload_spec(key, owner, image),
        )
        .await?;
        self.upsert(ResourceKind::Service, &service_name(key), &self.service_spec(key))
            .await?;

        info!("Provisioned kernel {} with image {}", key, image);
        Ok(self.endpoint(key))
    }

    async fn wait_ready(
        &self,
        endpoint: &KernelEndpoint,
        cancel: &CancellationToken,
    ) -> Result<(), KernelError> {
        let attempts = self.settings.readiness_attempts;
        let connect_timeout = self.settings.readiness_connect_timeout;

        for attempt in 1..=attempts {
            let mut ready = true;
            for (_, port) in endpoint.ports.named() {
                let reachable = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(KernelError::Cancelled),
                    reachable = probe(&endpoint.host, port, connect_timeout) => reachable,
                };
                if !reachable {
                    ready = false;
                    break;
                }
            }
            if ready {
                debug!("Kernel at {} ready after {} attempts", endpoint.host, attempt);
                return Ok(());
            }
            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(KernelError::Cancelled),
                    _ = tokio::time::sleep(self.settings.readiness_interval) => {}
                }
            }
        }

        warn!("Kernel at {} not ready after {} attempts", endpoint.host, attempts);
        Err(KernelError::ReadinessTimeout {
            host: endpoint.host.clone(),
            attempts,
        })
    }

    async fn teardown(&self, key: &KernelKey) -> Result<(), KernelError> {
        self.delete_tolerant(ResourceKind::Service, &service_name(key))
            .await?;
        self.delete_tolerant(ResourceKind::Deployment, &workload_name(key))
            .await?;
        info!("Tore down kernel {}", key);
        Ok(())
    }

    async fn usage(&self, key: &KernelKey) -> Result<Option<PodUsage>, KernelError> {
        Ok(self
            .platform
            .pod_usage(&self.settings.namespace, &selector(key))
            .await?)
    }
}

#[cfg(test)]
#[path = "provisioner_tests.rs"]
mod tests;
