//! Container orchestration platform client.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::PlatformError;

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Resource kinds the provisioner manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Deployment,
    Service,
    PersistentVolumeClaim,
}

impl ResourceKind {
    /// REST collection path of this kind within a namespace.
    pub fn collection_path(&self, namespace: &str) -> String {
        match self {
            ResourceKind::Deployment => {
                format!("/apis/apps/v1/namespaces/{}/deployments", namespace)
            }
            ResourceKind::Service => format!("/api/v1/namespaces/{}/services", namespace),
            ResourceKind::PersistentVolumeClaim => {
                format!("/api/v1/namespaces/{}/persistentvolumeclaims", namespace)
            }
        }
    }
}

/// Resource usage of a kernel pod, in platform quantity notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodUsage {
    pub cpu: String,
    pub memory: String,
}

/// Orchestration API used to run kernel containers.
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// Create a resource. Fails with `AlreadyExists` on a name conflict.
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        spec: &Value,
    ) -> Result<(), PlatformError>;

    /// Merge-patch an existing resource.
    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), PlatformError>;

    /// Delete a resource. Fails with `NotFound` when it does not exist.
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str)
    -> Result<(), PlatformError>;

    /// Usage of the first pod matching a label selector.
    async fn pod_usage(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Option<PodUsage>, PlatformError>;
}

/// Kubernetes REST API client.
pub struct KubePlatform {
    client: Client,
    api_url: String,
    token: String,
}

impl KubePlatform {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_url, token)
    }

    pub fn with_client(client: Client, api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.api_url, path));
        if self.token.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.token))
        }
    }

    async fn send(&self, builder: RequestBuilder, name: &str) -> Result<reqwest::Response, PlatformError> {
        let response = builder
            .send()
            .await
            .map_err(|e| PlatformError::Http(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::CONFLICT => Err(PlatformError::AlreadyExists(name.to_string())),
            StatusCode::NOT_FOUND => Err(PlatformError::NotFound(name.to_string())),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(PlatformError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

fn resource_name(spec: &Value) -> &str {
    spec.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct PodMetricsList {
    #[serde(default)]
    items: Vec<PodMetrics>,
}

#[derive(Deserialize)]
struct PodMetrics {
    #[serde(default)]
    containers: Vec<ContainerMetrics>,
}

#[derive(Deserialize)]
struct ContainerMetrics {
    usage: PodUsage,
}

#[async_trait]
impl ContainerPlatform for KubePlatform {
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        spec: &Value,
    ) -> Result<(), PlatformError> {
        let name = resource_name(spec);
        let builder = self
            .request(Method::POST, &kind.collection_path(namespace))
            .json(spec);
        self.send(builder, name).await?;
        debug!("Created {:?} {}/{}", kind, namespace, name);
        Ok(())
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), PlatformError> {
        let body = serde_json::to_vec(patch).map_err(|e| PlatformError::Decode(e.to_string()))?;
        let builder = self
            .request(
                Method::PATCH,
                &format!("{}/{}", kind.collection_path(namespace), name),
            )
            .header("Content-Type", MERGE_PATCH)
            .body(body);
        self.send(builder, name).await?;
        debug!("Patched {:?} {}/{}", kind, namespace, name);
        Ok(())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), PlatformError> {
        let builder = self.request(
            Method::DELETE,
            &format!("{}/{}", kind.collection_path(namespace), name),
        );
        self.send(builder, name).await?;
        debug!("Deleted {:?} {}/{}", kind, namespace, name);
        Ok(())
    }

    async fn pod_usage(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Option<PodUsage>, PlatformError> {
        let path = format!("/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods", namespace);
        let builder = self
            .request(Method::GET, &path)
            .query(&[("labelSelector", selector)]);
        let response = self.send(builder, selector).await?;
        let metrics: PodMetricsList = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;

        Ok(metrics
            .items
            .into_iter()
            .flat_map(|pod| pod.containers)
            .map(|container| container.usage)
            .next())
    }
}

#[cfg(test)]
#[path = "platform_tests.rs"]
mod tests;
