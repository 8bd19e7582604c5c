//! REST client for Shipwright and Tekton resources on a Kubernetes cluster.
//!
//! Talks to the API server directly with [`reqwest`]: builds and build runs
//! are the jobs and runs, task runs the sub-runs, pods the execution units.

use async_trait::async_trait;
use buildload_core::{JobSpec, RunRequest};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::config::KubeConfig;
use super::wire;
use crate::api::{ControlPlane, ControlPlaneError, LogStream};
use crate::models::{
    JobHandle, JobStatus, NodeCapacity, RegistryCredentials, RunHandle, RunStatus,
    StrategyDescriptor, SubRunStatus, UnitStatus,
};

const SHIPWRIGHT_API: &str = "apis/shipwright.io/v1alpha1";
const TEKTON_API: &str = "apis/tekton.dev/v1beta1";
const CORE_API: &str = "api/v1";

/// [`ControlPlane`] backed by the Kubernetes REST API.
pub struct KubeControlPlane {
    client: reqwest::Client,
    api_url: String,
    namespace: String,
}

impl KubeControlPlane {
    /// Build a client from `config`.
    pub fn new(config: &KubeConfig) -> Result<Self, ControlPlaneError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ControlPlaneError::Config(format!("invalid bearer token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()?;

        Ok(Self::with_client(
            client,
            config.api_url.clone(),
            config.namespace.clone(),
        ))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, namespace: String) -> Self {
        Self {
            client,
            api_url,
            namespace,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn namespaced(&self, api: &str, resource: &str) -> String {
        format!(
            "{}/{api}/namespaces/{}/{resource}",
            self.api_url, self.namespace
        )
    }

    fn cluster(&self, api: &str, resource: &str) -> String {
        format!("{}/{api}/{resource}", self.api_url)
    }

    // ---- generic verbs ----

    async fn get_object<T: DeserializeOwned>(
        &self,
        collection: String,
        kind: &'static str,
        name: &str,
    ) -> Result<T, ControlPlaneError> {
        let response = self
            .client
            .get(format!("{collection}/{name}"))
            .send()
            .await?;

        Self::parse_response(response, kind, name).await
    }

    async fn list_objects<T: DeserializeOwned>(
        &self,
        collection: String,
        kind: &'static str,
        selector: Option<&str>,
    ) -> Result<Vec<T>, ControlPlaneError> {
        let mut request = self.client.get(&collection);
        if let Some(selector) = selector {
            request = request.query(&[("labelSelector", selector)]);
        }
        let response = request.send().await?;

        let list: wire::ObjectList<T> = Self::parse_response(response, kind, &collection).await?;
        Ok(list.items)
    }

    async fn create_object<T: DeserializeOwned>(
        &self,
        collection: String,
        kind: &'static str,
        name: &str,
        manifest: &Value,
    ) -> Result<T, ControlPlaneError> {
        let response = self.client.post(collection).json(manifest).send().await?;

        Self::parse_response(response, kind, name).await
    }

    /// Foreground delete without grace period. An absent object is not an error.
    async fn delete_object(
        &self,
        collection: String,
        kind: &'static str,
        name: &str,
    ) -> Result<(), ControlPlaneError> {
        let body = json!({
            "kind": "DeleteOptions",
            "apiVersion": "v1",
            "gracePeriodSeconds": 0,
            "propagationPolicy": "Foreground",
        });

        let response = self
            .client
            .delete(format!("{collection}/{name}"))
            .json(&body)
            .send()
            .await?;

        match Self::check_status(response, kind, name).await {
            Err(ControlPlaneError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. A 404 becomes
    /// [`ControlPlaneError::NotFound`], any other failure an
    /// [`ControlPlaneError::Api`] carrying the body text.
    async fn ensure_success(
        response: reqwest::Response,
        kind: &'static str,
        name: &str,
    ) -> Result<reqwest::Response, ControlPlaneError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ControlPlaneError::not_found(kind, name));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ControlPlaneError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
        kind: &'static str,
        name: &str,
    ) -> Result<T, ControlPlaneError> {
        let response = Self::ensure_success(response, kind, name).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ControlPlaneError::Decode {
            kind,
            message: e.to_string(),
        })
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(
        response: reqwest::Response,
        kind: &'static str,
        name: &str,
    ) -> Result<(), ControlPlaneError> {
        Self::ensure_success(response, kind, name).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobHandle, ControlPlaneError> {
        let manifest = wire::build_manifest(spec, &self.namespace);
        let build: wire::Build = self
            .create_object(
                self.namespaced(SHIPWRIGHT_API, "builds"),
                "Build",
                &spec.name,
                &manifest,
            )
            .await?;

        tracing::debug!(name = %spec.name, "Build created");
        Ok(JobHandle {
            name: build.metadata.name,
            created_at: build.metadata.creation_timestamp,
        })
    }

    async fn get_job(&self, name: &str) -> Result<JobStatus, ControlPlaneError> {
        let build: wire::Build = self
            .get_object(self.namespaced(SHIPWRIGHT_API, "builds"), "Build", name)
            .await?;
        Ok(build.into_model())
    }

    async fn delete_job(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.delete_object(self.namespaced(SHIPWRIGHT_API, "builds"), "Build", name)
            .await
    }

    async fn create_run(&self, request: &RunRequest) -> Result<RunHandle, ControlPlaneError> {
        let manifest = wire::build_run_manifest(request, &self.namespace);
        let run: wire::BuildRun = self
            .create_object(
                self.namespaced(SHIPWRIGHT_API, "buildruns"),
                "BuildRun",
                &request.name,
                &manifest,
            )
            .await?;

        tracing::debug!(name = %request.name, build = %request.job_name, "BuildRun created");
        Ok(RunHandle {
            name: run.metadata.name,
            created_at: run.metadata.creation_timestamp,
        })
    }

    async fn get_run(&self, name: &str) -> Result<RunStatus, ControlPlaneError> {
        let run: wire::BuildRun = self
            .get_object(self.namespaced(SHIPWRIGHT_API, "buildruns"), "BuildRun", name)
            .await?;
        run.into_model()
    }

    async fn delete_run(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.delete_object(self.namespaced(SHIPWRIGHT_API, "buildruns"), "BuildRun", name)
            .await
    }

    async fn list_runs(&self) -> Result<Vec<RunStatus>, ControlPlaneError> {
        let items: Vec<wire::BuildRun> = self
            .list_objects(self.cluster(SHIPWRIGHT_API, "buildruns"), "BuildRun", None)
            .await?;
        items.into_iter().map(wire::BuildRun::into_model).collect()
    }

    async fn get_sub_run(&self, name: &str) -> Result<SubRunStatus, ControlPlaneError> {
        let task_run: wire::TaskRun = self
            .get_object(self.namespaced(TEKTON_API, "taskruns"), "TaskRun", name)
            .await?;
        Ok(task_run.into_model())
    }

    async fn find_sub_runs(&self, selector: &str) -> Result<Vec<SubRunStatus>, ControlPlaneError> {
        let items: Vec<wire::TaskRun> = self
            .list_objects(self.namespaced(TEKTON_API, "taskruns"), "TaskRun", Some(selector))
            .await?;
        Ok(items.into_iter().map(wire::TaskRun::into_model).collect())
    }

    async fn get_execution_unit(&self, name: &str) -> Result<UnitStatus, ControlPlaneError> {
        let pod: wire::Pod = self
            .get_object(self.namespaced(CORE_API, "pods"), "Pod", name)
            .await?;
        Ok(pod.into_model())
    }

    async fn find_execution_units(
        &self,
        selector: &str,
    ) -> Result<Vec<UnitStatus>, ControlPlaneError> {
        let items: Vec<wire::Pod> = self
            .list_objects(self.namespaced(CORE_API, "pods"), "Pod", Some(selector))
            .await?;
        Ok(items.into_iter().map(wire::Pod::into_model).collect())
    }

    async fn stream_container_logs(
        &self,
        unit: &str,
        container: &str,
    ) -> Result<LogStream, ControlPlaneError> {
        let response = self
            .client
            .get(format!("{}/{unit}/log", self.namespaced(CORE_API, "pods")))
            .query(&[("container", container)])
            .send()
            .await?;
        let response = Self::ensure_success(response, "Pod", unit).await?;

        Ok(response
            .bytes_stream()
            .map_err(ControlPlaneError::from)
            .boxed())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>, ControlPlaneError> {
        let items: Vec<wire::Node> = self
            .list_objects(self.cluster(CORE_API, "nodes"), "Node", None)
            .await?;
        Ok(items.into_iter().map(wire::Node::into_model).collect())
    }

    async fn list_strategies(&self) -> Result<Vec<StrategyDescriptor>, ControlPlaneError> {
        let items: Vec<wire::ClusterBuildStrategy> = self
            .list_objects(
                self.cluster(SHIPWRIGHT_API, "clusterbuildstrategies"),
                "ClusterBuildStrategy",
                None,
            )
            .await?;
        Ok(items
            .into_iter()
            .map(wire::ClusterBuildStrategy::into_model)
            .collect())
    }

    async fn registry_credentials(
        &self,
        secret: &str,
    ) -> Result<RegistryCredentials, ControlPlaneError> {
        let secret: wire::Secret = self
            .get_object(self.namespaced(CORE_API, "secrets"), "Secret", secret)
            .await?;
        secret.registry_credentials()
    }
}
