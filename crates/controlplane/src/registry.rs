//! Removal of pushed output images from their container registry.
//!
//! Every successful build pushes an image. Load runs create hundreds of them,
//! so cleanup deletes the repository again. Only Docker Hub is supported;
//! images on any other registry are left in place.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::models::RegistryCredentials;

const DOCKER_HUB_API: &str = "https://hub.docker.com";
const DEFAULT_TAG: &str = "latest";

// ---------------------------------------------------------------------------
// Image references
// ---------------------------------------------------------------------------

/// A `host/org/repository[:tag]` image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub host: String,
    pub org: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidReference(image.to_string());

        let mut parts = image.splitn(3, '/');
        let (Some(host), Some(org), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        if host.is_empty() || org.is_empty() || rest.is_empty() {
            return Err(invalid());
        }

        let (repository, tag) = rest.split_once(':').unwrap_or((rest, DEFAULT_TAG));

        Ok(Self {
            host: host.to_string(),
            org: org.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn is_docker_hub(&self) -> bool {
        self.host.contains("docker.io")
    }
}

// ---------------------------------------------------------------------------
// Registry seam
// ---------------------------------------------------------------------------

/// A registry from which output images can be removed.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Whether this registry is responsible for `image`.
    fn manages(&self, image: &str) -> bool;

    /// Delete `image`. Deleting an image that does not exist succeeds.
    async fn delete_image(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RegistryError>;
}

/// Errors from the registry layer.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Registry login failed ({status}): {body}")]
    Login { status: u16, body: String },

    #[error("Deleting {image} failed ({status}): {body}")]
    Delete {
        image: String,
        status: u16,
        body: String,
    },
}

// ---------------------------------------------------------------------------
// Docker Hub
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LoginToken {
    token: String,
}

/// Docker Hub v2 API client.
pub struct DockerHubRegistry {
    client: reqwest::Client,
    api_url: String,
}

impl Default for DockerHubRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerHubRegistry {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new(), DOCKER_HUB_API.to_string())
    }

    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Exchange username and password for an `Authorization` header value.
    async fn login(&self, credentials: &RegistryCredentials) -> Result<String, RegistryError> {
        let response = self
            .client
            .post(format!("{}/v2/users/login/", self.api_url))
            .json(&serde_json::json!({
                "username": credentials.username,
                "password": credentials.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RegistryError::Login {
                status: status.as_u16(),
                body,
            });
        }

        let token: LoginToken = response.json().await?;
        Ok(format!("JWT {}", token.token))
    }
}

#[async_trait]
impl ImageRegistry for DockerHubRegistry {
    fn manages(&self, image: &str) -> bool {
        ImageReference::parse(image).is_ok_and(|r| r.is_docker_hub())
    }

    async fn delete_image(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RegistryError> {
        let reference = ImageReference::parse(image)?;

        let authorization = match credentials {
            Some(credentials) => Some(self.login(credentials).await?),
            None => None,
        };

        let mut request = self.client.delete(format!(
            "{}/v2/repositories/{}/{}/",
            self.api_url, reference.org, reference.repository
        ));
        if let Some(authorization) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::ACCEPTED => {
                tracing::debug!(image, "Image repository deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                tracing::debug!(image, "Image repository already absent");
                Ok(())
            }
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<unreadable body>".to_string());
                Err(RegistryError::Delete {
                    image: image.to_string(),
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Dispatches each image to the first registry that manages it.
///
/// Images no registry manages are skipped silently.
#[derive(Default)]
pub struct RegistryRouter {
    registries: Vec<Box<dyn ImageRegistry>>,
}

impl RegistryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with every built-in registry.
    pub fn with_defaults() -> Self {
        Self::new().with(DockerHubRegistry::new())
    }

    pub fn with(mut self, registry: impl ImageRegistry + 'static) -> Self {
        self.registries.push(Box::new(registry));
        self
    }

    fn route(&self, image: &str) -> Option<&dyn ImageRegistry> {
        self.registries
            .iter()
            .find(|r| r.manages(image))
            .map(|r| r.as_ref())
    }
}

#[async_trait]
impl ImageRegistry for RegistryRouter {
    fn manages(&self, image: &str) -> bool {
        self.route(image).is_some()
    }

    async fn delete_image(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RegistryError> {
        match self.route(image) {
            Some(registry) => registry.delete_image(image, credentials).await,
            None => {
                tracing::debug!(image, "No registry manages image, leaving it in place");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
