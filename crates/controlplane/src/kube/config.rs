//! Connection settings for the Kubernetes API server.

use std::time::Duration;

use crate::api::ControlPlaneError;

/// Default in-cluster API server address.
const DEFAULT_API_URL: &str = "https://kubernetes.default.svc";
/// Service account token mounted into every pod.
const DEFAULT_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const DEFAULT_NAMESPACE: &str = "default";
/// Default per-request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Kubernetes API server connection settings.
#[derive(Clone)]
pub struct KubeConfig {
    /// Base URL, e.g. `https://10.0.0.1:6443` or `http://127.0.0.1:8001`.
    pub api_url: String,
    /// Bearer token; `None` for unauthenticated endpoints such as `kubectl proxy`.
    pub token: Option<String>,
    /// Namespace every load resource is created in.
    pub namespace: String,
    pub insecure_skip_tls_verify: bool,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for KubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl KubeConfig {
    /// Load the configuration from environment variables.
    ///
    /// | Env Var                          | Required | Default                                                |
    /// |----------------------------------|----------|--------------------------------------------------------|
    /// | `KUBE_API_URL`                   | no       | `https://kubernetes.default.svc`                       |
    /// | `KUBE_TOKEN`                     | no       | --                                                     |
    /// | `KUBE_TOKEN_FILE`                | no       | `/var/run/secrets/kubernetes.io/serviceaccount/token`  |
    /// | `KUBE_NAMESPACE`                 | no       | `default`                                              |
    /// | `KUBE_INSECURE_SKIP_TLS_VERIFY`  | no       | `false`                                                |
    /// | `KUBE_REQUEST_TIMEOUT_SECS`      | no       | `30`                                                   |
    ///
    /// `KUBE_TOKEN` wins over `KUBE_TOKEN_FILE`. A missing default token file
    /// means no authentication; an explicitly named one that cannot be read
    /// is an error.
    pub fn from_env() -> Result<Self, ControlPlaneError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`KubeConfig::from_env`] with a custom variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ControlPlaneError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = var("KUBE_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let token = match (var("KUBE_TOKEN"), var("KUBE_TOKEN_FILE")) {
            (Some(token), _) => Some(token),
            (None, Some(path)) => Some(
                std::fs::read_to_string(&path)
                    .map_err(|e| {
                        ControlPlaneError::Config(format!("cannot read KUBE_TOKEN_FILE {path}: {e}"))
                    })?
                    .trim()
                    .to_string(),
            ),
            (None, None) => std::fs::read_to_string(DEFAULT_TOKEN_FILE)
                .ok()
                .map(|t| t.trim().to_string()),
        };

        let namespace = var("KUBE_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let insecure_skip_tls_verify = match var("KUBE_INSECURE_SKIP_TLS_VERIFY") {
            Some(v) => v.parse::<bool>().map_err(|_| {
                ControlPlaneError::Config(format!(
                    "KUBE_INSECURE_SKIP_TLS_VERIFY must be true or false, got {v}"
                ))
            })?,
            None => false,
        };

        let request_timeout_secs = match var("KUBE_REQUEST_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().map_err(|_| {
                ControlPlaneError::Config(format!(
                    "KUBE_REQUEST_TIMEOUT_SECS must be a whole number of seconds, got {v}"
                ))
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url,
            token,
            namespace,
            insecure_skip_tls_verify,
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }
}
