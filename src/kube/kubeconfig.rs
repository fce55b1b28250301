// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! kubeconfig loading and credential resolution.
//!
//! Supports the subset of the kubeconfig format needed to reach one cluster:
//! contexts, cluster server and trust settings, and user credentials from
//! static tokens, token files, client certificates, or `exec` credential
//! plugins.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::Deserialize;
use tokio::fs;
use tokio::process::Command;

use super::connection::{ClientIdentity, ConnectionParams};
use crate::config::{expand_tilde, first_path_entry};

/// A parsed kubeconfig file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub current_context: Option<String>,

    /// Directory relative file references are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterInfo {
    pub server: String,
    #[serde(default)]
    pub certificate_authority: Option<String>,
    #[serde(default)]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: AuthInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthInfo {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    pub token_file: Option<String>,
    #[serde(default)]
    pub client_certificate: Option<String>,
    #[serde(default)]
    pub client_certificate_data: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub client_key_data: Option<String>,
    #[serde(default)]
    pub exec: Option<ExecCredentialPlugin>,
}

/// An `exec` credential plugin, as used by `kubelogin` and cloud CLIs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialPlugin {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<ExecEnvVar>,
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecEnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextInfo {
    pub cluster: String,
    pub user: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecCredential {
    #[serde(default)]
    status: Option<ExecCredentialStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
}

/// A context with its cluster and user looked up.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedContext<'a> {
    pub name: &'a str,
    pub cluster: &'a ClusterInfo,
    pub user: &'a AuthInfo,
    pub namespace: Option<&'a str>,
}

impl Kubeconfig {
    /// Path kubectl would use: the first entry of `$KUBECONFIG`, otherwise
    /// `~/.kube/config`.
    pub fn default_path() -> PathBuf {
        if let Some(first) = env::var("KUBECONFIG")
            .ok()
            .and_then(|paths| first_path_entry(&paths))
        {
            return first;
        }
        expand_tilde(Path::new("~/.kube/config"))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let path = expand_tilde(path);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read kubeconfig at {}", path.display()))?;

        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse kubeconfig at {}", path.display()))?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid kubeconfig YAML")
    }

    /// Look up `context`, or the current context when `None`.
    pub fn resolve_context(&self, context: Option<&str>) -> Result<ResolvedContext<'_>> {
        let name = match context.or(self.current_context.as_deref()) {
            Some(name) if !name.is_empty() => name,
            _ => bail!("No context given and the kubeconfig has no current-context"),
        };

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == name)
            .with_context(|| format!("Context '{name}' not found in kubeconfig"))?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .with_context(|| {
                format!(
                    "Cluster '{}' referenced by context '{name}' not found",
                    context.context.cluster
                )
            })?;

        let user = self
            .users
            .iter()
            .find(|u| u.name == context.context.user)
            .with_context(|| {
                format!(
                    "User '{}' referenced by context '{name}' not found",
                    context.context.user
                )
            })?;

        Ok(ResolvedContext {
            name: &context.name,
            cluster: &cluster.cluster,
            user: &user.user,
            namespace: context.context.namespace.as_deref(),
        })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = expand_tilde(Path::new(path));
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }

    /// Read inline base64 data or the referenced file.
    async fn material(&self, data: Option<&str>, file: Option<&str>, what: &str) -> Result<Option<Vec<u8>>> {
        if let Some(data) = data {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .with_context(|| format!("Invalid base64 in {what} data"))?;
            return Ok(Some(decoded));
        }
        if let Some(file) = file {
            let path = self.resolve_path(file);
            let bytes = fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {what} from {}", path.display()))?;
            return Ok(Some(bytes));
        }
        Ok(None)
    }

    /// Build connection parameters for `context`, running credential plugins
    /// if the user needs one.
    pub async fn connection_params(&self, context: Option<&str>) -> Result<ConnectionParams> {
        let resolved = self.resolve_context(context)?;
        let cluster = resolved.cluster;
        let user = resolved.user;

        if cluster.server.is_empty() {
            bail!("Cluster for context '{}' has no server URL", resolved.name);
        }

        let mut params = ConnectionParams::new(cluster.server.clone());
        params.insecure_skip_tls_verify = cluster.insecure_skip_tls_verify;
        params.certificate_authority = self
            .material(
                cluster.certificate_authority_data.as_deref(),
                cluster.certificate_authority.as_deref(),
                "certificate authority",
            )
            .await?;

        let certificate = self
            .material(
                user.client_certificate_data.as_deref(),
                user.client_certificate.as_deref(),
                "client certificate",
            )
            .await?;
        let key = self
            .material(
                user.client_key_data.as_deref(),
                user.client_key.as_deref(),
                "client key",
            )
            .await?;
        if let (Some(certificate_pem), Some(key_pem)) = (certificate, key) {
            params.client_identity = Some(ClientIdentity {
                certificate_pem,
                key_pem,
            });
        }

        if let Some(token) = &user.token {
            params.bearer_token = Some(token.trim().to_string());
        } else if let Some(file) = &user.token_file {
            let path = self.resolve_path(file);
            let token = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read token file {}", path.display()))?;
            params.bearer_token = Some(token.trim().to_string());
        } else if let Some(plugin) = &user.exec {
            let status = run_credential_plugin(plugin).await?;
            if let Some(token) = status.token {
                params.bearer_token = Some(token);
            }
            if let (Some(cert), Some(key)) = (status.client_certificate_data, status.client_key_data) {
                params.client_identity = Some(ClientIdentity {
                    certificate_pem: cert.into_bytes(),
                    key_pem: key.into_bytes(),
                });
            }
        }

        tracing::debug!(
            "Resolved context '{}' to {}",
            resolved.name,
            params.server
        );
        Ok(params)
    }
}

async fn run_credential_plugin(plugin: &ExecCredentialPlugin) -> Result<ExecCredentialStatus> {
    let api_version = plugin
        .api_version
        .as_deref()
        .unwrap_or("client.authentication.k8s.io/v1beta1");
    let exec_info = serde_json::json!({
        "apiVersion": api_version,
        "kind": "ExecCredential",
        "spec": { "interactive": false },
    });

    tracing::debug!("Running credential plugin '{}'", plugin.command);
    let output = Command::new(&plugin.command)
        .args(&plugin.args)
        .envs(plugin.env.iter().map(|var| (&var.name, &var.value)))
        .env("KUBERNETES_EXEC_INFO", exec_info.to_string())
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .await
        .with_context(|| format!("Failed to run credential plugin '{}'", plugin.command))?;

    if !output.status.success() {
        bail!(
            "Credential plugin '{}' exited with {}",
            plugin.command,
            output.status
        );
    }

    let credential: ExecCredential = serde_json::from_slice(&output.stdout).with_context(|| {
        format!(
            "Credential plugin '{}' did not print an ExecCredential",
            plugin.command
        )
    })?;
    credential.status.with_context(|| {
        format!(
            "Credential plugin '{}' returned no status",
            plugin.command
        )
    })
}
