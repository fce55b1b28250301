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

//! Running-pod discovery by label selector.

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::connection::ConnectionParams;

#[derive(Debug, Clone, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    pub metadata: PodMetadata,
    #[serde(default)]
    pub status: Option<PodStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
}

impl Pod {
    pub fn phase(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown")
    }
}

/// Pods grouped by lifecycle phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodInventory {
    pub running: Vec<String>,
    pub pending: Vec<String>,
    pub failed: Vec<String>,
    /// Pods in any other phase, rendered as `name (phase)`.
    pub other: Vec<String>,
    pub total: usize,
}

impl PodInventory {
    /// Group `pods`, counting a pod matched by several selectors once.
    pub fn categorize<I>(pods: I) -> Self
    where
        I: IntoIterator<Item = Pod>,
    {
        let mut seen = std::collections::HashSet::new();
        let mut inventory = Self::default();

        for pod in pods {
            if !seen.insert(pod.metadata.name.clone()) {
                continue;
            }
            inventory.total += 1;
            let phase = pod.phase().to_string();
            let name = pod.metadata.name;
            match phase.as_str() {
                "Running" => inventory.running.push(name),
                "Pending" => inventory.pending.push(name),
                "Failed" => inventory.failed.push(name),
                _ => inventory.other.push(format!("{name} ({phase})")),
            }
        }
        inventory
    }

    fn non_running_summary(&self) -> Option<String> {
        let mut details = Vec::new();
        if !self.pending.is_empty() {
            details.push(format!(
                "{} pending pod(s): {}",
                self.pending.len(),
                self.pending.join(", ")
            ));
        }
        if !self.failed.is_empty() {
            details.push(format!(
                "{} failed pod(s): {}",
                self.failed.len(),
                self.failed.join(", ")
            ));
        }
        if !self.other.is_empty() {
            details.push(format!(
                "{} pod(s) in other states: {}",
                self.other.len(),
                self.other.join(", ")
            ));
        }
        if details.is_empty() {
            None
        } else {
            Some(details.join("; "))
        }
    }

    /// The running pods, or an error explaining why there are none.
    pub fn into_running(self, namespace: &str, selectors: &[String]) -> Result<Vec<String>> {
        let selector_list = selectors
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(" or ");

        debug!(
            "Found {} total pods: {} running, {} pending, {} failed, {} other",
            self.total,
            self.running.len(),
            self.pending.len(),
            self.failed.len(),
            self.other.len()
        );

        if self.total == 0 {
            bail!(
                "No pods found with label selector {selector_list} in namespace '{namespace}'. \
                 This could mean:\n  \
                 1. The workload is not deployed in this cluster\n  \
                 2. The namespace '{namespace}' does not exist\n  \
                 3. The pods have different labels than expected\n  \
                 4. You do not have permission to list pods in this namespace"
            );
        }

        if self.running.is_empty() {
            let summary = self
                .non_running_summary()
                .unwrap_or_else(|| "all pods are in unknown state".to_string());
            bail!(
                "No running pods found with label selector {selector_list} in namespace \
                 '{namespace}'. Found {} pod(s) but none are in Running state: {summary}. \
                 The pods may be starting up, failing to start, or experiencing issues.",
                self.total
            );
        }

        if let Some(summary) = self.non_running_summary() {
            warn!(
                "Found {} running pod(s), but some pods are not running: {summary}. \
                 These pods may need attention.",
                self.running.len()
            );
        }
        debug!("Available running pods: {}", self.running.join(", "));
        Ok(self.running)
    }
}

/// Finds pods through the Kubernetes REST API.
pub struct PodLocator {
    client: reqwest::Client,
    params: ConnectionParams,
}

impl PodLocator {
    pub fn new(params: &ConnectionParams) -> Result<Self> {
        Ok(Self {
            client: params.http_client()?,
            params: params.clone(),
        })
    }

    /// List pods in `namespace` matching one label selector.
    pub async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let mut url = self
            .params
            .api_url(&["api", "v1", "namespaces", namespace, "pods"])?;
        url.query_pairs_mut().append_pair("labelSelector", selector);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to list pods in namespace '{namespace}'"))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::FORBIDDEN => bail!(
                "Access denied when trying to list pods in namespace '{namespace}'. \
                 You may not have sufficient RBAC permissions."
            ),
            StatusCode::NOT_FOUND => bail!(
                "Namespace '{namespace}' not found. It may not exist in this cluster."
            ),
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("Kubernetes API error when listing pods ({status}): {}", body.trim());
            }
        }

        let list: PodList = response
            .json()
            .await
            .context("Failed to decode pod list from the API server")?;
        Ok(list.items)
    }

    /// Names of running pods matching any of `selectors`.
    pub async fn running_pods(&self, namespace: &str, selectors: &[String]) -> Result<Vec<String>> {
        if selectors.is_empty() {
            bail!("At least one label selector is required to find pods");
        }

        let mut pods = Vec::new();
        for selector in selectors {
            pods.extend(self.list_pods(namespace, selector).await?);
        }

        PodInventory::categorize(pods).into_running(namespace, selectors)
    }
}
