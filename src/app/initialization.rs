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

//! Application initialization: configuration, cluster access and pod selection

use anyhow::{Context, Result};
use kexec::{
    cli::Cli,
    config::{expand_tilde, Config},
    exec::ExecOptions,
    kube::{Kubeconfig, PodLocator},
};
use std::path::{Path, PathBuf};

/// Namespace used when neither flags, config nor the kubeconfig context name one.
pub const FALLBACK_NAMESPACE: &str = "default";

/// Everything needed to start a session
pub struct AppContext {
    pub pod: String,
    pub namespace: String,
    pub command: Vec<String>,
    pub options: ExecOptions,
}

/// kubeconfig location: flag, then config file, then `$KUBECONFIG`/`~/.kube/config`.
pub fn kubeconfig_path(cli_value: Option<&str>, config_value: Option<&str>) -> PathBuf {
    match cli_value.or(config_value).filter(|p| !p.is_empty()) {
        Some(path) => expand_tilde(Path::new(path)),
        None => Kubeconfig::default_path(),
    }
}

/// First non-empty namespace of flag, config file and kubeconfig context.
pub fn resolve_namespace(
    cli_value: Option<&str>,
    config_value: Option<&str>,
    context_value: Option<&str>,
) -> String {
    [cli_value, config_value, context_value]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|ns| !ns.is_empty())
        .unwrap_or(FALLBACK_NAMESPACE)
        .to_string()
}

/// Selectors from the command line replace, rather than extend, configured ones.
pub fn resolve_selectors(cli_values: &[String], config_values: &[String]) -> Vec<String> {
    let source = if cli_values.is_empty() {
        config_values
    } else {
        cli_values
    };
    source
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Load configuration and credentials, and pick the pod to exec into.
pub async fn initialize_app(cli: &Cli) -> Result<AppContext> {
    let config = Config::load_with_priority(cli.config.as_deref()).await?;
    let defaults = &config.defaults;

    let kubeconfig_path =
        kubeconfig_path(cli.kubeconfig.as_deref(), defaults.kubeconfig.as_deref());
    tracing::debug!("Using kubeconfig at {:?}", kubeconfig_path);
    let kubeconfig = Kubeconfig::load(&kubeconfig_path).await?;

    let context = cli.context.as_deref().or(defaults.context.as_deref());
    let resolved = kubeconfig.resolve_context(context)?;
    let namespace = resolve_namespace(
        cli.namespace.as_deref(),
        defaults.namespace.as_deref(),
        resolved.namespace,
    );
    tracing::debug!("Context '{}', namespace '{}'", resolved.name, namespace);

    let connection = kubeconfig.connection_params(context).await?;

    let pod = match cli.pod.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(pod) => pod.to_string(),
        None => {
            let selectors = resolve_selectors(&cli.selectors, &defaults.selectors);
            if selectors.is_empty() {
                anyhow::bail!(
                    "No pod name given and no label selector configured. \
                     Pass a POD argument or use -l/--selector."
                );
            }
            let locator = PodLocator::new(&connection)?;
            let running = locator.running_pods(&namespace, &selectors).await?;
            let first = running
                .into_iter()
                .next()
                .context("No running pod available")?;
            tracing::info!("Selected pod '{}' in namespace '{}'", first, namespace);
            first
        }
    };

    let mut options = ExecOptions::new(connection);
    options.interactive = cli.stdin;
    options.tty = cli.tty;
    options.container = cli.container.clone().or_else(|| defaults.container.clone());
    options.settings = config.relay.to_settings();

    Ok(AppContext {
        pod,
        namespace,
        command: cli.command.clone(),
        options,
    })
}
