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

//! API server connection parameters and exec request construction.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Url;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderValue, AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::Connector;

use crate::exec::protocol::EXEC_SUBPROTOCOL;

/// Client certificate and key, both PEM encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub certificate_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("certificate_pem", &format_args!("{} bytes", self.certificate_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Everything needed to talk to one API server as one user.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Base URL of the API server, e.g. `https://10.0.0.1:6443`.
    pub server: String,
    pub bearer_token: Option<String>,
    /// PEM bundle of additional trusted roots.
    pub certificate_authority: Option<Vec<u8>>,
    pub client_identity: Option<ClientIdentity>,
    pub insecure_skip_tls_verify: bool,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("server", &self.server)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("certificate_authority", &self.certificate_authority.is_some())
            .field("client_identity", &self.client_identity)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .finish()
    }
}

/// The process to start and the streams to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub command: Vec<String>,
    pub stdin: bool,
    pub tty: bool,
}

impl ConnectionParams {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Default::default()
        }
    }

    fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.server)
            .with_context(|| format!("Invalid API server URL '{}'", self.server))?;
        if url.cannot_be_a_base() {
            bail!("API server URL '{}' cannot carry a path", self.server);
        }
        Ok(url)
    }

    /// URL of an API path under the server, keeping any path prefix the
    /// server URL already has.
    pub fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url()?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API server URL '{}' cannot carry a path", self.server))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// WebSocket URL of the exec subresource for `target`.
    pub fn exec_url(&self, target: &ExecTarget) -> Result<Url> {
        let mut url = self.api_url(&[
            "api",
            "v1",
            "namespaces",
            target.namespace.as_str(),
            "pods",
            target.pod.as_str(),
            "exec",
        ])?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => bail!("Unsupported API server scheme '{other}'"),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Cannot use scheme '{scheme}' for '{}'", self.server))?;

        {
            let mut query = url.query_pairs_mut();
            for arg in &target.command {
                query.append_pair("command", arg);
            }
            if let Some(container) = &target.container {
                query.append_pair("container", container);
            }
            query.append_pair("stdin", bool_param(target.stdin));
            query.append_pair("stdout", "true");
            // With a TTY the remote merges stderr into stdout.
            query.append_pair("stderr", bool_param(!target.tty));
            query.append_pair("tty", bool_param(target.tty));
        }

        Ok(url)
    }

    /// WebSocket handshake request and TLS connector for an exec stream.
    pub fn exec_request(&self, target: &ExecTarget) -> Result<(Request, Option<Connector>)> {
        let url = self.exec_url(target)?;
        let secure = url.scheme() == "wss";

        let mut request = url
            .as_str()
            .into_client_request()
            .context("Failed to build exec handshake request")?;
        let headers = request.headers_mut();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(EXEC_SUBPROTOCOL),
        );
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("Bearer token contains characters not allowed in a header")?;
            headers.insert(AUTHORIZATION, value);
        }

        let connector = if secure {
            Some(Connector::NativeTls(self.tls_connector()?))
        } else {
            None
        };
        Ok((request, connector))
    }

    /// TLS settings for the exec WebSocket.
    pub fn tls_connector(&self) -> Result<native_tls::TlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();

        if let Some(ca) = &self.certificate_authority {
            let cert = native_tls::Certificate::from_pem(ca)
                .context("Failed to parse cluster certificate authority")?;
            builder.add_root_certificate(cert);
        }
        if let Some(identity) = &self.client_identity {
            let identity =
                native_tls::Identity::from_pkcs8(&identity.certificate_pem, &identity.key_pem)
                    .context("Failed to load client certificate (the key must be PKCS#8 PEM)")?;
            builder.identity(identity);
        }
        if self.insecure_skip_tls_verify {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        builder.build().context("Failed to build TLS connector")
    }

    /// HTTP client for regular API calls, with the same credentials.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30));

        if let Some(ca) = &self.certificate_authority {
            let cert = reqwest::Certificate::from_pem(ca)
                .context("Failed to parse cluster certificate authority")?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &self.client_identity {
            let identity =
                reqwest::Identity::from_pkcs8_pem(&identity.certificate_pem, &identity.key_pem)
                    .context("Failed to load client certificate (the key must be PKCS#8 PEM)")?;
            builder = builder.identity(identity);
        }
        if self.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(token) = &self.bearer_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .context("Bearer token contains characters not allowed in a header")?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        builder.build().context("Failed to build HTTP client")
    }
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(tty: bool) -> ExecTarget {
        ExecTarget {
            namespace: "aks-agent".to_string(),
            pod: "aks-agent-7d9f".to_string(),
            container: Some("agent".to_string()),
            command: vec!["sh".to_string(), "-c".to_string(), "echo hi there".to_string()],
            stdin: true,
            tty,
        }
    }

    #[test]
    fn test_exec_url_layout() {
        let params = ConnectionParams::new("https://10.0.0.1:6443");
        let url = params.exec_url(&target(true)).unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/api/v1/namespaces/aks-agent/pods/aks-agent-7d9f/exec");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let commands: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == "command")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(commands, vec!["sh", "-c", "echo hi there"]);
        assert!(pairs.contains(&("container".into(), "agent".into())));
        assert!(pairs.contains(&("stdin".into(), "true".into())));
        assert!(pairs.contains(&("stdout".into(), "true".into())));
        assert!(pairs.contains(&("stderr".into(), "false".into())));
        assert!(pairs.contains(&("tty".into(), "true".into())));
    }

    #[test]
    fn test_exec_url_keeps_path_prefix_and_plain_scheme() {
        let params = ConnectionParams::new("http://proxy.local:8001/k8s/clusters/c-1/");
        let url = params.exec_url(&target(false)).unwrap();

        assert_eq!(url.scheme(), "ws");
        assert_eq!(
            url.path(),
            "/k8s/clusters/c-1/api/v1/namespaces/aks-agent/pods/aks-agent-7d9f/exec"
        );
        assert!(url.query_pairs().any(|(k, v)| k == "stderr" && v == "true"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let params = ConnectionParams::new("ftp://10.0.0.1");
        assert!(params.exec_url(&target(true)).is_err());
    }

    #[test]
    fn test_exec_request_headers() {
        let mut params = ConnectionParams::new("http://127.0.0.1:8080");
        params.bearer_token = Some("s3cr3t".to_string());

        let (request, connector) = params.exec_request(&target(true)).unwrap();
        assert!(connector.is_none());
        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "v4.channel.k8s.io"
        );
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer s3cr3t"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let mut params = ConnectionParams::new("https://10.0.0.1");
        params.bearer_token = Some("very-secret-token".to_string());

        let rendered = format!("{params:?}");
        assert!(!rendered.contains("very-secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
