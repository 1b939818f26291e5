//! HTTPS host client.
//!
//! Talks to the host REST API with reqwest, authenticating with the client
//! certificate from the configuration and trusting either a pinned server
//! certificate or the system roots.

use crate::config::{ClientConfig, RemoteEndpoint};
use crate::env;
use crate::host::types::resource_name;
use crate::host::{
    BackupApi, BackupRequest, ContainerMetadata, HostApi, HostError, LocalCopyRequest,
    MigrationHandshake, MigrationRequest, Operation, Result,
};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

/// Seconds a single long-poll on an operation may block server-side.
const WAIT_POLL_SECS: u64 = 30;

/// Standard response envelope of the host API.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: u16,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    environment: ServerEnvironment,
}

#[derive(Debug, Default, Deserialize)]
struct ServerEnvironment {
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    certificate: String,
}

struct RemoteConnection {
    base: Url,
    http: reqwest::Client,
    pinned_certificate: Option<String>,
}

/// [`HostApi`] implementation over HTTPS.
pub struct RestHost {
    connections: BTreeMap<String, RemoteConnection>,
    request_timeout: Duration,
}

impl RestHost {
    /// Build one HTTP client per configured remote.
    ///
    /// # Errors
    ///
    /// Returns error if a certificate cannot be read or a remote address is
    /// not a valid URL.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let identity = Self::load_identity(&config)?;
        let mut connections = BTreeMap::new();

        for (name, endpoint) in &config.remotes {
            debug!("Preparing connection to remote {} ({})", name, endpoint.addr);
            connections.insert(
                name.clone(),
                Self::connect(&config, endpoint, identity.clone())?,
            );
        }

        Ok(Self {
            connections,
            request_timeout: config.request_timeout(),
        })
    }

    fn load_identity(config: &ClientConfig) -> Result<Option<reqwest::Identity>> {
        match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => {
                let mut pem = fs::read(cert)?;
                pem.push(b'\n');
                pem.extend(fs::read(key)?);
                Ok(Some(reqwest::Identity::from_pem(&pem)?))
            }
            (None, None) => Ok(None),
            _ => Err(HostError::Protocol(
                "client_cert and client_key must be configured together".to_string(),
            )),
        }
    }

    fn connect(
        config: &ClientConfig,
        endpoint: &RemoteEndpoint,
        identity: Option<reqwest::Identity>,
    ) -> Result<RemoteConnection> {
        let base = Url::parse(&endpoint.addr).map_err(|e| {
            HostError::Protocol(format!("Invalid remote address {}: {}", endpoint.addr, e))
        })?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.request_timeout());

        if let Some(identity) = identity {
            builder = builder.identity(identity);
        }

        let pinned_certificate = match &endpoint.server_cert {
            Some(path) => {
                let pem = fs::read_to_string(path)?;
                builder = builder.add_root_certificate(reqwest::Certificate::from_pem(
                    pem.as_bytes(),
                )?);
                Some(pem)
            }
            None => None,
        };

        if endpoint.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(RemoteConnection {
            base,
            http: builder.build()?,
            pinned_certificate,
        })
    }

    fn connection(&self, remote: &str) -> Result<&RemoteConnection> {
        self.connections
            .get(remote)
            .ok_or_else(|| crate::config::ConfigError::UnknownRemote(remote.to_string()).into())
    }

    /// Resolve a path handed out by the host (operation paths) against the remote.
    fn url(&self, remote: &str, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .connection(remote)?
            .base
            .join(path)
            .map_err(|e| HostError::Protocol(format!("Invalid API path {}: {}", path, e)))?;

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// URL of an API resource. Each segment is percent-encoded on its own, so
    /// names containing `/`, `?` or `#` stay inside their segment.
    fn resource_url(&self, remote: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.connection(remote)?.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| HostError::Protocol(format!("Remote {} has no usable base URL", remote)))?
            .clear()
            .push(env::api::API_VERSION)
            .extend(segments);
        Ok(url)
    }

    async fn request(
        &self,
        remote: &str,
        method: Method,
        url: Url,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<ResponseEnvelope> {
        debug!("{} {} ({})", method, url, remote);
        let path = url.path().to_string();

        let mut request = self
            .connection(remote)?
            .http
            .request(method, url)
            .timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(HostError::NotFound(path));
        }

        let envelope: ResponseEnvelope = response.json().await.map_err(|e| {
            HostError::Protocol(format!("Malformed response from {}: {}", path, e))
        })?;

        if envelope.kind == "error" || !status.is_success() {
            if envelope.error_code == 404 {
                return Err(HostError::NotFound(path));
            }
            return Err(HostError::Api {
                status: if envelope.error_code != 0 {
                    envelope.error_code
                } else {
                    status.as_u16()
                },
                message: envelope.error,
            });
        }

        Ok(envelope)
    }

    async fn get<T: DeserializeOwned>(&self, remote: &str, segments: &[&str]) -> Result<T> {
        let url = self.resource_url(remote, segments)?;
        let path = url.path().to_string();
        let envelope = self
            .request(remote, Method::GET, url, None, self.request_timeout)
            .await?;
        serde_json::from_value(envelope.metadata)
            .map_err(|e| HostError::Protocol(format!("Unexpected payload from {}: {}", path, e)))
    }

    /// Issue a request that must be answered with a background operation.
    async fn start_operation(
        &self,
        remote: &str,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<Operation> {
        let url = self.resource_url(remote, segments)?;
        let path = url.path().to_string();
        let envelope = self
            .request(remote, method, url, body, self.request_timeout)
            .await?;
        if envelope.kind != "async" {
            return Err(HostError::Protocol(format!(
                "Expected a background operation from {}, got a {} response",
                path, envelope.kind
            )));
        }

        let operation: Operation = serde_json::from_value(envelope.metadata).map_err(|e| {
            HostError::Protocol(format!("Malformed operation from {}: {}", path, e))
        })?;
        debug!("Host {} started operation {}", remote, operation.id);
        Ok(operation)
    }

    async fn server_info(&self, remote: &str) -> Result<ServerInfo> {
        self.get(remote, &[]).await
    }

    async fn poll_until_terminal(&self, remote: &str, operation: &Operation) -> Result<Operation> {
        let path = format!("{}/wait", operation.path());
        loop {
            let url = self.url(remote, &path, &[("timeout", WAIT_POLL_SECS.to_string())])?;
            let envelope = self
                .request(
                    remote,
                    Method::GET,
                    url,
                    None,
                    self.request_timeout + Duration::from_secs(WAIT_POLL_SECS),
                )
                .await?;
            let current: Operation = serde_json::from_value(envelope.metadata).map_err(|e| {
                HostError::Protocol(format!("Malformed operation from {}: {}", path, e))
            })?;

            if current.status().is_terminal() {
                return Ok(current);
            }
            debug!("Operation {} still {}", current.id, current.status());
        }
    }
}

/// Split `container/snapshot` into its two parts.
fn split_snapshot(name: &str) -> Result<(&str, &str)> {
    name.split_once(env::api::SNAPSHOT_DELIMITER)
        .ok_or_else(|| HostError::Protocol(format!("{} is not a snapshot name", name)))
}

/// Resource segments of a container, or of a snapshot for `container/snapshot`.
fn instance_segments(name: &str) -> Vec<&str> {
    match name.split_once(env::api::SNAPSHOT_DELIMITER) {
        Some((container, snapshot)) => vec!["containers", container, "snapshots", snapshot],
        None => vec!["containers", name],
    }
}

fn local_copy_body(request: &LocalCopyRequest) -> Value {
    json!({
        "name": request.name.clone().unwrap_or_default(),
        "config": request.config,
        "profiles": request.profiles,
        "ephemeral": request.ephemeral,
        "source": {
            "type": "copy",
            "source": request.source,
        },
    })
}

fn migration_body(request: &MigrationRequest) -> Value {
    json!({
        "name": request.name.clone().unwrap_or_default(),
        "architecture": request.architecture,
        "config": request.config,
        "devices": request.devices,
        "profiles": request.profiles,
        "ephemeral": request.ephemeral,
        "source": {
            "type": "migration",
            "mode": request.mode.as_str(),
            "operation": request.source_url,
            "certificate": request.certificate,
            "secrets": request.secrets,
            "base-image": request.base_image.clone().unwrap_or_default(),
        },
    })
}

#[async_trait]
impl HostApi for RestHost {
    async fn fetch_container_metadata(
        &self,
        remote: &str,
        name: &str,
    ) -> Result<ContainerMetadata> {
        self.get(remote, &["containers", name]).await
    }

    async fn fetch_snapshot_metadata(&self, remote: &str, name: &str) -> Result<ContainerMetadata> {
        let (container, snapshot) = split_snapshot(name)?;
        self.get(remote, &["containers", container, "snapshots", snapshot])
            .await
    }

    async fn list_profiles(&self, remote: &str) -> Result<Vec<String>> {
        let paths: Vec<String> = self.get(remote, &["profiles"]).await?;
        Ok(paths
            .iter()
            .map(|path| resource_name(path).to_string())
            .collect())
    }

    async fn request_local_copy(
        &self,
        remote: &str,
        request: &LocalCopyRequest,
    ) -> Result<Operation> {
        info!("Requesting copy of {} on {}", request.source, remote);
        self.start_operation(
            remote,
            Method::POST,
            &["containers"],
            Some(&local_copy_body(request)),
        )
        .await
    }

    async fn request_migration_handshake(
        &self,
        remote: &str,
        name: &str,
        push: bool,
    ) -> Result<MigrationHandshake> {
        let body = json!({ "migration": true, "live": false, "push": push });
        let operation = self
            .start_operation(
                remote,
                Method::POST,
                &instance_segments(name),
                Some(&body),
            )
            .await?;

        Ok(MigrationHandshake {
            secrets: operation.secrets()?,
            operation_path: operation.path(),
        })
    }

    async fn list_host_addresses(&self, remote: &str) -> Result<Vec<String>> {
        Ok(self.server_info(remote).await?.environment.addresses)
    }

    async fn host_certificate(&self, remote: &str) -> Result<String> {
        if let Some(pem) = &self.connection(remote)?.pinned_certificate {
            return Ok(pem.clone());
        }

        let certificate = self.server_info(remote).await?.environment.certificate;
        if certificate.is_empty() {
            return Err(HostError::Protocol(format!(
                "Host {} did not report its certificate",
                remote
            )));
        }
        Ok(certificate)
    }

    async fn request_migration_from(
        &self,
        remote: &str,
        request: &MigrationRequest,
    ) -> Result<Operation> {
        info!(
            "Requesting migration on {} from {}",
            remote, request.source_url
        );
        self.start_operation(
            remote,
            Method::POST,
            &["containers"],
            Some(&migration_body(request)),
        )
        .await
    }

    async fn wait_operation(
        &self,
        remote: &str,
        operation: &Operation,
        timeout: Option<Duration>,
    ) -> Result<Operation> {
        debug!("Waiting for operation {} on {}", operation.id, remote);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.poll_until_terminal(remote, operation))
                .await
                .map_err(|_| HostError::Timeout(limit))?,
            None => self.poll_until_terminal(remote, operation).await,
        }
    }
}

#[async_trait]
impl BackupApi for RestHost {
    async fn create_backup(
        &self,
        remote: &str,
        container: &str,
        request: &BackupRequest,
    ) -> Result<Operation> {
        let body = serde_json::to_value(request)
            .map_err(|e| HostError::Protocol(format!("Unserializable backup request: {}", e)))?;
        self.start_operation(
            remote,
            Method::POST,
            &["containers", container, "backups"],
            Some(&body),
        )
        .await
    }

    async fn download_backup(
        &self,
        remote: &str,
        container: &str,
        backup: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<u64> {
        let url = self.resource_url(remote, &["containers", container, "backups", backup, "export"])?;
        let path = url.path().to_string();
        debug!("GET {} ({})", url, remote);

        let response = self.connection(remote)?.http.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(HostError::NotFound(path)),
            status if !status.is_success() => {
                return Err(HostError::Api {
                    status: status.as_u16(),
                    message: format!("Backup download of {} failed", backup),
                });
            }
            _ => {}
        }

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress(written);
        }
        sink.flush().await?;

        Ok(written)
    }

    async fn delete_backup(
        &self,
        remote: &str,
        container: &str,
        backup: &str,
    ) -> Result<Operation> {
        self.start_operation(
            remote,
            Method::DELETE,
            &["containers", container, "backups", backup],
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::TransferMode;

    fn rest_host() -> RestHost {
        let config = ClientConfig::with_remotes(
            "hosta",
            [("hosta", RemoteEndpoint::new("https://10.0.0.1:8443"))],
        );
        RestHost::new(config).unwrap()
    }

    #[test]
    fn test_url_construction() {
        let host = rest_host();

        let url = host
            .url("hosta", "/1.0/containers/web1", &[])
            .unwrap();
        assert_eq!(url.as_str(), "https://10.0.0.1:8443/1.0/containers/web1");

        let url = host
            .url("hosta", "/1.0/operations/abc/wait", &[("timeout", "30".to_string())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://10.0.0.1:8443/1.0/operations/abc/wait?timeout=30"
        );

        assert!(matches!(
            host.url("hostz", "/1.0", &[]),
            Err(HostError::Config(_))
        ));
    }

    #[test]
    fn test_resource_url_encodes_segments() {
        let host = rest_host();

        let url = host
            .resource_url("hosta", &instance_segments("web1/snap0"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://10.0.0.1:8443/1.0/containers/web1/snapshots/snap0"
        );

        let url = host.resource_url("hosta", &instance_segments("web1")).unwrap();
        assert_eq!(url.path(), "/1.0/containers/web1");

        let url = host
            .resource_url("hosta", &["containers", "we?b#1", "backups", "a/b"])
            .unwrap();
        assert_eq!(url.path(), "/1.0/containers/we%3Fb%231/backups/a%2Fb");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        assert_eq!(host.resource_url("hosta", &[]).unwrap().path(), "/1.0");
    }

    /// Local HTTP server that answers every request with 404 and reports its
    /// request line.
    async fn not_found_server() -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut received = Vec::new();
                let mut buf = [0u8; 1024];
                while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => received.extend_from_slice(&buf[..n]),
                    }
                }
                let text = String::from_utf8_lossy(&received);
                let _ = tx.send(text.lines().next().unwrap_or_default().to_string());
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        (addr, rx)
    }

    fn local_host(addr: &str) -> RestHost {
        RestHost::new(ClientConfig::with_remotes(
            "hosta",
            [("hosta", RemoteEndpoint::new(addr))],
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_handshake_targets_snapshot_endpoint() {
        let (addr, mut requests) = not_found_server().await;
        let host = local_host(&addr);

        let result = host
            .request_migration_handshake("hosta", "web1/snap0", false)
            .await;

        assert!(matches!(result, Err(HostError::NotFound(_))));
        assert_eq!(
            requests.recv().await.unwrap(),
            "POST /1.0/containers/web1/snapshots/snap0 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_container_names_are_percent_encoded() {
        let (addr, mut requests) = not_found_server().await;
        let host = local_host(&addr);

        let result = host.fetch_container_metadata("hosta", "we?b#1").await;

        assert!(matches!(result, Err(HostError::NotFound(_))));
        assert_eq!(
            requests.recv().await.unwrap(),
            "GET /1.0/containers/we%3Fb%231 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_wait_operation_honours_deadline() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        // Accept and never answer
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let host = local_host(&addr);
        let operation = Operation::new("abc", crate::host::OperationStatus::Running);
        let limit = Duration::from_millis(200);

        let result = host.wait_operation("hosta", &operation, Some(limit)).await;

        assert!(matches!(result, Err(HostError::Timeout(d)) if d == limit));
    }

    #[test]
    fn test_mismatched_client_identity_rejected() {
        let mut config = ClientConfig::default();
        config.client_cert = Some("/nonexistent/client.crt".into());
        assert!(matches!(
            RestHost::new(config),
            Err(HostError::Protocol(_))
        ));
    }

    #[test]
    fn test_split_snapshot() {
        assert_eq!(split_snapshot("web1/snap0").unwrap(), ("web1", "snap0"));
        assert!(split_snapshot("web1").is_err());
    }

    #[test]
    fn test_migration_body() {
        let request = MigrationRequest {
            name: Some("web1copy".to_string()),
            source_url: "https://10.0.0.1:8443/1.0/operations/abc".to_string(),
            certificate: "PEM".to_string(),
            secrets: BTreeMap::from([("control".to_string(), "s1".to_string())]),
            architecture: "x86_64".to_string(),
            config: BTreeMap::new(),
            devices: BTreeMap::new(),
            profiles: vec!["default".to_string()],
            base_image: Some("abc123".to_string()),
            ephemeral: false,
            mode: TransferMode::Push,
        };

        let body = migration_body(&request);
        assert_eq!(body["name"], "web1copy");
        assert_eq!(body["source"]["type"], "migration");
        assert_eq!(body["source"]["mode"], "push");
        assert_eq!(body["source"]["base-image"], "abc123");
        assert_eq!(body["source"]["secrets"]["control"], "s1");
        assert_eq!(body["profiles"][0], "default");
    }

    #[test]
    fn test_local_copy_body_without_name() {
        let request = LocalCopyRequest {
            source: "web1".to_string(),
            name: None,
            config: BTreeMap::new(),
            profiles: vec![],
            ephemeral: true,
        };

        let body = local_copy_body(&request);
        assert_eq!(body["name"], "");
        assert_eq!(body["source"]["type"], "copy");
        assert_eq!(body["source"]["source"], "web1");
        assert_eq!(body["ephemeral"], true);
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope: ResponseEnvelope = serde_json::from_value(json!({
            "type": "error",
            "error": "not authorized",
            "error_code": 403
        }))
        .unwrap();
        assert_eq!(envelope.kind, "error");
        assert_eq!(envelope.error_code, 403);
        assert!(envelope.metadata.is_null());
    }
}
