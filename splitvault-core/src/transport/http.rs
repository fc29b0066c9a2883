use super::{NodeTransport, TransportConfig};
use crate::cipher::{BlobBody, BlobReader};
use crate::error::{Result, VaultError};
use crate::node::NodeEndpoint;
use crate::protocol::{
    BLOB_ID_HEADER, BlobRequest, DEINIT_PATH, DELETE_BLOB_PATH, INIT_PATH, NodeReply, PairRequest,
    READ_BLOB_PATH, WRITE_BLOB_PATH,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Body, Certificate, Client, Response, StatusCode, Url, header};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// HTTPS transport that trusts nothing but the CA certificate pinned for each node.
pub struct HttpNodeTransport {
    config: TransportConfig,
    clients: Mutex<HashMap<String, Client>>,
}

impl HttpNodeTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, endpoint: &NodeEndpoint) -> Result<Client> {
        let fingerprint = ca_fingerprint(&endpoint.ca_cert);

        let mut clients = self
            .clients
            .lock()
            .map_err(|_| VaultError::Internal("transport client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(&fingerprint) {
            return Ok(client.clone());
        }

        let client = build_pinned_client(&endpoint.ca_cert, self.config.connect_timeout)?;
        clients.insert(fingerprint, client.clone());
        Ok(client)
    }

    fn evict(&self, endpoint: &NodeEndpoint) {
        let fingerprint = ca_fingerprint(&endpoint.ca_cert);
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if clients.remove(&fingerprint).is_some() {
            tracing::debug!("Dropped pinned client: node={}", endpoint.node_id);
        }
    }

    fn url(&self, endpoint: &NodeEndpoint, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", endpoint.address.base_url(), path))
            .map_err(|error| VaultError::InvalidRequest(format!("invalid node address: {}", error)))
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        endpoint: &NodeEndpoint,
        path: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<Response> {
        let client = self.client_for(endpoint)?;
        let url = self.url(endpoint, path)?;

        let response = client
            .post(url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|error| classify_send_error(endpoint, error))?;

        expect_success(endpoint, response).await
    }
}

impl Default for HttpNodeTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl NodeTransport for HttpNodeTransport {
    async fn pair(&self, endpoint: &NodeEndpoint, token: &str) -> Result<()> {
        let payload = PairRequest {
            token: token.to_string(),
        };
        let response = self
            .post_json(endpoint, INIT_PATH, &payload, self.config.probe_timeout)
            .await?;
        expect_reply(endpoint, response).await
    }

    async fn unpair(&self, endpoint: &NodeEndpoint, token: &str) -> Result<()> {
        let payload = PairRequest {
            token: token.to_string(),
        };
        let response = self
            .post_json(endpoint, DEINIT_PATH, &payload, self.config.probe_timeout)
            .await?;
        expect_reply(endpoint, response).await
    }

    async fn write_blob(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        blob_id: &str,
        body: BlobBody,
    ) -> Result<()> {
        let client = self.client_for(endpoint)?;
        let url = self.url(endpoint, WRITE_BLOB_PATH)?;

        let response = client
            .put(url)
            .timeout(self.config.transfer_timeout)
            .bearer_auth(token)
            .header(BLOB_ID_HEADER, blob_id)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(body))
            .send()
            .await
            .map_err(|error| classify_send_error(endpoint, error))?;

        let response = expect_success(endpoint, response).await?;
        expect_reply(endpoint, response).await
    }

    async fn read_blob(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        blob_id: &str,
    ) -> Result<BlobReader> {
        let payload = BlobRequest {
            id: blob_id.to_string(),
            token: token.to_string(),
        };
        let response = self
            .post_json(endpoint, READ_BLOB_PATH, &payload, self.config.transfer_timeout)
            .await?;

        let node_id = endpoint.node_id.clone();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|error| {
                    VaultError::Connectivity(format!(
                        "reading blob from node {} failed: {}",
                        node_id, error
                    ))
                })
            })
            .boxed())
    }

    async fn delete_blob(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        blob_id: &str,
    ) -> Result<()> {
        let payload = BlobRequest {
            id: blob_id.to_string(),
            token: token.to_string(),
        };
        let response = self
            .post_json(endpoint, DELETE_BLOB_PATH, &payload, self.config.transfer_timeout)
            .await?;
        expect_reply(endpoint, response).await
    }

    fn forget(&self, endpoint: &NodeEndpoint) {
        self.evict(endpoint);
    }
}

/// Rejects a CA that cannot be parsed before any connection is attempted.
pub fn validate_ca_pem(ca_cert: &str) -> Result<()> {
    if ca_cert.trim().is_empty() {
        return Err(VaultError::InvalidRequest(
            "node CA certificate cannot be empty".to_string(),
        ));
    }
    if !ca_cert.contains("-----BEGIN CERTIFICATE-----")
        || !ca_cert.contains("-----END CERTIFICATE-----")
    {
        return Err(VaultError::InvalidRequest(
            "node CA certificate must be PEM encoded".to_string(),
        ));
    }
    build_pinned_client(ca_cert, Duration::from_secs(5))
        .map(|_| ())
        .map_err(|error| VaultError::InvalidRequest(error.to_string()))
}

fn build_pinned_client(ca_cert: &str, connect_timeout: Duration) -> Result<Client> {
    let certificate = Certificate::from_pem(ca_cert.as_bytes())
        .map_err(|error| VaultError::InvalidRequest(format!("invalid CA certificate: {}", error)))?;

    Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(certificate)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|error| VaultError::Internal(format!("failed to build node client: {}", error)))
}

fn ca_fingerprint(ca_cert: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ca_cert.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn classify_send_error(endpoint: &NodeEndpoint, error: reqwest::Error) -> VaultError {
    if error.is_timeout() {
        VaultError::Connectivity(format!("node {} timed out", endpoint.address))
    } else if error.is_connect() {
        VaultError::Connectivity(format!(
            "cannot connect to node {}: {}",
            endpoint.address, error
        ))
    } else {
        VaultError::Connectivity(format!("request to node {} failed: {}", endpoint.address, error))
    }
}

async fn expect_success(endpoint: &NodeEndpoint, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<NodeReply>().await {
        Ok(reply) => reply.message,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };

    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        return Err(VaultError::Unauthorized(format!(
            "node {}: {}",
            endpoint.address, message
        )));
    }

    Err(VaultError::Remote {
        status: status.as_u16(),
        message,
    })
}

async fn expect_reply(endpoint: &NodeEndpoint, response: Response) -> Result<()> {
    let status = response.status();
    let reply: NodeReply = response.json().await.map_err(|error| {
        VaultError::Connectivity(format!(
            "malformed reply from node {}: {}",
            endpoint.address, error
        ))
    })?;

    if !reply.success {
        return Err(VaultError::Remote {
            status: status.as_u16(),
            message: reply.message,
        });
    }
    Ok(())
}
