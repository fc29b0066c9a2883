use crate::config::Config;
use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use splitvault_core::{
    DeleteFileOperation, DownloadFileOperation, DynTransport, HttpNodeTransport,
    ListFilesOperation, MetadataStore, NodeRegistry, Permissions, Result, SessionRegistry,
    UniformRandomSelector, UploadFileOperation, UploadTracker, VaultError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::interval;

mod external;
mod types;

use external::{
    health, v1_create_node, v1_delete_file, v1_delete_node, v1_download_file, v1_get_node,
    v1_list_files, v1_list_nodes, v1_list_uploads, v1_update_node, v1_upload_file,
};
pub(crate) use types::*;

/// Who is calling, as resolved from the bearer API key.
#[derive(Debug, Clone)]
pub(crate) struct ApiSession {
    pub(crate) session_id: String,
    pub(crate) permissions: Permissions,
}

pub struct ServerState {
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) uploads: Arc<UploadTracker>,
    pub(crate) api_keys: HashMap<String, ApiSession>,
    pub(crate) upload_file_operation: UploadFileOperation,
    pub(crate) download_file_operation: DownloadFileOperation,
    pub(crate) delete_file_operation: DeleteFileOperation,
    pub(crate) list_files_operation: ListFilesOperation,
}

impl ServerState {
    pub fn new(config: &Config, store: Arc<MetadataStore>, transport: Arc<DynTransport>) -> Self {
        let registry = Arc::new(
            NodeRegistry::new(store.clone(), transport)
                .with_probe_timeout(config.transport.probe_timeout()),
        );
        let uploads = Arc::new(UploadTracker::new());
        let sessions = Arc::new(SessionRegistry::new());
        let max_transfers = config.storage.max_concurrent_transfers;

        let api_keys = config
            .api_keys
            .iter()
            .enumerate()
            .map(|(index, api_key)| {
                let session = ApiSession {
                    session_id: api_key
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("key-{}", index)),
                    permissions: Permissions::decode(api_key.permissions),
                };
                (api_key.key.clone(), session)
            })
            .collect();

        Self {
            upload_file_operation: UploadFileOperation::new(
                store.clone(),
                registry.clone(),
                Arc::new(UniformRandomSelector),
                uploads.clone(),
                config.storage.placement(),
                max_transfers,
            ),
            download_file_operation: DownloadFileOperation::new(
                store.clone(),
                registry.clone(),
                sessions,
                max_transfers,
            ),
            delete_file_operation: DeleteFileOperation::new(store.clone(), registry.clone()),
            list_files_operation: ListFilesOperation::new(store),
            registry,
            uploads,
            api_keys,
        }
    }
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/nodes", get(v1_list_nodes).post(v1_create_node))
        .route(
            "/api/v1/nodes/:id",
            get(v1_get_node).put(v1_update_node).delete(v1_delete_node),
        )
        .route("/api/v1/files", get(v1_list_files).delete(v1_delete_file))
        .route("/api/v1/files/upload", put(v1_upload_file))
        .route("/api/v1/files/download", get(v1_download_file))
        .route("/api/v1/uploads", get(v1_list_uploads))
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let store = Arc::new(MetadataStore::new(&config.database_path)?);
    let transport: Arc<DynTransport> =
        Arc::new(HttpNodeTransport::new(config.transport.transport_config()));

    if config.api_keys.is_empty() {
        tracing::warn!("No API keys configured, every API call will be rejected");
    }

    let state = Arc::new(ServerState::new(&config, store, transport));

    {
        // keeps every node's record of the panel's address fresh
        let probe_state = state.clone();
        let probe_interval = config.transport.probe_interval();
        tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            loop {
                ticker.tick().await;
                match probe_state.registry.probe_all().await {
                    Ok(probed) => {
                        let connected = probed.iter().filter(|(_, up)| *up).count();
                        tracing::debug!(
                            "Probed nodes: total={} connected={}",
                            probed.len(),
                            connected
                        );
                    }
                    Err(error) => tracing::warn!("Failed to probe nodes: {}", error),
                }
            }
        });
    }

    let app = build_router(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Splitvault panel listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| VaultError::Internal(error.to_string()))?;

    Ok(())
}

/// Resolves the caller's API key and checks one capability.
pub(crate) fn authorize(
    state: &ServerState,
    headers: &HeaderMap,
    allowed: impl FnOnce(&Permissions) -> bool,
) -> std::result::Result<ApiSession, Response> {
    let key = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let Some(key) = key else {
        return Err(response_error(
            StatusCode::UNAUTHORIZED,
            "You are not logged in!",
        ));
    };

    let Some(session) = state.api_keys.get(key) else {
        return Err(response_error(StatusCode::UNAUTHORIZED, "Unknown API key"));
    };

    if !allowed(&session.permissions) {
        return Err(response_error(
            StatusCode::FORBIDDEN,
            "You do not have enough permissions to do that action!",
        ));
    }

    Ok(session.clone())
}

pub(crate) fn response_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub(crate) fn error_status(error: &VaultError) -> StatusCode {
    match error {
        VaultError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        VaultError::NoSuchFile(_) | VaultError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        VaultError::FileExists(_) | VaultError::IncompleteFile(_) => StatusCode::CONFLICT,
        VaultError::DownloadInProgress => StatusCode::TOO_MANY_REQUESTS,
        VaultError::NoReachableNodes => StatusCode::SERVICE_UNAVAILABLE,
        VaultError::Unauthorized(_) => StatusCode::FORBIDDEN,
        VaultError::Connectivity(_) | VaultError::Remote { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: VaultError) -> Response {
    let status = error_status(&error);
    if status.is_server_error() {
        tracing::warn!("Request failed: status={} error={}", status.as_u16(), error);
    }
    response_error(status, error.to_string())
}

#[cfg(test)]
mod tests;
