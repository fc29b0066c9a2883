use crate::blob_store::BlobStore;
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::pairing::PairingState;
use crate::tls;
use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{post, put},
};
use futures::TryStreamExt;
use splitvault_core::protocol::{
    BLOB_ID_HEADER, BlobRequest, DEINIT_PATH, DELETE_BLOB_PATH, INIT_PATH, NodeReply,
    PairRequest, READ_BLOB_PATH, WRITE_BLOB_PATH,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub struct NodeState {
    pub pairing: PairingState,
    pub blobs: BlobStore,
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match &self {
            NodeError::NotPaired | NodeError::InvalidBody | NodeError::NoSuchBlob => {
                StatusCode::BAD_REQUEST
            }
            NodeError::Forbidden => StatusCode::FORBIDDEN,
            _ => {
                tracing::error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(NodeReply::failure(self.to_string()))).into_response()
    }
}

pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route(INIT_PATH, post(init))
        .route(DEINIT_PATH, post(deinit))
        .route(WRITE_BLOB_PATH, put(write_blob))
        .route(READ_BLOB_PATH, post(read_blob))
        .route(DELETE_BLOB_PATH, post(delete_blob))
        .fallback(fallback)
        .with_state(state)
}

pub async fn run_node(config: NodeConfig) -> Result<()> {
    let material = tls::load_or_generate(&config.keys_dir(), &config.common_name)?;
    if material.generated {
        print_pairing_instructions(&config, &material.ca_pem);
    }

    let pairing = PairingState::load(config.token_path()).await?;
    let blobs = BlobStore::open(config.blobs_dir()).await?;
    let state = Arc::new(NodeState { pairing, blobs });

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| NodeError::Config(format!("invalid bind_addr {}: {}", config.bind_addr, e)))?;
    let rustls = tls::rustls_config(&material).await?;

    let app = build_router(state);
    tracing::info!(
        "Splitvault node listening on {} as {}",
        addr,
        config.common_name
    );

    axum_server::bind_rustls(addr, rustls)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}

/// The operator copies this CA into the panel when adding the node.
pub fn print_pairing_instructions(config: &NodeConfig, ca_pem: &str) {
    let port = config
        .bind_addr
        .rsplit(':')
        .next()
        .unwrap_or("3001");
    println!(
        "To add this node, open the panel and enter host {} and port {}.",
        config.common_name, port
    );
    println!("Paste the certificate below, including the BEGIN and END lines:");
    println!();
    println!("{}", ca_pem.trim_end());
}

async fn init(
    State(state): State<Arc<NodeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: std::result::Result<Json<PairRequest>, JsonRejection>,
) -> Result<Json<NodeReply>> {
    let Json(request) = body.map_err(|_| NodeError::InvalidBody)?;
    state.pairing.pair(&request.token, peer.ip()).await?;
    Ok(Json(NodeReply::ok()))
}

async fn deinit(
    State(state): State<Arc<NodeState>>,
    body: std::result::Result<Json<PairRequest>, JsonRejection>,
) -> Result<Json<NodeReply>> {
    if !state.pairing.is_paired().await {
        return Err(NodeError::NotPaired);
    }
    let Json(request) = body.map_err(|_| NodeError::InvalidBody)?;
    state.pairing.unpair(&request.token).await?;
    Ok(Json(NodeReply::ok()))
}

async fn write_blob(
    State(state): State<Arc<NodeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<NodeReply>> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();
    state.pairing.authorize(token, peer.ip()).await?;

    let blob_id = headers
        .get(BLOB_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(NodeError::InvalidBody)?;

    let stream = body
        .into_data_stream()
        .map_err(std::io::Error::other);
    state.blobs.write(blob_id, stream).await?;
    Ok(Json(NodeReply::ok()))
}

async fn read_blob(
    State(state): State<Arc<NodeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: std::result::Result<Json<BlobRequest>, JsonRejection>,
) -> Result<Response> {
    let request = authorized_request(&state, peer, body).await?;
    let file = state.blobs.open_blob(&request.id).await?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        )],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn delete_blob(
    State(state): State<Arc<NodeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: std::result::Result<Json<BlobRequest>, JsonRejection>,
) -> Result<Json<NodeReply>> {
    let request = authorized_request(&state, peer, body).await?;
    state.blobs.delete(&request.id).await?;
    Ok(Json(NodeReply::ok()))
}

async fn authorized_request(
    state: &NodeState,
    peer: SocketAddr,
    body: std::result::Result<Json<BlobRequest>, JsonRejection>,
) -> Result<BlobRequest> {
    if !state.pairing.is_paired().await {
        return Err(NodeError::NotPaired);
    }
    let Json(request) = body.map_err(|_| NodeError::InvalidBody)?;
    state.pairing.authorize(&request.token, peer.ip()).await?;
    Ok(request)
}

async fn fallback() -> &'static str {
    "Please use the panel!"
}
