use super::{
    CreateNodeRequest, DeleteFileResponse, DirectoryQuery, FileItem, FileQuery, ForceQuery,
    HealthResponse, ListFilesResponse, NodeItem, NodeResponse, NodesResponse, OkResponse,
    ServerState, UpdateNodeRequest, UploadItem, UploadQuery, UploadResponse, UploadsResponse,
    authorize, error_response, response_error,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use splitvault_core::{
    DeleteFileOperationRequest, DownloadFileOperationRequest, ListFilesOperationRequest,
    ListNodesOptions, NodeAddress, UploadFileOperationRequest, VaultError,
};
use std::sync::Arc;

/// Query string failures answer in the same `{error}` shape as everything else.
fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, Response> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| response_error(StatusCode::BAD_REQUEST, rejection.body_text()))
}

pub(crate) async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let nodes = state.registry.list_all().map(|nodes| nodes.len()).unwrap_or(0);
    Json(HealthResponse {
        status: "ok".to_string(),
        nodes,
    })
}

pub(crate) async fn v1_list_nodes(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.node.edit) {
        return response;
    }

    let views = match state
        .registry
        .list_reachable(ListNodesOptions {
            only_connected: false,
            include_connection_details: true,
            include_content_key: false,
        })
        .await
    {
        Ok(views) => views,
        Err(error) => return error_response(error),
    };

    let payload = NodesResponse {
        nodes: views.into_iter().filter_map(NodeItem::from_view).collect(),
    };
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn v1_create_node(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Result<Json<CreateNodeRequest>, JsonRejection>,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.node.add) {
        return response;
    }
    let Ok(Json(request)) = body else {
        return response_error(
            StatusCode::BAD_REQUEST,
            "You sent an incomplete or wrong request body!",
        );
    };

    match state
        .registry
        .pair(NodeAddress::new(request.host, request.port), request.ca)
        .await
    {
        Ok(node) => (
            StatusCode::CREATED,
            Json(NodeResponse {
                node: NodeItem::from_node(&node, Some(true)),
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn v1_get_node(
    State(state): State<Arc<ServerState>>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.node.edit) {
        return response;
    }

    let node = match state.registry.get(&node_id) {
        Ok(node) => node,
        Err(error) => return error_response(error),
    };
    let connected = state.registry.is_reachable(&node).await;

    (
        StatusCode::OK,
        Json(NodeResponse {
            node: NodeItem::from_node(&node, Some(connected)),
        }),
    )
        .into_response()
}

pub(crate) async fn v1_update_node(
    State(state): State<Arc<ServerState>>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<UpdateNodeRequest>, JsonRejection>,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.node.edit) {
        return response;
    }
    let Ok(Json(request)) = body else {
        return response_error(
            StatusCode::BAD_REQUEST,
            "You sent an incomplete or wrong request body!",
        );
    };

    match state
        .registry
        .reconfigure(
            &node_id,
            NodeAddress::new(request.host, request.port),
            request.ca,
            request.force,
        )
        .await
    {
        Ok(node) => (
            StatusCode::OK,
            Json(NodeResponse {
                node: NodeItem::from_node(&node, None),
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn v1_delete_node(
    State(state): State<Arc<ServerState>>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    query: Result<Query<ForceQuery>, QueryRejection>,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.node.delete) {
        return response;
    }
    let force = match query_params(query) {
        Ok(query) => query.force,
        Err(response) => return response,
    };

    match state.registry.unpair(&node_id, force).await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { success: true })).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn v1_list_files(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Result<Query<DirectoryQuery>, QueryRejection>,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.file.download) {
        return response;
    }
    let query = match query_params(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    match state
        .list_files_operation
        .run(ListFilesOperationRequest { path: query.path })
    {
        Ok(listing) => (
            StatusCode::OK,
            Json(ListFilesResponse {
                path: listing.path,
                directories: listing.directories,
                files: listing.files.into_iter().map(FileItem::from).collect(),
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn v1_upload_file(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Result<Query<UploadQuery>, QueryRejection>,
    body: Body,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.file.upload) {
        return response;
    }
    let query = match query_params(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    let body = body
        .into_data_stream()
        .map_err(|error| VaultError::InvalidRequest(format!("upload body error: {}", error)))
        .boxed();

    match state
        .upload_file_operation
        .run(UploadFileOperationRequest {
            path: query.path,
            name: query.name,
            size: query.size,
            body,
        })
        .await
    {
        Ok(result) => (
            StatusCode::CREATED,
            Json(UploadResponse {
                file: FileItem::from(result.file),
                part_count: result.part_count,
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn v1_download_file(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> impl IntoResponse {
    let session = match authorize(&state, &headers, |perms| perms.file.download) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let query = match query_params(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    let result = match state
        .download_file_operation
        .run(DownloadFileOperationRequest {
            session_id: session.session_id,
            path: query.path,
            name: query.name,
        })
        .await
    {
        Ok(result) => result,
        Err(error) => return error_response(error),
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(disposition) = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        result.file.name.replace('"', "")
    )) {
        response_headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    (StatusCode::OK, response_headers, Body::from(result.data)).into_response()
}

pub(crate) async fn v1_delete_file(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.file.delete) {
        return response;
    }
    let query = match query_params(query) {
        Ok(query) => query,
        Err(response) => return response,
    };

    match state
        .delete_file_operation
        .run(DeleteFileOperationRequest {
            path: query.path,
            name: query.name,
        })
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(DeleteFileResponse {
                file_id: result.file_id,
                removed_parts: result.removed_parts,
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn v1_list_uploads(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(response) = authorize(&state, &headers, |perms| perms.file.upload) {
        return response;
    }

    let uploads = state
        .uploads
        .snapshot()
        .into_iter()
        .map(UploadItem::from)
        .collect();
    (StatusCode::OK, Json(UploadsResponse { uploads })).into_response()
}
