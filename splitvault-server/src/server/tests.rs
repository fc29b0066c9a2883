use super::*;
use crate::config::{ApiKeyConfig, StorageConfig, TransportSettings};
use axum::body::Body;
use axum::http::{Method, Request};
use http_body_util::BodyExt;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use serde_json::{Value, json};
use splitvault_core::{MemoryTransport, NodeAddress};
use tower::ServiceExt;

fn test_ca_pem() -> String {
    let key = KeyPair::generate().expect("key pair");
    let mut params = CertificateParams::new(vec!["panel-test".to_string()]).expect("params");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.self_signed(&key).expect("self signed").pem()
}

struct Harness {
    _dir: tempfile::TempDir,
    transport: Arc<MemoryTransport>,
    state: Arc<ServerState>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        bind_addr: "127.0.0.1:0".to_string(),
        database_path: dir.path().join("panel.sqlite3"),
        storage: StorageConfig {
            shard_size: 100,
            force_spreading: true,
            max_concurrent_transfers: 2,
        },
        transport: TransportSettings::default(),
        api_keys: vec![
            ApiKeyConfig {
                key: "admin-key".to_string(),
                name: Some("admin".to_string()),
                permissions: 777,
            },
            ApiKeyConfig {
                key: "reader-key".to_string(),
                name: None,
                permissions: 100,
            },
        ],
    };

    let store = Arc::new(MetadataStore::new(&config.database_path).expect("store"));
    let transport = Arc::new(MemoryTransport::new());
    let state = Arc::new(ServerState::new(&config, store, transport.clone()));
    Harness {
        _dir: dir,
        transport,
        state,
    }
}

fn request(method: Method, uri: &str, key: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
    }
    builder.body(body).expect("request")
}

fn json_request(method: Method, uri: &str, key: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", key))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request")
}

async fn send(state: &Arc<ServerState>, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = build_router(state.clone())
        .oneshot(request)
        .await
        .expect("response");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    (status, body.to_vec())
}

fn parse(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

#[tokio::test]
async fn health_needs_no_key() {
    let harness = harness();
    let (status, body) = send(
        &harness.state,
        request(Method::GET, "/health", None, Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["status"], "ok");
}

#[tokio::test]
async fn api_calls_need_a_known_key() {
    let harness = harness();
    let (status, _) = send(
        &harness.state,
        request(Method::GET, "/api/v1/nodes", None, Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &harness.state,
        request(Method::GET, "/api/v1/nodes", Some("wrong"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_capability_is_forbidden() {
    let harness = harness();
    let (status, _) = send(
        &harness.state,
        request(Method::GET, "/api/v1/nodes", Some("reader-key"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &harness.state,
        request(
            Method::DELETE,
            "/api/v1/files?path=/&name=a.bin",
            Some("reader-key"),
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &harness.state,
        request(Method::GET, "/api/v1/files?path=/", Some("reader-key"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn nodes_can_be_added_listed_and_removed() {
    let harness = harness();
    let address = NodeAddress::new("node-a", 3001);
    harness.transport.add_node(&address);

    let (status, body) = send(
        &harness.state,
        json_request(
            Method::POST,
            "/api/v1/nodes",
            "admin-key",
            json!({ "host": "node-a", "port": 3001, "ca": test_ca_pem() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let node_id = parse(&body)["node"]["id"]
        .as_str()
        .expect("node id")
        .to_string();

    let (status, body) = send(
        &harness.state,
        request(Method::GET, "/api/v1/nodes", Some("admin-key"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let listed = parse(&body);
    assert_eq!(listed["nodes"][0]["id"], node_id.as_str());
    assert_eq!(listed["nodes"][0]["connected"], true);
    assert!(listed["nodes"][0].get("auth_token").is_none());

    let uri = format!("/api/v1/nodes/{}", node_id);
    let (status, _) = send(
        &harness.state,
        request(Method::DELETE, &uri, Some("admin-key"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(harness.transport.paired_token(&address).is_none());

    let (status, _) = send(
        &harness.state,
        request(Method::GET, &uri, Some("admin-key"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_node_body_is_a_bad_request() {
    let harness = harness();
    let (status, body) = send(
        &harness.state,
        json_request(
            Method::POST,
            "/api/v1/nodes",
            "admin-key",
            json!({ "host": "node-a" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(parse(&body)["error"].is_string());
}

#[tokio::test]
async fn bad_query_strings_answer_with_json_errors() {
    let harness = harness();
    let cases = [
        (Method::PUT, "/api/v1/files/upload?path=/&name=a.bin"),
        (Method::PUT, "/api/v1/files/upload?path=/&name=a.bin&size=lots"),
        (Method::GET, "/api/v1/files/download?path=/"),
        (Method::DELETE, "/api/v1/files?path=/"),
        (Method::DELETE, "/api/v1/nodes/missing?force=maybe"),
    ];

    for (method, uri) in cases {
        let (status, body) = send(
            &harness.state,
            request(method.clone(), uri, Some("admin-key"), Body::from("abc")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
        assert!(parse(&body)["error"].is_string(), "{} {}", method, uri);
    }

    // the key check still comes first
    let (status, _) = send(
        &harness.state,
        request(
            Method::PUT,
            "/api/v1/files/upload?path=/&name=a.bin",
            Some("reader-key"),
            Body::from("abc"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn upload_list_download_delete() {
    let harness = harness();
    let address = NodeAddress::new("node-a", 3001);
    harness.transport.add_node(&address);
    harness
        .state
        .registry
        .pair(address, test_ca_pem())
        .await
        .expect("pair");

    let data: Vec<u8> = (0..250u32).map(|i| (i % 200) as u8).collect();
    let (status, body) = send(
        &harness.state,
        request(
            Method::PUT,
            "/api/v1/files/upload?path=docs&name=a.bin&size=250",
            Some("admin-key"),
            Body::from(data.clone()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let uploaded = parse(&body);
    assert_eq!(uploaded["part_count"], 3);
    assert_eq!(uploaded["file"]["state"], "complete");

    let (status, body) = send(
        &harness.state,
        request(Method::GET, "/api/v1/files?path=/", Some("admin-key"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["directories"], json!(["docs"]));

    let (status, body) = send(
        &harness.state,
        request(
            Method::GET,
            "/api/v1/files/download?path=/docs/&name=a.bin",
            Some("admin-key"),
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, data);

    let (status, body) = send(
        &harness.state,
        request(
            Method::DELETE,
            "/api/v1/files?path=docs&name=a.bin",
            Some("admin-key"),
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["removed_parts"], 3);
    assert_eq!(harness.transport.total_blobs(), 0);

    let (status, _) = send(
        &harness.state,
        request(
            Method::GET,
            "/api/v1/files/download?path=docs&name=a.bin",
            Some("admin-key"),
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_without_nodes_is_unavailable() {
    let harness = harness();
    let (status, _) = send(
        &harness.state,
        request(
            Method::PUT,
            "/api/v1/files/upload?path=/&name=a.bin&size=3",
            Some("admin-key"),
            Body::from("abc"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = send(
        &harness.state,
        request(Method::GET, "/api/v1/uploads", Some("admin-key"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["uploads"], json!([]));
}

#[test]
fn vault_errors_map_to_http_statuses() {
    assert_eq!(
        error_status(&VaultError::FileExists("/a".to_string())),
        StatusCode::CONFLICT
    );
    assert_eq!(
        error_status(&VaultError::DownloadInProgress),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        error_status(&VaultError::Connectivity("down".to_string())),
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        error_status(&VaultError::PartialDelete {
            file_id: "f".to_string(),
            failed_seq: 1,
            removed: 1,
            remaining: 2,
            reason: "reset".to_string(),
        }),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
