use std::collections::BTreeMap;

use datahub_core::client::HttpDataHub;
use datahub_core::contract::{
    DataHubApi, FileInfo, PushEvent, RawstoreAuthorizeRequest, Service, UploadCredential,
    UploadMetadata,
};
use datahub_core::error::PushError;
use datahub_core::options::{Findability, PushOptions};
use datahub_core::package::{Dataset, Resource};
use datahub_core::push::{DataHub, Owner, PushControl};
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn client(server: &MockServer) -> HttpDataHub {
    HttpDataHub::new(server.uri(), "user-token").expect("Client should build")
}

fn credential(server: &MockServer, key: &str) -> UploadCredential {
    UploadCredential {
        upload_url: format!("{}/store", server.uri()),
        upload_query: BTreeMap::from([
            ("key".to_string(), key.to_string()),
            ("Content-Type".to_string(), "text/csv".to_string()),
            ("policy".to_string(), "p0l1cy".to_string()),
        ]),
        exists: false,
    }
}

#[tokio::test]
async fn test_authorize_sends_user_token_and_returns_service_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/authorize"))
        .and(query_param("service", "source"))
        .and(header("Auth-Token", "user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "source-token"})))
        .expect(1)
        .mount(&server)
        .await;

    let token = client(&server)
        .authorize(Service::Source)
        .await
        .expect("Authorize should succeed");
    assert_eq!(token, "source-token");
}

#[tokio::test]
async fn test_authorize_failure_carries_status_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/authorize"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server)
        .authorize(Service::Rawstore)
        .await
        .expect_err("Authorize should fail on 401");
    assert!(matches!(err, PushError::Authorization { status: 401, .. }));
    assert_eq!(err.to_string(), "Authz server: Unauthorized");
}

#[tokio::test]
async fn test_rawstore_authorize_client_error_uses_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rawstore/authorize"))
        .and(header("Auth-Token", "rawstore-token"))
        .and(body_partial_json(json!({
            "metadata": {"owner": "owner-id", "findability": "published"},
            "filedata": {"data.csv": {"length": 8, "md5": "abc==", "name": "data"}}
        })))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"error": {"message": "Max storage for user exceeded"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = RawstoreAuthorizeRequest {
        metadata: UploadMetadata {
            owner: "owner-id".to_string(),
            findability: Findability::Published,
        },
        filedata: BTreeMap::from([(
            "data.csv".to_string(),
            FileInfo {
                length: 8,
                md5: "abc==".to_string(),
                name: "data".to_string(),
            },
        )]),
    };
    let err = client(&server)
        .rawstore_authorize("rawstore-token", &request)
        .await
        .expect_err("Rawstore should refuse");
    match &err {
        PushError::Response(e) => {
            assert!(e.user_error);
            assert_eq!(e.status, 403);
        }
        other => panic!("Expected a response error, got {other:?}"),
    }
    assert_eq!(err.to_string(), "Max storage for user exceeded");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_error_body_is_not_read() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rawstore/presign"))
        .respond_with(ResponseTemplate::new(503).set_body_string("<html>down</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .presign("rawstore-token", "owner-id", "https://store/abc")
        .await
        .expect_err("Presign should fail on 503");
    assert_eq!(
        err.to_string(),
        "Response error - no information. Status code: 503 - Service Unavailable"
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_presign_passes_owner_and_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rawstore/presign"))
        .and(query_param("ownerid", "owner-id"))
        .and(query_param("url", "https://store/abc=="))
        .and(header("Auth-Token", "rawstore-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "https://signed/abc"})))
        .expect(1)
        .mount(&server)
        .await;

    let signed = client(&server)
        .presign("rawstore-token", "owner-id", "https://store/abc==")
        .await
        .expect("Presign should succeed");
    assert_eq!(signed, "https://signed/abc");
}

#[tokio::test]
async fn test_upload_streams_multipart_with_explicit_length() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/store"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let resource = Resource::inline("data", "data/data.csv", "a,b\n1,2\n");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    client(&server)
        .upload(&credential(&server, "abc=="), &resource, Some(tx))
        .await
        .expect("Upload should succeed");

    let requests: Vec<Request> = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.headers.get("Auth-Token").is_none());
    let length: usize = request.headers["content-length"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(length, request.body.len());
    assert!(request.headers.get("transfer-encoding").is_none());
    let content_type = request.headers["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));

    let body = String::from_utf8(request.body.clone()).unwrap();
    assert!(body.contains("name=\"key\"\r\n\r\nabc==\r\n"));
    assert!(body.contains("name=\"policy\"\r\n\r\np0l1cy\r\n"));
    assert!(body.contains("name=\"file\"; filename=\"data.csv\""));
    assert!(body.contains("Content-Type: text/csv\r\n\r\na,b\n1,2\n\r\n"));

    let mut progress = Vec::new();
    while let Ok(PushEvent::Upload(event)) = rx.try_recv() {
        progress.push(event);
    }
    let last = progress.last().expect("Progress should be reported");
    assert!(last.completed);
    assert_eq!(last.file, "data/data.csv");
    assert_eq!(last.total_bytes, resource.size());
    assert_eq!(last.transferred, last.total_bytes);
    assert!(
        progress
            .iter()
            .all(|p| p.total_bytes == resource.size() && p.transferred <= p.total_bytes),
        "Progress should count resource bytes: {progress:?}"
    );
}

#[tokio::test]
async fn test_upload_rejection_embeds_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/store"))
        .respond_with(ResponseTemplate::new(403).set_body_string("AccessDenied"))
        .mount(&server)
        .await;

    let resource = Resource::inline("data", "data.csv", "a\n1\n");
    let err = client(&server)
        .upload(&credential(&server, "k"), &resource, None)
        .await
        .expect_err("Upload should fail on 403");
    assert_eq!(
        err.to_string(),
        "Error uploading to rawstore for data.csv with code 403 reason AccessDenied"
    );
}

#[tokio::test]
async fn test_upload_of_empty_resource_never_hits_the_store() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let resource = Resource::inline("empty", "empty.csv", "");
    let err = client(&server)
        .upload(&credential(&server, "k"), &resource, None)
        .await
        .expect_err("Empty upload should fail");
    assert!(matches!(err, PushError::EmptyResource { ref path } if path == "empty.csv"));
}

#[tokio::test]
async fn test_submit_rejection_joins_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/source/upload"))
        .and(header("Auth-Token", "source-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "errors": ["bad schedule", "unknown output"]
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .submit("source-token", &json!({"meta": {}}))
        .await
        .expect_err("Rejected submission should fail");
    assert_eq!(err.to_string(), "bad schedule\nunknown output");
}

#[tokio::test]
async fn test_submit_server_error_is_retryable_response_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/source/upload"))
        .respond_with(ResponseTemplate::new(500).set_body_string("stack trace"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .submit("source-token", &json!({"meta": {}}))
        .await
        .expect_err("Submission should fail on 500");
    assert!(matches!(&err, PushError::Response(e) if e.status == 500 && e.message.is_none()));
    assert!(err.is_retryable());
    assert_eq!(err.status(), Some(500));
    assert_eq!(
        err.to_string(),
        "Response error - no information. Status code: 500 - Internal Server Error"
    );
}

#[tokio::test]
async fn test_fetch_downloads_remote_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/remote.xlsx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"workbook".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.xlsx"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = client(&server);
    let data = api
        .fetch(&format!("{}/remote.xlsx", server.uri()))
        .await
        .expect("Fetch should succeed");
    assert_eq!(&data[..], b"workbook");
    let err = api
        .fetch(&format!("{}/missing.xlsx", server.uri()))
        .await
        .expect_err("Missing remote content should fail");
    assert!(matches!(err, PushError::RemoteResourceUnreachable { status: Some(404), .. }));
}

#[tokio::test]
async fn test_check_url_uses_head() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/ok.csv"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/gone.csv"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = client(&server);
    api.check_url(&format!("{}/ok.csv", server.uri()))
        .await
        .expect("Reachable URL should pass");
    let err = api
        .check_url(&format!("{}/gone.csv", server.uri()))
        .await
        .expect_err("Missing URL should fail");
    assert!(matches!(err, PushError::RemoteResourceUnreachable { status: Some(404), .. }));
}

#[tokio::test]
async fn test_push_end_to_end_over_http() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("data.csv"), "a,b\n1,2\n").unwrap();
    let dataset = Dataset::from_descriptor(
        json!({"name": "d", "resources": [{"name": "data", "path": "data.csv"}]}),
        dir.path(),
    )
    .await
    .unwrap();
    let data_hash = dataset.resources()[0].hash().to_string();
    let store = format!("{}/store", server.uri());

    Mock::given(method("GET"))
        .and(path("/auth/authorize"))
        .and(query_param("service", "rawstore"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "rawstore-token"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/authorize"))
        .and(query_param("service", "source"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "source-token"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rawstore/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"filedata": {
            "data.csv": {"upload_url": store, "upload_query": {"key": "data-key"}},
            "datapackage.json": {"upload_url": store, "upload_query": {"key": "dp-key"}}
        }})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/store"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rawstore/presign"))
        .and(query_param("url", format!("{store}/data-key")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "https://signed/data"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rawstore/presign"))
        .and(query_param("url", format!("{store}/dp-key")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "https://signed/dp"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/source/upload"))
        .and(header("Auth-Token", "source-token"))
        .and(body_partial_json(json!({
            "inputs": [{
                "kind": "datapackage",
                "url": "https://signed/dp",
                "parameters": {"resource-mapping": {"data.csv": "https://signed/data"}}
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true, "id": "test", "errors": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let hub = DataHub::new(
        client(&server),
        Owner {
            id: "owner-id".to_string(),
            name: "owner".to_string(),
        },
    );
    let response = hub
        .push(&dataset, &PushOptions::default(), &PushControl::default())
        .await
        .expect("Push over HTTP should succeed");
    assert!(response.success);
    assert_eq!(response.id.as_deref(), Some("test"));
    assert!(response.errors.is_empty());

    let rawstore: serde_json::Value = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.url.path() == "/rawstore/authorize")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    assert_eq!(rawstore["filedata"]["data.csv"]["md5"], data_hash);
    assert_eq!(rawstore["filedata"]["data.csv"]["length"], 8);
}
