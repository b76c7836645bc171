//! Integration tests for HTTP API endpoints.

mod common;

use axum::http::StatusCode;
use common::{MultipartForm, TestServer, seeded_bytes, split_by_sizes};
use serde_json::Value;
use splice_core::file_name::MAX_FILE_NAME_LEN;
use splice_storage::MemoryBackend;

fn assert_received(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
    assert!(body.get("url").is_none(), "unexpected url: {body}");
}

fn assert_failed(status: StatusCode, body: &Value, expected: StatusCode, code: &str) {
    assert_eq!(status, expected, "body: {body}");
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], code);
    assert!(body.get("url").is_none());
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::new().await;

    let (status, body) = server.get("/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_three_fragments_in_order() {
    let server = TestServer::new().await;
    let data = seeded_bytes(6, 9216);
    let fragments = split_by_sizes(&data, &[4096, 4096, 1024]);

    let (status, body) = server.submit("photo.jpg", 0, 3, &fragments[0]).await;
    assert_received(status, &body);
    let (status, body) = server.submit("photo.jpg", 1, 3, &fragments[1]).await;
    assert_received(status, &body);

    let (status, body) = server.submit("photo.jpg", 2, 3, &fragments[2]).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
    let url = body["url"].as_str().expect("url in final response");
    assert!(url.starts_with("memory://objects/uploads/"), "{url}");
    assert!(url.ends_with("-photo.jpg"), "{url}");

    let (key, uploaded, _) = server.single_object();
    assert!(key.starts_with("uploads/"));
    assert_eq!(uploaded.len(), 9216);
    assert_eq!(uploaded, data);
    assert!(server.staging_files().is_empty());
    assert_eq!(server.objects.object_put_count(), 1);
}

#[tokio::test]
async fn test_final_fragment_first_then_resent() {
    let server = TestServer::new().await;
    let fragments = [&b"AAAA"[..], b"BBBB", b"CC"];

    let (status, body) = server.submit("doc.pdf", 2, 3, fragments[2]).await;
    assert_failed(status, &body, StatusCode::BAD_REQUEST, "incomplete_upload");
    assert_eq!(server.staging_files(), vec!["doc.pdf.part2"]);

    let (status, body) = server.submit("doc.pdf", 0, 3, fragments[0]).await;
    assert_received(status, &body);
    let (status, body) = server.submit("doc.pdf", 1, 3, fragments[1]).await;
    assert_received(status, &body);
    assert_eq!(server.objects.object_put_count(), 0);

    let (status, body) = server.submit("doc.pdf", 2, 3, fragments[2]).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert!(body["url"].is_string());

    let (_, uploaded, _) = server.single_object();
    assert_eq!(&uploaded[..], b"AAAABBBBCC");
    assert!(server.staging_files().is_empty());
}

#[tokio::test]
async fn test_duplicate_final_fragment_uploads_once() {
    let server = TestServer::new().await;

    server.submit("menu.txt", 0, 2, b"starter,").await;
    let (status, body) = server.submit("menu.txt", 1, 2, b"main").await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let (status, body) = server.submit("menu.txt", 1, 2, b"main").await;
    assert_failed(status, &body, StatusCode::BAD_REQUEST, "incomplete_upload");
    assert_eq!(server.objects.object_put_count(), 1);

    // The stray duplicate waits for the sweep
    assert_eq!(server.staging_files(), vec!["menu.txt.part1"]);
}

#[tokio::test]
async fn test_fragment_retry_overwrites() {
    let server = TestServer::new().await;

    server.submit("r.bin", 0, 2, b"garbled").await;
    server.submit("r.bin", 0, 2, b"good-").await;
    let (status, _) = server.submit("r.bin", 1, 2, b"tail").await;
    assert_eq!(status, StatusCode::OK);

    let (_, uploaded, _) = server.single_object();
    assert_eq!(&uploaded[..], b"good-tail");
}

#[tokio::test]
async fn test_content_type_of_final_fragment_is_used() {
    let server = TestServer::new().await;

    let form = MultipartForm::new()
        .text("fileName", "lobby.png")
        .text("chunkIndex", "0")
        .text("totalChunks", "1")
        .file("file", "blob", Some("image/png"), b"\x89PNG");
    let (status, body) = server.post_form(form).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let (_, _, content_type) = server.single_object();
    assert_eq!(content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_missing_content_type_defaults_to_octet_stream() {
    let server = TestServer::new().await;

    let form = MultipartForm::new()
        .text("fileName", "raw.dat")
        .text("chunkIndex", "0")
        .text("totalChunks", "1")
        .file("file", "blob", None, b"raw");
    let (status, body) = server.post_form(form).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let (_, _, content_type) = server.single_object();
    assert_eq!(content_type.as_deref(), Some("application/octet-stream"));
}

#[tokio::test]
async fn test_missing_fields_rejected() {
    let server = TestServer::new().await;

    let form = MultipartForm::new()
        .text("chunkIndex", "0")
        .text("totalChunks", "1")
        .file("file", "blob", None, b"x");
    let (status, body) = server.post_form(form).await;
    assert_failed(status, &body, StatusCode::BAD_REQUEST, "bad_request");
    assert!(body["error"].as_str().unwrap().contains("fileName"));

    let form = MultipartForm::new()
        .text("fileName", "a.txt")
        .text("chunkIndex", "0")
        .text("totalChunks", "1");
    let (status, body) = server.post_form(form).await;
    assert_failed(status, &body, StatusCode::BAD_REQUEST, "bad_request");
    assert!(body["error"].as_str().unwrap().contains("file"));

    assert!(server.staging_files().is_empty());
}

#[tokio::test]
async fn test_invalid_values_rejected() {
    let server = TestServer::new().await;

    let cases = [
        ("../escape.txt", "0", "1", "validation_error"),
        ("a/b.txt", "0", "1", "validation_error"),
        ("", "0", "1", "validation_error"),
        ("ok.txt", "3", "3", "validation_error"),
        ("ok.txt", "0", "0", "validation_error"),
        ("ok.txt", "-1", "2", "bad_request"),
        ("ok.txt", "0", "many", "bad_request"),
    ];

    for (name, index, total, code) in cases {
        let form = MultipartForm::new()
            .text("fileName", name)
            .text("chunkIndex", index)
            .text("totalChunks", total)
            .file("file", "blob", None, b"x");
        let (status, body) = server.post_form(form).await;
        assert_failed(status, &body, StatusCode::BAD_REQUEST, code);
    }

    assert!(server.staging_files().is_empty());
    assert_eq!(server.objects.object_put_count(), 0);
}

#[tokio::test]
async fn test_oversized_fragment_rejected() {
    let server = TestServer::with_config(|config| {
        config.server.max_fragment_size = 1024;
    })
    .await;

    let (status, body) = server.submit("big.bin", 0, 2, &seeded_bytes(1, 2048)).await;
    assert_failed(
        status,
        &body,
        StatusCode::PAYLOAD_TOO_LARGE,
        "fragment_too_large",
    );
    assert!(server.staging_files().is_empty());

    let (status, body) = server.submit("big.bin", 0, 2, &seeded_bytes(1, 1024)).await;
    assert_received(status, &body);
}

#[tokio::test]
async fn test_upload_failure_reports_error_and_cleans_combined() {
    let server = TestServer::new().await;
    server.objects.fail_object_puts(true);

    server.submit("fail.txt", 0, 2, b"one").await;
    let (status, body) = server.submit("fail.txt", 1, 2, b"two").await;
    assert_failed(
        status,
        &body,
        StatusCode::INTERNAL_SERVER_ERROR,
        "upload_failed",
    );
    assert!(server.staging_files().is_empty());
    assert_eq!(server.objects.object_put_count(), 0);
}

#[tokio::test]
async fn test_longest_file_name_assembles() {
    let server = TestServer::new().await;
    let name = format!("{}.bin", "n".repeat(MAX_FILE_NAME_LEN - 4));
    assert_eq!(name.len(), MAX_FILE_NAME_LEN);

    let (status, body) = server.submit(&name, 0, 2, b"head-").await;
    assert_received(status, &body);
    let (status, body) = server.submit(&name, 1, 2, b"tail").await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert!(body["url"].is_string());

    let (key, uploaded, _) = server.single_object();
    assert!(key.ends_with(&name));
    assert_eq!(&uploaded[..], b"head-tail");
    assert!(server.staging_files().is_empty());
}

#[tokio::test]
async fn test_overlong_file_name_is_validation_error() {
    let server = TestServer::new().await;
    let name = "n".repeat(MAX_FILE_NAME_LEN + 1);

    let (status, body) = server.submit(&name, 0, 2, b"data").await;
    assert_failed(status, &body, StatusCode::BAD_REQUEST, "validation_error");
    assert!(server.staging_files().is_empty());

    // Short of the path component limit, but its staging keys would exceed it
    let (status, body) = server.submit(&"n".repeat(220), 0, 2, b"data").await;
    assert_failed(status, &body, StatusCode::BAD_REQUEST, "validation_error");
}

#[tokio::test]
async fn test_staging_write_failure_reports_error() {
    let staging = MemoryBackend::new();
    let server = TestServer::with_memory_staging(staging.clone()).await;
    staging.fail_puts(true);

    let (status, body) = server.submit("lost.txt", 0, 2, b"one").await;
    assert_failed(
        status,
        &body,
        StatusCode::INTERNAL_SERVER_ERROR,
        "write_failed",
    );

    // A failing final fragment is reported the same way and nothing is published
    let (status, body) = server.submit("lost.txt", 1, 2, b"two").await;
    assert_failed(
        status,
        &body,
        StatusCode::INTERNAL_SERVER_ERROR,
        "write_failed",
    );
    assert!(staging.keys().is_empty());
    assert_eq!(server.objects.object_put_count(), 0);

    staging.fail_puts(false);
    server.submit("lost.txt", 0, 2, b"one").await;
    let (status, body) = server.submit("lost.txt", 1, 2, b"two").await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let (_, uploaded, _) = server.single_object();
    assert_eq!(&uploaded[..], b"onetwo");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    splice_server::metrics::register_metrics();
    let server = TestServer::new().await;
    server.submit("m.txt", 0, 1, b"metric").await;

    let (status, body) = server.get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("splice_fragments_received_total"));
    assert!(text.contains("splice_assemblies_completed_total"));
}

#[tokio::test]
async fn test_metrics_endpoint_disabled() {
    let server = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;

    let (status, _) = server.get("/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
