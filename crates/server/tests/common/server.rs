//! Server test utilities.

use super::fixtures::MultipartForm;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use splice_core::config::AppConfig;
use splice_server::{AppState, create_router};
use splice_storage::{FragmentStore, MemoryBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server with filesystem staging and an in-memory object store.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Destination store, inspectable for uploaded objects.
    pub objects: MemoryBackend,
    pub staging_dir: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, None).await
    }

    /// Create a test server whose staging area is the given in-memory backend,
    /// so staging failures can be injected.
    pub async fn with_memory_staging(staging: MemoryBackend) -> Self {
        Self::build(|_| {}, Some(staging)).await
    }

    async fn build<F>(modifier: F, memory_staging: Option<MemoryBackend>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);

        let staging_dir = config.staging.path.clone();
        let staging: Arc<dyn FragmentStore> = match memory_staging {
            Some(staging) => Arc::new(staging),
            None => splice_storage::staging_from_config(&config.staging)
                .await
                .expect("Failed to create staging"),
        };
        let objects = MemoryBackend::new();

        let state = AppState::new(config, staging, Arc::new(objects.clone()));
        let router = create_router(state.clone());

        Self {
            router,
            state,
            objects,
            staging_dir,
            _temp_dir: temp_dir,
        }
    }

    /// POST a multipart form to the fragment endpoint.
    pub async fn post_form(&self, form: MultipartForm) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/uploads/chunks")
            .header("Content-Type", MultipartForm::content_type())
            .body(Body::from(form.into_body()))
            .unwrap();
        let (status, body) = self.send(request).await;
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    /// Submit one fragment.
    pub async fn submit(
        &self,
        file_name: &str,
        index: u32,
        total: u32,
        data: &[u8],
    ) -> (StatusCode, Value) {
        self.post_form(MultipartForm::fragment(file_name, index, total, data))
            .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    /// Names of all files currently in staging, sorted.
    pub fn staging_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.staging_dir)
            .expect("Failed to read staging directory")
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Key, content, and content type of the single uploaded object.
    pub fn single_object(&self) -> (String, Bytes, Option<String>) {
        let keys = self.objects.keys();
        assert_eq!(keys.len(), 1, "expected exactly one object, found {keys:?}");
        let (data, content_type) = self.objects.entry(&keys[0]).unwrap();
        (keys[0].clone(), data, content_type)
    }
}
