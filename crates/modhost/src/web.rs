//! HTTP routes for fetching and uploading modules.
//!
//! All filesystem work runs on blocking threads; handlers only translate
//! query parameters into store calls and store errors into status codes.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use modstore::{FileModuleStore, ModuleName, ModuleStore, NameError, StoreError, StoreResult};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};

/// Reply for requests that do not ask for anything.
pub const HELLO: &str = "HELLO";

pub const CONTENT_HASH_HEADER: &str = "x-content-hash";

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FileModuleStore>,
    upload_token: Option<Arc<str>>,
    pub upload_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<FileModuleStore>,
        upload_token: Option<String>,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            store,
            upload_token: upload_token.map(Arc::from),
            upload_timeout,
        }
    }

    /// Whether the request carries the upload token. Always false when none is configured.
    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.upload_token.as_deref() else {
            return false;
        };
        headers
            .get(header::AUTHORIZATION)
            .is_some_and(|provided| token_eq(provided.as_bytes(), expected.as_bytes()))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("base_path", &self.store.config().base_path)
            .field("upload_token", &self.upload_token.as_ref().map(|_| "[REDACTED]"))
            .field("upload_timeout", &self.upload_timeout)
            .finish()
    }
}

/// Compare tokens without an early exit on the first differing byte.
fn token_eq(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(fetch_module))
        .route("/upload", post(upload_module))
        .route("/health", get(health))
        .with_state(state)
}

/// A request failure, rendered as a status code and a short plain-text body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("client hash does not match the stored module")]
    BadHash,

    #[error("upload stream ended with an error")]
    UploadAborted,

    #[error("{0}")]
    Internal(String),
}

impl From<NameError> for ApiError {
    fn from(err: NameError) -> Self {
        Self::Store(StoreError::InvalidName(err))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadHash | Self::UploadAborted => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(e) => match e {
                StoreError::InvalidName(_) => StatusCode::BAD_REQUEST,
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                StoreError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                StoreError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
                StoreError::Archive(_) | StoreError::CorruptSidecar { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                StoreError::ReadOnly => StatusCode::FORBIDDEN,
                StoreError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Body text. Never includes filesystem paths.
    fn message(&self) -> String {
        match self {
            Self::Unauthorized => "Invalid credentials".to_string(),
            Self::BadHash => "Bad hash".to_string(),
            Self::UploadAborted => "Upload failed".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            Self::Store(e) => match e {
                StoreError::InvalidName(_) => "Invalid module name".to_string(),
                StoreError::NotFound(_) => "Module not found".to_string(),
                StoreError::PayloadTooLarge { .. } => e.to_string(),
                StoreError::LockTimeout { .. } => "Module is busy, try again".to_string(),
                StoreError::DeadlineExceeded(_) => "Upload timed out".to_string(),
                StoreError::Archive(_) => "Module metadata is unreadable".to_string(),
                StoreError::CorruptSidecar { .. } => "Module hash is unreadable".to_string(),
                StoreError::ReadOnly => "Uploads are disabled".to_string(),
                StoreError::Io { .. } => "Internal server error".to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = matches!(&self, Self::Store(e) if e.is_retryable());
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), retryable, error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), retryable, error = %self, "request rejected");
        }

        let mut response = (status, self.message()).into_response();
        if matches!(self, Self::Store(StoreError::LockTimeout { .. })) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Query flags of `GET /`. Flags are presence-only; their values are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchQuery {
    module: Option<String>,
    fetch_module_hash: Option<String>,
    fetch_module_zip: Option<String>,
    fetch_module_revision: Option<String>,
    fetch_module_info: Option<String>,
    hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetch {
    Hash,
    Zip,
    Revision,
    Info,
}

impl FetchQuery {
    /// The requested item, first match wins.
    fn fetch(&self) -> Option<Fetch> {
        if self.fetch_module_hash.is_some() {
            Some(Fetch::Hash)
        } else if self.fetch_module_zip.is_some() {
            Some(Fetch::Zip)
        } else if self.fetch_module_revision.is_some() {
            Some(Fetch::Revision)
        } else if self.fetch_module_info.is_some() {
            Some(Fetch::Info)
        } else {
            None
        }
    }
}

/// Module downloads and lookups, selected by query flags.
#[tracing::instrument(
    name = "http.module.fetch",
    skip_all,
    fields(module = tracing::field::Empty, fetch = tracing::field::Empty)
)]
async fn fetch_module(
    State(state): State<AppState>,
    Query(query): Query<FetchQuery>,
) -> Result<Response, ApiError> {
    let (Some(raw), Some(fetch)) = (query.module.as_deref(), query.fetch()) else {
        return Ok(HELLO.into_response());
    };

    let name = ModuleName::parse(raw)?;
    let span = tracing::Span::current();
    span.record("module", name.as_str());
    span.record("fetch", tracing::field::debug(fetch));

    let store = state.store.clone();
    match fetch {
        Fetch::Hash => {
            let hash = blocking(move || store.get_hash(&name)).await?;
            Ok((
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                hash.into_inner(),
            )
                .into_response())
        }
        Fetch::Zip => fetch_zip(store, name, query.hash).await,
        Fetch::Revision => {
            let module = name.to_string();
            let revision = blocking(move || store.get_revision(&name)).await?;
            Ok(Json(serde_json::json!({ "module": module, "revision": revision })).into_response())
        }
        Fetch::Info => {
            let info = blocking(move || store.get_info(&name)).await?;
            Ok(Json(info).into_response())
        }
    }
}

/// Stream the archive. With `expected`, a stale client hash is refused before any bytes are sent.
async fn fetch_zip(
    store: Arc<FileModuleStore>,
    name: ModuleName,
    expected: Option<String>,
) -> Result<Response, ApiError> {
    let (reader, hash) = blocking(move || store.get_with_hash(&name)).await?;

    if let Some(expected) = expected {
        if !hash.matches(&expected) {
            return Err(ApiError::BadHash);
        }
    }

    let size_bytes = reader.size_bytes();
    tracing::debug!(path = %reader.path().display(), size_bytes, "streaming module");
    let file = tokio::fs::File::from_std(reader.into_file());
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, size_bytes)
        .header(CONTENT_HASH_HEADER, hash.as_str())
        .body(body)
        .map_err(|e| ApiError::Internal(format!("failed to build response: {}", e)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    upload_module: Option<String>,
}

/// Replace a module with the raw request body.
#[tracing::instrument(
    name = "http.module.upload",
    skip_all,
    fields(module = tracing::field::Empty, size_bytes = tracing::field::Empty)
)]
async fn upload_module(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let Some(raw) = query.upload_module.as_deref() else {
        return Ok(HELLO.into_response());
    };

    if !state.is_authorized(&headers) {
        return Err(ApiError::Unauthorized);
    }

    let name = ModuleName::parse(raw)?;
    tracing::Span::current().record("module", name.as_str());

    let deadline = Instant::now() + state.upload_timeout;

    // Distinguishes a broken client stream from a local I/O failure.
    let aborted = Arc::new(AtomicBool::new(false));
    let stream = body_until(body, deadline, aborted.clone());
    let mut reader = SyncIoBridge::new(StreamReader::new(stream));

    let store = state.store.clone();
    let result = blocking(move || store.put_until(&name, &mut reader, Some(deadline))).await;

    let receipt = match result {
        Ok(receipt) => receipt,
        Err(ApiError::Store(StoreError::Io { .. })) if aborted.load(Ordering::Relaxed) => {
            return Err(ApiError::UploadAborted)
        }
        Err(e) => return Err(e),
    };

    tracing::Span::current().record("size_bytes", receipt.size_bytes);
    tracing::info!(
        module = %receipt.name,
        hash = %receipt.hash,
        replaced = receipt.replaced,
        "module uploaded"
    );

    Ok((
        [(CONTENT_HASH_HEADER, receipt.hash.as_str().to_string())],
        "File uploaded successfully",
    )
        .into_response())
}

/// Request body chunks, each awaited no later than `deadline`.
///
/// A stalled client yields [`io::ErrorKind::TimedOut`] at the deadline,
/// which the store reports as `DeadlineExceeded`. A transport error sets
/// `aborted`.
fn body_until(
    body: Body,
    deadline: Instant,
    aborted: Arc<AtomicBool>,
) -> Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>> {
    let deadline = tokio::time::Instant::from_std(deadline);
    let stream = futures::stream::unfold(Some(body.into_data_stream()), move |data| {
        let aborted = aborted.clone();
        async move {
            let mut data = data?;
            match tokio::time::timeout_at(deadline, data.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(data))),
                Ok(Some(Err(e))) => {
                    aborted.store(true, Ordering::Relaxed);
                    Some((Err(io::Error::other(e)), None))
                }
                Ok(None) => None,
                Err(_) => Some((
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "request body not received before the upload deadline",
                    )),
                    None,
                )),
            }
        }
    });
    Box::pin(stream)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use modstore::{ContentHash, StoreConfig};
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const TOKEN: &str = "s3cret-token";

    fn module_zip(info: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("info", SimpleFileOptions::default()).unwrap();
        writer.write_all(info.as_bytes()).unwrap();
        writer.start_file("main.lua", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"return {}").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn setup_with(config: impl FnOnce(StoreConfig) -> StoreConfig, token: Option<&str>) -> (AppState, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileModuleStore::new(config(StoreConfig::with_base_path(temp_dir.path()))).unwrap();
        let state = AppState::new(
            Arc::new(store),
            token.map(str::to_string),
            Duration::from_secs(30),
        );
        (state, temp_dir)
    }

    fn setup() -> (AppState, TempDir) {
        setup_with(|c| c, Some(TOKEN))
    }

    fn seed(state: &AppState, module: &str, bytes: &[u8]) -> ContentHash {
        let name = ModuleName::parse(module).unwrap();
        state
            .store
            .put(&name, &mut Cursor::new(bytes.to_vec()))
            .unwrap()
            .hash
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn get(state: &AppState, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        send(state, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    fn upload_request(module: &str, token: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/upload?uploadModule={}", module));
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, token);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_root_says_hello() {
        let (state, _temp_dir) = setup();

        let (status, _, body) = get(&state, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, HELLO.as_bytes());

        let (status, _, body) = get(&state, "/?module=demo").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, HELLO.as_bytes());
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _temp_dir) = setup();
        let (status, _, body) = get(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_fetch_module_hash() {
        let (state, _temp_dir) = setup();
        let hash = seed(&state, "demo", b"archive bytes");

        let (status, _, body) = get(&state, "/?module=demo&fetchModuleHash").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, hash.as_str().as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_module_zip() {
        let (state, _temp_dir) = setup();
        let zip = module_zip(r#"{"revision": 1}"#);
        let hash = seed(&state, "audio.mixer", &zip);

        let (status, headers, body) = get(&state, "/?module=audio.mixer&fetchModuleZip").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/zip");
        assert_eq!(headers.get(CONTENT_HASH_HEADER).unwrap(), hash.as_str());
        assert_eq!(body, zip);
    }

    #[tokio::test]
    async fn test_fetch_module_zip_with_hash() {
        let (state, _temp_dir) = setup();
        let hash = seed(&state, "demo", b"cached");

        let uri = format!("/?module=demo&fetchModuleZip&hash={}", hash.as_str().to_uppercase());
        let (status, _, body) = get(&state, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"cached");

        let (status, _, body) = get(
            &state,
            "/?module=demo&fetchModuleZip&hash=00000000000000000000000000000000",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"Bad hash");
    }

    #[tokio::test]
    async fn test_fetch_unknown_module() {
        let (state, _temp_dir) = setup();

        for flag in ["fetchModuleHash", "fetchModuleZip", "fetchModuleRevision", "fetchModuleInfo"] {
            let (status, _, body) = get(&state, &format!("/?module=ghost&{}", flag)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", flag);
            assert_eq!(body, b"Module not found");
        }
    }

    #[tokio::test]
    async fn test_fetch_invalid_name() {
        let (state, _temp_dir) = setup();

        let (status, _, body) = get(&state, "/?module=..%2Fetc&fetchModuleZip").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"Invalid module name");
    }

    #[tokio::test]
    async fn test_fetch_revision_and_info() {
        let (state, _temp_dir) = setup();
        seed(&state, "ui.theme", &module_zip(r#"{"revision": "2.1", "title": "Dark"}"#));

        let (status, _, body) = get(&state, "/?module=ui.theme&fetchModuleRevision").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["module"], "ui.theme");
        assert_eq!(json["revision"], "2.1");

        let (status, _, body) = get(&state, "/?module=ui.theme&fetchModuleInfo").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["revision"], "2.1");
        assert_eq!(json["title"], "Dark");
    }

    #[tokio::test]
    async fn test_revision_of_non_archive() {
        let (state, _temp_dir) = setup();
        seed(&state, "raw", &[1, 2, 3]);

        let (status, _, _) = get(&state, "/?module=raw&fetchModuleRevision").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_upload() {
        let (state, _temp_dir) = setup();
        let zip = module_zip(r#"{"revision": 3}"#);

        let (status, headers, body) = send(&state, upload_request("demo", Some(TOKEN), zip.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"File uploaded successfully");
        assert_eq!(
            headers.get(CONTENT_HASH_HEADER).unwrap(),
            ContentHash::from_data(&zip).as_str()
        );

        let (_, _, body) = get(&state, "/?module=demo&fetchModuleZip").await;
        assert_eq!(body, zip);
    }

    #[tokio::test]
    async fn test_upload_requires_token() {
        let (state, _temp_dir) = setup();

        let (status, _, body) = send(&state, upload_request("demo", None, b"x".to_vec())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, b"Invalid credentials");

        let (status, _, _) = send(&state, upload_request("demo", Some("s3cret-tokeN"), b"x".to_vec())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = send(&state, upload_request("demo", Some("s3cret"), b"x".to_vec())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = get(&state, "/?module=demo&fetchModuleHash").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_disabled_without_token() {
        let (state, _temp_dir) = setup_with(|c| c, None);

        let (status, _, _) = send(&state, upload_request("demo", Some(""), b"x".to_vec())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_checked_before_name() {
        let (state, _temp_dir) = setup();

        let (status, _, _) = send(&state, upload_request("bad-name", None, b"x".to_vec())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, body) = send(&state, upload_request("bad-name", Some(TOKEN), b"x".to_vec())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"Invalid module name");
    }

    #[tokio::test]
    async fn test_upload_without_module_says_hello() {
        let (state, _temp_dir) = setup();

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, HELLO.as_bytes());
    }

    #[tokio::test]
    async fn test_upload_too_large_keeps_previous() {
        let (state, _temp_dir) = setup_with(|c| c.with_max_artifact_bytes(16), Some(TOKEN));
        seed(&state, "demo", b"small");

        let (status, _, _) = send(&state, upload_request("demo", Some(TOKEN), vec![7u8; 64])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let (_, _, body) = get(&state, "/?module=demo&fetchModuleZip").await;
        assert_eq!(body, b"small");
    }

    #[tokio::test]
    async fn test_upload_while_locked_is_retryable() {
        let (state, _temp_dir) = setup_with(
            |c| c.with_lock_timeout(Duration::from_millis(100)),
            Some(TOKEN),
        );
        let name = ModuleName::parse("busy").unwrap();
        let _held = state.store.begin_put(&name, None).unwrap();

        let (status, headers, _) = send(&state, upload_request("busy", Some(TOKEN), b"x".to_vec())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_upload_times_out_and_frees_module() {
        let (state, _temp_dir) = setup();
        let state = AppState {
            upload_timeout: Duration::from_millis(200),
            ..state
        };

        let stalled = futures::stream::iter(vec![Ok::<_, io::Error>(b"partial".to_vec())])
            .chain(futures::stream::pending());
        let request = Request::builder()
            .method("POST")
            .uri("/upload?uploadModule=demo")
            .header(header::AUTHORIZATION, TOKEN)
            .body(Body::from_stream(stalled))
            .unwrap();

        let started = Instant::now();
        let (status, _, body) = tokio::time::timeout(Duration::from_secs(10), send(&state, request))
            .await
            .expect("stalled upload must not hang");
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body, b"Upload timed out");
        assert!(started.elapsed() < Duration::from_secs(5));

        let (status, _, _) = send(&state, upload_request("demo", Some(TOKEN), b"whole".to_vec())).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_to_read_only_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileModuleStore::read_only_at(temp_dir.path()).unwrap();
        let state = AppState::new(Arc::new(store), Some(TOKEN.into()), Duration::from_secs(30));

        let (status, _, _) = send(&state, upload_request("demo", Some(TOKEN), b"x".to_vec())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_token_eq() {
        assert!(token_eq(b"secret-token-123", b"secret-token-123"));
        assert!(!token_eq(b"wrong-token", b"secret-token-123"));
        assert!(!token_eq(b"secret", b"secret-token-123"));
        assert!(!token_eq(b"", b"secret-token-123"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let (state, _temp_dir) = setup();
        let rendered = format!("{:?}", state);
        assert!(!rendered.contains(TOKEN));
        assert!(rendered.contains("REDACTED"));
    }
}
