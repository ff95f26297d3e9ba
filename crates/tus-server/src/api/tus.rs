//! TUS 1.0.0 protocol handlers.
//!
//! - OPTIONS /tus - Server capabilities
//! - POST /tus - Create an upload
//! - HEAD /tus/:id - Current offset and length
//! - PATCH /tus/:id - Append a chunk at the current offset
//! - GET /tus/:id - Download a completed upload
//! - OPTIONS /tus/:id - Capabilities plus current offset
//! - GET /tus/list - Every known upload

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::{get, head, post},
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::debug;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiError;
use crate::api::metadata;
use crate::storage::ChunkStorage;

pub const TUS_VERSION: &str = "1.0.0";

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");

const EXPOSE_OPTIONS: &str = "Tus-Resumable, Tus-Version, Tus-Max-Size, Tus-Extension";
const EXPOSE_POST: &str = "Location, Tus-Resumable";
const EXPOSE_HEAD: &str = "Upload-Offset, Upload-Length, Tus-Resumable";
const EXPOSE_PATCH: &str = "Upload-Offset, Tus-Resumable";

pub fn router<S: ChunkStorage>() -> Router<AppState<S>> {
    Router::new()
        .route("/", post(create_upload).options(server_options))
        .route("/list", get(list_uploads))
        .route(
            "/{id}",
            head(upload_status)
                .patch(append_chunk)
                .get(download)
                .options(upload_options),
        )
}

fn capability_headers(max_size: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION));
    headers.insert(TUS_EXTENSION, HeaderValue::from_static("creation"));
    headers.insert(TUS_MAX_SIZE, HeaderValue::from(max_size));
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_OPTIONS),
    );
    headers
}

/// OPTIONS /tus - Advertise protocol version, extensions and size ceiling
async fn server_options<S: ChunkStorage>(State(state): State<AppState<S>>) -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        capability_headers(state.engine.max_size()),
    )
}

/// OPTIONS /tus/:id - Capabilities plus the upload's current offset
async fn upload_options<S: ChunkStorage>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let status = state.engine.query_status(id)?;

    let mut headers = capability_headers(state.engine.max_size());
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(status.offset));
    Ok((StatusCode::NO_CONTENT, headers))
}

/// POST /tus - Create a new upload from Upload-Length
async fn create_upload<S: ChunkStorage>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let length = header_i64(&headers, &UPLOAD_LENGTH);
    let display_name = headers
        .get(&UPLOAD_METADATA)
        .and_then(|v| v.to_str().ok())
        .and_then(metadata::display_name);

    let id = state.engine.start_upload(length, display_name)?;

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, format!("/tus/{}", id.simple())),
            (header::ACCESS_CONTROL_EXPOSE_HEADERS, EXPOSE_POST.to_string()),
        ],
    ))
}

/// HEAD /tus/:id - Report how far the upload has progressed
async fn upload_status<S: ChunkStorage>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let status = state.engine.query_status(id)?;
    debug!(upload_id = %id, offset = status.offset, "Status query");

    Ok((
        StatusCode::OK,
        [
            (UPLOAD_OFFSET, HeaderValue::from(status.offset)),
            (UPLOAD_LENGTH, HeaderValue::from(status.length)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                HeaderValue::from_static(EXPOSE_HEAD),
            ),
        ],
    ))
}

/// PATCH /tus/:id - Append the request body at Upload-Offset (streamed)
async fn append_chunk<S: ChunkStorage>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;

    let headers = request.headers();
    let offset = header_i64(headers, &UPLOAD_OFFSET);
    let content_length = header_i64(headers, &header::CONTENT_LENGTH);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let stream = request
        .into_body()
        .into_data_stream()
        .map_err(std::io::Error::other);
    let reader = StreamReader::new(stream);

    let new_offset = state
        .engine
        .append_chunk(
            id,
            offset,
            content_length,
            content_type.as_deref(),
            Box::new(reader),
        )
        .await?;

    Ok((
        StatusCode::NO_CONTENT,
        [
            (UPLOAD_OFFSET, HeaderValue::from(new_offset)),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                HeaderValue::from_static(EXPOSE_PATCH),
            ),
        ],
    ))
}

/// GET /tus/:id - Download a completed upload (streamed)
async fn download<S: ChunkStorage>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let download = state.engine.fetch_completed(id).await?;

    let disposition = content_disposition(&download.file_name());
    let length = download.length;
    let body = Body::from_stream(download.stream);

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_LENGTH, HeaderValue::from(length)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// GET /tus/list - Snapshot of every upload session
async fn list_uploads<S: ChunkStorage>(State(state): State<AppState<S>>) -> impl IntoResponse {
    Json(state.engine.list())
}

fn parse_id(s: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(s).map_err(|_| ApiError::InvalidId(s.to_string()))
}

/// Parse an integer header; absent or malformed values become `None`.
fn header_i64(headers: &HeaderMap, name: &HeaderName) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn content_disposition(file_name: &str) -> HeaderValue {
    let safe: String = file_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
