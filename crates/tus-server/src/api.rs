use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, header};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::engine::UploadEngine;
use crate::storage::ChunkStorage;

mod error;
mod metadata;
mod tus;

pub use error::{ApiError, ErrorResponse};
pub use metadata::MetadataError;
pub use tus::{TUS_RESUMABLE, TUS_VERSION, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET};

pub struct AppState<S: ChunkStorage> {
    pub engine: Arc<UploadEngine<S>>,
}

impl<S: ChunkStorage> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

pub fn router<S: ChunkStorage>(engine: UploadEngine<S>) -> Router {
    let state = AppState {
        engine: Arc::new(engine),
    };

    Router::new()
        .nest("/tus", tus::router())
        .layer(SetResponseHeaderLayer::if_not_present(
            TUS_RESUMABLE,
            HeaderValue::from_static(TUS_VERSION),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, HEAD, POST, PATCH, OPTIONS"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
