//! Signed object retrieval.
//!
//! Serves the URLs produced by `ContentStore::presigned_url`; the signature
//! and expiry are checked before the store is touched.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::ServiceResult;

use super::AppState;

#[derive(Deserialize)]
pub struct SignedObjectParams {
    pub expires: i64,
    pub signature: String,
}

/// Stream an object's bytes if the URL signature is valid and unexpired
pub async fn get_object_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<SignedObjectParams>,
) -> ServiceResult<Response> {
    state
        .signer
        .verify(&path, params.expires, &params.signature)?;

    let meta = state.service.store.stat(&path).await?;
    let stream = state.service.store.get_stream(&path).await?;
    debug!(path = %path, bytes = meta.length, "Serving signed object");

    Ok((
        [
            (header::CONTENT_TYPE, meta.content_type),
            (header::CONTENT_LENGTH, meta.length.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
