//! Document API endpoints.
//!
//! Handlers for upload, versions, listing, detail, delete, extracted text,
//! reprocessing and download URLs.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::db::{Document, DocumentPage, DocumentQuery, DocumentVersion, ExtractedText};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::service::{DocumentDetail, DownloadUrl};

use super::AppState;

/// List documents query parameters
#[derive(Deserialize)]
pub struct ListDocumentsParams {
    pub owner_id: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
}

/// Response for delete operations
#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub document_id: String,
}

/// Response for the extracted text endpoint
#[derive(Serialize)]
pub struct ExtractedTextResponse {
    pub document_id: String,
    /// `None` until a run has produced text for the current version
    pub text: Option<ExtractedText>,
}

/// An uploaded file spooled to an anonymous temp file, plus the text fields
/// that came with it
struct UploadForm {
    file: Option<(tokio::fs::File, String, Option<String>)>,
    fields: std::collections::HashMap<String, String>,
}

impl UploadForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn bad_request(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::InvalidRequest {
        message: e.to_string(),
    }
}

/// Drain a multipart upload, streaming the `file` part to disk
async fn read_upload_form(mut multipart: Multipart) -> ServiceResult<UploadForm> {
    let mut form = UploadForm {
        file: None,
        fields: Default::default(),
    };

    while let Some(mut field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or("").to_string();

        if name == "file" {
            let filename = field.file_name().unwrap_or("document").to_string();
            let content_type = field.content_type().map(str::to_string);

            let spool = tempfile::tempfile().map_err(ProcessingError::Io)?;
            let mut file = tokio::fs::File::from_std(spool);
            while let Some(chunk) = field.chunk().await.map_err(bad_request)? {
                file.write_all(&chunk).await.map_err(ProcessingError::Io)?;
            }
            file.flush().await.map_err(ProcessingError::Io)?;
            file.rewind().await.map_err(ProcessingError::Io)?;

            form.file = Some((file, filename, content_type));
        } else if !name.is_empty() {
            let value = field.text().await.map_err(bad_request)?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

/// List documents, newest first
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDocumentsParams>,
) -> ServiceResult<Json<DocumentPage>> {
    let defaults = DocumentQuery::default();
    let query = DocumentQuery {
        owner_id: params.owner_id.filter(|o| !o.is_empty()),
        search: params.search.filter(|s| !s.trim().is_empty()),
        page: params.page.unwrap_or(defaults.page),
        page_size: params.page_size.unwrap_or(defaults.page_size),
    };

    Ok(Json(state.service.list_documents(&query)?))
}

/// Upload a new document
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ServiceResult<(StatusCode, Json<Document>)> {
    let form = read_upload_form(multipart).await?;

    let owner_id = form
        .field("owner_id")
        .ok_or_else(|| bad_request("owner_id is required"))?
        .to_string();
    let title = form.field("title").map(str::to_string);
    let (file, filename, content_type) = form
        .file
        .ok_or_else(|| bad_request("No file provided"))?;

    let document = state
        .service
        .upload_document(
            file,
            &filename,
            content_type.as_deref(),
            title.as_deref(),
            &owner_id,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(document)))
}

/// Get a document and its version history
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<DocumentDetail>> {
    Ok(Json(state.service.get_document(&id)?))
}

/// Delete a document
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<DeleteResponse>> {
    state.service.delete_document(&id).await?;

    Ok(Json(DeleteResponse {
        success: true,
        document_id: id,
    }))
}

/// Latest extracted text for the current version
pub async fn extracted_text_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<ExtractedTextResponse>> {
    let text = state.service.get_extracted_text(&id)?;

    Ok(Json(ExtractedTextResponse {
        document_id: id,
        text,
    }))
}

/// List a document's versions
pub async fn list_versions_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Vec<DocumentVersion>>> {
    Ok(Json(state.service.list_versions(&id)?))
}

/// Upload new bytes as the next version of a document
pub async fn upload_version_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ServiceResult<(StatusCode, Json<Document>)> {
    let form = read_upload_form(multipart).await?;

    let owner_id = form
        .field("owner_id")
        .ok_or_else(|| bad_request("owner_id is required"))?
        .to_string();
    let change_summary = form.field("change_summary").map(str::to_string);
    let (file, filename, content_type) = form
        .file
        .ok_or_else(|| bad_request("No file provided"))?;

    let document = state
        .service
        .upload_version(
            &id,
            file,
            &filename,
            content_type.as_deref(),
            change_summary.as_deref(),
            &owner_id,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(document)))
}

/// Queue a document for another pipeline run
pub async fn reprocess_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<(StatusCode, Json<Document>)> {
    let document = state.service.reprocess_document(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(document)))
}

/// Pre-signed download URL for the current version
pub async fn download_url_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<DownloadUrl>> {
    Ok(Json(state.service.download_url(&id)?))
}
