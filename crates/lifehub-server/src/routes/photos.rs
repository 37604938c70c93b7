//! Photo library: upload, Drive import, listing, deletion and labels.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use lifehub_core::{
    ContentHash, Photo, data_url_mime_type, drive_download_url, strip_data_url_prefix,
    unique_upload_name,
};
use lifehub_providers::google::DriveFile;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::session::AuthSession;
use crate::state::AppState;
use crate::store::{NewPhoto, Store};

use super::with_refresh_flag;

const DEFAULT_FILE_NAME: &str = "upload.jpg";
const DEFAULT_MIME_TYPE: &str = "image/jpeg";

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/photos", get(list_photos))
        .route("/api/photos/upload", post(upload))
        .route("/api/photos/import", post(import))
        .route("/api/photos/{id}", delete(delete_photo))
        .route("/api/photos/{id}/labels", patch(update_labels))
}

/// Result of one upload, shared with concurrent duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedPhoto {
    pub file_id: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub uploaded_id: String,
    pub labels: Vec<String>,
    pub success: bool,
    pub message: String,
}

impl UploadResponse {
    fn new(photo: UploadedPhoto, duplicate: bool) -> Self {
        let message = if duplicate {
            "Photo was already uploaded"
        } else {
            "Photo uploaded"
        };
        Self {
            uploaded_id: photo.file_id,
            labels: photo.labels,
            success: true,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub imported: usize,
    pub total: usize,
    pub success: bool,
    pub message: String,
}

/// Fields of the upload form.
struct UploadForm {
    file_name: String,
    mime_type: String,
    bytes: Vec<u8>,
    description: Option<String>,
    /// Client-side (usually downscaled) copy used for labelling.
    base64: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> ServerResult<UploadForm> {
    let mut file = None;
    let mut description = None;
    let mut base64 = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::bad_request(format!("Invalid form: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or(DEFAULT_FILE_NAME)
                    .to_string();
                let mime_type = field
                    .content_type()
                    .filter(|t| !t.is_empty())
                    .unwrap_or(DEFAULT_MIME_TYPE)
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::bad_request(format!("Invalid form: {e}")))?;
                file = Some((file_name, mime_type, bytes.to_vec()));
            }
            Some("description") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServerError::bad_request(format!("Invalid form: {e}")))?;
                description = Some(text).filter(|t| !t.trim().is_empty());
            }
            Some("base64") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServerError::bad_request(format!("Invalid form: {e}")))?;
                base64 = Some(text).filter(|t| !t.trim().is_empty());
            }
            _ => {}
        }
    }

    let (file_name, mime_type, bytes) = file.ok_or_else(|| ServerError::bad_request("No file"))?;
    Ok(UploadForm {
        file_name,
        mime_type,
        bytes,
        description,
        base64,
    })
}

async fn list_photos(State(state): State<AppState>, _auth: AuthSession) -> ServerResult<Json<Vec<Photo>>> {
    Ok(Json(state.store.list_photos().await?))
}

async fn upload(
    State(state): State<AppState>,
    auth: AuthSession,
    multipart: Multipart,
) -> ServerResult<Response> {
    let form = read_upload_form(multipart).await?;
    let folder = state.config.folder_id().ok_or(ServerError::MissingFolder)?;
    let hash = ContentHash::of(&form.bytes);

    if let Some(existing) = state.store.find_by_content_hash(&hash).await? {
        info!(%hash, file_id = %existing.file_id, "upload matches a stored photo");
        let photo = UploadedPhoto {
            file_id: existing.file_id,
            labels: existing.labels,
        };
        return Ok(Json(UploadResponse::new(photo, true)).into_response());
    }

    let rotated = AtomicBool::new(false);
    let (state_ref, auth_ref, form_ref, hash_ref, rotated_ref) =
        (&state, &auth, &form, &hash, &rotated);
    let outcome = state
        .dedup
        .run(&hash, move || {
            store_upload(state_ref, auth_ref, folder, form_ref, hash_ref, rotated_ref)
        })
        .await?;

    let body = Json(UploadResponse::new(outcome.value, outcome.duplicate));
    Ok(with_refresh_flag(body, rotated.load(Ordering::Relaxed)))
}

/// Uploads the form's file to Drive, shares it, labels it and records it.
///
/// Creating and sharing run as separate wrapped calls, so an auth retry of
/// the grant targets the file already created.
async fn store_upload(
    state: &AppState,
    auth: &AuthSession,
    folder: &str,
    form: &UploadForm,
    hash: &ContentHash,
    rotated: &AtomicBool,
) -> ServerResult<UploadedPhoto> {
    let unique_name = unique_upload_name(&form.file_name, Utc::now());
    let name = unique_name.as_str();

    let created = auth
        .execute(state, |drive| async move {
            drive
                .upload_image(folder, name, &form.mime_type, &form.bytes)
                .await
        })
        .await?;
    rotated.fetch_or(created.rotated, Ordering::Relaxed);
    let file = created.value;

    if state.google.public_read {
        let file_id = file.id.as_str();
        let granted = auth
            .execute(state, |drive| async move { drive.grant_public_read(file_id).await })
            .await?;
        rotated.fetch_or(granted.rotated, Ordering::Relaxed);
    }

    let labels = generate_labels(state, form).await;
    let photo = NewPhoto {
        image_url: drive_download_url(&file.id),
        file_id: file.id.clone(),
        name: file.name,
        unique_name: Some(unique_name),
        description: form.description.clone(),
        content_hash: Some(hash.clone()),
    };
    match state.store.insert_photo(&photo, &labels).await? {
        Some(id) => info!(id, file_id = %file.id, labels = labels.len(), "photo stored"),
        None => debug!(file_id = %file.id, "photo row already existed"),
    }

    Ok(UploadedPhoto {
        file_id: file.id,
        labels,
    })
}

/// Labels the `base64` copy when it decodes, otherwise the uploaded bytes.
///
/// The copy's media type comes from its data-URL prefix, defaulting to JPEG.
async fn generate_labels(state: &AppState, form: &UploadForm) -> Vec<String> {
    let decoded = form.base64.as_deref().and_then(|data| {
        match STANDARD.decode(strip_data_url_prefix(data).trim()) {
            Ok(bytes) if !bytes.is_empty() => {
                let mime_type = data_url_mime_type(data).unwrap_or(DEFAULT_MIME_TYPE);
                Some((bytes, mime_type))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "ignoring undecodable base64 field");
                None
            }
        }
    });
    match &decoded {
        Some((bytes, mime_type)) => state.labeler.generate(bytes, mime_type).await,
        None => state.labeler.generate(&form.bytes, &form.mime_type).await,
    }
}

async fn import(State(state): State<AppState>, auth: AuthSession) -> ServerResult<Response> {
    let folder = state.config.folder_id().ok_or(ServerError::MissingFolder)?;

    let outcome = auth
        .execute(&state, |drive| async move { drive.list_all_images(folder).await })
        .await?;

    let files = outcome.value;
    let total = files.len();
    let mut imported = 0;
    for file in &files {
        match import_one(&state.store, file).await {
            Ok(true) => imported += 1,
            Ok(false) => {}
            Err(e) => warn!(file_id = %file.id, error = %e, "skipping file that failed to import"),
        }
    }
    info!(imported, total, "drive import finished");

    let body = Json(ImportResponse {
        imported,
        total,
        success: true,
        message: format!("Imported {imported} of {total} photos"),
    });
    Ok(with_refresh_flag(body, outcome.rotated))
}

/// Inserts a Drive file unless it is already in the library.
async fn import_one(store: &Store, file: &DriveFile) -> sqlx::Result<bool> {
    if store.photo_exists(&file.id).await? {
        return Ok(false);
    }
    let inserted = store
        .insert_photo(&NewPhoto::imported(&file.id, &file.name), &[])
        .await?;
    Ok(inserted.is_some())
}

fn parse_id(raw: &str) -> ServerResult<i64> {
    raw.trim()
        .parse()
        .map_err(|_| ServerError::bad_request("Invalid ID"))
}

async fn delete_photo(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
) -> ServerResult<StatusCode> {
    let id = parse_id(&id)?;
    if state.store.delete_photo(id).await? {
        info!(id, "photo deleted");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn update_labels(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ServerResult<Json<serde_json::Value>> {
    let id = parse_id(&id)?;
    let labels: Vec<String> = body
        .get("labels")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ServerError::bad_request("Labels must be an array"))?
        .iter()
        .filter_map(serde_json::Value::as_str)
        .map(str::to_string)
        .collect();

    let stored = state
        .store
        .replace_labels(id, &labels)
        .await?
        .ok_or_else(|| ServerError::not_found("Photo not found"))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Labels updated",
        "labels": stored,
    })))
}
