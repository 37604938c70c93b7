//! Drive folder browsing.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use lifehub_core::DriveImageItem;
use lifehub_providers::google::UI_PAGE_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};
use crate::session::AuthSession;
use crate::state::AppState;

use super::with_refresh_flag;

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/api/drive/images", get(list_images))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesQuery {
    pub page_token: Option<String>,
}

/// One page of the Drive grid.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesPage {
    pub items: Vec<DriveImageItem>,
    pub next_page_token: Option<String>,
}

async fn list_images(
    State(state): State<AppState>,
    auth: AuthSession,
    Query(query): Query<ImagesQuery>,
) -> ServerResult<Response> {
    let folder = state.config.folder_id().ok_or(ServerError::MissingFolder)?;
    let page_token = query.page_token.as_deref().filter(|t| !t.is_empty());

    let outcome = auth
        .execute(&state, |drive| async move {
            drive.list_images(folder, page_token, UI_PAGE_SIZE).await
        })
        .await?;

    let page = outcome.value;
    let body = ImagesPage {
        items: page
            .files
            .into_iter()
            .map(|f| DriveImageItem::new(f.id, f.name))
            .collect(),
        next_page_token: page.next_page_token,
    };
    Ok(with_refresh_flag(Json(body), outcome.rotated))
}
