//! HTTP routes.

pub mod auth;
pub mod calendar;
pub mod drive;
pub mod photos;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::session::TOKEN_REFRESHED_HEADER;
use crate::state::AppState;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_bytes;

    Router::new()
        .route("/health", get(health))
        .merge(auth::routes())
        .merge(drive::routes())
        .merge(photos::routes())
        .merge(calendar::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Adds `X-Token-Refreshed: true` when the session's tokens were rotated.
pub(crate) fn with_refresh_flag(body: impl IntoResponse, rotated: bool) -> Response {
    let mut response = body.into_response();
    if rotated {
        response
            .headers_mut()
            .insert(TOKEN_REFRESHED_HEADER, HeaderValue::from_static("true"));
    }
    response
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::testing::get;
    use super::*;
    use axum::http::StatusCode;
    use httpmock::MockServer;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check() {
        let server = MockServer::start_async().await;
        let app = router(test_state(&server).await);

        let response = app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let server = MockServer::start_async().await;
        let app = router(test_state(&server).await);

        let response = app.oneshot(get("/nope", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn refresh_flag_only_when_rotated() {
        let response = with_refresh_flag("ok", true);
        assert_eq!(response.headers()[TOKEN_REFRESHED_HEADER], "true");
        let response = with_refresh_flag("ok", false);
        assert!(response.headers().get(TOKEN_REFRESHED_HEADER).is_none());
    }
}
