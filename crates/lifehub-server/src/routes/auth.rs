//! Google sign-in, sign-out and session lookup.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use lifehub_providers::google::PkceFlow;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};
use crate::session::{
    SESSION_COOKIE, Session, is_allowed, load_session, safe_callback_url, session_id,
};
use crate::state::AppState;

const CALLBACK_PATH: &str = "/api/auth/callback/google";

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signin", get(sign_in))
        .route(CALLBACK_PATH, get(callback))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/auth/session", get(current_session))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInQuery {
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// What the browser learns about its session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub email: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

fn redirect_uri(state: &AppState) -> String {
    format!(
        "{}{CALLBACK_PATH}",
        state.config.server.public_url.trim_end_matches('/')
    )
}

async fn sign_in(
    State(state): State<AppState>,
    Query(query): Query<SignInQuery>,
) -> ServerResult<Redirect> {
    let flow = PkceFlow::new();
    let url = state
        .google
        .oauth
        .authorization_url(&flow, &redirect_uri(&state), &state.google.scopes)?;

    let callback_url = safe_callback_url(query.callback_url.as_deref());
    state
        .sessions
        .begin_sign_in(flow.state, flow.verifier, callback_url)
        .await;
    Ok(Redirect::to(&url))
}

async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> ServerResult<Response> {
    if let Some(error) = query.error {
        warn!(%error, "google sign-in was not completed");
        let target = format!("/auth/error?error={}", urlencoding::encode(&error));
        return Ok(Redirect::to(&target).into_response());
    }

    let (Some(code), Some(sign_in_state)) = (query.code, query.state) else {
        return Err(ServerError::bad_request("Missing code or state"));
    };
    let pending = state
        .sessions
        .finish_sign_in(&sign_in_state)
        .await
        .ok_or_else(|| ServerError::bad_request("Unknown or expired sign-in"))?;

    let oauth = &state.google.oauth;
    let tokens = oauth
        .exchange_code(&code, &pending.verifier, &redirect_uri(&state))
        .await?;
    let user = oauth.user_info(&tokens.access_token).await?;

    if !is_allowed(&user.email, &state.config.google.allowed_emails) {
        warn!(email = %user.email, "sign-in refused, not on the allow list");
        return Ok(Redirect::to("/unauthorized").into_response());
    }

    let max_age = time::Duration::try_from(state.sessions.max_age())
        .map_err(|e| ServerError::config(format!("invalid session max age: {e}")))?;
    let id = state.sessions.create(Session::new(user.email, tokens)).await;
    let cookie = Cookie::build((SESSION_COOKIE, id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .secure(state.config.server.secure_cookies);
    Ok((jar.add(cookie), Redirect::to(&pending.callback_url)).into_response())
}

async fn sign_out(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE)
        && let Some(session) = state.sessions.remove(cookie.value()).await
    {
        info!(email = %session.email, "signed out");
    }
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        StatusCode::NO_CONTENT,
    )
}

async fn current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ServerResult<Json<SessionInfo>> {
    let id = session_id(&headers).ok_or(ServerError::Unauthorized)?;
    let session = load_session(&state, &id)
        .await
        .ok_or(ServerError::Unauthorized)?;
    Ok(Json(SessionInfo {
        email: session.email,
        expires_at: session.tokens.expires_at,
        error: session.error,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::super::testing::*;
    use axum::body::Body;
    use axum::http::{StatusCode, header};
    use httpmock::prelude::*;
    use tower::ServiceExt;

    fn location(response: &axum::http::Response<Body>) -> String {
        response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string()
    }

    fn set_cookie(response: &axum::http::Response<Body>) -> String {
        response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn mock_google_account(server: &MockServer, email: &str) {
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_contains("grant_type=authorization_code")
                    .body_contains("code=auth-code")
                    .body_contains("code_verifier=verifier-1");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A1",
                    "refresh_token": "R1",
                    "expires_in": 3599
                }));
            })
            .await;
        let email = email.to_string();
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/userinfo")
                    .header("authorization", "Bearer A1");
                then.status(200)
                    .json_body(serde_json::json!({ "email": email, "name": "Me" }));
            })
            .await;
    }

    #[tokio::test]
    async fn sign_in_redirects_to_consent() {
        let server = MockServer::start_async().await;
        let state = test_state(&server).await;

        let response = router(state.clone())
            .oneshot(get("/api/auth/signin?callbackUrl=%2Fcalendar", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let target = location(&response);
        assert!(target.starts_with(&format!("{}/o/oauth2/v2/auth?", server.base_url())));
        assert!(target.contains("code_challenge_method=S256"));
        assert!(target.contains("access_type=offline"));
        assert!(target.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fapi%2Fauth%2Fcallback%2Fgoogle"
        ));

        let sign_in_state = target
            .split('&')
            .find_map(|pair| pair.strip_prefix("state="))
            .unwrap();
        let pending = state.sessions.finish_sign_in(sign_in_state).await.unwrap();
        assert_eq!(pending.callback_url, "/calendar");
    }

    #[tokio::test]
    async fn callback_creates_session() {
        let server = MockServer::start_async().await;
        mock_google_account(&server, "me@example.com").await;
        let state = test_state(&server).await;
        state
            .sessions
            .begin_sign_in("state-1".into(), "verifier-1".into(), "/photos".into())
            .await;

        let response = router(state.clone())
            .oneshot(get(
                "/api/auth/callback/google?code=auth-code&state=state-1",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/photos");

        let cookie = set_cookie(&response);
        assert!(cookie.starts_with("lifehub_session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=2592000"));

        let pair = cookie.split(';').next().unwrap().to_string();
        let response = router(state)
            .oneshot(get("/api/auth/session", Some(&pair)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["email"], "me@example.com");
        assert!(body["expiresAt"].is_string());
        assert!(body["error"].is_null());
    }

    #[tokio::test]
    async fn callback_refuses_unlisted_email() {
        let server = MockServer::start_async().await;
        mock_google_account(&server, "stranger@example.com").await;
        let mut config = test_config();
        config.google.allowed_emails = vec!["me@example.com".to_string()];
        let state = state_with(config, &server, std::sync::Arc::new(lifehub_providers::DisabledLabeler)).await;
        state
            .sessions
            .begin_sign_in("state-1".into(), "verifier-1".into(), "/".into())
            .await;

        let response = router(state.clone())
            .oneshot(get(
                "/api/auth/callback/google?code=auth-code&state=state-1",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/unauthorized");
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(state.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn callback_rejects_unknown_state() {
        let server = MockServer::start_async().await;
        let state = test_state(&server).await;

        let response = router(state)
            .oneshot(get(
                "/api/auth/callback/google?code=auth-code&state=forged",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_forwards_google_error() {
        let server = MockServer::start_async().await;
        let state = test_state(&server).await;

        let response = router(state)
            .oneshot(get(
                "/api/auth/callback/google?error=access_denied",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/auth/error?error=access_denied");
    }

    #[tokio::test]
    async fn sign_out_drops_session() {
        let server = MockServer::start_async().await;
        let state = test_state(&server).await;
        let cookie = sign_in(&state, "A1").await;

        let response = router(state.clone())
            .oneshot(request("POST", "/api/auth/signout", Some(&cookie), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(set_cookie(&response).starts_with("lifehub_session="));
        assert_eq!(state.sessions.len().await, 0);

        let response = router(state)
            .oneshot(get("/api/auth/session", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_reports_refresh_error() {
        let server = MockServer::start_async().await;
        let state = test_state(&server).await;
        let cookie = sign_in(&state, "A1").await;
        let id = cookie.split_once('=').unwrap().1;
        state.sessions.mark_refresh_failed(id, "R1").await;

        let response = router(state)
            .oneshot(get("/api/auth/session", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"], "RefreshAccessTokenError");
    }
}
