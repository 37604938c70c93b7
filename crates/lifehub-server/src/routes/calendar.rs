//! Calendar CRUD and the countdown summary. Errors answer as `{"error": ...}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use lifehub_core::{CalendarEvent, Countdown, NewCalendarEvent, build_countdown};
use tracing::info;

use crate::error::{JsonError, ServerError};
use crate::session::AuthSession;
use crate::state::AppState;

type JsonResult<T> = Result<Json<T>, JsonError>;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/calendar", get(list_events).post(create_event))
        .route("/api/calendar/countdown", get(countdown))
        .route("/api/calendar/{id}", put(update_event).delete(delete_event))
}

fn parse_id(raw: &str) -> Result<i64, JsonError> {
    raw.trim()
        .parse()
        .map_err(|_| ServerError::bad_request("Invalid ID").into())
}

/// Unwraps a JSON body and checks it, answering 400 with the reason.
fn checked_body(
    body: Result<Json<NewCalendarEvent>, JsonRejection>,
) -> Result<NewCalendarEvent, JsonError> {
    let Json(event) = body.map_err(|e| ServerError::bad_request(e.body_text()))?;
    event.validate().map_err(ServerError::bad_request)?;
    Ok(event)
}

fn event_not_found() -> JsonError {
    ServerError::not_found("Event not found").into()
}

async fn list_events(
    State(state): State<AppState>,
    _auth: AuthSession,
) -> JsonResult<Vec<CalendarEvent>> {
    Ok(Json(state.store.list_events().await?))
}

async fn create_event(
    State(state): State<AppState>,
    _auth: AuthSession,
    body: Result<Json<NewCalendarEvent>, JsonRejection>,
) -> JsonResult<CalendarEvent> {
    let event = checked_body(body)?;
    let created = state.store.create_event(&event).await?;
    info!(id = created.id, kind = %created.event_type, "calendar event created");
    Ok(Json(created))
}

async fn update_event(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
    body: Result<Json<NewCalendarEvent>, JsonRejection>,
) -> JsonResult<CalendarEvent> {
    let id = parse_id(&id)?;
    let event = checked_body(body)?;
    let updated = state
        .store
        .update_event(id, &event)
        .await?
        .ok_or_else(event_not_found)?;
    Ok(Json(updated))
}

async fn delete_event(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
) -> JsonResult<serde_json::Value> {
    let id = parse_id(&id)?;
    if !state.store.delete_event(id).await? {
        return Err(event_not_found());
    }
    info!(id, "calendar event deleted");
    Ok(Json(serde_json::json!({ "message": "Event deleted successfully" })))
}

async fn countdown(State(state): State<AppState>, _auth: AuthSession) -> JsonResult<Countdown> {
    let events = state.store.list_events().await?;
    Ok(Json(build_countdown(&events, Utc::now())))
}
