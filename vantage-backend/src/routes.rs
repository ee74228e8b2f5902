use crate::AppState;
use crate::analysis::UpdateOutcome;
use crate::error::AppError;
use crate::validation;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use axum_macros::debug_handler;
use headers::Authorization;
use headers::authorization::Bearer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vantage_db::{ActivityEvent, EventKind, PlayerId};

type Auth = Option<TypedHeader<Authorization<Bearer>>>;

#[derive(Deserialize)]
pub(crate) struct EventBatch {
    events: Vec<IncomingEvent>,
}

#[derive(Deserialize)]
pub(crate) struct IncomingEvent {
    player: PlayerId,
    at: i64,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Serialize)]
pub(crate) struct EventsAccepted {
    accepted: usize,
}

#[derive(Serialize)]
pub(crate) struct RefreshResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_date: Option<i64>,
}

#[derive(Serialize)]
pub(crate) struct InvalidateResponse {
    invalidated: bool,
}

#[derive(Serialize)]
pub(crate) struct FlushResponse {
    saved: usize,
    failed: Vec<PlayerId>,
}

/// Event and admin routes are open unless an API key is configured.
fn authorize(state: &AppState, auth: &Auth) -> Result<(), AppError> {
    let Some(expected) = &state.api_key_hash else {
        return Ok(());
    };
    match auth {
        Some(TypedHeader(auth)) if crate::helpers::hash_api_key(auth.token()) == *expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

#[debug_handler]
pub(crate) async fn post_events(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Json(payload): Json<EventBatch>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;

    // Validate the whole batch before recording any of it
    validation::validate_event_count(payload.events.len())?;
    for event in &payload.events {
        validation::validate_event(&event.kind)?;
    }

    let accepted = payload.events.len();
    for event in payload.events {
        state
            .pipeline
            .record_event(event.player, ActivityEvent::new(event.at, event.kind))?;
    }

    Ok((StatusCode::ACCEPTED, Json(EventsAccepted { accepted })))
}

pub(crate) async fn get_analysis(
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let snapshot = state.pipeline.analysis().ok_or(AppError::AnalysisNotReady)?;
    Ok(Json(&*snapshot).into_response())
}

#[debug_handler]
pub(crate) async fn get_player(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = validation::parse_player_id(&id)?;
    let report = state.pipeline.inspect(id).await?;
    Ok(Json(&*report).into_response())
}

/// Drop a cached player report so the next read rebuilds it.
pub(crate) async fn invalidate_report(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;

    let id = validation::parse_player_id(&id)?;
    let invalidated = state.pipeline.invalidate_report(id).await;
    Ok(Json(InvalidateResponse { invalidated }))
}

pub(crate) async fn admin_refresh(
    State(state): State<Arc<AppState>>,
    auth: Auth,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;

    let response = match state.pipeline.refresh_analysis().await? {
        UpdateOutcome::Completed(snapshot) => (
            StatusCode::OK,
            Json(RefreshResponse {
                status: "completed",
                refresh_date: Some(snapshot.refresh_date),
            }),
        ),
        UpdateOutcome::AlreadyRunning => (
            StatusCode::ACCEPTED,
            Json(RefreshResponse {
                status: "already_running",
                refresh_date: None,
            }),
        ),
    };
    Ok(response)
}

pub(crate) async fn admin_flush(
    State(state): State<Arc<AppState>>,
    auth: Auth,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;

    let report = state.pipeline.flush_cache().await?;
    Ok(Json(FlushResponse {
        saved: report.saved,
        failed: report.failed,
    }))
}

pub(crate) async fn admin_status(
    State(state): State<Arc<AppState>>,
    auth: Auth,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;

    Ok(Json(state.pipeline.status().await))
}
