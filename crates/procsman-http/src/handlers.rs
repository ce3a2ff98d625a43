//! Route handlers: parse, delegate to the admin service, serialize.

use crate::response::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use procsman_common::{
    AdminError, Configuration, Event, EventKind, GroupId, Process, ProcessGroup, ProcessId,
    UsageSample,
};
use procsman_notify::NotificationsSettings;
use procsman_supervisor::{CreateGroupRequest, CreateProcessRequest, LogPiece, Signal};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stamp each response with a request id and the CORS header.
pub async fn wrap_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    debug!(%request_id, method = %request.method(), uri = %request.uri(), "request");

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
        .headers_mut()
        .insert("Access-Control-Allow-Origin", state.allow_origin.clone());
    response
}

fn parse_process_id(raw: &str) -> ApiResult<ProcessId> {
    if raw.is_empty() {
        return Err(AdminError::NoIdProvided.into());
    }
    raw.parse::<i64>()
        .map(ProcessId::new)
        .map_err(|_| AdminError::InvalidId.into())
}

fn parse_group_id(raw: &str) -> ApiResult<GroupId> {
    if raw.is_empty() {
        return Err(AdminError::NoIdProvided.into());
    }
    raw.parse::<i64>()
        .map(GroupId::new)
        .map_err(|_| AdminError::InvalidId.into())
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
    limit: Option<String>,
}

impl RangeQuery {
    fn parse(
        &self,
    ) -> ApiResult<(Option<DateTime<Utc>>, Option<DateTime<Utc>>, Option<usize>)> {
        let parse_time = |raw: &Option<String>| -> ApiResult<Option<DateTime<Utc>>> {
            match raw {
                None => Ok(None),
                Some(raw) => DateTime::parse_from_rfc3339(raw)
                    .map(|t| Some(t.with_timezone(&Utc)))
                    .map_err(|_| AdminError::InvalidTimeFrame.into()),
            }
        };
        let from = parse_time(&self.from)?;
        let to = parse_time(&self.to)?;
        let limit = match &self.limit {
            None => None,
            Some(raw) => Some(
                raw.parse::<usize>()
                    .map_err(|_| ApiError::from(AdminError::InvalidLimit))?,
            ),
        };
        Ok((from, to, limit))
    }
}

// ----- processes ----------------------------------------------------------

#[derive(Serialize)]
pub struct ProcessesResponse {
    processes: Vec<Process>,
}

pub async fn get_processes(State(state): State<AppState>) -> ApiResult<Json<ProcessesResponse>> {
    let processes = state.admin.list_processes().await?;
    Ok(Json(ProcessesResponse { processes }))
}

pub async fn get_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Process>> {
    let id = parse_process_id(&id)?;
    Ok(Json(state.admin.get_process(id).await?))
}

pub async fn add_process(
    State(state): State<AppState>,
    Json(req): Json<CreateProcessRequest>,
) -> ApiResult<Json<Process>> {
    Ok(Json(state.admin.create_process(req).await?))
}

pub async fn update_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateProcessRequest>,
) -> ApiResult<Json<Process>> {
    let id = parse_process_id(&id)?;
    Ok(Json(state.admin.update_process(id, req).await?))
}

pub async fn delete_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_process_id(&id)?;
    state.admin.delete_process(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ProcessStatusChange {
    enabled: bool,
}

async fn signal_process(
    state: &AppState,
    raw_id: &str,
    signal: Signal,
) -> ApiResult<Json<ProcessStatusChange>> {
    let id = parse_process_id(raw_id)?;
    state.admin.signal(id, signal).await?;
    Ok(Json(ProcessStatusChange {
        enabled: matches!(signal, Signal::Start | Signal::Restart),
    }))
}

pub async fn start_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProcessStatusChange>> {
    signal_process(&state, &id, Signal::Start).await
}

pub async fn stop_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProcessStatusChange>> {
    signal_process(&state, &id, Signal::Stop).await
}

pub async fn restart_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProcessStatusChange>> {
    signal_process(&state, &id, Signal::Restart).await
}

#[derive(Deserialize)]
pub struct StdinRequest {
    #[serde(default)]
    text: String,
}

pub async fn post_stdin(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StdinRequest>,
) -> ApiResult<StatusCode> {
    let id = parse_process_id(&id)?;
    state.admin.write_stdin(id, req.text).await?;
    Ok(StatusCode::ACCEPTED)
}

// ----- queries ------------------------------------------------------------

#[derive(Serialize)]
pub struct ProcessEvent {
    event: EventKind,
    time: i64,
}

#[derive(Serialize)]
pub struct EventsResponse {
    events: Vec<ProcessEvent>,
}

pub async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<EventsResponse>> {
    let id = parse_process_id(&id)?;
    let (from, to, limit) = range.parse()?;
    let events: Vec<Event> = state.admin.events(id, from, to, limit).await?;
    Ok(Json(EventsResponse {
        events: events
            .into_iter()
            .map(|e| ProcessEvent {
                event: e.kind,
                time: e.created_at.timestamp(),
            })
            .collect(),
    }))
}

#[derive(Serialize)]
pub struct ProcessStat {
    cpu_usage: i64,
    cpu_usage_percentage: f64,
    memory_usage: i64,
    time: i64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    stats: Vec<ProcessStat>,
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<StatsResponse>> {
    let id = parse_process_id(&id)?;
    let (from, to, _) = range.parse()?;
    let samples: Vec<UsageSample> = state.admin.stats(id, from, to).await?;
    Ok(Json(StatsResponse {
        stats: samples
            .into_iter()
            .map(|s| ProcessStat {
                cpu_usage: s.cpu_nanos,
                cpu_usage_percentage: s.cpu_percent,
                memory_usage: s.memory_bytes,
                time: s.created_at.timestamp(),
            })
            .collect(),
    }))
}

#[derive(Serialize)]
pub struct LogsResponse {
    logs: Vec<LogPiece>,
}

pub async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let id = parse_process_id(&id)?;
    let (from, to, _) = range.parse()?;
    let logs = state.admin.logs(id, from, to).await?;
    Ok(Json(LogsResponse { logs }))
}

// ----- groups -------------------------------------------------------------

pub async fn get_groups(State(state): State<AppState>) -> ApiResult<Json<Vec<ProcessGroup>>> {
    Ok(Json(state.admin.list_groups().await?))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProcessGroup>> {
    let id = parse_group_id(&id)?;
    Ok(Json(state.admin.get_group(id).await?))
}

pub async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<Json<ProcessGroup>> {
    Ok(Json(state.admin.create_group(req).await?))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_group_id(&id)?;
    state.admin.delete_group(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ----- configuration & notifications --------------------------------------

pub async fn get_default_configuration(
    State(state): State<AppState>,
) -> ApiResult<Json<Configuration>> {
    Ok(Json(state.admin.default_configuration()))
}

pub async fn get_notifications(
    State(state): State<AppState>,
) -> ApiResult<Json<NotificationsSettings>> {
    Ok(Json(state.notifier.settings()))
}

pub async fn update_notifications(
    State(state): State<AppState>,
    Json(settings): Json<NotificationsSettings>,
) -> ApiResult<Json<NotificationsSettings>> {
    state
        .notifier
        .update_settings(settings)
        .map_err(AdminError::internal)?;
    Ok(Json(state.notifier.settings()))
}
