use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ApiError, AppState, SESSION_COOKIE, SESSION_HEADER, USER_HEADER};
use crate::analytics::{ProgressEvent, ProgressReport};
use crate::booking::{Buyer, VerificationResult};
use crate::error::ErrorKind;
use crate::store::{PlanType, TransactionKind};
use crate::subscription::SubscriptionVerification;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct ReserveBody {
    pub name: String,
    pub email: String,
}

pub async fn reserve_seat(
    State(state): State<AppState>,
    Path((movie_id, seat_id)): Path<(i64, i64)>,
    Json(body): Json<ReserveBody>,
) -> ApiResult<Response> {
    let checkout = state
        .booking
        .reserve_seat(movie_id, seat_id, &Buyer::new(body.name, body.email))
        .await?;
    Ok((StatusCode::CREATED, Json(checkout)).into_response())
}

/// Gateways name the reference `tx_ref` or `trx_ref` depending on the
/// delivery path.
#[derive(Debug, Default, Deserialize)]
pub struct ReferenceParams {
    #[serde(alias = "trx_ref")]
    pub tx_ref: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Settlement {
    Reservation(VerificationResult),
    Subscription(SubscriptionVerification),
}

pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<ReferenceParams>,
    body: Option<Json<ReferenceParams>>,
) -> ApiResult<Json<Settlement>> {
    let tx_ref = body
        .and_then(|Json(params)| params.tx_ref)
        .or(query.tx_ref);
    settle(&state, tx_ref).await.map(Json)
}

pub async fn payment_return(
    State(state): State<AppState>,
    Query(query): Query<ReferenceParams>,
) -> ApiResult<Json<Settlement>> {
    settle(&state, query.tx_ref).await.map(Json)
}

async fn settle(state: &AppState, tx_ref: Option<String>) -> ApiResult<Settlement> {
    let tx_ref = tx_ref
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing tx_ref"))?;
    let transaction = state
        .booking
        .store()
        .fetch_transaction(&tx_ref)?
        .ok_or_else(|| {
            ApiError::from_kind(ErrorKind::NotFound, format!("transaction {tx_ref} not found"))
        })?;
    match transaction.kind {
        TransactionKind::Reservation => Ok(Settlement::Reservation(
            state.booking.verify_payment(&tx_ref).await?,
        )),
        TransactionKind::Subscription => Ok(Settlement::Subscription(
            state.subscriptions.verify_subscription(&tx_ref).await?,
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    pub full_name: String,
    pub email: String,
    pub plan: PlanType,
}

pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubscribeBody>,
) -> ApiResult<Response> {
    let user_id = user_id(&headers)?;
    let checkout = state
        .subscriptions
        .subscribe(&user_id, &Buyer::new(body.full_name, body.email), body.plan)
        .await?;
    Ok((StatusCode::CREATED, Json(checkout)).into_response())
}

pub async fn verify_subscription(
    State(state): State<AppState>,
    Query(query): Query<ReferenceParams>,
) -> ApiResult<Json<SubscriptionVerification>> {
    let tx_ref = query
        .tx_ref
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing tx_ref"))?;
    let verification = state.subscriptions.verify_subscription(tx_ref.trim()).await?;
    Ok(Json(verification))
}

pub async fn playback(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user_id = user_id(&headers)?;
    let grant = state.playback.playback_url(&user_id, content_id)?;
    Ok(Json(grant).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeParams {
    pub video_id: Option<String>,
    pub expires: Option<String>,
    pub signature: Option<String>,
}

/// Anything missing, malformed or mismatched is a 403.
pub async fn authorize(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
    Query(params): Query<AuthorizeParams>,
) -> ApiResult<StatusCode> {
    let asset_id = content_id.to_string();
    let denied = || ApiError::from_kind(ErrorKind::AuthorizationFailure, "access denied");
    if params.video_id.as_deref().is_some_and(|id| id != asset_id) {
        return Err(denied());
    }
    let expires = params
        .expires
        .as_deref()
        .and_then(|value| value.parse::<i64>().ok())
        .ok_or_else(denied)?;
    let signature = params.signature.as_deref().ok_or_else(denied)?;
    state.playback.authorize(&asset_id, expires, signature)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn encryption_key(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user_id = user_id(&headers)?;
    let key = state.playback.encryption_key(&user_id, content_id).await?;
    Ok((
        [
            (CONTENT_TYPE, "application/octet-stream"),
            (CACHE_CONTROL, "no-store"),
        ],
        key,
    )
        .into_response())
}

/// Loose JSON parsing: non-numeric deltas are treated as absent rather
/// than rejected.
pub async fn report_progress(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let user_id = user_id(&headers)?;
    let report = progress_report(&body)?;
    let (session_id, minted) = match session_id(&headers) {
        Some(id) => (id, false),
        None => (Uuid::new_v4().simple().to_string(), true),
    };
    let outcome = state
        .analytics
        .report_progress(&user_id, Some(&session_id), content_id, &report)?;
    let mut response = Json(outcome).into_response();
    if minted {
        let cookie = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(SET_COOKIE, value);
        }
    }
    Ok(response)
}

pub async fn rate(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let user_id = user_id(&headers)?;
    let value = body
        .get("rating")
        .or_else(|| body.get("value"))
        .and_then(integer)
        .ok_or_else(|| {
            ApiError::from_kind(ErrorKind::ValidationFailure, "rating must be an integer from 1 to 5")
        })?;
    let summary = state.analytics.rate(&user_id, content_id, value)?;
    Ok(Json(summary).into_response())
}

pub async fn export_csv(State(state): State<AppState>) -> ApiResult<Response> {
    let mut buffer = Vec::new();
    state.analytics.export_csv(&mut buffer)?;
    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                CONTENT_DISPOSITION,
                "attachment; filename=\"content_analytics.csv\"",
            ),
        ],
        buffer,
    )
        .into_response())
}

fn user_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("missing user identity"))
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string());
    from_cookie
        .or_else(|| {
            headers
                .get(SESSION_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim().to_string())
        })
        .filter(|value| !value.is_empty())
}

fn progress_report(body: &Value) -> ApiResult<ProgressReport> {
    let event = match body.get("event").and_then(Value::as_str) {
        None => None,
        Some("start") => Some(ProgressEvent::Start),
        Some("progress") => Some(ProgressEvent::Progress),
        Some(other) => {
            return Err(ApiError::from_kind(
                ErrorKind::ValidationFailure,
                format!("unknown event {other:?}"),
            ))
        }
    };
    Ok(ProgressReport {
        event,
        watched_seconds_delta: body.get("watched_seconds_delta").and_then(number),
        watched_seconds: body.get("watched_seconds").and_then(number),
        region: body
            .get("region")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
