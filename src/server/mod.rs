//! Thin HTTP front end over [`VideoParser`]. Every engine failure becomes a
//! `{code: 500, msg}` envelope; only auth failures change the HTTP status.

pub mod auth;

use crate::extractor::{ParseError, VideoInfo, VideoParser, VideoSource};
use auth::BasicAuth;
use axum::extract::{Query, State};
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const SUCCESS_MSG: &str = "解析成功";

#[derive(Clone)]
pub struct AppState {
    parser: VideoParser,
    auth: BasicAuth,
}

impl AppState {
    pub fn new(parser: VideoParser, auth: BasicAuth) -> Self {
        Self { parser, auth }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/video/share/url/parse", get(share_url_parse))
        .route("/video/id/parse", get(video_id_parse))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sources: VideoSource::ALL.iter().map(|s| s.as_str()).collect(),
    })
}

async fn share_url_parse(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ShareUrlQuery>,
) -> Result<Json<Envelope>, ApiError> {
    if !state.auth.is_authorized(&headers) {
        return Err(ApiError::Unauthorized);
    }

    let result = state.parser.resolve_share_url(&query.url).await;
    log_outcome(&result);
    Ok(Json(Envelope::from_result(result)))
}

async fn video_id_parse(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VideoIdQuery>,
) -> Result<Json<Envelope>, ApiError> {
    if !state.auth.is_authorized(&headers) {
        return Err(ApiError::Unauthorized);
    }

    let source: VideoSource = match query.source.parse() {
        Ok(source) => source,
        Err(e) => return Ok(Json(Envelope::failure(e.to_string()))),
    };

    let result = state.parser.resolve_id(source, &query.video_id).await;
    log_outcome(&result);
    Ok(Json(Envelope::from_result(result)))
}

fn log_outcome(result: &Result<VideoInfo, ParseError>) {
    match result {
        Ok(info) => info!(source = %info.source, raw_id = %info.raw_id, "parsed"),
        Err(e) => warn!(error = %e, retryable = e.is_retryable(), "parse failed"),
    }
}

// Missing parameters reach the engine as empty strings and come back as
// ordinary failures.
#[derive(Debug, Deserialize)]
pub struct ShareUrlQuery {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct VideoIdQuery {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub video_id: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sources: Vec<&'static str>,
}

/// Response body of both parse endpoints.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub code: u16,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<VideoData>,
}

impl Envelope {
    pub fn from_result(result: Result<VideoInfo, ParseError>) -> Self {
        match result {
            Ok(info) => Self {
                code: 200,
                msg: SUCCESS_MSG.to_string(),
                data: Some(VideoData::from(info)),
            },
            Err(e) => Self::failure(e.to_string()),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            code: 500,
            msg: msg.into(),
            data: None,
        }
    }
}

/// [`VideoInfo`] plus the convenience fields the endpoints add.
#[derive(Debug, Serialize)]
pub struct VideoData {
    #[serde(flatten)]
    pub info: VideoInfo,
    pub video_url: String,
    pub duration_seconds: f64,
    pub duration_formatted: String,
}

impl From<VideoInfo> for VideoData {
    fn from(info: VideoInfo) -> Self {
        Self {
            video_url: info.video_url().unwrap_or_default().to_string(),
            duration_seconds: duration_seconds(info.duration_ms),
            duration_formatted: format_duration(info.duration_ms),
            info,
        }
    }
}

/// Seconds rounded to two decimals.
pub fn duration_seconds(duration_ms: u64) -> f64 {
    (duration_ms as f64 / 10.0).round() / 100.0
}

/// `m:ss`, or `h:mm:ss` from one hour on. Unknown (zero) is `0:00`.
pub fn format_duration(duration_ms: u64) -> String {
    let total = duration_ms / 1000;
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, "Basic")],
                Json(Envelope::failure("用户名或密码错误")),
            )
                .into_response(),
        }
    }
}
