#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parse_video::extractor::Transport;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;

pub const AWEME_ID: &str = "7301221455384038682";
pub const CDN_URL: &str = "https://cdn.example.com/v0200.mp4";

/// Bind a mock upstream on 127.0.0.1:0; the router factory receives the
/// base URL so pages can link back to the mock.
pub async fn spawn<F>(make_router: F) -> String
where
    F: FnOnce(String) -> Router,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = make_router(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

pub fn transport() -> Transport {
    Transport::new(Duration::from_secs(5), 5).unwrap()
}

pub async fn spawn_upstream() -> String {
    spawn(upstream_router).await
}

/// Generic HTTP behaviors plus douyin-style and haokan-style fixtures.
pub fn upstream_router(base: String) -> Router {
    Router::new()
        .route("/echo", get(echo).post(echo))
        .route("/hop/{n}", get(hop))
        .route("/cookie-hop", get(cookie_hop))
        .route("/elsewhere", get(elsewhere))
        .route("/see-other", axum::routing::post(see_other))
        .route("/slow", get(slow))
        .route("/status/{code}", get(status))
        .route("/s/{code}/", get(douyin_short_link))
        .route("/share/video/{id}/", get(douyin_share_page))
        .route("/douyin/share/video/{id}", get(douyin_share_page))
        .route("/broken/share/video/{id}/", get(broken_page))
        .route("/gone/share/video/{id}/", get(filtered_page))
        .route("/aweme/v1/play/", get(play_redirect))
        .route("/v", get(haokan_api))
        .with_state(base)
}

async fn echo(method: Method, headers: HeaderMap) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    Json(json!({
        "method": method.as_str(),
        "user_agent": header("user-agent"),
        "referer": header("referer"),
        "cookie": header("cookie"),
        "authorization": header("authorization"),
    }))
}

async fn hop(Path(n): Path<u32>) -> Response {
    // /hop/n takes n redirects to reach /echo.
    let next = if n <= 1 { "/echo".to_string() } else { format!("/hop/{}", n - 1) };
    (StatusCode::FOUND, [(LOCATION, next)]).into_response()
}

async fn cookie_hop() -> Response {
    (
        StatusCode::FOUND,
        [(SET_COOKIE, "sid=abc; Path=/; HttpOnly"), (LOCATION, "/echo")],
    )
        .into_response()
}

/// Redirect to the same server under another host name.
async fn elsewhere(State(base): State<String>) -> Response {
    let next = format!("{}/echo", base.replacen("127.0.0.1", "localhost", 1));
    (StatusCode::FOUND, [(LOCATION, next)]).into_response()
}

async fn see_other() -> Response {
    (StatusCode::SEE_OTHER, [(LOCATION, "/echo")]).into_response()
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "too late"
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn douyin_short_link(Path(_code): Path<String>) -> Response {
    (StatusCode::FOUND, [(LOCATION, format!("/share/video/{}/?region=CN", AWEME_ID))]).into_response()
}

pub fn router_data_page(base: &str, aweme_id: &str) -> String {
    let data = json!({
        "loaderData": {
            "video_(id)/page": {
                "videoInfoRes": {
                    "item_list": [{
                        "aweme_id": aweme_id,
                        "desc": "mock clip",
                        "author": {
                            "uid": "1001",
                            "nickname": "mock author",
                            "avatar_thumb": {"url_list": ["//p3.douyinpic.com/avatar.jpeg"]}
                        },
                        "video": {
                            "play_addr": {"url_list": [format!("{}/aweme/v1/playwm/?video_id=v0200", base)]},
                            "cover": {"url_list": ["https://p3.douyinpic.com/cover.jpeg"]},
                            "duration": 15000
                        }
                    }]
                }
            }
        }
    });
    format!(
        "<!doctype html><html><body><script>window._ROUTER_DATA = {};</script></body></html>",
        data
    )
}

async fn douyin_share_page(State(base): State<String>, Path(id): Path<String>) -> Html<String> {
    Html(router_data_page(&base, &id))
}

async fn broken_page(Path(_id): Path<String>) -> Html<&'static str> {
    Html("<html><body>verify you are human</body></html>")
}

async fn filtered_page(Path(_id): Path<String>) -> Html<String> {
    let data = json!({"loaderData": {"video_(id)/page": {"videoInfoRes": {
        "item_list": [],
        "filter_list": [{"filter_reason": "status_deleted"}]
    }}}});
    Html(format!("<script>window._ROUTER_DATA = {}</script>", data))
}

async fn play_redirect() -> Response {
    (StatusCode::FOUND, [(LOCATION, CDN_URL)]).into_response()
}

async fn haokan_api(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let vid = params.get("vid").cloned().unwrap_or_default();
    if params.get("_format").map(String::as_str) != Some("json") {
        return Json(json!({"errno": 1, "error": "format required"}));
    }
    if vid == "404" {
        return Json(json!({"errno": 2, "error": "视频不存在"}));
    }
    Json(json!({"errno": 0, "data": {"apiData": {"curVideoMeta": {
        "id": vid,
        "title": "haokan mock",
        "poster": "https://f7.baidu.com/poster.jpg",
        "duration": 125,
        "playurl": "https://vd3.bdstatic.com/sc.mp4",
        "clarityUrl": [
            {"key": "sd", "url": "https://vd3.bdstatic.com/sd.mp4"},
            {"key": "sc", "url": "https://vd3.bdstatic.com/sc.mp4"}
        ],
        "mth": {"mthid": "m1", "author_name": "hk", "author_photo": "https://f7.baidu.com/a.jpg"}
    }}}}))
}
