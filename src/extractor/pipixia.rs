use super::embedded::{api_json, array_at, i64_at, last_path_segment, str_at, string_at};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

const PLATFORM: VideoSource = VideoSource::PiPiXia;
const CELL_API: &str = "https://api.pipix.com/bds/cell/cell_comment/";

pub struct PiPiXiaParser {
    transport: Transport,
}

impl PiPiXiaParser {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PlatformParser for PiPiXiaParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("share link redirect", share_url)
                    .user_agent(self.transport.mobile_user_agent())
                    .no_redirects(),
            )
            .await?;

        // h5.pipix.com/s/xxx -> h5.pipix.com/item/{cell_id}?...
        let landing: Url = resp
            .location()
            .ok_or_else(|| ParseError::shape(PLATFORM, "share link did not redirect"))?;
        let cell_id = last_path_segment(&landing)
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| ParseError::shape(PLATFORM, format!("no cell id in {}", landing)))?;
        debug!(%cell_id, "resolved share link");

        self.resolve_by_id(&cell_id).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let api = format!(
            "{}?offset=0&cell_type=1&api_version=1&cell_id={}&ac=wifi&channel=huawei_1319_64&aid=1319&app_name=super",
            CELL_API,
            urlencoding::encode(video_id)
        );
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("cell api", api).user_agent(self.transport.mobile_user_agent()),
            )
            .await?;

        let data = api_json(&resp.body).map_err(|e| e.into_parse_error(PLATFORM))?;
        parse_cell(&data, video_id)
    }
}

fn parse_cell(data: &Value, requested_id: &str) -> Result<VideoInfo, ParseError> {
    if let Some(status) = i64_at(data, "/status_code") {
        if status != 0 {
            let msg = str_at(data, "/message").unwrap_or("api error");
            return Err(ParseError::unavailable(PLATFORM, format!("{} (status {})", msg, status)));
        }
    }

    let item = data
        .pointer("/data/cell_comments/0/comment_info/item")
        .ok_or_else(|| ParseError::unavailable(PLATFORM, "cell has no item"))?;

    let author_id = string_at(item, "/author/id");

    let images: Vec<ImageInfo> = array_at(item, "/note/multi_image")
        .iter()
        .filter_map(|img| str_at(img, "/url_list/0/url"))
        .map(ImageInfo::new)
        .collect();

    VideoInfo::builder(PLATFORM, non_empty_or(string_at(item, "/item_id"), requested_id))
        .title(string_at(item, "/content"))
        .author(VideoAuthor {
            uid: author_id.clone(),
            name: string_at(item, "/author/name"),
            avatar: string_at(item, "/author/avatar/download_list/0/url"),
        })
        .cover_url(str_at(item, "/cover/url_list/0/url").unwrap_or_default())
        .play_urls(play_candidates(item, &author_id))
        .images(images)
        .duration_ms(video_duration_ms(item))
        .build()
}

/// The author's own comment repost carries the unbranded file; the item's
/// `video_high` is the watermarked fallback.
fn play_candidates(item: &Value, author_id: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for comment in array_at(item, "/comments") {
        let by_author = !author_id.is_empty() && string_at(comment, "/item/author/id") == author_id;
        if let (true, Some(url)) = (by_author, str_at(comment, "/item/video/video_high/url_list/0/url")) {
            urls.push(url.to_string());
        }
    }
    if let Some(url) = str_at(item, "/origin_video_download/url_list/0/url") {
        urls.push(url.to_string());
    }
    if let Some(url) = str_at(item, "/video/video_high/url_list/0/url") {
        urls.push(url.to_string());
    }
    urls
}

// Duration is reported in (possibly fractional) seconds.
fn video_duration_ms(item: &Value) -> u64 {
    item.pointer("/video/duration")
        .and_then(Value::as_f64)
        .filter(|d| *d > 0.0)
        .map(|d| (d * 1000.0).round() as u64)
        .unwrap_or(0)
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
