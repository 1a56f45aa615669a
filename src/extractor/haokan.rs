use super::embedded::{api_json, array_at, i64_at, query_param, secs_to_ms, str_at, string_at};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;
use url::Url;

const PLATFORM: VideoSource = VideoSource::HaoKan;
const API_BASE: &str = "https://haokan.baidu.com";

pub struct HaoKanParser {
    transport: Transport,
    api_base: String,
}

impl HaoKanParser {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl PlatformParser for HaoKanParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let url = Url::parse(share_url).map_err(|_| ParseError::MalformedInput(share_url.to_string()))?;
        let vid = query_param(&url, "vid")
            .ok_or_else(|| ParseError::shape(PLATFORM, format!("no vid in {}", share_url)))?;
        self.resolve_by_id(&vid).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let api = format!("{}/v?vid={}&_format=json", self.api_base, urlencoding::encode(video_id));
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("video api", api)
                    .user_agent(self.transport.desktop_user_agent())
                    .referer("https://haokan.baidu.com/"),
            )
            .await?;

        let data = api_json(&resp.body).map_err(|e| e.into_parse_error(PLATFORM))?;
        parse_video_meta(&data, video_id)
    }
}

fn parse_video_meta(data: &Value, requested_id: &str) -> Result<VideoInfo, ParseError> {
    if let Some(errno) = i64_at(data, "/errno") {
        if errno != 0 {
            let msg = str_at(data, "/error").unwrap_or("api error");
            return Err(ParseError::unavailable(PLATFORM, format!("{} (errno {})", msg, errno)));
        }
    }

    let meta = data
        .pointer("/data/apiData/curVideoMeta")
        .filter(|m| m.is_object())
        .ok_or_else(|| ParseError::shape(PLATFORM, "missing data.apiData.curVideoMeta"))?;

    // clarityUrl is ordered sd, hd, sc, 1080p; prefer the top.
    let mut play_urls: Vec<String> = array_at(meta, "/clarityUrl")
        .iter()
        .rev()
        .filter_map(|c| str_at(c, "/url"))
        .map(str::to_string)
        .collect();
    if let Some(url) = str_at(meta, "/playurl") {
        play_urls.push(url.to_string());
    }

    let raw_id = match string_at(meta, "/id") {
        id if id.is_empty() => requested_id.to_string(),
        id => id,
    };

    VideoInfo::builder(PLATFORM, raw_id)
        .title(string_at(meta, "/title"))
        .author(VideoAuthor {
            uid: string_at(meta, "/mth/mthid"),
            name: string_at(meta, "/mth/author_name"),
            avatar: string_at(meta, "/mth/author_photo"),
        })
        .cover_url(string_at(meta, "/poster"))
        .play_urls(play_urls)
        .duration_ms(i64_at(meta, "/duration").map_or(0, secs_to_ms))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clarity_urls_best_first() {
        let data = json!({"errno": 0, "data": {"apiData": {"curVideoMeta": {
            "id": "10097513962716530391",
            "title": "hk",
            "poster": "https://f7.baidu.com/poster.jpg",
            "duration": 95,
            "playurl": "https://vd3.bdstatic.com/sc.mp4",
            "clarityUrl": [
                {"key": "sd", "url": "https://vd3.bdstatic.com/sd.mp4"},
                {"key": "hd", "url": "https://vd3.bdstatic.com/hd.mp4"},
                {"key": "sc", "url": "https://vd3.bdstatic.com/sc.mp4"}
            ],
            "mth": {"mthid": "1", "author_name": "hk author", "author_photo": "https://f7.baidu.com/p.jpg"}
        }}}});
        let info = parse_video_meta(&data, "x").unwrap();
        assert_eq!(
            info.play_urls,
            vec![
                "https://vd3.bdstatic.com/sc.mp4",
                "https://vd3.bdstatic.com/hd.mp4",
                "https://vd3.bdstatic.com/sd.mp4",
            ]
        );
        assert_eq!(info.duration_ms, 95_000);
    }

    #[test]
    fn test_errno_is_unavailable() {
        let data = json!({"errno": 2, "error": "视频不存在"});
        assert!(matches!(
            parse_video_meta(&data, "x"),
            Err(ParseError::ContentUnavailable { .. })
        ));
    }

    #[test]
    fn test_huge_duration_saturates() {
        let data = json!({"errno": 0, "data": {"apiData": {"curVideoMeta": {
            "id": "1",
            "playurl": "https://vd3.bdstatic.com/sc.mp4",
            "duration": 1e17
        }}}});
        let info = parse_video_meta(&data, "1").unwrap();
        assert_eq!(info.duration_ms, u64::MAX);
    }
}
