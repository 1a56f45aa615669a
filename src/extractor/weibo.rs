use super::embedded::{api_json, i64_at, last_path_segment, query_param, secs_to_ms, str_at, string_at};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;
use url::Url;

const PLATFORM: VideoSource = VideoSource::WeiBo;
const COMPONENT_API: &str = "https://h5.video.weibo.com/api/component";

pub struct WeiBoParser {
    transport: Transport,
}

impl WeiBoParser {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

/// `video.weibo.com/show?fid=1034:…`, `m.weibo.cn/s/video/show?object_id=…`
/// or `weibo.com/tv/show/1034:…`.
fn video_id_from_url(url: &Url) -> Option<String> {
    query_param(url, "fid")
        .or_else(|| query_param(url, "object_id"))
        .or_else(|| last_path_segment(url))
        .filter(|id| id.contains(':'))
}

#[async_trait]
impl PlatformParser for WeiBoParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let url = Url::parse(share_url).map_err(|_| ParseError::MalformedInput(share_url.to_string()))?;
        let video_id = video_id_from_url(&url)
            .ok_or_else(|| ParseError::shape(PLATFORM, format!("no video id in {}", share_url)))?;
        self.resolve_by_id(&video_id).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let api = format!("{}?page=/show/{}", COMPONENT_API, video_id);
        let payload = serde_json::json!({"Component_Play_Playinfo": {"oid": video_id}}).to_string();
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::post("play info api", api)
                    .user_agent(self.transport.desktop_user_agent())
                    .referer(format!("https://h5.video.weibo.com/show/{}", video_id))
                    .form(format!("data={}", urlencoding::encode(&payload))),
            )
            .await?;

        let data = api_json(&resp.body).map_err(|e| e.into_parse_error(PLATFORM))?;
        parse_play_info(&data, video_id)
    }
}

fn parse_play_info(data: &Value, requested_id: &str) -> Result<VideoInfo, ParseError> {
    if let Some(code) = str_at(data, "/code").filter(|c| *c != "100000") {
        let msg = str_at(data, "/msg").unwrap_or("api error");
        return Err(ParseError::unavailable(PLATFORM, format!("{} (code {})", msg, code)));
    }

    let info = match data.pointer("/data/Component_Play_Playinfo") {
        Some(info) if info.is_object() => info,
        // An empty list here means the video was removed.
        Some(_) => return Err(ParseError::unavailable(PLATFORM, "video removed")),
        None => return Err(ParseError::shape(PLATFORM, "missing Component_Play_Playinfo")),
    };

    // Playinfo's own id drops the container prefix; the oid re-resolves.
    VideoInfo::builder(PLATFORM, requested_id)
        .title(match string_at(info, "/title") {
            t if t.is_empty() => string_at(info, "/text"),
            t => t,
        })
        .author(VideoAuthor {
            uid: string_at(info, "/user/id"),
            name: string_at(info, "/author"),
            avatar: string_at(info, "/avatar"),
        })
        .cover_url(string_at(info, "/cover_image"))
        .play_urls(ordered_play_urls(info))
        .duration_ms(i64_at(info, "/duration_time").map_or(0, secs_to_ms))
        .build()
}

/// `urls` maps quality labels ("高清 1080P", "标清 480P", …) to streams;
/// highest resolution first, then `stream_url`.
fn ordered_play_urls(info: &Value) -> Vec<String> {
    let mut ranked: Vec<(u32, String)> = info
        .get("urls")
        .and_then(Value::as_object)
        .map(|urls| {
            urls.iter()
                .filter_map(|(label, url)| Some((label_height(label), url.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    let mut out: Vec<String> = ranked.into_iter().map(|(_, url)| url).collect();
    if let Some(stream) = str_at(info, "/stream_url").filter(|s| !s.is_empty()) {
        out.push(stream.to_string());
    }
    out
}

fn label_height(label: &str) -> u32 {
    let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_video_id_from_share_urls() {
        let cases = [
            ("https://video.weibo.com/show?fid=1034:4930612395671608", "1034:4930612395671608"),
            ("https://weibo.com/tv/show/1034:4930612395671608?from=old_pc", "1034:4930612395671608"),
            ("https://m.weibo.cn/s/video/show?object_id=1034:49306", "1034:49306"),
        ];
        for (url, expected) in cases {
            let url = Url::parse(url).unwrap();
            assert_eq!(video_id_from_url(&url).as_deref(), Some(expected));
        }
        assert_eq!(video_id_from_url(&Url::parse("https://weibo.com/tv/show/").unwrap()), None);
    }

    #[test]
    fn test_play_info_orders_by_quality() {
        let data = json!({
            "code": "100000",
            "data": {"Component_Play_Playinfo": {
                "id": "4930612395671608",
                "title": "weibo clip",
                "author": "wb",
                "avatar": "//tvax1.sinaimg.cn/avatar.jpg",
                "cover_image": "//wx1.sinaimg.cn/cover.jpg",
                "user": {"id": 123},
                "duration_time": 35,
                "stream_url": "//f.video.weibocdn.com/stream.mp4",
                "urls": {
                    "标清 480P": "//f.video.weibocdn.com/480.mp4",
                    "高清 1080P": "//f.video.weibocdn.com/1080.mp4",
                    "高清 720P": "//f.video.weibocdn.com/720.mp4"
                }
            }}
        });
        let info = parse_play_info(&data, "1034:4930612395671608").unwrap();
        assert_eq!(info.raw_id, "1034:4930612395671608");
        assert_eq!(
            info.play_urls,
            vec![
                "https://f.video.weibocdn.com/1080.mp4",
                "https://f.video.weibocdn.com/720.mp4",
                "https://f.video.weibocdn.com/480.mp4",
                "https://f.video.weibocdn.com/stream.mp4",
            ]
        );
        assert_eq!(info.cover_url, "https://wx1.sinaimg.cn/cover.jpg");
        assert_eq!(info.author.uid, "123");
        assert_eq!(info.duration_ms, 35000);
    }

    #[test]
    fn test_removed_video_is_unavailable() {
        let data = json!({"code": "100000", "data": {"Component_Play_Playinfo": []}});
        assert!(matches!(
            parse_play_info(&data, "x"),
            Err(ParseError::ContentUnavailable { .. })
        ));
    }

    #[test]
    fn test_huge_duration_saturates() {
        let data = json!({
            "code": "100000",
            "data": {"Component_Play_Playinfo": {
                "stream_url": "//f.video.weibocdn.com/stream.mp4",
                "duration_time": 1e17
            }}
        });
        let info = parse_play_info(&data, "1034:1").unwrap();
        assert_eq!(info.duration_ms, u64::MAX);
    }
}
