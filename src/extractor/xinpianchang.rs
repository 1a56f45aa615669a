use super::embedded::{array_at, embedded_json, i64_at, last_path_segment, secs_to_ms, str_at, string_at};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;
use url::Url;

const PLATFORM: VideoSource = VideoSource::XinPianChang;
const NEXT_DATA_MARKER: &str = r#"<script id="__NEXT_DATA__" type="application/json""#;

pub struct XinPianChangParser {
    transport: Transport,
}

impl XinPianChangParser {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PlatformParser for XinPianChangParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("article page", share_url)
                    .user_agent(self.transport.desktop_user_agent())
                    .referer("https://www.xinpianchang.com/")
                    .header(reqwest::header::UPGRADE_INSECURE_REQUESTS, "1"),
            )
            .await?;

        // Article pages live at /a{id}.
        let raw_id = last_path_segment(&resp.final_url)
            .map(|seg| seg.trim_start_matches('a').to_string())
            .unwrap_or_default();

        let data = embedded_json(&resp.body, NEXT_DATA_MARKER).map_err(|e| e.into_parse_error(PLATFORM))?;
        parse_next_data(&data, &raw_id)
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let id = video_id.trim().trim_start_matches('a');
        let url = Url::parse(&format!("https://www.xinpianchang.com/a{}", id))
            .map_err(|_| ParseError::MalformedInput(video_id.to_string()))?;
        self.resolve_by_share_url(url.as_str()).await
    }
}

fn parse_next_data(data: &Value, requested_id: &str) -> Result<VideoInfo, ParseError> {
    let detail = match data.pointer("/props/pageProps/detail") {
        Some(d) if d.is_object() => d,
        Some(_) => return Err(ParseError::unavailable(PLATFORM, "article not found")),
        None => {
            if data.pointer("/props/pageProps").is_some() {
                return Err(ParseError::unavailable(PLATFORM, "article has no detail"));
            }
            return Err(ParseError::shape(PLATFORM, "missing props.pageProps"));
        }
    };

    // `progressive` lists one mp4 per resolution, ascending.
    let mut renditions: Vec<(i64, String)> = array_at(detail, "/video/content/progressive")
        .iter()
        .filter_map(|r| Some((i64_at(r, "/height").unwrap_or(0), str_at(r, "/url")?.to_string())))
        .collect();
    renditions.sort_by(|a, b| b.0.cmp(&a.0));

    let raw_id = match string_at(detail, "/id") {
        id if id.is_empty() => requested_id.to_string(),
        id => id,
    };

    VideoInfo::builder(PLATFORM, raw_id)
        .title(string_at(detail, "/title"))
        .author(VideoAuthor {
            uid: string_at(detail, "/author/userinfo/id"),
            name: string_at(detail, "/author/userinfo/username"),
            avatar: string_at(detail, "/author/userinfo/avatar"),
        })
        .cover_url(string_at(detail, "/cover"))
        .play_urls(renditions.into_iter().map(|(_, url)| url))
        .duration_ms(i64_at(detail, "/duration").map_or(0, secs_to_ms))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_highest_rendition_first() {
        let data = json!({"props": {"pageProps": {"detail": {
            "id": 12994767,
            "title": "short film",
            "cover": "https://cs.xinpianchang.com/cover.jpg",
            "duration": 182,
            "author": {"userinfo": {"id": 1, "username": "studio", "avatar": "https://cs.xinpianchang.com/a.jpg"}},
            "video": {"content": {"progressive": [
                {"height": 540, "url": "https://qiniu-xpc.xinpianchang.com/540.mp4"},
                {"height": 1080, "url": "https://qiniu-xpc.xinpianchang.com/1080.mp4"}
            ]}}
        }}}});
        let info = parse_next_data(&data, "x").unwrap();
        assert_eq!(info.play_urls[0], "https://qiniu-xpc.xinpianchang.com/1080.mp4");
        assert_eq!(info.raw_id, "12994767");
        assert_eq!(info.duration_ms, 182_000);
        assert_eq!(info.author.name, "studio");
    }

    #[test]
    fn test_missing_detail() {
        let data = json!({"props": {"pageProps": {"detail": null}}});
        assert!(matches!(
            parse_next_data(&data, "x"),
            Err(ParseError::ContentUnavailable { .. })
        ));
        assert!(matches!(
            parse_next_data(&json!({}), "x"),
            Err(ParseError::UpstreamShapeChanged { .. })
        ));
    }

    #[test]
    fn test_huge_duration_saturates() {
        let data = json!({"props": {"pageProps": {"detail": {
            "id": 1,
            "duration": 1e17,
            "video": {"content": {"progressive": [{"height": 720, "url": "https://qiniu-xpc.xinpianchang.com/720.mp4"}]}}
        }}}});
        let info = parse_next_data(&data, "1").unwrap();
        assert_eq!(info.duration_ms, u64::MAX);
    }
}
