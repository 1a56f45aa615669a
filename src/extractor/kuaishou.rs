use super::embedded::{array_at, embedded_json, i64_at, last_path_segment, str_at, string_at};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

const PLATFORM: VideoSource = VideoSource::KuaiShou;
const INIT_STATE_MARKER: &str = "window.INIT_STATE =";
const MOBILE_PAGE_BASE: &str = "https://v.m.chenzhongtech.com/fw/photo";

pub struct KuaiShouParser {
    transport: Transport,
    cookie: Option<String>,
}

impl KuaiShouParser {
    pub fn new(transport: Transport, cookie: Option<String>) -> Self {
        Self { transport, cookie }
    }

    fn page_request(&self, step: &'static str, url: &str) -> FetchRequest {
        FetchRequest::get(step, url)
            .user_agent(self.transport.mobile_user_agent())
            .referer("https://v.kuaishou.com/")
            .cookie(self.cookie.as_deref())
    }

    async fn landing_url(&self, share_url: &str) -> Result<Url, ParseError> {
        let url = Url::parse(share_url).map_err(|_| ParseError::MalformedInput(share_url.to_string()))?;
        if url.host_str() != Some("v.kuaishou.com") {
            return Ok(url);
        }

        let resp = self
            .transport
            .send(PLATFORM, self.page_request("share link redirect", share_url).no_redirects())
            .await?;
        resp.location()
            .ok_or_else(|| ParseError::shape(PLATFORM, "share link did not redirect"))
    }

    async fn fetch_photo_page(&self, page_url: &str, photo_id: &str) -> Result<VideoInfo, ParseError> {
        let resp = self
            .transport
            .send(PLATFORM, self.page_request("photo page", page_url))
            .await?;

        let state = embedded_json(&resp.body, INIT_STATE_MARKER).map_err(|e| e.into_parse_error(PLATFORM))?;
        parse_init_state(&state, photo_id)
    }
}

#[async_trait]
impl PlatformParser for KuaiShouParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let landing = self.landing_url(share_url).await?;
        // Long videos land on a page without the photo state.
        let page_url = landing.as_str().replace("/fw/long-video/", "/fw/photo/");
        let landing = Url::parse(&page_url).map_err(|_| ParseError::shape(PLATFORM, "invalid landing url"))?;
        let photo_id = last_path_segment(&landing).unwrap_or_default();
        debug!(%photo_id, "landing page");
        self.fetch_photo_page(landing.as_str(), &photo_id).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let page_url = format!("{}/{}", MOBILE_PAGE_BASE, video_id);
        self.fetch_photo_page(&page_url, video_id).await
    }
}

/// The state object is keyed by opaque per-build names; the photo lives under
/// whichever entry carries a `photo` member.
fn parse_init_state(state: &Value, requested_id: &str) -> Result<VideoInfo, ParseError> {
    let entries = state
        .as_object()
        .ok_or_else(|| ParseError::shape(PLATFORM, "INIT_STATE is not an object"))?;

    let entry = entries
        .values()
        .find(|v| v.get("photo").is_some_and(Value::is_object))
        .ok_or_else(|| {
            // Deleted or private photos keep the entry but drop `photo`.
            match entries.values().find_map(|v| str_at(v, "/error_msg")) {
                Some(msg) => ParseError::unavailable(PLATFORM, msg),
                None => ParseError::shape(PLATFORM, "no photo entry in INIT_STATE"),
            }
        })?;

    if let Some(result) = i64_at(entry, "/result") {
        if result != 1 {
            let msg = str_at(entry, "/error_msg").unwrap_or("photo not available");
            return Err(ParseError::unavailable(PLATFORM, format!("{} (result {})", msg, result)));
        }
    }

    let photo = &entry["photo"];

    let raw_id = match string_at(photo, "/photoId") {
        id if id.is_empty() => requested_id.to_string(),
        id => id,
    };

    let play_urls: Vec<String> = array_at(photo, "/mainMvUrls")
        .iter()
        .filter_map(|v| str_at(v, "/url"))
        .map(str::to_string)
        .collect();

    let images = atlas_images(photo);

    let music = str_at(photo, "/soundTrack/audioUrls/0/url")
        .or_else(|| str_at(photo, "/music/audioUrls/0/url"))
        .map(str::to_string);

    VideoInfo::builder(PLATFORM, raw_id)
        .title(string_at(photo, "/caption"))
        .author(VideoAuthor {
            uid: string_at(photo, "/userEid"),
            name: string_at(photo, "/userName"),
            avatar: string_at(photo, "/headUrl"),
        })
        .cover_url(str_at(photo, "/coverUrls/0/url").unwrap_or_default())
        .play_urls(play_urls)
        .music_url(music)
        .images(images)
        .duration_ms_signed(i64_at(photo, "/duration").unwrap_or(0))
        .build()
}

/// Photo albums list paths relative to the first atlas CDN.
fn atlas_images(photo: &Value) -> Vec<ImageInfo> {
    let cdn = str_at(photo, "/ext_params/atlas/cdn/0")
        .or_else(|| str_at(photo, "/ext_params/atlas/cdnList/0/cdn"))
        .unwrap_or_default();
    if cdn.is_empty() {
        return Vec::new();
    }
    array_at(photo, "/ext_params/atlas/list")
        .iter()
        .filter_map(Value::as_str)
        .map(|path| ImageInfo::new(format!("https://{}{}", cdn, path)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_video_photo_keeps_upstream_order() {
        let state = json!({
            "tusjoh": {"result": 1},
            "tusjoh-abc": {
                "result": 1,
                "photo": {
                    "photoId": "3xabc",
                    "caption": "kuai",
                    "userName": "ks user",
                    "userEid": "3xuser",
                    "headUrl": "https://p1.a.yximgs.com/head.jpg",
                    "coverUrls": [{"url": "https://p1.a.yximgs.com/cover.jpg"}],
                    "mainMvUrls": [
                        {"url": "https://txmov2.a.kwimgs.com/hd.mp4"},
                        {"url": "https://txmov2.a.kwimgs.com/sd.mp4"}
                    ],
                    "duration": 23000,
                    "soundTrack": {"audioUrls": [{"url": "https://p1.a.yximgs.com/bgm.m4a"}]}
                }
            }
        });
        let info = parse_init_state(&state, "ignored").unwrap();
        assert_eq!(info.raw_id, "3xabc");
        assert_eq!(
            info.play_urls,
            vec!["https://txmov2.a.kwimgs.com/hd.mp4", "https://txmov2.a.kwimgs.com/sd.mp4"]
        );
        assert_eq!(info.author.name, "ks user");
        assert_eq!(info.duration_ms, 23000);
        assert_eq!(info.music_url.as_deref(), Some("https://p1.a.yximgs.com/bgm.m4a"));
    }

    #[test]
    fn test_atlas_becomes_images() {
        let state = json!({
            "k": {"photo": {
                "photoId": "3xalbum",
                "mainMvUrls": [],
                "ext_params": {"atlas": {
                    "cdn": ["p2.a.yximgs.com"],
                    "list": ["/ufile/atlas/1.jpg", "/ufile/atlas/2.jpg"]
                }}
            }}
        });
        let info = parse_init_state(&state, "3xalbum").unwrap();
        assert!(info.play_urls.is_empty());
        assert_eq!(info.images[1].url, "https://p2.a.yximgs.com/ufile/atlas/2.jpg");
    }

    #[test]
    fn test_failed_result_is_unavailable() {
        let state = json!({"k": {"result": 2, "error_msg": "作品已删除", "photo": {}}});
        assert!(matches!(
            parse_init_state(&state, "1"),
            Err(ParseError::ContentUnavailable { .. })
        ));
    }

    #[test]
    fn test_missing_photo_entry_is_shape_change() {
        let state = json!({"k": {"result": 1}});
        assert!(matches!(
            parse_init_state(&state, "1"),
            Err(ParseError::UpstreamShapeChanged { .. })
        ));
    }
}
