use super::embedded::{array_at, embedded_js_object, i64_at, last_path_segment, require, secs_to_ms, str_at, string_at};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

const PLATFORM: VideoSource = VideoSource::RedBook;
const STATE_MARKER: &str = "window.__INITIAL_STATE__";

pub struct RedBookParser {
    transport: Transport,
    cookie: Option<String>,
}

impl RedBookParser {
    pub fn new(transport: Transport, cookie: Option<String>) -> Self {
        Self { transport, cookie }
    }
}

#[async_trait]
impl PlatformParser for RedBookParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    /// xhslink.com short links redirect (sometimes twice) to the note page.
    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("note page", share_url)
                    .user_agent(self.transport.desktop_user_agent())
                    .referer("https://www.xiaohongshu.com/")
                    .cookie(self.cookie.as_deref())
                    .credential_scope("xiaohongshu.com")
                    .follow_redirects(self.transport.max_redirects()),
            )
            .await?;
        debug!(final_url = %resp.final_url, "note page");

        // Logged-out visitors of restricted notes are bounced to the login
        // or 404 page, which has no state object.
        if resp.final_url.path().starts_with("/404") || resp.final_url.path().starts_with("/login") {
            return Err(ParseError::unavailable(PLATFORM, "note requires login or was removed"));
        }

        let url_id = last_path_segment(&resp.final_url).unwrap_or_default();
        let state = embedded_js_object(&resp.body, STATE_MARKER).map_err(|e| e.into_parse_error(PLATFORM))?;
        parse_initial_state(&state, &url_id)
    }

    /// Direct note links need an `xsec_token` for most notes; without it the
    /// page may only render for a logged-in cookie.
    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let url = format!("https://www.xiaohongshu.com/explore/{}", video_id.trim());
        self.resolve_by_share_url(&url).await
    }
}

fn parse_initial_state(state: &Value, url_id: &str) -> Result<VideoInfo, ParseError> {
    let note_state = require(state, "/note", PLATFORM)?;

    let note_id = str_at(note_state, "/currentNoteId")
        .or_else(|| str_at(note_state, "/firstNoteId"))
        .filter(|id| !id.is_empty())
        .unwrap_or(url_id);

    let note = note_state
        .get("noteDetailMap")
        .and_then(|m| m.get(note_id))
        .and_then(|d| d.get("note"))
        .filter(|n| n.as_object().is_some_and(|o| !o.is_empty()))
        .ok_or_else(|| ParseError::unavailable(PLATFORM, format!("note {} not in page", note_id)))?;

    let is_video = str_at(note, "/type") == Some("video");

    let play_urls = if is_video { video_streams(note) } else { Vec::new() };

    let images: Vec<ImageInfo> = if is_video {
        Vec::new()
    } else {
        array_at(note, "/imageList")
            .iter()
            .filter_map(|img| {
                let url = str_at(img, "/urlDefault").or_else(|| str_at(img, "/url"))?;
                let live = if img.get("livePhoto").and_then(Value::as_bool) == Some(true) {
                    str_at(img, "/stream/h264/0/masterUrl").map(str::to_string)
                } else {
                    None
                };
                Some(ImageInfo {
                    url: url.to_string(),
                    live_photo_url: live,
                })
            })
            .collect()
    };

    let title = match string_at(note, "/title") {
        t if t.is_empty() => string_at(note, "/desc"),
        t => t,
    };

    // Seconds; older notes only have the capa field.
    let duration_secs = i64_at(note, "/video/media/video/duration")
        .or_else(|| i64_at(note, "/video/capa/duration"))
        .unwrap_or(0);

    VideoInfo::builder(PLATFORM, non_empty_or(string_at(note, "/noteId"), note_id))
        .title(title)
        .author(VideoAuthor {
            uid: string_at(note, "/user/userId"),
            name: string_at(note, "/user/nickname"),
            avatar: string_at(note, "/user/avatar"),
        })
        .cover_url(str_at(note, "/imageList/0/urlDefault").unwrap_or_default())
        .play_urls(play_urls)
        .images(images)
        .duration_ms(secs_to_ms(duration_secs))
        .build()
}

/// h264 before h265: the former plays everywhere.
fn video_streams(note: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    for codec in ["h264", "h265", "av1"] {
        for stream in array_at(note, &format!("/video/media/stream/{}", codec)) {
            if let Some(master) = str_at(stream, "/masterUrl") {
                urls.push(master.to_string());
            }
            urls.extend(
                array_at(stream, "/backupUrls")
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            );
        }
    }
    urls
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_PAGE: &str = r#"<script>window.__INITIAL_STATE__={"note":{"currentNoteId":"6552d4f0","noteDetailMap":{"6552d4f0":{"note":{
        "noteId":"6552d4f0","type":"video","title":"","desc":"desc as title",
        "user":{"userId":"u1","nickname":"rb","avatar":"https://sns-avatar.xhscdn.com/a.jpg"},
        "imageList":[{"urlDefault":"http://sns-webpic.xhscdn.com/cover.jpg"}],
        "video":{"media":{"video":{"duration":31},"stream":{
            "h265":[{"masterUrl":"http://sns-video.xhscdn.com/h265.mp4","backupUrls":[]}],
            "h264":[{"masterUrl":"http://sns-video.xhscdn.com/h264.mp4","backupUrls":["http://sns-bak.xhscdn.com/h264.mp4"]}],
            "av1":undefined}}}}}}},"user":{"loggedIn":false,"x":undefined}}</script>"#;

    #[test]
    fn test_video_note_from_page() {
        let state = embedded_js_object(VIDEO_PAGE, STATE_MARKER).unwrap();
        let info = parse_initial_state(&state, "").unwrap();
        assert_eq!(info.raw_id, "6552d4f0");
        assert_eq!(info.title, "desc as title");
        assert_eq!(
            info.play_urls,
            vec![
                "http://sns-video.xhscdn.com/h264.mp4",
                "http://sns-bak.xhscdn.com/h264.mp4",
                "http://sns-video.xhscdn.com/h265.mp4",
            ]
        );
        assert_eq!(info.duration_ms, 31_000);
    }

    #[test]
    fn test_image_note_with_live_photo() {
        let state = serde_json::json!({"note": {"firstNoteId": "n2", "noteDetailMap": {"n2": {"note": {
            "type": "normal",
            "title": "album",
            "imageList": [
                {"urlDefault": "http://sns-webpic.xhscdn.com/1.jpg"},
                {"urlDefault": "http://sns-webpic.xhscdn.com/2.jpg", "livePhoto": true,
                 "stream": {"h264": [{"masterUrl": "http://sns-video.xhscdn.com/live.mp4"}]}}
            ]
        }}}}});
        let info = parse_initial_state(&state, "").unwrap();
        assert_eq!(info.raw_id, "n2");
        assert_eq!(info.images.len(), 2);
        assert_eq!(info.images[0].live_photo_url, None);
        assert_eq!(
            info.images[1].live_photo_url.as_deref(),
            Some("http://sns-video.xhscdn.com/live.mp4")
        );
        assert_eq!(info.duration_ms, 0);
    }

    #[test]
    fn test_missing_note_is_unavailable() {
        let state = serde_json::json!({"note": {"currentNoteId": "gone", "noteDetailMap": {"gone": {"note": {}}}}});
        assert!(matches!(
            parse_initial_state(&state, ""),
            Err(ParseError::ContentUnavailable { .. })
        ));
    }

    #[test]
    fn test_huge_duration_saturates() {
        let state = serde_json::json!({"note": {"currentNoteId": "n3", "noteDetailMap": {"n3": {"note": {
            "noteId": "n3",
            "type": "video",
            "video": {"media": {"video": {"duration": 1e17}, "stream": {
                "h264": [{"masterUrl": "http://sns-video.xhscdn.com/h264.mp4"}]
            }}}
        }}}}});
        let info = parse_initial_state(&state, "").unwrap();
        assert_eq!(info.duration_ms, u64::MAX);
    }
}
