use super::embedded::{api_json, array_at, i64_at, query_param, secs_to_ms, str_at, string_at};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;
use url::Url;

const PLATFORM: VideoSource = VideoSource::ZuiYou;
const POST_DETAIL_API: &str = "https://share.xiaochuankeji.cn/planck/share/post/detail_h5";
const IMAGE_BASE: &str = "https://file.izuiyou.com/img/view/id";

pub struct ZuiYouParser {
    transport: Transport,
}

impl ZuiYouParser {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PlatformParser for ZuiYouParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let url = Url::parse(share_url).map_err(|_| ParseError::MalformedInput(share_url.to_string()))?;
        let pid = query_param(&url, "pid")
            .ok_or_else(|| ParseError::shape(PLATFORM, format!("no pid in {}", share_url)))?;
        self.resolve_by_id(&pid).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let pid: i64 = video_id
            .trim()
            .parse()
            .map_err(|_| ParseError::MalformedInput(format!("zuiyou post id must be numeric: {}", video_id)))?;

        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::post("post detail api", POST_DETAIL_API)
                    .user_agent(self.transport.mobile_user_agent())
                    .json(json!({"h_av": "5.2.13.011", "pid": pid})),
            )
            .await?;

        let data = api_json(&resp.body).map_err(|e| e.into_parse_error(PLATFORM))?;
        parse_post(&data, video_id)
    }
}

fn parse_post(data: &Value, requested_id: &str) -> Result<VideoInfo, ParseError> {
    if let Some(ret) = i64_at(data, "/ret") {
        if ret != 1 {
            let msg = str_at(data, "/msg").unwrap_or("api error");
            return Err(ParseError::unavailable(PLATFORM, format!("{} (ret {})", msg, ret)));
        }
    }

    let post = data
        .pointer("/data/post")
        .filter(|p| p.is_object())
        .ok_or_else(|| ParseError::shape(PLATFORM, "missing data.post"))?;

    let imgs = array_at(post, "/imgs");
    let videos = post.get("videos").and_then(Value::as_object);

    // Each video is keyed by the id of its poster image.
    let mut play_urls = Vec::new();
    let mut duration_ms = 0;
    let mut picture_ids = Vec::new();
    for img in imgs {
        let img_id = string_at(img, "/id");
        match videos.and_then(|v| v.get(&img_id)) {
            Some(video) => {
                if let Some(url) = str_at(video, "/url") {
                    play_urls.push(url.to_string());
                }
                if duration_ms == 0 {
                    duration_ms = i64_at(video, "/dur").map_or(0, secs_to_ms);
                }
            }
            None => picture_ids.push(img_id),
        }
    }

    // Pictures only count as a carousel when there is no video.
    let images: Vec<ImageInfo> = if play_urls.is_empty() {
        picture_ids
            .iter()
            .filter(|id| !id.is_empty())
            .map(|id| ImageInfo::new(format!("{}/{}", IMAGE_BASE, id)))
            .collect()
    } else {
        Vec::new()
    };

    let cover = imgs
        .first()
        .map(|img| format!("{}/{}", IMAGE_BASE, string_at(img, "/id")))
        .unwrap_or_default();

    VideoInfo::builder(PLATFORM, match string_at(post, "/id") {
        id if id.is_empty() => requested_id.to_string(),
        id => id,
    })
    .title(string_at(post, "/content"))
    .author(VideoAuthor {
        uid: string_at(post, "/member/id"),
        name: string_at(post, "/member/name"),
        avatar: string_at(post, "/member/avatar_urls/origin/urls/0"),
    })
    .cover_url(cover)
    .play_urls(play_urls)
    .images(images)
    .duration_ms(duration_ms)
    .build()
}
