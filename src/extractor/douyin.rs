use super::embedded::{array_at, embedded_json, i64_at, last_path_segment, str_at, string_at};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};
use url::Url;

const PLATFORM: VideoSource = VideoSource::DouYin;
const PAGE_BASE: &str = "https://www.iesdouyin.com";
const ROUTER_MARKER: &str = "window._ROUTER_DATA";

// `/` inside loaderData keys is escaped as `~1` in JSON pointers.
const VIDEO_PAGE_POINTER: &str = "/loaderData/video_(id)~1page/videoInfoRes";
const NOTE_PAGE_POINTER: &str = "/loaderData/note_(id)~1page/videoInfoRes";

static AWEME_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{8,}$").unwrap());

pub struct DouYinParser {
    transport: Transport,
    cookie: Option<String>,
    page_base: String,
}

impl DouYinParser {
    pub fn new(transport: Transport, cookie: Option<String>) -> Self {
        Self {
            transport,
            cookie,
            page_base: PAGE_BASE.to_string(),
        }
    }

    /// Serve share pages from another origin (mirrors, local fixtures).
    pub fn with_page_base(mut self, base: impl Into<String>) -> Self {
        self.page_base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn resolve_aweme_id(&self, share_url: &str) -> Result<String, ParseError> {
        let url = Url::parse(share_url).map_err(|_| ParseError::MalformedInput(share_url.to_string()))?;

        // Canonical page links carry the id already.
        let direct = matches!(
            url.host_str(),
            Some("www.douyin.com") | Some("m.douyin.com") | Some("www.iesdouyin.com")
        );
        let target = if direct {
            url
        } else {
            let resp = self
                .transport
                .send(
                    PLATFORM,
                    FetchRequest::get("share link redirect", share_url)
                        .user_agent(self.transport.mobile_user_agent())
                        .no_redirects(),
                )
                .await?;
            resp.location()
                .ok_or_else(|| ParseError::shape(PLATFORM, "share link did not redirect"))?
        };

        let id = last_path_segment(&target).unwrap_or_default();
        if AWEME_ID_REGEX.is_match(&id) {
            Ok(id)
        } else {
            Err(ParseError::shape(
                PLATFORM,
                format!("no content id in landing url {}", target),
            ))
        }
    }

    async fn fetch_item(&self, aweme_id: &str) -> Result<AwemeItem, ParseError> {
        let page_url = format!("{}/share/video/{}/", self.page_base, aweme_id);
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("share page", page_url)
                    .user_agent(self.transport.mobile_user_agent())
                    .referer("https://www.douyin.com/")
                    .cookie(self.cookie.as_deref()),
            )
            .await?;

        let data = embedded_json(&resp.body, ROUTER_MARKER).map_err(|e| e.into_parse_error(PLATFORM))?;
        parse_router_data(PLATFORM, &data, aweme_id)
    }
}

#[async_trait]
impl PlatformParser for DouYinParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let aweme_id = self.resolve_aweme_id(share_url).await?;
        debug!(%aweme_id, "resolved share link");
        self.resolve_by_id(&aweme_id).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let item = self.fetch_item(video_id).await?;
        item.build_with_cdn(&self.transport).await
    }
}

/// A mapped share-page item; play candidates are kept apart so the caller can
/// put the resolved CDN location in front of them.
pub(super) struct AwemeItem {
    pub builder: VideoInfoBuilder,
    /// Watermark-free first, watermarked last. Empty for image posts.
    pub play_candidates: Vec<String>,
}

impl AwemeItem {
    /// Build with the CDN location of the first candidate in front.
    pub(super) async fn build_with_cdn(self, transport: &Transport) -> Result<VideoInfo, ParseError> {
        let mut play_urls = Vec::with_capacity(self.play_candidates.len() + 1);
        if let Some(first) = self.play_candidates.first() {
            if let Some(cdn) = resolve_play_redirect(transport, first).await {
                play_urls.push(cdn);
            }
        }
        play_urls.extend(self.play_candidates);
        self.builder.play_urls(play_urls).build()
    }
}

/// The watermark-free play endpoint answers with a redirect to the CDN.
/// Failure here only costs us the resolved variant.
async fn resolve_play_redirect(transport: &Transport, play_url: &str) -> Option<String> {
    let request = FetchRequest::get("play url redirect", play_url)
        .user_agent(transport.mobile_user_agent())
        .no_redirects();
    match transport.fetch(request).await {
        Ok(resp) => resp.location().map(|u| u.to_string()),
        Err(e) => {
            warn!(error = %e, "could not resolve watermark-free play url");
            None
        }
    }
}

/// Map `window._ROUTER_DATA` from a douyin-style share page. XiGua serves the
/// same page format.
pub(super) fn parse_router_data(platform: VideoSource, data: &Value, requested_id: &str) -> Result<AwemeItem, ParseError> {
    let info_res = data
        .pointer(VIDEO_PAGE_POINTER)
        .or_else(|| data.pointer(NOTE_PAGE_POINTER))
        .ok_or_else(|| ParseError::shape(platform, "no video or note page in router data"))?;

    let item = match array_at(info_res, "/item_list").first() {
        Some(item) => item,
        None => {
            let reason = str_at(info_res, "/filter_list/0/filter_reason")
                .or_else(|| str_at(info_res, "/filter_list/0/detail_msg"))
                .unwrap_or("item list is empty");
            return Err(ParseError::unavailable(platform, reason));
        }
    };

    let raw_id = match string_at(item, "/aweme_id") {
        id if id.is_empty() => requested_id.to_string(),
        id => id,
    };

    let images: Vec<ImageInfo> = array_at(item, "/images")
        .iter()
        .filter_map(|img| {
            let url = pick_image_url(array_at(img, "/url_list"))?;
            Some(ImageInfo {
                url,
                live_photo_url: str_at(img, "/video/play_addr/url_list/0").map(str::to_string),
            })
        })
        .collect();

    let play_candidates = if images.is_empty() {
        watermark_free_candidates(str_at(item, "/video/play_addr/url_list/0").unwrap_or_default())
    } else {
        Vec::new()
    };

    let author = VideoAuthor {
        uid: match string_at(item, "/author/sec_uid") {
            s if s.is_empty() => string_at(item, "/author/uid"),
            s => s,
        },
        name: string_at(item, "/author/nickname"),
        avatar: string_at(item, "/author/avatar_thumb/url_list/0"),
    };

    let cover = str_at(item, "/video/cover/url_list/0")
        .or_else(|| str_at(item, "/video/origin_cover/url_list/0"))
        .unwrap_or_default();

    let music = str_at(item, "/music/play_url/url_list/0")
        .or_else(|| str_at(item, "/music/play_url/uri"))
        .filter(|u| u.starts_with("http"))
        .map(str::to_string);

    let builder = VideoInfo::builder(platform, raw_id)
        .title(string_at(item, "/desc"))
        .author(author)
        .cover_url(cover)
        .music_url(music)
        .images(images)
        .duration_ms_signed(i64_at(item, "/video/duration").unwrap_or(0));

    Ok(AwemeItem {
        builder,
        play_candidates,
    })
}

/// `playwm` serves the branded stream; `play` on the same endpoint does not.
fn watermark_free_candidates(play_url: &str) -> Vec<String> {
    if play_url.is_empty() {
        return Vec::new();
    }
    let clean = play_url.replacen("playwm", "play", 1);
    if clean == play_url {
        vec![play_url.to_string()]
    } else {
        vec![clean, play_url.to_string()]
    }
}

/// Prefer a jpeg rendition; webp ones do not open everywhere.
fn pick_image_url(urls: &[Value]) -> Option<String> {
    let urls: Vec<&str> = urls.iter().filter_map(Value::as_str).collect();
    urls.iter()
        .find(|u| !u.contains(".webp"))
        .or_else(|| urls.first())
        .map(|u| u.to_string())
}
