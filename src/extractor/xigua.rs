use super::douyin::parse_router_data;
use super::embedded::{embedded_json, last_path_segment};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::instrument;
use url::Url;

const PLATFORM: VideoSource = VideoSource::XiGua;
const PAGE_BASE: &str = "https://m.ixigua.com";
const ROUTER_MARKER: &str = "window._ROUTER_DATA";

static ITEM_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{8,}$").unwrap());

/// XiGua videos are served through the douyin share page on `m.ixigua.com`.
pub struct XiGuaParser {
    transport: Transport,
    page_base: String,
}

impl XiGuaParser {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            page_base: PAGE_BASE.to_string(),
        }
    }

    pub fn with_page_base(mut self, base: impl Into<String>) -> Self {
        self.page_base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn resolve_item_id(&self, share_url: &str) -> Result<String, ParseError> {
        let url = Url::parse(share_url).map_err(|_| ParseError::MalformedInput(share_url.to_string()))?;

        let target = if url.host_str() == Some("v.ixigua.com") {
            let resp = self
                .transport
                .send(
                    PLATFORM,
                    FetchRequest::get("share link redirect", share_url)
                        .user_agent(self.transport.desktop_user_agent())
                        .no_redirects(),
                )
                .await?;
            resp.location()
                .ok_or_else(|| ParseError::shape(PLATFORM, "share link did not redirect"))?
        } else {
            url
        };

        // www.ixigua.com/{id} or m.ixigua.com/video/{id}
        match last_path_segment(&target) {
            Some(id) if ITEM_ID_REGEX.is_match(&id) => Ok(id),
            _ => Err(ParseError::shape(
                PLATFORM,
                format!("no content id in landing url {}", target),
            )),
        }
    }
}

#[async_trait]
impl PlatformParser for XiGuaParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let item_id = self.resolve_item_id(share_url).await?;
        self.resolve_by_id(&item_id).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let page_url = format!(
            "{}/douyin/share/video/{}?aweme_type=107&schema_type=1&utm_source=copy&utm_campaign=client_share&utm_medium=android&app=aweme",
            self.page_base, video_id
        );
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("share page", page_url).user_agent(self.transport.mobile_user_agent()),
            )
            .await?;

        let data = embedded_json(&resp.body, ROUTER_MARKER).map_err(|e| e.into_parse_error(PLATFORM))?;
        let item = parse_router_data(PLATFORM, &data, video_id)?;
        item.build_with_cdn(&self.transport).await
    }
}
