mod bilibili;
pub mod classify;
mod douyin;
pub mod embedded;
mod haokan;
mod kuaishou;
mod pipixia;
mod redbook;
pub mod transport;
mod twitter;
mod types;
mod weibo;
mod xigua;
mod xinpianchang;
mod zuiyou;

pub use bilibili::{av_to_bv, bv_to_av, BiliBiliParser};
pub use classify::{classify, isolate_url, match_platform};
pub use douyin::DouYinParser;
pub use haokan::HaoKanParser;
pub use kuaishou::KuaiShouParser;
pub use pipixia::PiPiXiaParser;
pub use redbook::RedBookParser;
pub use transport::{FetchRequest, FetchResponse, Transport};
pub use twitter::TwitterParser;
pub use types::*;
pub use weibo::WeiBoParser;
pub use xigua::XiGuaParser;
pub use xinpianchang::XinPianChangParser;
pub use zuiyou::ZuiYouParser;

use crate::config::Config;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One resolver per platform. Both operations end in a fully built
/// [`VideoInfo`] or a classified [`ParseError`].
#[async_trait]
pub trait PlatformParser: Send + Sync {
    fn source(&self) -> VideoSource;

    /// `share_url` is an isolated URL that already classified as this platform.
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError>;

    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError>;
}

/// Routing table from [`VideoSource`] to its resolver. Built once and shared
/// read-only; clones share the table.
#[derive(Clone)]
pub struct VideoParser {
    parsers: Arc<HashMap<VideoSource, Arc<dyn PlatformParser>>>,
}

impl std::fmt::Debug for VideoParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sources: Vec<&str> = self.parsers.keys().map(|s| s.as_str()).collect();
        sources.sort_unstable();
        f.debug_struct("VideoParser").field("sources", &sources).finish()
    }
}

impl VideoParser {
    pub fn builder(transport: Transport) -> VideoParserBuilder {
        VideoParserBuilder::new(transport)
    }

    /// Build the table from the HTTP settings and per-platform credentials.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let transport = Transport::new(config.http.timeout(), config.http.max_redirects)?
            .with_user_agents(config.http.user_agent.clone(), config.http.mobile_user_agent.clone());

        let parser = Self::builder(transport)
            .cookie(VideoSource::DouYin, config.douyin.cookie.clone())
            .cookie(VideoSource::KuaiShou, config.kuaishou.cookie.clone())
            .cookie(VideoSource::RedBook, config.redbook.cookie.clone())
            .cookie(VideoSource::BiliBili, config.bilibili.cookie.clone())
            .twitter_auth_token(config.twitter.auth_token.clone())
            .build();
        info!(
            timeout_secs = config.http.timeout_secs,
            max_redirects = config.http.max_redirects,
            "video parser ready"
        );
        Ok(parser)
    }

    /// Find the share URL inside `text` and resolve it. Classification
    /// failures return before any network call.
    #[instrument(skip(self))]
    pub async fn resolve_share_url(&self, text: &str) -> Result<VideoInfo, ParseError> {
        let (source, url) = classify(text)?;
        debug!(%source, %url, "classified share url");
        self.parser(source)?.resolve_by_share_url(&url).await
    }

    #[instrument(skip(self))]
    pub async fn resolve_id(&self, source: VideoSource, video_id: &str) -> Result<VideoInfo, ParseError> {
        let video_id = video_id.trim();
        if video_id.is_empty() {
            return Err(ParseError::MalformedInput("video id is empty".to_string()));
        }
        self.parser(source)?.resolve_by_id(video_id).await
    }

    pub fn sources(&self) -> Vec<VideoSource> {
        VideoSource::ALL
            .iter()
            .copied()
            .filter(|s| self.parsers.contains_key(s))
            .collect()
    }

    fn parser(&self, source: VideoSource) -> Result<&Arc<dyn PlatformParser>, ParseError> {
        // The builder registers every source, so this only trips on a bug.
        self.parsers
            .get(&source)
            .ok_or_else(|| ParseError::UnrecognizedPlatform(source.to_string()))
    }
}

pub struct VideoParserBuilder {
    transport: Transport,
    cookies: HashMap<VideoSource, String>,
    twitter_auth_token: Option<String>,
    overrides: HashMap<VideoSource, Arc<dyn PlatformParser>>,
}

impl VideoParserBuilder {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            cookies: HashMap::new(),
            twitter_auth_token: None,
            overrides: HashMap::new(),
        }
    }

    /// Blank cookies are treated as absent.
    pub fn cookie(mut self, source: VideoSource, cookie: Option<String>) -> Self {
        match cookie.filter(|c| !c.trim().is_empty()) {
            Some(c) => {
                self.cookies.insert(source, c);
            }
            None => {
                self.cookies.remove(&source);
            }
        }
        self
    }

    pub fn twitter_auth_token(mut self, token: Option<String>) -> Self {
        self.twitter_auth_token = token;
        self
    }

    /// Replace the built-in resolver for `parser.source()`.
    pub fn with_parser(mut self, parser: Arc<dyn PlatformParser>) -> Self {
        self.overrides.insert(parser.source(), parser);
        self
    }

    pub fn build(mut self) -> VideoParser {
        let mut parsers: HashMap<VideoSource, Arc<dyn PlatformParser>> = HashMap::new();
        for source in VideoSource::ALL {
            let parser = match self.overrides.remove(&source) {
                Some(p) => p,
                None => self.default_parser(source),
            };
            parsers.insert(source, parser);
        }
        VideoParser {
            parsers: Arc::new(parsers),
        }
    }

    fn default_parser(&self, source: VideoSource) -> Arc<dyn PlatformParser> {
        let transport = self.transport.clone();
        let cookie = self.cookies.get(&source).cloned();
        match source {
            VideoSource::DouYin => Arc::new(DouYinParser::new(transport, cookie)),
            VideoSource::KuaiShou => Arc::new(KuaiShouParser::new(transport, cookie)),
            VideoSource::PiPiXia => Arc::new(PiPiXiaParser::new(transport)),
            VideoSource::WeiBo => Arc::new(WeiBoParser::new(transport)),
            VideoSource::XiGua => Arc::new(XiGuaParser::new(transport)),
            VideoSource::ZuiYou => Arc::new(ZuiYouParser::new(transport)),
            VideoSource::XinPianChang => Arc::new(XinPianChangParser::new(transport)),
            VideoSource::HaoKan => Arc::new(HaoKanParser::new(transport)),
            VideoSource::RedBook => Arc::new(RedBookParser::new(transport, cookie)),
            VideoSource::BiliBili => Arc::new(BiliBiliParser::new(transport, cookie)),
            VideoSource::Twitter => Arc::new(TwitterParser::new(transport, self.twitter_auth_token.clone())),
        }
    }
}
