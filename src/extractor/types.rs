use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure inside a single Transport call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("too many redirects (limit {limit})")]
    TooManyRedirects { limit: usize },
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Connect(_) => true,
            TransportError::Status(code) => *code >= 500,
            TransportError::Request(e) => e.is_timeout() || e.is_connect(),
            TransportError::TooManyRedirects { .. } | TransportError::InvalidUrl(_) => false,
        }
    }
}

/// Every failure the engine reports. Nothing else crosses the
/// [`VideoParser`](super::VideoParser) boundary.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("share url [{0}] does not match any supported platform")]
    UnrecognizedPlatform(String),
    #[error("{platform}: {step} failed: {error}")]
    Transport {
        platform: VideoSource,
        step: &'static str,
        error: TransportError,
    },
    #[error("{platform}: unexpected upstream response: {detail}")]
    UpstreamShapeChanged { platform: VideoSource, detail: String },
    #[error("{platform}: content unavailable: {reason}")]
    ContentUnavailable { platform: VideoSource, reason: String },
}

impl ParseError {
    pub fn shape(platform: VideoSource, detail: impl Into<String>) -> Self {
        ParseError::UpstreamShapeChanged {
            platform,
            detail: detail.into(),
        }
    }

    pub fn unavailable(platform: VideoSource, reason: impl Into<String>) -> Self {
        ParseError::ContentUnavailable {
            platform,
            reason: reason.into(),
        }
    }

    /// Whether a caller retrying later could plausibly succeed. The engine
    /// itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            ParseError::Transport { error, .. } => error.is_retryable(),
            _ => false,
        }
    }
}

/// Supported platforms. Adding one means a new variant here, a row in the
/// classifier table and an entry in the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSource {
    DouYin,
    KuaiShou,
    PiPiXia,
    WeiBo,
    XiGua,
    ZuiYou,
    XinPianChang,
    HaoKan,
    RedBook,
    BiliBili,
    Twitter,
}

impl VideoSource {
    pub const ALL: [VideoSource; 11] = [
        VideoSource::DouYin,
        VideoSource::KuaiShou,
        VideoSource::PiPiXia,
        VideoSource::WeiBo,
        VideoSource::XiGua,
        VideoSource::ZuiYou,
        VideoSource::XinPianChang,
        VideoSource::HaoKan,
        VideoSource::RedBook,
        VideoSource::BiliBili,
        VideoSource::Twitter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoSource::DouYin => "douyin",
            VideoSource::KuaiShou => "kuaishou",
            VideoSource::PiPiXia => "pipixia",
            VideoSource::WeiBo => "weibo",
            VideoSource::XiGua => "xigua",
            VideoSource::ZuiYou => "zuiyou",
            VideoSource::XinPianChang => "xinpianchang",
            VideoSource::HaoKan => "haokan",
            VideoSource::RedBook => "redbook",
            VideoSource::BiliBili => "bilibili",
            VideoSource::Twitter => "twitter",
        }
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown video source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for VideoSource {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        VideoSource::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAuthor {
    pub uid: String,
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_photo_url: Option<String>,
}

impl ImageInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            live_photo_url: None,
        }
    }
}

/// The normalized description of one piece of content.
///
/// Only [`VideoInfoBuilder::build`] creates these, so a value in hand always
/// has either playable URLs or carousel images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoInfo {
    pub source: VideoSource,
    pub raw_id: String,
    pub title: String,
    pub author: VideoAuthor,
    pub cover_url: String,
    pub play_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_url: Option<String>,
    pub images: Vec<ImageInfo>,
    pub duration_ms: u64,
}

impl VideoInfo {
    pub fn builder(source: VideoSource, raw_id: impl Into<String>) -> VideoInfoBuilder {
        VideoInfoBuilder {
            source,
            raw_id: raw_id.into(),
            title: String::new(),
            author: VideoAuthor::default(),
            cover_url: String::new(),
            play_urls: Vec::new(),
            music_url: None,
            images: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Preferred play URL, if this is playable content.
    pub fn video_url(&self) -> Option<&str> {
        self.play_urls.first().map(String::as_str)
    }

    pub fn is_carousel(&self) -> bool {
        !self.images.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct VideoInfoBuilder {
    source: VideoSource,
    raw_id: String,
    title: String,
    author: VideoAuthor,
    cover_url: String,
    play_urls: Vec<String>,
    music_url: Option<String>,
    images: Vec<ImageInfo>,
    duration_ms: u64,
}

impl VideoInfoBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into().trim().to_string();
        self
    }

    pub fn author(mut self, author: VideoAuthor) -> Self {
        self.author = VideoAuthor {
            avatar: absolutize(author.avatar),
            ..author
        };
        self
    }

    pub fn cover_url(mut self, url: impl Into<String>) -> Self {
        self.cover_url = absolutize(url.into());
        self
    }

    /// Append a play URL candidate. Call in order of preference.
    pub fn play_url(mut self, url: impl Into<String>) -> Self {
        self.play_urls.push(url.into());
        self
    }

    pub fn play_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.play_urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn music_url(mut self, url: Option<String>) -> Self {
        self.music_url = url.map(absolutize).filter(|u| !u.is_empty());
        self
    }

    pub fn image(mut self, image: ImageInfo) -> Self {
        self.images.push(image);
        self
    }

    pub fn images<I: IntoIterator<Item = ImageInfo>>(mut self, images: I) -> Self {
        self.images.extend(images);
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Signed durations from upstream JSON; negatives mean "unknown".
    pub fn duration_ms_signed(self, duration_ms: i64) -> Self {
        self.duration_ms(u64::try_from(duration_ms).unwrap_or(0))
    }

    pub fn build(self) -> Result<VideoInfo, ParseError> {
        let mut play_urls: Vec<String> = Vec::with_capacity(self.play_urls.len());
        for url in self.play_urls.into_iter().map(absolutize) {
            if !url.is_empty() && !play_urls.contains(&url) {
                play_urls.push(url);
            }
        }

        let images: Vec<ImageInfo> = self
            .images
            .into_iter()
            .filter(|img| !img.url.is_empty())
            .map(|img| ImageInfo {
                url: absolutize(img.url),
                live_photo_url: img.live_photo_url.map(absolutize).filter(|u| !u.is_empty()),
            })
            .collect();

        // Carousel posts often still carry a slideshow video; the images win.
        let (play_urls, duration_ms) = if images.is_empty() {
            (play_urls, self.duration_ms)
        } else {
            (Vec::new(), 0)
        };

        if play_urls.is_empty() && images.is_empty() {
            return Err(ParseError::unavailable(
                self.source,
                "no playable media or images in response",
            ));
        }

        Ok(VideoInfo {
            source: self.source,
            raw_id: self.raw_id,
            title: self.title,
            author: self.author,
            cover_url: self.cover_url,
            play_urls,
            music_url: self.music_url,
            images,
            duration_ms,
        })
    }
}

/// Upgrade protocol-relative URLs (`//host/path`) to https.
fn absolutize(url: String) -> String {
    let trimmed = url.trim();
    if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        trimmed.to_string()
    }
}
