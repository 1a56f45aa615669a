use super::embedded::api_json;
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderName, ACCEPT, AUTHORIZATION, CONTENT_TYPE, SET_COOKIE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

const PLATFORM: VideoSource = VideoSource::Twitter;

const BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs=1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";
const GUEST_TOKEN_URL: &str = "https://api.x.com/1.1/guest/activate.json";
const GRAPHQL_URL: &str = "https://x.com/i/api/graphql/2ICDjqPd81tulZcYrtpTuQ/TweetResultByRestId";
const SYNDICATION_URL: &str = "https://cdn.syndication.twimg.com/tweet-result";

static STATUS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:twitter\.com|x\.com)/(?:[^/]+)/status/(\d+)").unwrap());

static RESOLUTION_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\d+)x(\d+)/").unwrap());

const GUEST_TOKEN: HeaderName = HeaderName::from_static("x-guest-token");
const CSRF_TOKEN: HeaderName = HeaderName::from_static("x-csrf-token");
const AUTH_TYPE: HeaderName = HeaderName::from_static("x-twitter-auth-type");
const ACTIVE_USER: HeaderName = HeaderName::from_static("x-twitter-active-user");

pub struct TwitterParser {
    transport: Transport,
    auth_token: Option<String>,
}

impl TwitterParser {
    pub fn new(transport: Transport, auth_token: Option<String>) -> Self {
        Self {
            transport,
            auth_token: auth_token.filter(|t| !t.trim().is_empty()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, request: FetchRequest) -> Result<T, ParseError> {
        let step = request.step();
        let resp = self.transport.send(PLATFORM, request).await?;
        let value = api_json(&resp.body).map_err(|e| e.into_parse_error(PLATFORM))?;
        serde_json::from_value(value).map_err(|e| ParseError::shape(PLATFORM, format!("{}: {}", step, e)))
    }

    async fn fetch_guest_token(&self) -> Result<String, ParseError> {
        #[derive(Deserialize)]
        struct GuestTokenResponse {
            guest_token: String,
        }

        let data: GuestTokenResponse = self
            .get_json(
                FetchRequest::post("guest token", GUEST_TOKEN_URL)
                    .header(AUTHORIZATION, format!("Bearer {}", BEARER_TOKEN))
                    .user_agent(self.transport.desktop_user_agent()),
            )
            .await?;
        Ok(data.guest_token)
    }

    async fn fetch_from_syndication(&self, tweet_id: &str) -> Result<VideoInfo, ParseError> {
        let url = format!("{}?id={}&token=x", SYNDICATION_URL, tweet_id);
        let data: SyndicationResponse = self
            .get_json(
                FetchRequest::get("syndication api", url)
                    .user_agent(self.transport.desktop_user_agent())
                    .header(ACCEPT, "application/json"),
            )
            .await?;
        parse_syndication_response(data, tweet_id)
    }

    async fn fetch_from_graphql(&self, tweet_id: &str, guest_token: &str) -> Result<VideoInfo, ParseError> {
        let data: GraphQLResponse = self
            .get_json(
                FetchRequest::get("graphql api", graphql_url(tweet_id))
                    .header(AUTHORIZATION, format!("Bearer {}", BEARER_TOKEN))
                    .header(GUEST_TOKEN, guest_token)
                    .header(CONTENT_TYPE, "application/json")
                    .user_agent(self.transport.desktop_user_agent()),
            )
            .await?;
        parse_graphql_response(data, tweet_id)
    }

    /// The ct0 cookie doubles as the CSRF token for logged-in API calls.
    async fn fetch_csrf_token(&self, auth_token: &str) -> Result<String, ParseError> {
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("csrf token", "https://x.com")
                    .user_agent(self.transport.desktop_user_agent())
                    .cookie(Some(format!("auth_token={}", auth_token).as_str()))
                    .no_redirects(),
            )
            .await?;

        resp.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .find_map(|pair| pair.trim().strip_prefix("ct0=").map(str::to_string))
            .ok_or_else(|| ParseError::shape(PLATFORM, "could not obtain CSRF token"))
    }

    async fn fetch_from_graphql_auth(&self, tweet_id: &str, auth_token: &str) -> Result<VideoInfo, ParseError> {
        let csrf_token = self.fetch_csrf_token(auth_token).await?;

        let data: GraphQLResponse = self
            .get_json(
                FetchRequest::get("graphql api", graphql_url(tweet_id))
                    .header(AUTHORIZATION, format!("Bearer {}", BEARER_TOKEN))
                    .header(CONTENT_TYPE, "application/json")
                    .header(AUTH_TYPE, "OAuth2Session")
                    .header(ACTIVE_USER, "yes")
                    .header(CSRF_TOKEN, &csrf_token)
                    .user_agent(self.transport.desktop_user_agent())
                    .cookie(Some(format!("auth_token={}; ct0={}", auth_token, csrf_token).as_str())),
            )
            .await?;
        parse_graphql_response(data, tweet_id)
    }
}

#[async_trait]
impl PlatformParser for TwitterParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let tweet_id = STATUS_REGEX
            .captures(share_url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ParseError::MalformedInput(format!("not a tweet status link: {}", share_url)))?;
        self.resolve_by_id(&tweet_id).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        let tweet_id = video_id.trim();
        if tweet_id.is_empty() || !tweet_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::MalformedInput(format!("tweet id must be numeric: {}", video_id)));
        }

        if let Some(auth_token) = &self.auth_token {
            return self.fetch_from_graphql_auth(tweet_id, auth_token).await;
        }

        // Syndication covers public tweets without any token dance.
        match self.fetch_from_syndication(tweet_id).await {
            Ok(info) => return Ok(info),
            Err(e @ ParseError::ContentUnavailable { .. }) => return Err(e),
            Err(e) => warn!(error = %e, "syndication failed, falling back to graphql"),
        }

        let guest_token = self.fetch_guest_token().await?;
        debug!("obtained guest token");
        self.fetch_from_graphql(tweet_id, &guest_token).await
    }
}

/// The common media shape of both APIs.
struct TweetMedia<'a> {
    kind: &'a str,
    media_url: &'a str,
    duration_millis: i64,
    variants: Vec<(&'a str, Option<i64>, &'a str)>,
}

fn build_video_info(
    tweet_id: &str,
    text: &str,
    author: VideoAuthor,
    media: &[TweetMedia<'_>],
) -> Result<VideoInfo, ParseError> {
    let video = media.iter().find(|m| matches!(m.kind, "video" | "animated_gif"));

    let mut builder = VideoInfo::builder(PLATFORM, tweet_id).title(text).author(author);

    match video {
        Some(video) => {
            // Highest resolution first, bitrate as the tie breaker.
            let mut variants: Vec<(u32, i64, &str)> = video
                .variants
                .iter()
                .filter(|(content_type, _, _)| *content_type == "video/mp4")
                .map(|(_, bitrate, url)| (extract_resolution(url).1, bitrate.unwrap_or(0), *url))
                .collect();
            variants.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

            builder = builder
                .cover_url(video.media_url)
                .play_urls(variants.into_iter().map(|(_, _, url)| url.to_string()))
                .duration_ms_signed(video.duration_millis);
        }
        None => {
            let photos: Vec<ImageInfo> = media
                .iter()
                .filter(|m| m.kind == "photo" && !m.media_url.is_empty())
                .map(|m| ImageInfo::new(get_high_quality_image_url(m.media_url)))
                .collect();
            if let Some(first) = media.first() {
                builder = builder.cover_url(first.media_url);
            }
            builder = builder.images(photos);
        }
    }

    builder.build()
}

fn parse_syndication_response(data: SyndicationResponse, tweet_id: &str) -> Result<VideoInfo, ParseError> {
    if data.typename.as_deref() == Some("TweetTombstone") {
        return Err(ParseError::unavailable(PLATFORM, "tweet is unavailable"));
    }

    let media: Vec<TweetMedia<'_>> = data
        .media_details
        .iter()
        .flatten()
        .map(|m| TweetMedia {
            kind: &m.r#type,
            media_url: &m.media_url_https,
            duration_millis: m.video_info.as_ref().map_or(0, |v| v.duration_millis),
            variants: m
                .video_info
                .iter()
                .flat_map(|v| &v.variants)
                .map(|v| (v.content_type.as_str(), v.bitrate, v.url.as_str()))
                .collect(),
        })
        .collect();

    let author = data
        .user
        .map(|u| VideoAuthor {
            uid: u.id_str,
            name: u.name,
            avatar: u.profile_image_url_https,
        })
        .unwrap_or_default();

    let id = if data.id_str.is_empty() { tweet_id } else { data.id_str.as_str() };
    build_video_info(id, &data.text, author, &media)
}

fn parse_graphql_response(resp: GraphQLResponse, tweet_id: &str) -> Result<VideoInfo, ParseError> {
    let result = resp
        .data
        .tweet_result
        .result
        .ok_or_else(|| ParseError::unavailable(PLATFORM, "tweet not found"))?;

    match result.typename.as_str() {
        "TweetTombstone" => return Err(ParseError::unavailable(PLATFORM, "tweet was deleted")),
        "TweetUnavailable" => {
            let reason = result.reason.as_deref().unwrap_or("unavailable");
            return Err(ParseError::unavailable(PLATFORM, format!("tweet unavailable: {}", reason)));
        }
        _ => {}
    }

    // Tweets with visibility limits nest the payload one level down.
    let tweet = if result.legacy.is_none() {
        match result.tweet {
            Some(inner) => *inner,
            None => return Err(ParseError::shape(PLATFORM, "could not find tweet data")),
        }
    } else {
        result
    };

    let legacy = tweet
        .legacy
        .as_ref()
        .ok_or_else(|| ParseError::shape(PLATFORM, "could not find tweet data"))?;

    let author = tweet
        .core
        .as_ref()
        .and_then(|c| c.user_results.result.as_ref())
        .map(|u| VideoAuthor {
            uid: u.rest_id.clone(),
            name: u.legacy.name.clone(),
            avatar: u.legacy.profile_image_url_https.clone(),
        })
        .unwrap_or_default();

    let media: Vec<TweetMedia<'_>> = legacy
        .extended_entities
        .iter()
        .flat_map(|e| &e.media)
        .map(|m| TweetMedia {
            kind: &m.r#type,
            media_url: &m.media_url_https,
            duration_millis: m.video_info.as_ref().map_or(0, |v| v.duration_millis),
            variants: m
                .video_info
                .iter()
                .flat_map(|v| &v.variants)
                .map(|v| (v.content_type.as_str(), v.bitrate, v.url.as_str()))
                .collect(),
        })
        .collect();

    build_video_info(tweet_id, &legacy.full_text, author, &media)
}

fn graphql_url(tweet_id: &str) -> String {
    let (variables, features) = build_graphql_params(tweet_id);
    format!(
        "{}?variables={}&features={}",
        GRAPHQL_URL,
        urlencoding::encode(&variables),
        urlencoding::encode(&features)
    )
}

fn build_graphql_params(tweet_id: &str) -> (String, String) {
    let variables = serde_json::json!({
        "tweetId": tweet_id,
        "withCommunity": false,
        "includePromotedContent": false,
        "withVoice": false
    });

    let features = serde_json::json!({
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": false,
        "tweet_awards_web_tipping_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "responsive_web_media_download_video_enabled": false,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_enhance_cards_enabled": false
    });

    (variables.to_string(), features.to_string())
}

fn extract_resolution(url: &str) -> (u32, u32) {
    match RESOLUTION_REGEX.captures(url) {
        Some(caps) => {
            let width = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let height = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            (width, height)
        }
        None => (0, 0),
    }
}

fn get_high_quality_image_url(image_url: &str) -> String {
    let base_url = image_url.split('?').next().unwrap_or(image_url);
    let format = if base_url.ends_with(".png") {
        "png"
    } else if base_url.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    };
    format!("{}?format={}&name=orig", base_url, format)
}

// Syndication response structs

#[derive(Debug, Deserialize)]
struct SyndicationResponse {
    #[serde(rename = "__typename")]
    typename: Option<String>,
    #[serde(default)]
    id_str: String,
    #[serde(default)]
    text: String,
    user: Option<SyndicationUser>,
    #[serde(rename = "mediaDetails")]
    media_details: Option<Vec<SyndicationMedia>>,
}

#[derive(Debug, Deserialize)]
struct SyndicationUser {
    #[serde(default)]
    id_str: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    profile_image_url_https: String,
}

#[derive(Debug, Deserialize)]
struct SyndicationMedia {
    r#type: String,
    #[serde(default)]
    media_url_https: String,
    video_info: Option<VideoInfoPayload>,
}

#[derive(Debug, Deserialize)]
struct VideoInfoPayload {
    #[serde(default)]
    duration_millis: i64,
    #[serde(default)]
    variants: Vec<Variant>,
}

#[derive(Debug, Deserialize)]
struct Variant {
    #[serde(default)]
    bitrate: Option<i64>,
    content_type: String,
    url: String,
}

// GraphQL response structs

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    data: GraphQLData,
}

#[derive(Debug, Deserialize)]
struct GraphQLData {
    #[serde(rename = "tweetResult")]
    tweet_result: GraphQLTweetResult,
}

#[derive(Debug, Deserialize)]
struct GraphQLTweetResult {
    result: Option<GraphQLResult>,
}

#[derive(Debug, Deserialize)]
struct GraphQLResult {
    #[serde(rename = "__typename", default)]
    typename: String,
    legacy: Option<GraphQLLegacy>,
    core: Option<GraphQLCore>,
    tweet: Option<Box<GraphQLResult>>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQLCore {
    user_results: GraphQLUserResults,
}

#[derive(Debug, Deserialize)]
struct GraphQLUserResults {
    result: Option<GraphQLUser>,
}

#[derive(Debug, Deserialize)]
struct GraphQLUser {
    #[serde(default)]
    rest_id: String,
    legacy: GraphQLUserLegacy,
}

#[derive(Debug, Deserialize)]
struct GraphQLUserLegacy {
    #[serde(default)]
    name: String,
    #[serde(default)]
    profile_image_url_https: String,
}

#[derive(Debug, Deserialize)]
struct GraphQLLegacy {
    #[serde(default)]
    full_text: String,
    extended_entities: Option<GraphQLExtendedEntities>,
}

#[derive(Debug, Deserialize)]
struct GraphQLExtendedEntities {
    media: Vec<GraphQLMedia>,
}

#[derive(Debug, Deserialize)]
struct GraphQLMedia {
    r#type: String,
    #[serde(default)]
    media_url_https: String,
    video_info: Option<VideoInfoPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_syndication_video_variants_sorted() {
        let data: SyndicationResponse = serde_json::from_value(json!({
            "__typename": "Tweet",
            "id_str": "1700000000000000000",
            "text": "clip",
            "user": {"id_str": "12", "name": "poster", "profile_image_url_https": "https://pbs.twimg.com/p.jpg"},
            "mediaDetails": [{
                "type": "video",
                "media_url_https": "https://pbs.twimg.com/thumb.jpg",
                "video_info": {"duration_millis": 12345, "variants": [
                    {"content_type": "application/x-mpegURL", "url": "https://video.twimg.com/pl.m3u8"},
                    {"bitrate": 632000, "content_type": "video/mp4", "url": "https://video.twimg.com/vid/320x568/a.mp4"},
                    {"bitrate": 2176000, "content_type": "video/mp4", "url": "https://video.twimg.com/vid/720x1280/b.mp4"}
                ]}
            }]
        }))
        .unwrap();
        let info = parse_syndication_response(data, "1").unwrap();
        assert_eq!(info.raw_id, "1700000000000000000");
        assert_eq!(
            info.play_urls,
            vec![
                "https://video.twimg.com/vid/720x1280/b.mp4",
                "https://video.twimg.com/vid/320x568/a.mp4",
            ]
        );
        assert_eq!(info.duration_ms, 12345);
        assert_eq!(info.author.name, "poster");
        assert_eq!(info.cover_url, "https://pbs.twimg.com/thumb.jpg");
    }

    #[test]
    fn test_photo_tweet_is_carousel() {
        let data: SyndicationResponse = serde_json::from_value(json!({
            "text": "pics",
            "mediaDetails": [
                {"type": "photo", "media_url_https": "https://pbs.twimg.com/media/a.jpg"},
                {"type": "photo", "media_url_https": "https://pbs.twimg.com/media/b.png"}
            ]
        }))
        .unwrap();
        let info = parse_syndication_response(data, "42").unwrap();
        assert_eq!(info.raw_id, "42");
        assert!(info.play_urls.is_empty());
        assert_eq!(info.images[0].url, "https://pbs.twimg.com/media/a.jpg?format=jpg&name=orig");
        assert_eq!(info.images[1].url, "https://pbs.twimg.com/media/b.png?format=png&name=orig");
    }

    #[test]
    fn test_text_only_tweet_is_unavailable() {
        let data: SyndicationResponse = serde_json::from_value(json!({"text": "just words"})).unwrap();
        assert!(matches!(
            parse_syndication_response(data, "42"),
            Err(ParseError::ContentUnavailable { .. })
        ));
    }

    #[test]
    fn test_graphql_tombstone() {
        let resp: GraphQLResponse = serde_json::from_value(json!({
            "data": {"tweetResult": {"result": {"__typename": "TweetTombstone"}}}
        }))
        .unwrap();
        assert!(matches!(
            parse_graphql_response(resp, "1"),
            Err(ParseError::ContentUnavailable { .. })
        ));
    }

    #[test]
    fn test_graphql_nested_visibility_result() {
        let resp: GraphQLResponse = serde_json::from_value(json!({
            "data": {"tweetResult": {"result": {
                "__typename": "TweetWithVisibilityResults",
                "tweet": {
                    "core": {"user_results": {"result": {"rest_id": "99", "legacy": {"name": "n"}}}},
                    "legacy": {"full_text": "nested", "extended_entities": {"media": [{
                        "type": "animated_gif",
                        "media_url_https": "https://pbs.twimg.com/g.jpg",
                        "video_info": {"variants": [{"bitrate": 0, "content_type": "video/mp4", "url": "https://video.twimg.com/tweet_video/g.mp4"}]}
                    }]}}
                }
            }}}
        }))
        .unwrap();
        let info = parse_graphql_response(resp, "5").unwrap();
        assert_eq!(info.title, "nested");
        assert_eq!(info.author.uid, "99");
        assert_eq!(info.play_urls, vec!["https://video.twimg.com/tweet_video/g.mp4"]);
    }

    #[test]
    fn test_status_regex() {
        let caps = STATUS_REGEX.captures("https://x.com/someone/status/1234567890?s=20").unwrap();
        assert_eq!(&caps[1], "1234567890");
        assert!(STATUS_REGEX.captures("https://x.com/someone").is_none());
    }
}
