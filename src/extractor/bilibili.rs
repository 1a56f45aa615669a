use super::embedded::{api_json, query_param, secs_to_ms};
use super::transport::{FetchRequest, Transport};
use super::types::*;
use super::PlatformParser;
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};
use url::Url;

const PLATFORM: VideoSource = VideoSource::BiliBili;

// BV/AV conversion constants (from https://github.com/Colerar/abv)
const XOR_CODE: i64 = 23442827791579;
const MASK_CODE: i64 = (1 << 51) - 1;
const MAX_AID: i64 = MASK_CODE + 1;
const BASE: i64 = 58;
const BV_LEN: usize = 9;

const ALPHABET: &[u8] = b"FcwAPNKTMug3GV5Lj7EJnHpWsx4tb8haYeviqBz6rkCy12mUSDQX9RdoZf";

// Mixin key encoding table for WBI signing
const MIXIN_KEY_ENC_TAB: [usize; 32] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13,
];

const NAV_API: &str = "https://api.bilibili.com/x/web-interface/nav";
const VIEW_API: &str = "https://api.bilibili.com/x/web-interface/view";
const PLAY_URL_API: &str = "https://api.bilibili.com/x/player/wbi/playurl";

// html5 mp4 streams top out at 720P.
const HTML5_QUALITY: &str = "64";

static VIDEO_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bilibili\.com/video/(BV[0-9A-Za-z]{10}|av\d+)").unwrap());

// BV ids are case-sensitive base58: a lowercased id decodes to another video.
static BV_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^BV1[1-9A-HJ-NP-Za-km-z]{9}$").unwrap());

static AV_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^av(\d+)$").unwrap());

fn rev_alphabet() -> [i64; 256] {
    let mut rev = [0i64; 256];
    for (i, &c) in ALPHABET.iter().enumerate() {
        rev[c as usize] = i as i64;
    }
    rev
}

/// Convert BV ID to AV number
pub fn bv_to_av(bvid: &str) -> Result<i64, String> {
    let rev = rev_alphabet();

    let upper = bvid.to_ascii_uppercase();
    let bvid = if upper.starts_with("BV1") {
        &bvid[3..]
    } else if upper.starts_with("BV") {
        &bvid[2..]
    } else {
        bvid
    };

    if bvid.len() != BV_LEN || !bvid.is_ascii() {
        return Err(format!("invalid BV ID length: expected {}, got {}", BV_LEN, bvid.len()));
    }

    let mut bv: Vec<u8> = bvid.bytes().collect();
    bv.swap(0, 6);
    bv.swap(1, 4);

    let mut avid: i64 = 0;
    for b in bv.iter() {
        avid = avid
            .checked_mul(BASE)
            .and_then(|v| v.checked_add(rev[*b as usize]))
            .ok_or_else(|| format!("BV ID out of range: {}", bvid))?;
    }

    Ok((avid & MASK_CODE) ^ XOR_CODE)
}

/// Convert AV number to BV ID
pub fn av_to_bv(avid: i64) -> Result<String, String> {
    if avid < 1 {
        return Err(format!("AV {} is smaller than 1", avid));
    }
    if avid >= MAX_AID {
        return Err(format!("AV {} is bigger than {}", avid, MAX_AID));
    }

    let mut bvid = vec![0u8; BV_LEN];
    let mut tmp = (MAX_AID | avid) ^ XOR_CODE;

    for i in (0..BV_LEN).rev() {
        if tmp == 0 {
            break;
        }
        bvid[i] = ALPHABET[(tmp % BASE) as usize];
        tmp /= BASE;
    }

    bvid.swap(0, 6);
    bvid.swap(1, 4);

    Ok(format!("BV1{}", String::from_utf8_lossy(&bvid)))
}

/// Accepts `BV1…`, `av123` or a bare av number.
fn normalize_video_id(id: &str) -> Result<(i64, String), String> {
    let id = id.trim();
    if BV_REGEX.is_match(id) {
        let aid = bv_to_av(id)?;
        let canonical = av_to_bv(aid)?;
        if canonical != id {
            return Err(format!("not a canonical BV id: {}", id));
        }
        return Ok((aid, canonical));
    }
    let digits = AV_REGEX
        .captures(id)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(id);
    let aid: i64 = digits
        .parse()
        .map_err(|_| format!("not a BV or av id: {}", id))?;
    Ok((aid, av_to_bv(aid)?))
}

pub struct BiliBiliParser {
    transport: Transport,
    cookie: Option<String>,
}

impl BiliBiliParser {
    pub fn new(transport: Transport, cookie: Option<String>) -> Self {
        Self { transport, cookie }
    }

    fn api_request(&self, step: &'static str, url: String) -> FetchRequest {
        FetchRequest::get(step, url)
            .user_agent(self.transport.desktop_user_agent())
            .referer("https://www.bilibili.com/")
            .header(reqwest::header::ACCEPT, "application/json")
            .cookie(self.cookie.as_deref())
    }

    async fn get_api<T: DeserializeOwned>(&self, step: &'static str, url: String) -> Result<ApiResponse<T>, ParseError> {
        let resp = self.transport.send(PLATFORM, self.api_request(step, url)).await?;
        let value = api_json(&resp.body).map_err(|e| e.into_parse_error(PLATFORM))?;
        serde_json::from_value(value).map_err(|e| ParseError::shape(PLATFORM, format!("{}: {}", step, e)))
    }

    async fn resolve_short_url(&self, short_url: &str) -> Result<Url, ParseError> {
        let resp = self
            .transport
            .send(
                PLATFORM,
                FetchRequest::get("short link redirect", short_url)
                    .user_agent(self.transport.desktop_user_agent())
                    .no_redirects(),
            )
            .await?;
        resp.location()
            .ok_or_else(|| ParseError::shape(PLATFORM, "short link did not redirect"))
    }

    async fn fetch_wbi_key(&self) -> Result<String, ParseError> {
        // nav answers code -101 for anonymous callers but still carries wbi_img.
        let nav: ApiResponse<NavData> = self.get_api("wbi keys", NAV_API.to_string()).await?;
        let wbi = nav
            .data
            .map(|d| d.wbi_img)
            .ok_or_else(|| ParseError::shape(PLATFORM, "nav has no wbi_img"))?;

        let img_key = extract_key_from_url(&wbi.img_url);
        let sub_key = extract_key_from_url(&wbi.sub_url);
        Ok(get_mixin_key(&format!("{}{}", img_key, sub_key)))
    }

    async fn fetch_view(&self, aid: i64) -> Result<ViewData, ParseError> {
        let resp: ApiResponse<ViewData> = self.get_api("view api", format!("{}?aid={}", VIEW_API, aid)).await?;
        resp.into_data()
    }

    async fn fetch_play_url(&self, aid: i64, cid: i64, wbi_key: Option<&str>) -> Result<PlayUrlData, ParseError> {
        let mut params = BTreeMap::new();
        params.insert("avid", aid.to_string());
        params.insert("cid", cid.to_string());
        params.insert("qn", HTML5_QUALITY.to_string());
        params.insert("fnval", "1".to_string()); // mp4
        params.insert("fnver", "0".to_string());
        params.insert("platform", "html5".to_string());
        params.insert("high_quality", "1".to_string());

        let query = match wbi_key {
            Some(key) => wbi_sign(&mut params, key, unix_now()),
            None => build_query(&params),
        };

        let resp: ApiResponse<PlayUrlData> = self
            .get_api("play url api", format!("{}?{}", PLAY_URL_API, query))
            .await?;
        resp.into_data()
    }

    async fn resolve_video(&self, video_id: &str, page: usize) -> Result<VideoInfo, ParseError> {
        let (aid, bvid) = normalize_video_id(video_id).map_err(ParseError::MalformedInput)?;

        // Non-fatal: the unsigned endpoint still answers most requests.
        let wbi_key = match self.fetch_wbi_key().await {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "failed to get WBI keys");
                None
            }
        };

        let view = self.fetch_view(aid).await?;
        let selected = view
            .pages
            .get(page.saturating_sub(1))
            .or_else(|| view.pages.first())
            .ok_or_else(|| ParseError::unavailable(PLATFORM, "no video pages found"))?;
        debug!(aid, cid = selected.cid, page, "resolved video page");

        let play = self.fetch_play_url(aid, selected.cid, wbi_key.as_deref()).await?;
        build_video_info(&bvid, &view, selected, &play)
    }
}

#[async_trait]
impl PlatformParser for BiliBiliParser {
    fn source(&self) -> VideoSource {
        PLATFORM
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_share_url(&self, share_url: &str) -> Result<VideoInfo, ParseError> {
        let mut url = Url::parse(share_url).map_err(|_| ParseError::MalformedInput(share_url.to_string()))?;
        if url.host_str() == Some("b23.tv") {
            url = self.resolve_short_url(share_url).await?;
        }

        let id = VIDEO_REGEX
            .captures(url.as_str())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ParseError::shape(PLATFORM, format!("could not extract video ID from URL: {}", url)))?;
        let page = query_param(&url, "p").and_then(|p| p.parse().ok()).unwrap_or(1);

        self.resolve_video(&id, page).await
    }

    #[instrument(skip(self), fields(platform = %PLATFORM))]
    async fn resolve_by_id(&self, video_id: &str) -> Result<VideoInfo, ParseError> {
        self.resolve_video(video_id, 1).await
    }
}

fn build_video_info(bvid: &str, view: &ViewData, page: &Page, play: &PlayUrlData) -> Result<VideoInfo, ParseError> {
    // Each segment's primary URL first, then its mirrors.
    let mut play_urls = Vec::new();
    for segment in &play.durl {
        play_urls.push(segment.url.clone());
        play_urls.extend(segment.backup_url.iter().flatten().cloned());
    }

    let title = if view.pages.len() > 1 && !page.part.is_empty() {
        format!("{} - {}", view.title, page.part)
    } else {
        view.title.clone()
    };

    let duration_secs = if page.duration > 0 { page.duration } else { view.duration };

    VideoInfo::builder(PLATFORM, bvid)
        .title(title)
        .author(VideoAuthor {
            uid: view.owner.mid.to_string(),
            name: view.owner.name.clone(),
            avatar: view.owner.face.clone(),
        })
        .cover_url(view.pic.clone())
        .play_urls(play_urls)
        .duration_ms(secs_to_ms(duration_secs))
        .build()
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn wbi_sign(params: &mut BTreeMap<&str, String>, wbi_key: &str, wts: u64) -> String {
    params.insert("wts", wts.to_string());

    // Sorted by key, values stripped of !'()*
    let query_str = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&filter_wbi_value(v))))
        .collect::<Vec<_>>()
        .join("&");

    let digest = md5::compute(format!("{}{}", query_str, wbi_key));
    format!("{}&w_rid={:x}", query_str, digest)
}

fn extract_key_from_url(url: &str) -> String {
    // https://i0.hdslb.com/bfs/wbi/{key}.png
    url.rsplit('/')
        .next()
        .and_then(|filename| filename.rsplit_once('.').map(|(name, _)| name.to_string()))
        .unwrap_or_default()
}

fn get_mixin_key(orig: &str) -> String {
    let bytes: Vec<u8> = orig.bytes().collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&idx| bytes.get(idx).copied())
        .map(|b| b as char)
        .collect()
}

fn filter_wbi_value(s: &str) -> String {
    s.chars()
        .filter(|&c| !matches!(c, '!' | '\'' | '(' | ')' | '*'))
        .collect()
}

fn build_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// Response structs

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// -404 missing, 62002 hidden, 62004 under review, 62012 owner-only.
    fn into_data(self) -> Result<T, ParseError> {
        if self.code != 0 {
            return Err(ParseError::unavailable(
                PLATFORM,
                format!("{} (code: {})", self.message, self.code),
            ));
        }
        self.data
            .ok_or_else(|| ParseError::shape(PLATFORM, "response has no data"))
    }
}

#[derive(Debug, Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    title: String,
    #[serde(default)]
    pic: String,
    #[serde(default)]
    duration: i64,
    owner: Owner,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    mid: i64,
    name: String,
    #[serde(default)]
    face: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    cid: i64,
    #[serde(default)]
    part: String,
    #[serde(default)]
    duration: i64,
}

#[derive(Debug, Deserialize)]
struct PlayUrlData {
    #[serde(default)]
    durl: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    url: String,
    backup_url: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bv_av_conversion() {
        assert_eq!(av_to_bv(170001).unwrap(), "BV17x411w7KC");
        assert_eq!(bv_to_av("BV17x411w7KC").unwrap(), 170001);
        assert_eq!(av_to_bv(111298867365120).unwrap(), "BV1L9Uoa9EUx");
        assert_eq!(bv_to_av("BV1L9Uoa9EUx").unwrap(), 111298867365120);
        assert!(av_to_bv(0).is_err());
        assert!(bv_to_av("BV1short").is_err());
    }

    #[test]
    fn test_normalize_video_id_forms() {
        assert_eq!(normalize_video_id("av2").unwrap(), (2, "BV1xx411c7mD".to_string()));
        assert_eq!(normalize_video_id("2").unwrap(), (2, "BV1xx411c7mD".to_string()));
        assert_eq!(normalize_video_id("BV1xx411c7mD").unwrap().0, 2);
        assert!(normalize_video_id("hello").is_err());
    }

    #[test]
    fn test_bv_id_case_is_significant() {
        assert_eq!(normalize_video_id("BV1L9Uoa9EUx").unwrap().0, 111298867365120);
        assert!(normalize_video_id("bv1xx411c7md").is_err());
        // 0, O, I and l are outside the alphabet.
        assert!(normalize_video_id("BV1xx411c70D").is_err());
    }

    #[test]
    fn test_wbi_signature() {
        let key = get_mixin_key(&format!(
            "{}{}",
            extract_key_from_url("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
            extract_key_from_url("https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"),
        ));
        assert_eq!(key, "ea1db124af3c7062474693fa704f4ff8");

        let mut params = BTreeMap::new();
        params.insert("foo", "114".to_string());
        params.insert("bar", "514".to_string());
        params.insert("zab", "1919810".to_string());
        assert_eq!(
            wbi_sign(&mut params, &key, 1702204169),
            "bar=514&foo=114&wts=1702204169&zab=1919810&w_rid=8f6f2b5b3d485fe1886cec6a0be8c5d4"
        );
    }

    #[test]
    fn test_play_urls_keep_segment_order_with_mirrors() {
        let view: ViewData = serde_json::from_value(json!({
            "title": "multi part",
            "pic": "http://i0.hdslb.com/cover.jpg",
            "duration": 300,
            "owner": {"mid": 9, "name": "up", "face": "http://i0.hdslb.com/face.jpg"},
            "pages": [{"cid": 1, "part": "P1", "duration": 120}, {"cid": 2, "part": "P2", "duration": 180}]
        }))
        .unwrap();
        let play: PlayUrlData = serde_json::from_value(json!({
            "durl": [{"url": "https://upos-sz.bilivideo.com/1.mp4", "backup_url": ["https://upos-hz.bilivideo.com/1.mp4"]}]
        }))
        .unwrap();
        let info = build_video_info("BV1xx411c7mD", &view, &view.pages[1], &play).unwrap();
        assert_eq!(
            info.play_urls,
            vec!["https://upos-sz.bilivideo.com/1.mp4", "https://upos-hz.bilivideo.com/1.mp4"]
        );
        assert_eq!(info.title, "multi part - P2");
        assert_eq!(info.duration_ms, 180_000);
        assert_eq!(info.author.uid, "9");
    }

    #[test]
    fn test_api_error_code_is_unavailable() {
        let resp: ApiResponse<ViewData> =
            serde_json::from_value(json!({"code": -404, "message": "啥都木有", "data": null})).unwrap();
        assert!(matches!(
            resp.into_data(),
            Err(ParseError::ContentUnavailable { .. })
        ));
    }
}
