use super::types::{ParseError, VideoSource};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

// ASCII classes only: shared text is usually Chinese prose glued to the link.
// `,` and `;` end the link.
static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[A-Za-z0-9.-]+(?::\d+)?(?:/[A-Za-z0-9_./~%+:@!$&=-]*)?(?:\?[A-Za-z0-9_=&:%+./~-]*)?")
        .unwrap()
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', ')', '\'', '"'];

struct HostRule {
    source: VideoSource,
    hosts: &'static [&'static str],
    /// Required path prefix, for hosts that also serve unrelated pages.
    path_prefixes: &'static [&'static str],
}

// Host lists are disjoint; order is only a tie-break.
const RULES: &[HostRule] = &[
    HostRule {
        source: VideoSource::DouYin,
        hosts: &["v.douyin.com", "www.douyin.com", "m.douyin.com", "www.iesdouyin.com"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::KuaiShou,
        hosts: &["v.kuaishou.com", "www.kuaishou.com", "v.m.chenzhongtech.com"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::PiPiXia,
        hosts: &["h5.pipix.com"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::WeiBo,
        hosts: &["weibo.com", "www.weibo.com", "video.weibo.com", "m.weibo.cn", "h5.video.weibo.com"],
        path_prefixes: &["/tv/show/", "/show", "/s/video/"],
    },
    HostRule {
        source: VideoSource::XiGua,
        hosts: &["v.ixigua.com", "www.ixigua.com", "m.ixigua.com"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::ZuiYou,
        hosts: &["share.xiaochuankeji.cn", "share.izuiyou.com"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::XinPianChang,
        hosts: &["www.xinpianchang.com", "xinpianchang.com"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::HaoKan,
        hosts: &["haokan.baidu.com", "haokan.hao123.com"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::RedBook,
        hosts: &["www.xiaohongshu.com", "xiaohongshu.com", "xhslink.com"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::BiliBili,
        hosts: &["www.bilibili.com", "m.bilibili.com", "bilibili.com", "b23.tv"],
        path_prefixes: &[],
    },
    HostRule {
        source: VideoSource::Twitter,
        hosts: &["twitter.com", "x.com", "mobile.twitter.com", "mobile.x.com", "www.twitter.com", "www.x.com"],
        path_prefixes: &[],
    },
];

/// Pull the first http(s) URL out of free-form text.
pub fn isolate_url(text: &str) -> Option<&str> {
    let found = URL_REGEX.find(text)?.as_str();
    let trimmed = found.trim_end_matches(TRAILING_PUNCTUATION);
    Some(trimmed)
}

/// Which platform owns this URL. The URL must already be isolated.
pub fn match_platform(url: &str) -> Option<VideoSource> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let path = parsed.path();

    RULES
        .iter()
        .find(|rule| {
            rule.hosts.contains(&host.as_str())
                && (rule.path_prefixes.is_empty()
                    || rule.path_prefixes.iter().any(|prefix| path.starts_with(prefix)))
        })
        .map(|rule| rule.source)
}

/// Isolate the URL in `text` and classify it.
///
/// Returns the platform together with the isolated URL, which is what the
/// platform resolver receives.
pub fn classify(text: &str) -> Result<(VideoSource, String), ParseError> {
    let url = isolate_url(text).ok_or_else(|| ParseError::MalformedInput(format!("no URL found in [{}]", text.trim())))?;
    let source =
        match_platform(url).ok_or_else(|| ParseError::UnrecognizedPlatform(url.to_string()))?;
    Ok((source, url.to_string()))
}
