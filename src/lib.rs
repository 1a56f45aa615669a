//! Resolve short-video share links from Chinese and international platforms
//! into a canonical record of play URLs, images and metadata.

pub mod config;
pub mod extractor;
pub mod server;

pub use config::Config;
pub use extractor::{
    classify, isolate_url, ImageInfo, ParseError, PlatformParser, TransportError, VideoAuthor, VideoInfo,
    VideoParser, VideoSource,
};
