//! # Tenor 链接解析
//!
//! ## 设计思路
//!
//! 聊天中常见的 `https://tenor.com/view/<slug>-<id>` 是 HTML 页面而非图片。
//! 这里通过 Tenor v1 接口把页面链接换成可直接下载的 GIF 地址，再交给常规下载流程。
//!
//! ## 实现思路
//!
//! - GIF ID 取路径末尾的连续数字（正则 `(\d+)$`）。
//! - 接口请求复用 `ImageHandler::fetch`，享受相同的超时、体积与 SSRF 限制。
//! - 媒体优先级：`mediumgif` > `gif` > `tinygif`。
//! - 解析结果放入小容量 LRU 缓存，同一链接重复出现时不再请求接口。

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::image_handler::{FetchError, FetchOptions, ImageHandler};

const TENOR_API_ENDPOINT: &str = "https://g.tenor.com/v1/gifs";
const RESOLVED_CACHE_CAPACITY: usize = 64;

static GIF_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)$").expect("Tenor GIF ID 正则无效"));

#[derive(Debug, thiserror::Error)]
pub enum TenorError {
    #[error("Tenor 链接解析不可用：未配置 API key")]
    Unavailable,

    #[error("无法从 Tenor 链接中提取 GIF ID：{0}")]
    InvalidLink(String),

    #[error("Tenor 接口返回异常：{0}")]
    BadResponse(String),

    #[error("Tenor 接口请求失败：{0}")]
    Network(#[from] FetchError),
}

impl TenorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable => "E_TENOR_UNAVAILABLE",
            Self::InvalidLink(_) => "E_TENOR_INVALID_LINK",
            Self::BadResponse(_) => "E_TENOR_BAD_RESPONSE",
            Self::Network(e) => e.code(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GifsResponse {
    #[serde(default)]
    results: Vec<GifObject>,
}

#[derive(Debug, Default, Deserialize)]
struct GifObject {
    #[serde(default)]
    media: Vec<MediaFormats>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaFormats {
    #[serde(default)]
    mediumgif: Option<MediaObject>,
    #[serde(default)]
    gif: Option<MediaObject>,
    #[serde(default)]
    tinygif: Option<MediaObject>,
}

#[derive(Debug, Deserialize)]
struct MediaObject {
    url: String,
}

/// 是否为 Tenor 页面链接（`tenor.com/view/...`）。
pub fn is_tenor_link(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url.trim()) else {
        return false;
    };

    let host_matches = parsed
        .host_str()
        .map(|host| {
            let host = host.to_ascii_lowercase();
            host == "tenor.com" || host.ends_with(".tenor.com")
        })
        .unwrap_or(false);

    host_matches && parsed.path().starts_with("/view/")
}

/// 从页面链接路径末尾提取 GIF ID。
pub fn extract_gif_id(url: &str) -> Result<String, TenorError> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| TenorError::InvalidLink(format!("URL 格式错误：{}", e)))?;
    let path = parsed.path().trim_end_matches('/');

    GIF_ID_PATTERN
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| TenorError::InvalidLink(path.to_string()))
}

fn lookup_url(gif_id: &str, api_key: &str) -> Result<String, TenorError> {
    let url = reqwest::Url::parse_with_params(
        TENOR_API_ENDPOINT,
        &[("ids", gif_id), ("key", api_key), ("limit", "1")],
    )
    .map_err(|e| TenorError::BadResponse(format!("无法构建接口地址：{}", e)))?;
    Ok(url.to_string())
}

/// 从接口响应中选出最合适的 GIF 地址。
fn pick_media_url(body: &[u8]) -> Result<String, TenorError> {
    let response: GifsResponse = serde_json::from_slice(body)
        .map_err(|e| TenorError::BadResponse(format!("JSON 解析失败：{}", e)))?;

    let media = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| TenorError::BadResponse("结果为空（GIF 可能已删除）".to_string()))?
        .media
        .into_iter()
        .next()
        .ok_or_else(|| TenorError::BadResponse("结果缺少 media 字段".to_string()))?;

    media
        .mediumgif
        .or(media.gif)
        .or(media.tinygif)
        .map(|m| m.url)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| TenorError::BadResponse("没有可用的 GIF 格式".to_string()))
}

/// Tenor 链接解析器，持有已解析链接的 LRU 缓存。
pub struct TenorResolver {
    resolved: Mutex<LruCache<String, String>>,
}

impl Default for TenorResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TenorResolver {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(RESOLVED_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            resolved: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cached(&self, gif_id: &str) -> Option<String> {
        self.resolved.lock().ok()?.get(gif_id).cloned()
    }

    fn remember(&self, gif_id: String, media_url: String) {
        if let Ok(mut cache) = self.resolved.lock() {
            cache.put(gif_id, media_url);
        }
    }

    /// 将页面链接解析为直链 GIF 地址。
    pub async fn resolve(
        &self,
        handler: &ImageHandler,
        link: &str,
        api_key: Option<&str>,
        options: &FetchOptions,
    ) -> Result<String, TenorError> {
        let api_key = api_key.filter(|key| !key.is_empty()).ok_or(TenorError::Unavailable)?;
        let gif_id = extract_gif_id(link)?;

        if let Some(hit) = self.cached(&gif_id) {
            log::debug!("♻️ 命中 Tenor 解析缓存 - id: {}", gif_id);
            return Ok(hit);
        }

        let body = handler.fetch(&lookup_url(&gif_id, api_key)?, options).await?;
        let media_url = pick_media_url(body.as_slice())?;

        log::info!(
            "🔗 Tenor 链接已解析 - id: {} -> {}",
            gif_id,
            ImageHandler::redact_url_for_log(&media_url)
        );
        self.remember(gif_id, media_url.clone());

        Ok(media_url)
    }
}
