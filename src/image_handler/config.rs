//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `PipelineConfig`，保证运行时行为可观测、可调整、可测试。
//! 按阶段拆成 `FetchOptions`（下载）与 `DecodeOptions`（解码）两组，
//! 各阶段只拿到自己关心的那一组参数。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的配置。
//! - 所有字段 `#[serde(default)]`，JSON 配置文件只需写需要覆盖的字段。
//! - 配置文件缺失或无法解析时回退默认值，不阻断启动。
//! - 环境变量覆盖在文件之后应用，非法值记录警告后忽略。
//! - `validate` 统一做范围校验，运行时更新配置前必须通过。

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

pub const ENV_TENOR_API_KEY: &str = "IMGBOT_TENOR_APIKEY";
pub const ENV_FETCH_TIMEOUT_MS: &str = "IMGBOT_FETCH_TIMEOUT_MS";
pub const ENV_MAX_REDIRECTS: &str = "IMGBOT_MAX_REDIRECTS";
pub const ENV_MAX_BODY_BYTES: &str = "IMGBOT_MAX_BODY_BYTES";
pub const ENV_ALLOW_PRIVATE_NETWORK: &str = "IMGBOT_ALLOW_PRIVATE_NETWORK";

/// 下载阶段配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// 最大重定向次数，避免无限跳转或恶意链路。
    pub max_redirects: usize,
    /// 整个请求（含读取响应体）的超时时间（毫秒），`None` 表示不限制。
    pub timeout_ms: Option<u64>,
    /// 建立连接（TCP/TLS）超时时间（毫秒）。
    pub connect_timeout_ms: u64,
    /// 下载首包超时时间（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时时间（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 响应体大小上限（字节）。
    pub max_body_bytes: u64,
    /// 是否允许访问内网或本地地址（默认关闭，防 SSRF）。
    pub allow_private_network: bool,
    /// 是否对域名执行 DNS 解析后再做内网 IP 拦截。
    ///
    /// 开启后可防止“公网域名 -> 内网IP”绕过策略。
    pub resolve_dns_for_url_safety: bool,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            timeout_ms: Some(30_000),
            connect_timeout_ms: 8_000,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_body_bytes: 50 * 1024 * 1024,
            allow_private_network: false,
            resolve_dns_for_url_safety: true,
            user_agent: "imgBot-server".to_string(),
        }
    }
}

impl FetchOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 当前分块的读取超时：首包与后续分块分别计时。
    pub fn read_timeout(&self, received_first_chunk: bool) -> Duration {
        if received_first_chunk {
            Duration::from_millis(self.stream_chunk_timeout_ms)
        } else {
            Duration::from_millis(self.stream_first_byte_timeout_ms)
        }
    }
}

/// 解码阶段配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// 画布像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码输出的内存上限（按 RGBA 估算，动图按所有帧累计，字节）。
    pub max_decoded_bytes: u64,
    /// 动图帧最小显示时长（毫秒），更短的延迟被抬高到该值；`0` 表示不调整。
    pub min_frame_delay_ms: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 512 * 1024 * 1024,
            min_frame_delay_ms: 0,
        }
    }
}

impl DecodeOptions {
    /// 应用最小帧延迟策略后的帧延迟（百分之一秒）。
    pub(crate) fn effective_delay_centis(&self, raw_centis: u16) -> u16 {
        if self.min_frame_delay_ms == 0 {
            return raw_centis;
        }

        let min_centis = self.min_frame_delay_ms.div_ceil(10);
        let min_centis = u16::try_from(min_centis).unwrap_or(u16::MAX);
        raw_centis.max(min_centis)
    }
}

/// 流水线完整配置。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fetch: FetchOptions,
    pub decode: DecodeOptions,
    /// Tenor API key，未配置时 Tenor 页面链接无法解析。
    pub tenor_api_key: Option<String>,
}

impl PipelineConfig {
    /// 从 JSON 文件加载配置；文件不存在或解析失败时回退默认值。
    pub fn load_from_path(config_path: &Path) -> Self {
        if config_path.exists() {
            match fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => log::warn!(
                        "⚠️ 配置文件解析失败，使用默认配置：{} ({})",
                        config_path.display(),
                        e
                    ),
                },
                Err(e) => log::warn!(
                    "⚠️ 配置文件读取失败，使用默认配置：{} ({})",
                    config_path.display(),
                    e
                ),
            }
        }

        Self::default()
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError(format!("序列化配置失败: {}", e)))?;
        fs::write(config_path, content)
            .map_err(|e| ConfigError(format!("写入配置文件失败: {}", e)))
    }

    /// 使用进程环境变量覆盖配置。
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// 按给定查询函数覆盖配置，便于测试时不触碰进程环境。
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_TENOR_API_KEY) {
            let key = key.trim().to_string();
            self.tenor_api_key = (!key.is_empty()).then_some(key);
        }

        if let Some(value) = parse_override::<u64>(&lookup, ENV_FETCH_TIMEOUT_MS) {
            self.fetch.timeout_ms = (value > 0).then_some(value);
        }

        if let Some(value) = parse_override::<usize>(&lookup, ENV_MAX_REDIRECTS) {
            self.fetch.max_redirects = value;
        }

        if let Some(value) = parse_override::<u64>(&lookup, ENV_MAX_BODY_BYTES) {
            self.fetch.max_body_bytes = value;
        }

        if let Some(value) = parse_override::<bool>(&lookup, ENV_ALLOW_PRIVATE_NETWORK) {
            self.fetch.allow_private_network = value;
        }
    }

    /// 范围校验。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fetch = &self.fetch;

        if fetch.max_redirects > 50 {
            return Err(ConfigError("max_redirects 不能大于 50".to_string()));
        }
        if let Some(timeout_ms) = fetch.timeout_ms {
            if !(500..=120_000).contains(&timeout_ms) {
                return Err(ConfigError("timeout_ms 必须在 500~120000 毫秒之间".to_string()));
            }
        }
        if !(1..=120_000).contains(&fetch.connect_timeout_ms) {
            return Err(ConfigError("connect_timeout_ms 必须在 1~120000 毫秒之间".to_string()));
        }
        if !(500..=120_000).contains(&fetch.stream_first_byte_timeout_ms) {
            return Err(ConfigError(
                "stream_first_byte_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&fetch.stream_chunk_timeout_ms) {
            return Err(ConfigError(
                "stream_chunk_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if fetch.max_body_bytes < 1024 {
            return Err(ConfigError("max_body_bytes 不能小于 1KB".to_string()));
        }
        if fetch.user_agent.trim().is_empty() {
            return Err(ConfigError("user_agent 不能为空".to_string()));
        }

        let decode = &self.decode;
        if decode.max_decoded_pixels == 0 {
            return Err(ConfigError("max_decoded_pixels 必须大于 0".to_string()));
        }
        if decode.max_decoded_bytes < 4 {
            return Err(ConfigError("max_decoded_bytes 至少容纳一个像素".to_string()));
        }
        if decode.min_frame_delay_ms > 1_000 {
            return Err(ConfigError("min_frame_delay_ms 不能大于 1000 毫秒".to_string()));
        }

        Ok(())
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("⚠️ 忽略无效的环境变量 {}={}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir() -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock error")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("imgbot-media-config-test-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn defaults_pass_validation() {
        let config = PipelineConfig::default();

        config.validate().expect("defaults should be valid");
        assert_eq!(config.fetch.max_redirects, 10);
        assert_eq!(config.fetch.user_agent, "imgBot-server");
        assert_eq!(config.decode.min_frame_delay_ms, 0);
        assert!(config.tenor_api_key.is_none());
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let dir = unique_temp_dir();
        let config_path = dir.join("imgbot.json");

        let mut config = PipelineConfig::default();
        config.fetch.max_redirects = 3;
        config.tenor_api_key = Some("key".to_string());
        config.save_to_path(&config_path).expect("save config");

        let loaded = PipelineConfig::load_from_path(&config_path);
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let dir = unique_temp_dir();
        let config_path = dir.join("imgbot.json");
        std::fs::write(&config_path, r#"{ "fetch": { "max_redirects": 2 } }"#).expect("write config");

        let loaded = PipelineConfig::load_from_path(&config_path);

        assert_eq!(loaded.fetch.max_redirects, 2);
        assert_eq!(loaded.fetch.timeout_ms, Some(30_000));
        assert_eq!(loaded.decode, DecodeOptions::default());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_or_broken_file_falls_back_to_defaults() {
        let dir = unique_temp_dir();
        let missing = dir.join("missing.json");
        assert_eq!(PipelineConfig::load_from_path(&missing), PipelineConfig::default());

        let broken = dir.join("broken.json");
        std::fs::write(&broken, "{ not json").expect("write config");
        assert_eq!(PipelineConfig::load_from_path(&broken), PipelineConfig::default());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_TENOR_API_KEY, "  abc  "),
            (ENV_FETCH_TIMEOUT_MS, "5000"),
            (ENV_MAX_REDIRECTS, "not-a-number"),
            (ENV_ALLOW_PRIVATE_NETWORK, "true"),
        ]);

        let mut config = PipelineConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.tenor_api_key.as_deref(), Some("abc"));
        assert_eq!(config.fetch.timeout_ms, Some(5_000));
        assert_eq!(config.fetch.max_redirects, 10);
        assert!(config.fetch.allow_private_network);
        assert_eq!(config.fetch.max_body_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = PipelineConfig::default();
        config.fetch.max_redirects = 51;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.fetch.stream_first_byte_timeout_ms = 100;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.fetch.connect_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.fetch.max_body_bytes = 10;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.decode.min_frame_delay_ms = 5_000;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.fetch.timeout_ms = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn min_frame_delay_raises_short_delays_only() {
        let mut decode = DecodeOptions::default();
        assert_eq!(decode.effective_delay_centis(0), 0);

        decode.min_frame_delay_ms = 20;
        assert_eq!(decode.effective_delay_centis(0), 2);
        assert_eq!(decode.effective_delay_centis(1), 2);
        assert_eq!(decode.effective_delay_centis(10), 10);

        decode.min_frame_delay_ms = 15;
        assert_eq!(decode.effective_delay_centis(1), 2);
    }
}
