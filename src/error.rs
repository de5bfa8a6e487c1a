//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 各阶段（下载 / 嗅探 / 解码 / Tenor 解析 / 配置）各自定义错误，
//! 在流水线出口统一包装为 `PipelineError`，调用方（聊天命令层）只需处理一种类型。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息，`#[from]` 免去手动 map。
//! - `code()` 提供稳定错误码，`stage()` 指出失败阶段，用于选择用户可见文案。
//! - 实现 `Serialize` 将错误序列化为字符串，便于写入结构化日志或回传给上层。

use serde::Serialize;

use crate::image_handler::{ConfigError, DecodeError, FetchError};
use crate::tenor::TenorError;

/// 流水线统一错误类型。
///
/// 出错时不会返回任何部分结果。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 下载阶段错误（网络 / 超时 / 重定向 / 状态码 / 体积 / 取消）
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// 解码阶段错误
    #[error("{0}")]
    Decode(#[from] DecodeError),

    /// 内容不是支持的图片格式（GIF / PNG / JPEG）
    #[error("无法识别的图片格式{}", describe_detected(.detected))]
    UnsupportedFormat { detected: Option<&'static str> },

    /// Tenor 页面链接解析失败
    #[error("{0}")]
    Tenor(#[from] TenorError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    /// 后台解码任务异常（panic 或被运行时取消）
    #[error("后台任务失败：{0}")]
    Task(String),

    #[error("请求 ID 已在处理中：{0}")]
    DuplicateRequest(String),
}

fn describe_detected(detected: &Option<&'static str>) -> String {
    detected
        .map(|mime| format!("（检测到 {}）", mime))
        .unwrap_or_default()
}

impl PipelineError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fetch(e) => e.code(),
            Self::Decode(e) => e.code(),
            Self::UnsupportedFormat { .. } => "E_UNSUPPORTED_FORMAT",
            Self::Tenor(e) => e.code(),
            Self::Config(_) => "E_CONFIG",
            Self::Task(_) => "E_INTERNAL",
            Self::DuplicateRequest(_) => "E_DUPLICATE_REQUEST",
        }
    }

    /// 失败阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::UnsupportedFormat { .. } => "sniff",
            Self::Decode(_) | Self::Task(_) => "decode",
            Self::Tenor(_) => "resolve",
            Self::Config(_) => "config",
            Self::DuplicateRequest(_) => "service",
        }
    }

    /// 是否由取消引起（命令层通常静默处理）。
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Fetch(FetchError::Cancelled) | Self::Tenor(TenorError::Network(FetchError::Cancelled))
        )
    }
}

impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_stages_follow_the_cause() {
        let timeout = PipelineError::from(FetchError::Timeout("slow".to_string()));
        assert_eq!(timeout.code(), "E_FETCH_TIMEOUT");
        assert_eq!(timeout.stage(), "fetch");

        let truncated = PipelineError::from(DecodeError::Truncated("eof".to_string()));
        assert_eq!(truncated.code(), "E_DECODE_TRUNCATED");
        assert_eq!(truncated.stage(), "decode");

        let unknown = PipelineError::UnsupportedFormat {
            detected: Some("text/html"),
        };
        assert_eq!(unknown.code(), "E_UNSUPPORTED_FORMAT");
        assert_eq!(unknown.stage(), "sniff");
        assert!(unknown.to_string().contains("text/html"));

        let tenor = PipelineError::from(TenorError::Unavailable);
        assert_eq!(tenor.stage(), "resolve");
    }

    #[test]
    fn cancellation_is_recognized_through_wrappers() {
        assert!(PipelineError::from(FetchError::Cancelled).is_cancelled());
        assert!(PipelineError::from(TenorError::Network(FetchError::Cancelled)).is_cancelled());
        assert!(!PipelineError::from(FetchError::Network("reset".to_string())).is_cancelled());
    }

    #[test]
    fn serializes_as_display_string() {
        let err = PipelineError::from(FetchError::TooManyRedirects { limit: 3 });
        let json = serde_json::to_string(&err).expect("serialize error");

        assert_eq!(json, format!("\"{}\"", err));
    }
}
