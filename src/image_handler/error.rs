//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 按流水线阶段拆分错误枚举：下载（`FetchError`）、解码（`DecodeError`）、
//! 结果访问（`VariantMismatch` / `IndexOutOfRange`）。每个阶段只返回自己的错误，
//! 由 crate 级 `PipelineError` 统一包装后交给调用方（聊天命令层）。
//!
//! 通过 `thiserror` 保持人类可读错误，同时提供稳定的 `code()` 供调用侧按分支匹配。

use super::variant::ImageKind;

/// 缓冲区扩容失败。
///
/// 失败时缓冲区保持扩容前的内容不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("内存不足：无法追加 {requested} 字节（已缓冲 {buffered} 字节）")]
pub struct OutOfMemory {
    /// 本次请求追加的字节数。
    pub requested: usize,
    /// 失败时已缓冲的字节数。
    pub buffered: usize,
}

/// 下载阶段错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("网络错误：{0}")]
    Network(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("重定向次数超过限制（{limit}）")]
    TooManyRedirects { limit: usize },

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: &'static str },

    #[error("响应体超过大小限制（{limit} 字节）")]
    TooLarge { limit: u64 },

    #[error("URL 无效：{0}")]
    InvalidUrl(String),

    #[error("禁止访问的目标地址：{0}")]
    Forbidden(String),

    #[error("图片下载已取消")]
    Cancelled,

    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

impl FetchError {
    /// 稳定错误码，供命令层映射用户可见文案。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "E_FETCH_NETWORK",
            Self::Timeout(_) => "E_FETCH_TIMEOUT",
            Self::TooManyRedirects { .. } => "E_FETCH_TOO_MANY_REDIRECTS",
            Self::Status { .. } => "E_FETCH_STATUS",
            Self::TooLarge { .. } => "E_FETCH_TOO_LARGE",
            Self::InvalidUrl(_) => "E_FETCH_INVALID_URL",
            Self::Forbidden(_) => "E_FETCH_FORBIDDEN",
            Self::Cancelled => "E_CANCELLED",
            Self::OutOfMemory(_) => "E_OUT_OF_MEMORY",
        }
    }
}

/// 解码阶段错误。
///
/// 解码要么完整成功，要么返回错误，不存在“部分可用”的结果。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// 数据在某个结构中途结束。
    #[error("数据被截断：{0}")]
    Truncated(String),

    /// 结构非法（区块序列、颜色索引、LZW 编码等）。
    #[error("数据格式错误：{0}")]
    Malformed(String),

    /// 格式合法但解码器明确不支持的变体。
    #[error("不支持的图片变体：{0}")]
    UnsupportedVariant(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),
}

impl DecodeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Truncated(_) => "E_DECODE_TRUNCATED",
            Self::Malformed(_) => "E_DECODE_MALFORMED",
            Self::UnsupportedVariant(_) => "E_DECODE_UNSUPPORTED",
            Self::ResourceLimit(_) => "E_DECODE_LIMIT",
        }
    }
}

/// 按错误的变体访问了图片结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("图片类型不匹配：期望 {expected:?}，实际 {actual:?}")]
pub struct VariantMismatch {
    pub expected: ImageKind,
    pub actual: ImageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("帧索引越界：{index}（共 {len} 帧）")]
pub struct IndexOutOfRange {
    pub index: usize,
    pub len: usize,
}

/// 按索引取帧时的错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameAccessError {
    #[error(transparent)]
    Mismatch(#[from] VariantMismatch),

    #[error(transparent)]
    OutOfRange(#[from] IndexOutOfRange),
}

/// 配置校验失败。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("配置无效：{0}")]
pub struct ConfigError(pub String);
