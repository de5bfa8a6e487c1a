//! # 中间数据模型
//!
//! ## 设计思路
//!
//! 将“下载结果”与“解码结果”解耦：
//! - `FetchedBytes` 表示已下载但未解码的完整字节
//! - 解码结果见 `variant` 模块

use bytes::Bytes;

/// 下载阶段输出：完整响应体与跟随重定向后的最终地址。
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    bytes: Bytes,
    final_url: String,
}

impl FetchedBytes {
    pub(crate) fn new(bytes: Bytes, final_url: String) -> Self {
        Self { bytes, final_url }
    }

    /// 由内存字节直接构造（本地文件、测试夹具等不经网络的来源）。
    pub fn from_bytes(bytes: impl Into<Bytes>, origin: impl Into<String>) -> Self {
        Self::new(bytes.into(), origin.into())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// 廉价克隆的底层缓冲（引用计数）。
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// 跟随重定向后的最终 URL。
    pub fn final_url(&self) -> &str {
        &self.final_url
    }
}
