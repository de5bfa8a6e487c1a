//! # 字节累加缓冲
//!
//! ## 设计思路
//!
//! 网络响应体按分块到达，总长度事先未知（`Content-Length` 可能缺失或不可信）。
//! `ByteAccumulator` 只做一件事：按到达顺序追加分块，扩容失败时返回错误而不是中止进程。
//!
//! ## 实现思路
//!
//! - 所有扩容都走 `Vec::try_reserve`，失败时已缓冲的数据保持不变。
//! - `finalize` 将缓冲转为不可变的 `bytes::Bytes`，交给嗅探与解码阶段只读使用。

use bytes::Bytes;

use super::error::OutOfMemory;
use super::source::FetchedBytes;

/// 可增长的下载缓冲。
#[derive(Debug, Default)]
pub struct ByteAccumulator {
    data: Vec<u8>,
    chunks: usize,
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预留容量（通常来自 `Content-Length` 提示）。
    pub fn reserve(&mut self, additional: usize) -> Result<(), OutOfMemory> {
        self.data.try_reserve(additional).map_err(|_| OutOfMemory {
            requested: additional,
            buffered: self.data.len(),
        })
    }

    /// 追加一个分块。空分块不改变内容。
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), OutOfMemory> {
        if chunk.is_empty() {
            return Ok(());
        }

        self.reserve(chunk.len())?;
        self.data.extend_from_slice(chunk);
        self.chunks += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 已接收的非空分块数量（用于诊断日志）。
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// 结束累加，得到只读的下载结果。
    pub fn finalize(self, final_url: impl Into<String>) -> FetchedBytes {
        FetchedBytes::new(Bytes::from(self.data), final_url.into())
    }
}
