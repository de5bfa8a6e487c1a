//! # imgBot 媒体流水线 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              聊天命令层 / probe 诊断工具                  │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ Result<ImageVariant, PipelineError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            媒体流水线 (Rust)                     │
//! │                                                          │
//! │  ┌─ error ────── PipelineError (统一错误类型)             │
//! │  │                                                       │
//! │  ├─ tenor ────── Tenor 页面链接 → GIF 直链 (LRU 缓存)      │
//! │  │                                                       │
//! │  └─ image_handler                                        │
//! │      ├─ service   请求 ID + 取消 + 进度节流               │
//! │      ├─ handler   编排 + 阶段耗时                         │
//! │      ├─ loader    流式下载 · 重定向 · SSRF               │
//! │      ├─ format    魔数嗅探                                │
//! │      ├─ pipeline  PNG / JPEG → RGBA                      │
//! │      ├─ gif, lzw  GIF 解析 · 解压 · 合成                  │
//! │      └─ variant   静态图 / 动图 结果类型                  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `PipelineError`，带稳定错误码与失败阶段 |
//! | [`image_handler`] | 远程图片下载、格式嗅探、静态图与 GIF 解码 |
//! | [`tenor`] | 把 Tenor 页面链接解析为可下载的 GIF 地址 |

pub mod error;
pub mod image_handler;
pub mod tenor;

pub use error::PipelineError;
pub use image_handler::{ImageHandler, ImageVariant, PipelineConfig};

/// 使用默认配置下载并解码一个远程图片。
///
/// 每次调用都会新建处理器；需要复用配置、缓存或取消能力时请持有
/// [`ImageHandler`] 或 [`image_handler::ImageServiceState`]。
pub async fn fetch_and_decode(url: &str) -> Result<ImageVariant, PipelineError> {
    ImageHandler::new(PipelineConfig::default())?
        .fetch_and_decode(url)
        .await
}
