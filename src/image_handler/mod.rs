//! # 图片处理模块（image_handler）
//!
//! ## 设计思路
//!
//! 该模块将“下载 → 格式嗅探 → 解码 → 统一结果类型”按职责拆分为多个子模块，
//! 避免单文件膨胀与耦合。
//!
//! - `service`：承载可注入状态（`ImageServiceState`）与请求取消
//! - `handler`：编排整条处理流水线
//! - `loader`：负责 URL 下载、重定向与安全校验
//! - `buffer`：下载字节累加器（分配失败可恢复）
//! - `format`：魔数嗅探
//! - `pipeline`：PNG / JPEG 静态图解码与资源上限
//! - `gif` / `lzw`：GIF 容器解析、LZW 解压与逐帧合成
//! - `variant`：解码结果（静态图 / 动图）与受检转换
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 实现思路
//!
//! 对外仅暴露必要类型与函数，内部细节保持 `mod` 私有。
//! 所有解码路径输出统一为 8 位 RGBA（非预乘、行优先、左上角原点）。
//!
//! ## 新同事快速上手
//!
//! 可以按下面顺序理解调用链：
//!
//! ```text
//! 命令层 / probe
//!    ↓
//! service.rs（请求 ID、取消标志、进度节流）
//!    ↓
//! handler.rs（统一编排 + 阶段耗时日志）
//!    ├─ tenor.rs（Tenor 页面链接 → 直链，可选）
//!    ├─ loader.rs（流式下载 + 重定向 + SSRF / 体积校验）
//!    ├─ format.rs（魔数嗅探）
//!    └─ gif.rs / pipeline.rs（动图 / 静态图解码）
//!    ↓
//! 返回 ImageVariant 或 PipelineError
//! ```
//!
//! ## 分层职责建议
//!
//! - 配置与策略变更优先改 `config.rs`
//! - 业务流程顺序变更优先改 `handler.rs`
//! - 单阶段行为优化分别改 `loader/pipeline/gif`

mod buffer;
mod config;
mod error;
mod format;
mod gif;
mod handler;
mod loader;
mod lzw;
mod pipeline;
mod service;
mod source;
mod variant;

pub use buffer::ByteAccumulator;
pub use config::{
    DecodeOptions, ENV_ALLOW_PRIVATE_NETWORK, ENV_FETCH_TIMEOUT_MS, ENV_MAX_BODY_BYTES,
    ENV_MAX_REDIRECTS, ENV_TENOR_API_KEY, FetchOptions, PipelineConfig,
};
pub use error::{
    ConfigError, DecodeError, FetchError, FrameAccessError, IndexOutOfRange, OutOfMemory,
    VariantMismatch,
};
pub use format::{ImageFormat, SIGNATURE_PROBE_LEN, describe_unknown, sniff};
pub use gif::{decode_animated, decode_animated_with};
pub use handler::ImageHandler;
pub use pipeline::{decode_still, decode_still_with};
pub use service::{DownloadProgress, DownloadStatus, ImageServiceState};
pub use source::FetchedBytes;
pub use variant::{
    AnimatedFrame, AnimatedImage, ImageHeader, ImageKind, ImageVariant, RGBA_CHANNELS, StillImage,
    to_animated, to_frame, to_still,
};
