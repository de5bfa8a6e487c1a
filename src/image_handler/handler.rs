//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `ImageHandler` 只负责流程编排与配置管理，不关心调用方是聊天命令还是命令行。
//! 处理链路固定为：
//! 1. 读取配置快照
//! 2. 若为 Tenor 页面链接，先解析为直链
//! 3. 流式下载原始字节
//! 4. 嗅探格式，按 GIF / 静态图分派解码
//!
//! ## 实现思路
//!
//! - 配置通过 `Arc<RwLock<PipelineConfig>>` 支持运行时更新，写入前先校验。
//! - 单次请求内使用“同一配置快照”，避免处理中途配置漂移。
//! - 解码是纯 CPU 计算，放到 `spawn_blocking` 中执行，不阻塞异步运行时。
//! - 记录 `resolve/fetch/decode/total` 阶段耗时，便于性能诊断。

use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::error::PipelineError;
use crate::tenor::{TenorResolver, is_tenor_link};

use super::config::{DecodeOptions, PipelineConfig};
use super::error::ConfigError;
use super::format::{describe_unknown, sniff};
use super::gif::decode_animated_with;
use super::pipeline::decode_still_with;
use super::source::FetchedBytes;
use super::variant::ImageVariant;

/// 图片流水线处理器。
///
/// 封装配置状态与 Tenor 解析缓存，并编排各子模块实现完整流程。
pub struct ImageHandler {
    pub(super) config: Arc<RwLock<PipelineConfig>>,
    tenor: TenorResolver,
}

impl ImageHandler {
    /// 根据初始配置创建处理器，配置不合法时直接返回错误。
    ///
    /// # 示例
    /// ```rust
    /// use imgbot_media::image_handler::{ImageHandler, PipelineConfig};
    ///
    /// let handler = ImageHandler::new(PipelineConfig::default())?;
    /// # let _ = handler;
    /// # Ok::<(), imgbot_media::PipelineError>(())
    /// ```
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            tenor: TenorResolver::new(),
        })
    }

    /// 获取配置快照。
    ///
    /// 作用：保证单次请求链路使用一致参数。
    pub fn config_snapshot(&self) -> Result<PipelineConfig, PipelineError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ConfigError("配置读取锁已中毒".to_string()).into())
    }

    /// 替换配置；校验失败时保留原配置。
    pub fn update_config(&self, config: PipelineConfig) -> Result<(), PipelineError> {
        config.validate()?;

        let mut current = self
            .config
            .write()
            .map_err(|_| ConfigError("配置写入锁已中毒".to_string()))?;

        log::info!(
            "⚙️ 已更新流水线配置（max_redirects={}, timeout_ms={:?}, max_body_bytes={}, max_decoded_pixels={}）",
            config.fetch.max_redirects,
            config.fetch.timeout_ms,
            config.fetch.max_body_bytes,
            config.decode.max_decoded_pixels
        );
        *current = config;

        Ok(())
    }

    /// 处理主入口：下载并解码一个远程图片。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use imgbot_media::image_handler::{ImageHandler, PipelineConfig};
    ///
    /// # async fn demo() -> Result<(), imgbot_media::PipelineError> {
    /// let handler = ImageHandler::new(PipelineConfig::default())?;
    /// let variant = handler.fetch_and_decode("https://example.com/cat.gif").await?;
    /// println!("{}x{} frames={}", variant.width(), variant.height(), variant.frame_count());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch_and_decode(&self, url: &str) -> Result<ImageVariant, PipelineError> {
        self.fetch_and_decode_with_hooks(url, |_, _| {}, || false).await
    }

    pub async fn fetch_and_decode_with_hooks<P, C>(
        &self,
        url: &str,
        on_progress: P,
        is_cancelled: C,
    ) -> Result<ImageVariant, PipelineError>
    where
        P: Fn(u64, Option<u64>) + Send + Sync,
        C: Fn() -> bool + Send + Sync,
    {
        let config = self.config_snapshot()?;
        let total_start = Instant::now();

        let resolve_start = Instant::now();
        let source_url = self.resolve_source_url(url, &config).await?;
        let resolve_elapsed = resolve_start.elapsed();

        let fetch_start = Instant::now();
        let fetched = self
            .fetch_with_hooks(&source_url, &config.fetch, on_progress, is_cancelled)
            .await?;
        let fetch_elapsed = fetch_start.elapsed();

        let decode_start = Instant::now();
        let decode_options = config.decode.clone();
        let variant = tokio::task::spawn_blocking(move || Self::decode_fetched(&fetched, &decode_options))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;
        let decode_elapsed = decode_start.elapsed();

        log::info!(
            "✅ 图片处理完成 - {}x{} frames={} resolve={}ms fetch={}ms decode={}ms total={}ms",
            variant.width(),
            variant.height(),
            variant.frame_count(),
            resolve_elapsed.as_millis(),
            fetch_elapsed.as_millis(),
            decode_elapsed.as_millis(),
            total_start.elapsed().as_millis()
        );

        Ok(variant)
    }

    /// 对已下载的字节做嗅探与解码。
    pub fn decode_fetched(
        fetched: &FetchedBytes,
        options: &DecodeOptions,
    ) -> Result<ImageVariant, PipelineError> {
        let bytes = fetched.as_slice();

        let format = sniff(bytes);
        let Some(mime) = format.mime_type() else {
            let detected = describe_unknown(bytes);
            log::warn!(
                "⚠️ 内容不是支持的图片格式 - {} ({} bytes, 检测到 {:?})",
                Self::redact_url_for_log(fetched.final_url()),
                fetched.len(),
                detected
            );
            return Err(PipelineError::UnsupportedFormat { detected });
        };

        log::debug!("🔍 格式嗅探: {} ({} bytes)", mime, fetched.len());

        if format.is_animated_container() {
            Ok(decode_animated_with(bytes, options)?.into())
        } else {
            Ok(decode_still_with(bytes, format, options)?.into())
        }
    }

    async fn resolve_source_url(
        &self,
        url: &str,
        config: &PipelineConfig,
    ) -> Result<String, PipelineError> {
        if !is_tenor_link(url) {
            return Ok(url.trim().to_string());
        }

        let resolved = self
            .tenor
            .resolve(self, url, config.tenor_api_key.as_deref(), &config.fetch)
            .await?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_handler::error::{DecodeError, FetchError};
    use crate::image_handler::gif::tests::{FrameSpec, GifBuilder};
    use crate::image_handler::loader::tests::{local_options, ok_response, spawn_server};
    use crate::image_handler::pipeline::tests::{create_jpeg_bytes, create_png_bytes};
    use crate::image_handler::variant::ImageKind;
    use crate::tenor::TenorError;

    const PALETTE: [[u8; 3]; 4] = [[0, 0, 0], [255, 0, 0], [0, 255, 0], [0, 0, 255]];

    fn two_frame_gif() -> Vec<u8> {
        GifBuilder::new(2, 2, Some(&PALETTE))
            .loop_forever()
            .frame(FrameSpec {
                delay_centis: 5,
                ..FrameSpec::full(2, 2, &[1, 1, 1, 1])
            })
            .frame(FrameSpec {
                delay_centis: 7,
                ..FrameSpec::full(2, 2, &[2, 2, 3, 3])
            })
            .finish()
    }

    fn local_handler() -> ImageHandler {
        let config = PipelineConfig {
            fetch: local_options(),
            ..PipelineConfig::default()
        };
        ImageHandler::new(config).expect("handler init failed")
    }

    #[test]
    fn decode_fetched_dispatches_by_signature() {
        let options = DecodeOptions::default();

        let png = FetchedBytes::from_bytes(create_png_bytes(3, 2), "test://png");
        let still = ImageHandler::decode_fetched(&png, &options).expect("png decode");
        assert_eq!(still.kind(), ImageKind::Still);
        assert_eq!((still.width(), still.height()), (3, 2));

        let jpeg = FetchedBytes::from_bytes(create_jpeg_bytes(4, 4), "test://jpeg");
        let still = ImageHandler::decode_fetched(&jpeg, &options).expect("jpeg decode");
        assert_eq!(still.kind(), ImageKind::Still);

        let gif = FetchedBytes::from_bytes(two_frame_gif(), "test://gif");
        let animated = ImageHandler::decode_fetched(&gif, &options).expect("gif decode");
        assert_eq!(animated.kind(), ImageKind::AnimatedContainer);
        assert_eq!(animated.frame_count(), 2);
    }

    #[test]
    fn unknown_content_reports_detected_type() {
        let options = DecodeOptions::default();

        let html = FetchedBytes::from_bytes(
            &b"<!DOCTYPE html><html><body>nope</body></html>"[..],
            "test://html",
        );
        match ImageHandler::decode_fetched(&html, &options) {
            Err(PipelineError::UnsupportedFormat { detected }) => assert_eq!(detected, Some("text/html")),
            other => panic!("expected UnsupportedFormat, got {:?}", other.map(|v| v.kind())),
        }

        let empty = FetchedBytes::from_bytes(Vec::<u8>::new(), "test://empty");
        assert!(matches!(
            ImageHandler::decode_fetched(&empty, &options),
            Err(PipelineError::UnsupportedFormat { detected: None })
        ));
    }

    #[test]
    fn decode_errors_surface_without_partial_result() {
        let mut bytes = two_frame_gif();
        bytes.truncate(bytes.len() - 6);
        let fetched = FetchedBytes::from_bytes(bytes, "test://cut");

        assert!(matches!(
            ImageHandler::decode_fetched(&fetched, &DecodeOptions::default()),
            Err(PipelineError::Decode(DecodeError::Truncated(_)))
        ));
    }

    #[test]
    fn invalid_config_is_rejected_and_previous_kept() {
        let handler = ImageHandler::new(PipelineConfig::default()).expect("handler init failed");

        let mut broken = PipelineConfig::default();
        broken.fetch.max_body_bytes = 1;
        assert!(matches!(ImageHandler::new(broken.clone()), Err(PipelineError::Config(_))));
        assert!(matches!(handler.update_config(broken), Err(PipelineError::Config(_))));
        assert_eq!(handler.config_snapshot().expect("snapshot"), PipelineConfig::default());

        let mut tuned = PipelineConfig::default();
        tuned.fetch.max_redirects = 3;
        handler.update_config(tuned.clone()).expect("valid update");
        assert_eq!(handler.config_snapshot().expect("snapshot"), tuned);
    }

    #[tokio::test]
    async fn fetch_and_decode_serves_animated_gif_end_to_end() {
        let (addr, server) = spawn_server(vec![ok_response(&two_frame_gif())]);
        let handler = local_handler();

        let variant = handler
            .fetch_and_decode(&format!("http://{}/dance.gif", addr))
            .await
            .expect("pipeline should succeed");
        server.join().expect("server thread panicked");

        let animated = variant.into_animated().expect("animated variant");
        assert_eq!(animated.frame_count(), 2);
        assert_eq!(animated.loop_count(), Some(0));
        assert_eq!(animated.frames()[0].delay_centis(), 5);
        assert_eq!(&animated.frames()[1].pixels()[..4], &[0, 255, 0, 255]);
    }

    #[tokio::test]
    async fn fetch_errors_keep_their_stage() {
        let handler = ImageHandler::new(PipelineConfig::default()).expect("handler init failed");

        let err = handler
            .fetch_and_decode("http://127.0.0.1/blocked.png")
            .await
            .expect_err("private target must be refused");

        assert!(matches!(err, PipelineError::Fetch(FetchError::Forbidden(_))));
        assert_eq!(err.stage(), "fetch");
    }

    #[tokio::test]
    async fn tenor_links_need_an_api_key() {
        let handler = ImageHandler::new(PipelineConfig::default()).expect("handler init failed");

        let err = handler
            .fetch_and_decode("https://tenor.com/view/cat-dance-1234")
            .await
            .expect_err("tenor without key must fail");

        assert!(matches!(err, PipelineError::Tenor(TenorError::Unavailable)));
        assert_eq!(err.stage(), "resolve");
    }
}
