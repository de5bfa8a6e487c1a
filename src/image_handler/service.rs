//! # 服务层（可注入状态）
//!
//! ## 设计思路
//!
//! 聊天命令层通常并发处理多条消息，每条消息一个请求 ID。
//! `ImageServiceState` 在 `ImageHandler` 之上维护“请求 ID → 取消标志”映射，
//! 让命令层可以随时取消某个正在下载的请求。
//!
//! ## 实现思路
//!
//! - 请求开始时登记取消标志，同一 ID 不允许重复登记；结束时由守卫对象自动注销。
//! - 取消只是翻转 `AtomicBool`，下载循环轮询该标志后返回 `FetchError::Cancelled`。
//! - 进度通过回调上报，下载中的进度按时间 / 百分比 / 字节增量节流，
//!   终态（完成 / 取消 / 失败）总是上报。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::PipelineError;

use super::{ImageHandler, ImageVariant, PipelineConfig};

const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(50);
const PROGRESS_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(400);
const PROGRESS_MIN_BYTES_DELTA: u64 = 256 * 1024;
const PROGRESS_MIN_PERCENT_DELTA: u8 = 1;
const PROGRESS_FORCE_PERCENT_DELTA: u8 = 5;

#[derive(Debug)]
struct ProgressThrottleState {
    last_emit_at: Option<Instant>,
    last_progress: u8,
    last_downloaded: u64,
    last_total: Option<u64>,
}

impl ProgressThrottleState {
    fn new() -> Self {
        Self {
            last_emit_at: None,
            last_progress: 0,
            last_downloaded: 0,
            last_total: None,
        }
    }

    fn update(&mut self, progress: u8, downloaded: u64, total: Option<u64>) {
        self.last_emit_at = Some(Instant::now());
        self.last_progress = progress;
        self.last_downloaded = downloaded;
        self.last_total = total;
    }
}

fn should_emit_downloading_progress(
    state: &ProgressThrottleState,
    progress: u8,
    downloaded: u64,
    total: Option<u64>,
) -> bool {
    let Some(last_emit_at) = state.last_emit_at else {
        return true;
    };

    let elapsed = last_emit_at.elapsed();
    let progress_delta = progress.saturating_sub(state.last_progress);
    let downloaded_delta = downloaded.saturating_sub(state.last_downloaded);

    if progress_delta >= PROGRESS_FORCE_PERCENT_DELTA || total != state.last_total {
        return true;
    }

    if elapsed >= PROGRESS_MIN_INTERVAL
        && (progress_delta >= PROGRESS_MIN_PERCENT_DELTA || downloaded_delta >= PROGRESS_MIN_BYTES_DELTA)
    {
        return true;
    }

    elapsed >= PROGRESS_HEARTBEAT_INTERVAL
}

fn percent_of(downloaded: u64, total: Option<u64>) -> u8 {
    match total {
        Some(0) | None => 0,
        Some(total_bytes) => {
            let ratio = downloaded.saturating_mul(100) / total_bytes;
            ratio.min(100) as u8
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Cancelled,
    Failed,
}

/// 单次进度上报内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    pub request_id: String,
    pub progress: u8,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub status: DownloadStatus,
    pub stage: Option<&'static str>,
    pub error_code: Option<&'static str>,
    pub error_message: Option<String>,
}

/// 请求结束（含提前返回、future 被丢弃）时自动注销取消标志。
struct CancelRegistration<'a> {
    flags: &'a Mutex<HashMap<String, Arc<AtomicBool>>>,
    request_id: String,
    flag: Arc<AtomicBool>,
}

impl Drop for CancelRegistration<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.flags.lock() {
            guard.remove(&self.request_id);
        }
    }
}

/// 图片处理服务状态。
///
/// 由命令层持有（通常放在 `Arc` 中共享），内部持有 `ImageHandler`。
pub struct ImageServiceState {
    handler: ImageHandler,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl ImageServiceState {
    /// 使用默认配置创建服务状态。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use imgbot_media::image_handler::ImageServiceState;
    ///
    /// let service = ImageServiceState::new()?;
    /// # let _ = service;
    /// # Ok::<(), imgbot_media::PipelineError>(())
    /// ```
    pub fn new() -> Result<Self, PipelineError> {
        Self::with_config(PipelineConfig::default())
    }

    /// 使用自定义配置创建服务状态。
    pub fn with_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let handler = ImageHandler::new(config)?;
        Ok(Self {
            handler,
            cancel_flags: Mutex::new(HashMap::new()),
        })
    }

    pub fn handler(&self) -> &ImageHandler {
        &self.handler
    }

    /// 处理一个请求：下载并解码，期间可通过 `cancel(request_id)` 取消。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use imgbot_media::image_handler::ImageServiceState;
    ///
    /// # async fn demo() -> Result<(), imgbot_media::PipelineError> {
    /// let service = ImageServiceState::new()?;
    /// let variant = service
    ///     .process_url("msg-42", "https://example.com/a.png")
    ///     .await?;
    /// # let _ = variant;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn process_url(&self, request_id: &str, url: &str) -> Result<ImageVariant, PipelineError> {
        self.process_url_with_progress(request_id, url, |_| {}).await
    }

    pub async fn process_url_with_progress<S>(
        &self,
        request_id: &str,
        url: &str,
        sink: S,
    ) -> Result<ImageVariant, PipelineError>
    where
        S: Fn(&DownloadProgress) + Send + Sync,
    {
        let registration = self.register(request_id)?;
        let throttle_state = Mutex::new(ProgressThrottleState::new());

        let report = |status: DownloadStatus,
                      downloaded: u64,
                      total: Option<u64>,
                      failure: Option<&PipelineError>| {
            let progress = match status {
                DownloadStatus::Completed => 100,
                _ => percent_of(downloaded, total),
            };

            if status == DownloadStatus::Downloading {
                let Ok(mut guard) = throttle_state.lock() else {
                    return;
                };
                if !should_emit_downloading_progress(&guard, progress, downloaded, total) {
                    return;
                }
                guard.update(progress, downloaded, total);
            }

            sink(&DownloadProgress {
                request_id: request_id.to_string(),
                progress,
                downloaded_bytes: downloaded,
                total_bytes: total,
                status,
                stage: failure.map(PipelineError::stage),
                error_code: failure.map(PipelineError::code),
                error_message: failure.map(ToString::to_string),
            });
        };

        report(DownloadStatus::Downloading, 0, None, None);

        let flag = Arc::clone(&registration.flag);
        let result = self
            .handler
            .fetch_and_decode_with_hooks(
                url,
                |downloaded, total| report(DownloadStatus::Downloading, downloaded, total, None),
                move || flag.load(Ordering::SeqCst),
            )
            .await;
        drop(registration);

        let (last_downloaded, last_total) = throttle_state
            .lock()
            .map(|guard| (guard.last_downloaded, guard.last_total))
            .unwrap_or((0, None));

        match &result {
            Ok(_) => report(DownloadStatus::Completed, last_downloaded, last_total, None),
            Err(err) if err.is_cancelled() => {
                log::info!("🛑 请求已取消 - id: {}", request_id);
                report(DownloadStatus::Cancelled, last_downloaded, last_total, Some(err));
            }
            Err(err) => {
                log::warn!(
                    "❌ 请求失败 - id: {} stage={} code={}: {}",
                    request_id,
                    err.stage(),
                    err.code(),
                    err
                );
                report(DownloadStatus::Failed, last_downloaded, last_total, Some(err));
            }
        }

        result
    }

    /// 请求取消；返回该 ID 当前是否在处理中。
    pub fn cancel(&self, request_id: &str) -> Result<bool, PipelineError> {
        let guard = self
            .cancel_flags
            .lock()
            .map_err(|_| PipelineError::Task("下载取消标志锁已中毒".to_string()))?;

        if let Some(flag) = guard.get(request_id) {
            flag.store(true, Ordering::SeqCst);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// 当前处理中的请求数量。
    pub fn in_flight(&self) -> usize {
        self.cancel_flags.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    fn register(&self, request_id: &str) -> Result<CancelRegistration<'_>, PipelineError> {
        let mut guard = self
            .cancel_flags
            .lock()
            .map_err(|_| PipelineError::Task("下载取消标志锁已中毒".to_string()))?;

        if guard.contains_key(request_id) {
            return Err(PipelineError::DuplicateRequest(request_id.to_string()));
        }

        let flag = Arc::new(AtomicBool::new(false));
        guard.insert(request_id.to_string(), Arc::clone(&flag));

        Ok(CancelRegistration {
            flags: &self.cancel_flags,
            request_id: request_id.to_string(),
            flag,
        })
    }
}
