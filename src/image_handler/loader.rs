//! # 下载模块
//!
//! ## 设计思路
//!
//! 负责把一个远程 URL 变成完整的内存字节，并在“尽可能早”的阶段执行输入校验。
//! 目标是尽快失败，减少不必要内存与网络消耗。
//! 本模块不判断内容是不是图片：格式判断交给嗅探与解码阶段。
//!
//! ## 实现思路
//!
//! - 关闭客户端自动重定向，手动逐跳跟随：每一跳都计数，并重新做 SSRF 校验。
//! - 响应体通过 `Response::chunk` 流式读取，首包与后续分块分别设置超时。
//! - 声明长度与实际累计长度都受 `max_body_bytes` 限制。
//! - 取消标志在发请求前检查，等待网络期间定时轮询，命中后立即丢弃连接与已缓冲数据。
//! - reqwest 错误统一映射到 `FetchError`，日志中的 URL 去掉查询参数。

use std::future::Future;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::net::lookup_host;

use super::buffer::ByteAccumulator;
use super::config::FetchOptions;
use super::error::FetchError;
use super::source::FetchedBytes;
use super::ImageHandler;

const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl ImageHandler {
    /// 下载 URL 对应的完整响应体。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use imgbot_media::image_handler::{FetchOptions, ImageHandler, PipelineConfig};
    ///
    /// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    /// let handler = ImageHandler::new(PipelineConfig::default())?;
    /// let fetched = handler
    ///     .fetch("https://example.com/cat.gif", &FetchOptions::default())
    ///     .await?;
    /// println!("{} bytes from {}", fetched.len(), fetched.final_url());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedBytes, FetchError> {
        self.fetch_with_hooks(url, options, |_, _| {}, || false).await
    }

    /// 带进度回调与取消检查的下载。
    ///
    /// `on_progress(已接收字节, 声明总长度)`；`is_cancelled` 返回 `true` 时中止下载。
    pub async fn fetch_with_hooks<P, C>(
        &self,
        url: &str,
        options: &FetchOptions,
        on_progress: P,
        is_cancelled: C,
    ) -> Result<FetchedBytes, FetchError>
    where
        P: Fn(u64, Option<u64>) + Send + Sync,
        C: Fn() -> bool + Send + Sync,
    {
        log::info!("🌐 开始下载 - URL: {}", Self::redact_url_for_log(url));
        let started = Instant::now();

        let mut current_url = Self::parse_http_url(url)?;
        Self::validate_url_safety(&current_url, options).await?;
        let client = Self::build_http_client(options)?;

        for redirect_count in 0..=options.max_redirects {
            if is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            log::debug!("📡 发送 HTTP 请求 - {}", Self::redact_url_for_log(current_url.as_str()));
            let response = Self::until_cancelled(client.get(current_url.clone()).send(), &is_cancelled)
                .await?
                .map_err(|e| Self::map_reqwest_error(e, current_url.as_str()))?;

            let status = response.status();
            if Self::is_followable_redirect(status) {
                if redirect_count >= options.max_redirects {
                    log::warn!("⚠️ 重定向次数超过限制（{}）", options.max_redirects);
                    return Err(FetchError::TooManyRedirects {
                        limit: options.max_redirects,
                    });
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| FetchError::Network("重定向响应缺少 Location 头".to_string()))?;

                let location_str = location
                    .to_str()
                    .map_err(|e| FetchError::InvalidUrl(format!("重定向地址无效：{}", e)))?;

                let next_url = current_url
                    .join(location_str)
                    .map_err(|e| FetchError::InvalidUrl(format!("重定向 URL 解析失败：{}", e)))?;

                Self::ensure_http_scheme(&next_url)?;
                Self::validate_url_safety(&next_url, options).await?;

                log::debug!("↪️ 跳转到: {}", Self::redact_url_for_log(next_url.as_str()));
                current_url = next_url;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    reason: Self::status_message(status.as_u16()),
                });
            }

            let buffer = Self::stream_body(response, options, &on_progress, &is_cancelled).await?;

            log::info!(
                "✅ 下载完成 - {} bytes / {} chunks / {} redirects / {}ms",
                buffer.len(),
                buffer.chunk_count(),
                redirect_count,
                started.elapsed().as_millis()
            );

            return Ok(buffer.finalize(current_url.to_string()));
        }

        Err(FetchError::Network("下载流程异常结束".to_string()))
    }

    /// 流式读取响应体。
    async fn stream_body<P, C>(
        mut response: reqwest::Response,
        options: &FetchOptions,
        on_progress: &P,
        is_cancelled: &C,
    ) -> Result<ByteAccumulator, FetchError>
    where
        P: Fn(u64, Option<u64>) + Send + Sync,
        C: Fn() -> bool + Send + Sync,
    {
        let response_url = response.url().to_string();
        let total_len = response.content_length();
        if let Some(len) = total_len {
            if len > options.max_body_bytes {
                return Err(FetchError::TooLarge {
                    limit: options.max_body_bytes,
                });
            }
        }

        on_progress(0, total_len);

        let mut buffer = ByteAccumulator::new();
        let initial_capacity = total_len
            .map(|len| len.min(options.max_body_bytes))
            .and_then(|len| usize::try_from(len).ok())
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        buffer.reserve(initial_capacity)?;

        let mut received_first_chunk = false;
        loop {
            let read_timeout = options.read_timeout(received_first_chunk);
            let next_chunk = Self::until_cancelled(
                tokio::time::timeout(read_timeout, response.chunk()),
                is_cancelled,
            )
            .await?
            .map_err(|_| {
                if received_first_chunk {
                    FetchError::Timeout("下载数据流读取超时".to_string())
                } else {
                    FetchError::Timeout("下载首包超时".to_string())
                }
            })?;

            let Some(chunk) = next_chunk.map_err(|e| Self::map_reqwest_error(e, &response_url))? else {
                break;
            };

            received_first_chunk = true;

            if is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let total = buffer.len() as u64 + chunk.len() as u64;
            if total > options.max_body_bytes {
                return Err(FetchError::TooLarge {
                    limit: options.max_body_bytes,
                });
            }
            buffer.append(&chunk)?;

            on_progress(total, total_len);
        }

        let received = buffer.len() as u64;
        on_progress(received, total_len.or(Some(received)));

        Ok(buffer)
    }

    /// 等待 `future` 完成，期间定时检查取消标志。
    async fn until_cancelled<F, C>(future: F, is_cancelled: &C) -> Result<F::Output, FetchError>
    where
        F: Future,
        C: Fn() -> bool + Send + Sync,
    {
        let cancelled = async {
            loop {
                tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
                if is_cancelled() {
                    return;
                }
            }
        };

        tokio::select! {
            output = future => Ok(output),
            _ = cancelled => {
                log::info!("🛑 下载已取消");
                Err(FetchError::Cancelled)
            }
        }
    }

    fn build_http_client(options: &FetchOptions) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(options.user_agent.as_str());

        if let Some(timeout) = options.timeout() {
            builder = builder.timeout(timeout);
        }

        builder
            .build()
            .map_err(|e| FetchError::Network(format!("无法创建 HTTP 客户端：{}", e)))
    }

    fn is_followable_redirect(status: reqwest::StatusCode) -> bool {
        matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
    }

    fn parse_http_url(url: &str) -> Result<reqwest::Url, FetchError> {
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|e| FetchError::InvalidUrl(format!("URL 格式错误：{}", e)))?;
        Self::ensure_http_scheme(&parsed)?;
        Ok(parsed)
    }

    fn ensure_http_scheme(url: &reqwest::Url) -> Result<(), FetchError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(FetchError::InvalidUrl(format!(
                "仅支持 HTTP/HTTPS：{}",
                url.scheme()
            )));
        }
        Ok(())
    }

    pub(crate) fn redact_url_for_log(url: &str) -> String {
        let Ok(parsed) = reqwest::Url::parse(url) else {
            return "<invalid-url>".to_string();
        };

        let host = parsed.host_str().unwrap_or("<unknown-host>");
        let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = parsed.path();

        format!("{}://{}{}{}", parsed.scheme(), host, port, path)
    }

    /// 校验 URL 安全性。
    ///
    /// 默认阻止本地/内网目标，防止 SSRF 风险。
    async fn validate_url_safety(url: &reqwest::Url, options: &FetchOptions) -> Result<(), FetchError> {
        if options.allow_private_network {
            return Ok(());
        }

        let host = url
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl("URL 缺少主机地址".to_string()))?;

        if Self::is_local_hostname(host) {
            return Err(FetchError::Forbidden(format!("禁止访问本地网络地址：{}", host)));
        }

        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare_host.parse::<IpAddr>() {
            if Self::is_private_or_local_ip(ip) {
                return Err(FetchError::Forbidden(format!("禁止访问内网 IP：{}", ip)));
            }

            return Ok(());
        }

        if options.resolve_dns_for_url_safety {
            let port = url
                .port_or_known_default()
                .ok_or_else(|| FetchError::InvalidUrl("URL 缺少端口信息".to_string()))?;
            Self::ensure_public_resolution(host, port).await?;
        }

        Ok(())
    }

    async fn ensure_public_resolution(host: &str, port: u16) -> Result<(), FetchError> {
        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| FetchError::Network(format!("URL 主机解析失败：{}", e)))?;

        let mut resolved = 0usize;
        for addr in addrs {
            if Self::is_private_or_local_ip(addr.ip()) {
                return Err(FetchError::Forbidden(format!(
                    "URL 解析结果命中内网地址：{}",
                    addr.ip()
                )));
            }
            resolved += 1;
        }

        if resolved == 0 {
            return Err(FetchError::Network("URL 未解析到有效地址".to_string()));
        }

        Ok(())
    }

    /// 判断主机名是否指向本地地址。
    fn is_local_hostname(host: &str) -> bool {
        host.eq_ignore_ascii_case("localhost")
            || host.eq_ignore_ascii_case("localhost.")
            || host.to_ascii_lowercase().ends_with(".localhost")
            || host.ends_with(".local")
    }

    /// 判断 IP 是否属于本地/内网/链路本地等受限范围。
    fn is_private_or_local_ip(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                if v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_documentation()
                    || v4.is_unspecified()
                    || v4.is_multicast()
                {
                    return true;
                }

                let octets = v4.octets();
                octets[0] == 0 || (octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000)
            }
            IpAddr::V6(v6) => {
                if let Some(mapped) = v6.to_ipv4_mapped() {
                    return Self::is_private_or_local_ip(IpAddr::V4(mapped));
                }

                v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_unique_local()
                    || v6.is_unicast_link_local()
                    || v6.is_multicast()
            }
        }
    }

    /// 统一映射 reqwest 错误到下载错误。
    fn map_reqwest_error(e: reqwest::Error, url: &str) -> FetchError {
        let err_msg = Self::sanitize_error_message_with_redacted_url(&e.to_string(), url);

        if e.is_timeout() {
            FetchError::Timeout(format!("请求超时：{}", err_msg))
        } else if e.is_connect() {
            FetchError::Network(format!("无法连接：{}", err_msg))
        } else {
            FetchError::Network(format!("请求失败：{}", err_msg))
        }
    }

    fn sanitize_error_message_with_redacted_url(error_msg: &str, url: &str) -> String {
        if url.is_empty() {
            return error_msg.to_string();
        }
        let redacted = Self::redact_url_for_log(url);
        error_msg.replace(url, &redacted)
    }

    /// 常见 HTTP 状态码本地化文案。
    fn status_message(code: u16) -> &'static str {
        match code {
            404 => "未找到",
            403 => "访问被拒绝",
            429 => "请求过于频繁",
            500..=599 => "服务器错误",
            _ => "请求失败",
        }
    }
}
