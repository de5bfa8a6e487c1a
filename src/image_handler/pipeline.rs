//! # 静态图解码流水线
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → RGBA”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 只接受 PNG / JPEG，其余格式直接返回 `UnsupportedVariant`
//! 2. 校验容器分帧（PNG 数据块边界、JPEG 段边界），数据中途结束时返回 `Truncated`
//! 3. 读取 header 尺寸，按像素与内存上限快速拒绝
//! 4. 通过 `image` 完整解码并统一转换为 RGBA8，校验字节长度一致性

use image::{GenericImageView, ImageError as CodecError, ImageFormat as CodecFormat, ImageReader};
use std::io::Cursor;

use super::config::DecodeOptions;
use super::error::DecodeError;
use super::format::ImageFormat;
use super::variant::{StillImage, rgba_len};

const PNG_SIGNATURE_LEN: usize = 8;
const PNG_MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

/// 使用默认配置解码静态图。
pub fn decode_still(bytes: &[u8], format: ImageFormat) -> Result<StillImage, DecodeError> {
    decode_still_with(bytes, format, &DecodeOptions::default())
}

pub fn decode_still_with(
    bytes: &[u8],
    format: ImageFormat,
    options: &DecodeOptions,
) -> Result<StillImage, DecodeError> {
    let codec_format = match format {
        ImageFormat::Png => {
            verify_png_framing(bytes)?;
            CodecFormat::Png
        }
        ImageFormat::Jpeg => {
            verify_jpeg_framing(bytes)?;
            CodecFormat::Jpeg
        }
        other => {
            return Err(DecodeError::UnsupportedVariant(format!(
                "静态图解码器不支持该格式：{}",
                other.as_str()
            )));
        }
    };

    let (header_width, header_height) = inspect_dimensions_from_memory(bytes, codec_format)?;
    if header_width == 0 || header_height == 0 {
        return Err(DecodeError::Malformed(format!(
            "图片尺寸无效：{}x{}",
            header_width, header_height
        )));
    }
    validate_pixel_limits(options, header_width, header_height)?;
    validate_decoded_memory_limits(options, header_width, header_height, 1)?;

    let decoded = image::load_from_memory_with_format(bytes, codec_format).map_err(map_codec_error)?;

    let (width, height) = decoded.dimensions();
    validate_pixel_limits(options, width, height)?;

    let pixels = decoded.into_rgba8().into_raw();
    let expected_len = rgba_len(width, height)?;
    if pixels.len() != expected_len {
        return Err(DecodeError::Malformed("解码后像素数据长度异常".to_string()));
    }

    log::debug!(
        "🖼️ 静态图解码成功 - 格式: {} 尺寸: {}x{}",
        format.as_str(),
        width,
        height
    );

    StillImage::from_rgba(width, height, pixels)
}

/// 仅通过内存中的图片头信息读取宽高。
///
/// 用于在完整解码前做像素限制检查。
fn inspect_dimensions_from_memory(bytes: &[u8], format: CodecFormat) -> Result<(u32, u32), DecodeError> {
    ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(map_codec_error)
}

fn map_codec_error(err: CodecError) -> DecodeError {
    match err {
        CodecError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            DecodeError::Truncated(format!("图片数据提前结束：{}", e))
        }
        CodecError::IoError(e) => DecodeError::Malformed(format!("读取图片数据失败：{}", e)),
        CodecError::Decoding(e) => DecodeError::Malformed(format!("图片解码失败：{}", e)),
        CodecError::Unsupported(e) => DecodeError::UnsupportedVariant(e.to_string()),
        CodecError::Limits(e) => DecodeError::ResourceLimit(e.to_string()),
        other => DecodeError::Malformed(format!("图片解码失败：{}", other)),
    }
}

/// 校验像素数量是否超过配置上限。
pub(crate) fn validate_pixel_limits(
    options: &DecodeOptions,
    width: u32,
    height: u32,
) -> Result<(), DecodeError> {
    let pixels = u64::from(width) * u64::from(height);

    if pixels > options.max_decoded_pixels {
        return Err(DecodeError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, options.max_decoded_pixels
        )));
    }

    Ok(())
}

/// 校验 `frames` 帧 RGBA 输出的预计内存。
pub(crate) fn validate_decoded_memory_limits(
    options: &DecodeOptions,
    width: u32,
    height: u32,
    frames: u64,
) -> Result<(), DecodeError> {
    let estimated = (u64::from(width) * u64::from(height))
        .checked_mul(4)
        .and_then(|bytes| bytes.checked_mul(frames))
        .ok_or_else(|| DecodeError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

    if estimated > options.max_decoded_bytes {
        return Err(DecodeError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            options.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

/// 逐个跳过 PNG 数据块（长度 + 类型 + 数据 + CRC），直到 `IEND`。
///
/// 只检查块边界，不解析块内容。
fn verify_png_framing(bytes: &[u8]) -> Result<(), DecodeError> {
    let mut pos = PNG_SIGNATURE_LEN;

    loop {
        let header = bytes
            .get(pos..pos + 8)
            .ok_or_else(|| DecodeError::Truncated(format!("PNG 数据块头在偏移 {} 处被截断", pos)))?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if len > PNG_MAX_CHUNK_LEN {
            return Err(DecodeError::Malformed(format!("PNG 数据块长度无效：{}", len)));
        }

        let chunk_type = &header[4..8];
        let end = pos + 8 + len as usize + 4;
        if end > bytes.len() {
            return Err(DecodeError::Truncated(format!(
                "PNG 数据块 {} 被截断",
                String::from_utf8_lossy(chunk_type)
            )));
        }

        if chunk_type == b"IEND" {
            return Ok(());
        }
        pos = end;
    }
}

/// 沿 JPEG 段结构走到 `EOI`，熵编码数据中按字节填充规则跳过。
fn verify_jpeg_framing(bytes: &[u8]) -> Result<(), DecodeError> {
    const EOI: u8 = 0xD9;
    const SOS: u8 = 0xDA;

    let truncated = || DecodeError::Truncated("JPEG 在结束标记 (EOI) 之前结束".to_string());
    let mut pos = 2;

    loop {
        if *bytes.get(pos).ok_or_else(truncated)? != 0xFF {
            return Err(DecodeError::Malformed(format!("JPEG 偏移 {} 处缺少段标记", pos)));
        }

        let mut marker_pos = pos + 1;
        while *bytes.get(marker_pos).ok_or_else(truncated)? == 0xFF {
            marker_pos += 1;
        }
        let marker = bytes[marker_pos];
        pos = marker_pos + 1;

        match marker {
            EOI => return Ok(()),
            0x01 | 0xD0..=0xD7 => continue,
            _ => {}
        }

        let len_bytes = bytes.get(pos..pos + 2).ok_or_else(truncated)?;
        let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
        if len < 2 {
            return Err(DecodeError::Malformed(format!("JPEG 段长度无效：{}", len)));
        }
        pos += len;
        if pos > bytes.len() {
            return Err(truncated());
        }

        if marker == SOS {
            pos = skip_entropy_coded_data(bytes, pos).ok_or_else(truncated)?;
        }
    }
}

/// 返回熵编码数据之后下一个段标记的位置。
fn skip_entropy_coded_data(bytes: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let offset = bytes.get(pos..)?.iter().position(|&b| b == 0xFF)?;
        pos += offset;
        match *bytes.get(pos + 1)? {
            0x00 | 0xD0..=0xD7 | 0xFF => pos += 1,
            _ => return Some(pos),
        }
    }
}
