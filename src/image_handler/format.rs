//! # 格式嗅探
//!
//! 只看前 8 个字节（最长签名 PNG 的长度）决定走哪个解码器，
//! 不看扩展名，也不看 `Content-Type`。

use serde::Serialize;

/// 最长签名（PNG）的字节数，短于此长度的输入一律视为未知。
pub const SIGNATURE_PROBE_LEN: usize = 8;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const GIF87A: &[u8; 6] = b"GIF87a";
const GIF89A: &[u8; 6] = b"GIF89a";
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// `infer` 做诊断探测时最多查看的字节数。
const DESCRIBE_PROBE_LIMIT: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImageFormat {
    Gif,
    Png,
    Jpeg,
    Unknown,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Unknown => "unknown",
        }
    }

    pub fn mime_type(self) -> Option<&'static str> {
        match self {
            Self::Gif => Some("image/gif"),
            Self::Png => Some("image/png"),
            Self::Jpeg => Some("image/jpeg"),
            Self::Unknown => None,
        }
    }

    /// 是否走动图解码路径。
    pub fn is_animated_container(self) -> bool {
        matches!(self, Self::Gif)
    }
}

/// 按签名判断格式。确定、无副作用，任何输入都有结果。
pub fn sniff(bytes: &[u8]) -> ImageFormat {
    let Some(head) = bytes.get(..SIGNATURE_PROBE_LEN) else {
        return ImageFormat::Unknown;
    };

    if head.starts_with(GIF87A) || head.starts_with(GIF89A) {
        ImageFormat::Gif
    } else if head == PNG_SIGNATURE {
        ImageFormat::Png
    } else if head.starts_with(&JPEG_SOI) {
        ImageFormat::Jpeg
    } else {
        ImageFormat::Unknown
    }
}

/// 对无法识别的内容给出 MIME 描述（例如 `image/webp`、`text/html`），仅用于诊断。
pub fn describe_unknown(bytes: &[u8]) -> Option<&'static str> {
    let probe = &bytes[..bytes.len().min(DESCRIBE_PROBE_LIMIT)];
    infer::get(probe).map(|kind| kind.mime_type())
}
