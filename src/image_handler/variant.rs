//! # 解码结果模型
//!
//! ## 设计思路
//!
//! 流水线对外只返回 `ImageVariant`：静态图或动图二选一，由枚举标签区分。
//! 调用方按变体取值时走带检查的转换，变体不符返回 `VariantMismatch`，
//! 帧索引越界返回 `IndexOutOfRange`，不存在未检查的重解释。
//!
//! ## 实现思路
//!
//! - 所有像素统一为 RGBA8（非预乘、行优先、左上角原点）。
//! - 字段私有，构造时校验长度，构造后只读。
//! - 每一帧持有独立像素副本，帧之间互不共享缓冲。

use serde::Serialize;

use super::error::{DecodeError, FrameAccessError, IndexOutOfRange, VariantMismatch};

/// 每像素通道数（RGBA8）。
pub const RGBA_CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImageKind {
    Still,
    AnimatedContainer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub kind: ImageKind,
}

/// 计算 `width * height * 4`，溢出时返回 `ResourceLimit`。
pub(crate) fn rgba_len(width: u32, height: u32) -> Result<usize, DecodeError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(RGBA_CHANNELS))
        .ok_or_else(|| DecodeError::ResourceLimit("图片尺寸导致内存溢出风险".to_string()))
}

fn check_raster(width: u32, height: u32, pixels: &[u8]) -> Result<(), DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::Malformed(format!("图片尺寸无效：{}x{}", width, height)));
    }

    let expected = rgba_len(width, height)?;
    if pixels.len() != expected {
        return Err(DecodeError::Malformed(format!(
            "像素数据长度异常：{}（期望 {}）",
            pixels.len(),
            expected
        )));
    }

    Ok(())
}

/// 单张静态图。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillImage {
    header: ImageHeader,
    pixels: Vec<u8>,
}

impl StillImage {
    /// 由 RGBA8 像素构造静态图，长度必须等于 `width * height * 4`。
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, DecodeError> {
        check_raster(width, height, &pixels)?;
        Ok(Self {
            header: ImageHeader {
                width,
                height,
                kind: ImageKind::Still,
            },
            pixels,
        })
    }

    pub fn header(&self) -> ImageHeader {
        self.header
    }

    pub fn width(&self) -> u32 {
        self.header.width
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// 动图中的一帧：完整画布大小的合成结果与显示时长。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimatedFrame {
    delay_centis: u16,
    pixels: Vec<u8>,
}

impl AnimatedFrame {
    pub(crate) fn new(delay_centis: u16, pixels: Vec<u8>) -> Self {
        Self {
            delay_centis,
            pixels,
        }
    }

    /// 显示时长（秒）。
    pub fn delay(&self) -> f32 {
        f32::from(self.delay_centis) / 100.0
    }

    /// 显示时长（百分之一秒，GIF 原生单位），便于无损重新编码。
    pub fn delay_centis(&self) -> u16 {
        self.delay_centis
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// 动图：至少一帧，所有帧与画布同尺寸。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimatedImage {
    header: ImageHeader,
    frames: Vec<AnimatedFrame>,
    loop_count: Option<u16>,
}

impl AnimatedImage {
    pub fn new(
        width: u32,
        height: u32,
        frames: Vec<AnimatedFrame>,
        loop_count: Option<u16>,
    ) -> Result<Self, DecodeError> {
        if frames.is_empty() {
            return Err(DecodeError::Malformed("动图不包含任何帧".to_string()));
        }

        for frame in &frames {
            check_raster(width, height, &frame.pixels)?;
        }

        Ok(Self {
            header: ImageHeader {
                width,
                height,
                kind: ImageKind::AnimatedContainer,
            },
            frames,
            loop_count,
        })
    }

    pub fn header(&self) -> ImageHeader {
        self.header
    }

    pub fn width(&self) -> u32 {
        self.header.width
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn frames(&self) -> &[AnimatedFrame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<AnimatedFrame> {
        self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// NETSCAPE2.0 循环次数：`Some(0)` 表示无限循环，`None` 表示只播放一次。
    pub fn loop_count(&self) -> Option<u16> {
        self.loop_count
    }

    pub fn frame(&self, index: usize) -> Result<&AnimatedFrame, IndexOutOfRange> {
        self.frames.get(index).ok_or(IndexOutOfRange {
            index,
            len: self.frames.len(),
        })
    }
}

/// 流水线唯一的对外结果类型。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageVariant {
    Still(StillImage),
    Animated(AnimatedImage),
}

impl ImageVariant {
    pub fn kind(&self) -> ImageKind {
        match self {
            Self::Still(_) => ImageKind::Still,
            Self::Animated(_) => ImageKind::AnimatedContainer,
        }
    }

    pub fn header(&self) -> ImageHeader {
        match self {
            Self::Still(still) => still.header(),
            Self::Animated(animated) => animated.header(),
        }
    }

    pub fn width(&self) -> u32 {
        self.header().width
    }

    pub fn height(&self) -> u32 {
        self.header().height
    }

    /// 静态图视为一帧。
    pub fn frame_count(&self) -> usize {
        match self {
            Self::Still(_) => 1,
            Self::Animated(animated) => animated.frame_count(),
        }
    }

    fn mismatch(&self, expected: ImageKind) -> VariantMismatch {
        VariantMismatch {
            expected,
            actual: self.kind(),
        }
    }

    pub fn into_still(self) -> Result<StillImage, VariantMismatch> {
        match self {
            Self::Still(still) => Ok(still),
            other => Err(other.mismatch(ImageKind::Still)),
        }
    }

    pub fn into_animated(self) -> Result<AnimatedImage, VariantMismatch> {
        match self {
            Self::Animated(animated) => Ok(animated),
            other => Err(other.mismatch(ImageKind::AnimatedContainer)),
        }
    }

    /// 取出第 `index` 帧的所有权，其余帧随之释放。
    pub fn into_frame(self, index: usize) -> Result<AnimatedFrame, FrameAccessError> {
        let animated = self.into_animated()?;
        let len = animated.frame_count();
        animated
            .into_frames()
            .into_iter()
            .nth(index)
            .ok_or(FrameAccessError::OutOfRange(IndexOutOfRange { index, len }))
    }

    pub fn as_still(&self) -> Result<&StillImage, VariantMismatch> {
        match self {
            Self::Still(still) => Ok(still),
            Self::Animated(_) => Err(self.mismatch(ImageKind::Still)),
        }
    }

    pub fn as_animated(&self) -> Result<&AnimatedImage, VariantMismatch> {
        match self {
            Self::Animated(animated) => Ok(animated),
            Self::Still(_) => Err(self.mismatch(ImageKind::AnimatedContainer)),
        }
    }

    pub fn frame(&self, index: usize) -> Result<&AnimatedFrame, FrameAccessError> {
        Ok(self.as_animated()?.frame(index)?)
    }
}

impl From<StillImage> for ImageVariant {
    fn from(still: StillImage) -> Self {
        Self::Still(still)
    }
}

impl From<AnimatedImage> for ImageVariant {
    fn from(animated: AnimatedImage) -> Self {
        Self::Animated(animated)
    }
}

pub fn to_still(variant: ImageVariant) -> Result<StillImage, VariantMismatch> {
    variant.into_still()
}

pub fn to_animated(variant: ImageVariant) -> Result<AnimatedImage, VariantMismatch> {
    variant.into_animated()
}

pub fn to_frame(variant: ImageVariant, index: usize) -> Result<AnimatedFrame, FrameAccessError> {
    variant.into_frame(index)
}
