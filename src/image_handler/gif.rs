//! # GIF 动图解码
//!
//! ## 设计思路
//!
//! GIF 的每一帧只编码一个矩形区域（可能只是相对上一帧的增量），
//! 要得到“可直接显示的完整帧”，必须在一块持久画布上按处置方式（disposal）逐帧合成。
//! 本模块输出的每一帧都是合成后整块画布的独立副本。
//!
//! ## 实现思路
//!
//! 1. 读取文件头与逻辑屏幕描述，可选全局颜色表
//! 2. 逐个区块遍历：图形控制扩展记录下一帧的延迟/透明色/处置方式，
//!    NETSCAPE2.0 应用扩展读取循环次数，其余扩展按子块跳过
//! 3. 每个图像描述符：读取局部颜色表与 LZW 数据，解出索引，交错图按 4 遍顺序还原行号
//! 4. 合成：先执行上一帧的处置，再按需保存快照，最后把本帧补丁画到画布上（裁剪到屏幕内）
//! 5. 遇到结尾符停止；任何结构在缓冲区末尾之前没读完都返回 `Truncated`
//!
//! 画布初始为全透明；“恢复背景”同样清为透明。保留的处置值 4~7 按“未指定”处理。

use super::config::DecodeOptions;
use super::error::DecodeError;
use super::lzw;
use super::pipeline::{validate_decoded_memory_limits, validate_pixel_limits};
use super::variant::{AnimatedFrame, AnimatedImage, RGBA_CHANNELS};

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;

const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const APPLICATION_LABEL: u8 = 0xFF;

const NETSCAPE_IDENTIFIERS: [&[u8]; 2] = [b"NETSCAPE2.0", b"ANIMEXTS1.0"];

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// 帧处置方式：决定绘制下一帧之前如何处理本帧占用的区域。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum DisposalMethod {
    #[default]
    Unspecified,
    DoNotDispose,
    RestoreToBackground,
    RestoreToPrevious,
}

impl DisposalMethod {
    fn from_packed(packed: u8) -> Self {
        match (packed >> 2) & 0b111 {
            1 => Self::DoNotDispose,
            2 => Self::RestoreToBackground,
            3 => Self::RestoreToPrevious,
            _ => Self::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GraphicControl {
    delay_centis: u16,
    transparent_index: Option<u8>,
    disposal: DisposalMethod,
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                DecodeError::Truncated(format!("读取{}时数据提前结束（偏移 {}）", what, self.pos))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8, DecodeError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16_le(&mut self, what: &str) -> Result<u16, DecodeError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// 读取一串子块并拼接数据，直到长度为 0 的终止块。
    fn sub_blocks(&mut self, what: &str) -> Result<Vec<u8>, DecodeError> {
        let mut data = Vec::new();
        loop {
            let len = self.u8(what)?;
            if len == 0 {
                return Ok(data);
            }
            data.extend_from_slice(self.take(usize::from(len), what)?);
        }
    }

    fn skip_sub_blocks(&mut self, what: &str) -> Result<(), DecodeError> {
        loop {
            let len = self.u8(what)?;
            if len == 0 {
                return Ok(());
            }
            self.take(usize::from(len), what)?;
        }
    }
}

fn read_color_table(
    cursor: &mut Cursor<'_>,
    packed: u8,
    what: &str,
) -> Result<Vec<[u8; 3]>, DecodeError> {
    let entries = 1usize << ((packed & 0b111) + 1);
    let raw = cursor.take(entries * 3, what)?;
    Ok(raw.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

fn read_graphic_control(cursor: &mut Cursor<'_>) -> Result<GraphicControl, DecodeError> {
    let block_size = cursor.u8("图形控制扩展")?;
    if block_size != 4 {
        return Err(DecodeError::Malformed(format!(
            "图形控制扩展块长度应为 4，实际为 {}",
            block_size
        )));
    }

    let packed = cursor.u8("图形控制扩展")?;
    let delay_centis = cursor.u16_le("图形控制扩展")?;
    let transparent = cursor.u8("图形控制扩展")?;
    cursor.skip_sub_blocks("图形控制扩展")?;

    Ok(GraphicControl {
        delay_centis,
        transparent_index: (packed & 0b1 != 0).then_some(transparent),
        disposal: DisposalMethod::from_packed(packed),
    })
}

/// 读取应用扩展，识别到循环扩展时返回循环次数。
fn read_application(cursor: &mut Cursor<'_>) -> Result<Option<u16>, DecodeError> {
    let ident_len = cursor.u8("应用扩展")?;
    let identifier = cursor.take(usize::from(ident_len), "应用扩展")?;
    let is_loop_extension = NETSCAPE_IDENTIFIERS.contains(&identifier);

    let mut loop_count = None;
    loop {
        let len = cursor.u8("应用扩展")?;
        if len == 0 {
            return Ok(loop_count);
        }
        let block = cursor.take(usize::from(len), "应用扩展")?;
        if is_loop_extension && block.len() >= 3 && block[0] == 1 {
            loop_count = Some(u16::from_le_bytes([block[1], block[2]]));
        }
    }
}

/// 交错图第 `row` 个数据行对应的真实行号序列。
fn interlaced_rows(height: u32) -> Vec<u32> {
    let mut rows = Vec::with_capacity(height as usize);
    for (start, step) in [(0, 8), (4, 8), (2, 4), (1, 2)] {
        rows.extend((start..height).step_by(step));
    }
    rows
}

/// 在持久画布上逐帧合成。
struct Compositor {
    width: u32,
    height: u32,
    canvas: Vec<u8>,
    pending: Option<PendingDisposal>,
}

struct PendingDisposal {
    method: DisposalMethod,
    rect: Rect,
    snapshot: Option<Vec<u8>>,
}

impl Compositor {
    fn new(width: u32, height: u32, canvas_len: usize) -> Self {
        Self {
            width,
            height,
            canvas: vec![0; canvas_len],
            pending: None,
        }
    }

    fn apply_pending_disposal(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        match pending.method {
            DisposalMethod::Unspecified | DisposalMethod::DoNotDispose => {}
            DisposalMethod::RestoreToBackground => self.clear_rect(pending.rect),
            DisposalMethod::RestoreToPrevious => {
                if let Some(snapshot) = pending.snapshot {
                    self.canvas = snapshot;
                }
            }
        }
    }

    fn clear_rect(&mut self, rect: Rect) {
        let x_end = rect.left.saturating_add(rect.width).min(self.width);
        let y_end = rect.top.saturating_add(rect.height).min(self.height);

        for y in rect.top..y_end {
            for x in rect.left..x_end {
                let offset = self.offset(x, y);
                self.canvas[offset..offset + RGBA_CHANNELS].copy_from_slice(&TRANSPARENT);
            }
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * RGBA_CHANNELS
    }

    /// 绘制一帧并返回画布副本。
    fn render(
        &mut self,
        rect: Rect,
        rows: &[u32],
        indices: &[u8],
        palette: &[[u8; 3]],
        control: GraphicControl,
    ) -> Vec<u8> {
        self.apply_pending_disposal();

        let snapshot =
            (control.disposal == DisposalMethod::RestoreToPrevious).then(|| self.canvas.clone());

        let patch_width = rect.width as usize;
        for (data_row, &row) in rows.iter().enumerate() {
            let y = rect.top + row;
            if y >= self.height {
                continue;
            }

            let line = &indices[data_row * patch_width..(data_row + 1) * patch_width];
            for (col, &index) in line.iter().enumerate() {
                let x = rect.left + col as u32;
                if x >= self.width || control.transparent_index == Some(index) {
                    continue;
                }

                let [r, g, b] = palette[usize::from(index)];
                let offset = self.offset(x, y);
                self.canvas[offset..offset + RGBA_CHANNELS].copy_from_slice(&[r, g, b, 255]);
            }
        }

        self.pending = Some(PendingDisposal {
            method: control.disposal,
            rect,
            snapshot,
        });

        self.canvas.clone()
    }
}

/// 使用默认配置解码 GIF。
pub fn decode_animated(bytes: &[u8]) -> Result<AnimatedImage, DecodeError> {
    decode_animated_with(bytes, &DecodeOptions::default())
}

/// 解码 GIF 为逐帧合成后的 RGBA8 帧序列。
pub fn decode_animated_with(
    bytes: &[u8],
    options: &DecodeOptions,
) -> Result<AnimatedImage, DecodeError> {
    let mut cursor = Cursor::new(bytes);

    let signature = cursor.take(6, "文件头")?;
    if signature != b"GIF87a" && signature != b"GIF89a" {
        return Err(DecodeError::Malformed("GIF 文件签名无效".to_string()));
    }

    let width = u32::from(cursor.u16_le("逻辑屏幕描述")?);
    let height = u32::from(cursor.u16_le("逻辑屏幕描述")?);
    let screen_flags = cursor.u8("逻辑屏幕描述")?;
    let _background_index = cursor.u8("逻辑屏幕描述")?;
    let _aspect = cursor.u8("逻辑屏幕描述")?;

    if width == 0 || height == 0 {
        return Err(DecodeError::Malformed(format!(
            "逻辑屏幕尺寸无效：{}x{}",
            width, height
        )));
    }
    validate_pixel_limits(options, width, height)?;
    validate_decoded_memory_limits(options, width, height, 1)?;

    let global_palette = if screen_flags & 0x80 != 0 {
        Some(read_color_table(&mut cursor, screen_flags, "全局颜色表")?)
    } else {
        None
    };

    let canvas_len = super::variant::rgba_len(width, height)?;
    let mut compositor = Compositor::new(width, height, canvas_len);
    let mut pending_control: Option<GraphicControl> = None;
    let mut frames: Vec<AnimatedFrame> = Vec::new();
    let mut loop_count = None;

    loop {
        match cursor.u8("区块标识")? {
            EXTENSION_INTRODUCER => match cursor.u8("扩展标签")? {
                GRAPHIC_CONTROL_LABEL => pending_control = Some(read_graphic_control(&mut cursor)?),
                APPLICATION_LABEL => {
                    if let Some(count) = read_application(&mut cursor)? {
                        loop_count = Some(count);
                    }
                }
                _ => cursor.skip_sub_blocks("扩展")?,
            },
            IMAGE_SEPARATOR => {
                let control = pending_control.take().unwrap_or_default();
                validate_decoded_memory_limits(options, width, height, frames.len() as u64 + 1)?;

                let pixels = read_frame(
                    &mut cursor,
                    &mut compositor,
                    global_palette.as_deref(),
                    control,
                    options,
                )?;

                let delay = options.effective_delay_centis(control.delay_centis);
                frames.push(AnimatedFrame::new(delay, pixels));
            }
            TRAILER => break,
            other => {
                return Err(DecodeError::Malformed(format!(
                    "未知区块标识 0x{:02X}（偏移 {}）",
                    other,
                    cursor.pos - 1
                )));
            }
        }
    }

    if frames.is_empty() {
        return Err(DecodeError::Malformed("GIF 不包含任何图像帧".to_string()));
    }

    log::debug!(
        "🎞️ GIF 解码完成 - {}x{} 帧数: {} 循环: {:?}",
        width,
        height,
        frames.len(),
        loop_count
    );

    AnimatedImage::new(width, height, frames, loop_count)
}

fn read_frame(
    cursor: &mut Cursor<'_>,
    compositor: &mut Compositor,
    global_palette: Option<&[[u8; 3]]>,
    control: GraphicControl,
    options: &DecodeOptions,
) -> Result<Vec<u8>, DecodeError> {
    let rect = Rect {
        left: u32::from(cursor.u16_le("图像描述符")?),
        top: u32::from(cursor.u16_le("图像描述符")?),
        width: u32::from(cursor.u16_le("图像描述符")?),
        height: u32::from(cursor.u16_le("图像描述符")?),
    };
    let flags = cursor.u8("图像描述符")?;
    validate_pixel_limits(options, rect.width, rect.height)?;

    let local_palette = if flags & 0x80 != 0 {
        Some(read_color_table(cursor, flags, "局部颜色表")?)
    } else {
        None
    };
    let interlaced = flags & 0x40 != 0;

    let min_code_size = cursor.u8("LZW 最小码长")?;
    let data = cursor.sub_blocks("图像数据")?;

    let expected = rect.width as usize * rect.height as usize;
    let indices = lzw::decode(min_code_size, &data, expected)?;
    if indices.len() < expected {
        return Err(DecodeError::Malformed(format!(
            "图像数据不足：解出 {} 个索引，需要 {} 个",
            indices.len(),
            expected
        )));
    }

    let palette: &[[u8; 3]] = local_palette
        .as_deref()
        .or(global_palette)
        .ok_or_else(|| DecodeError::Malformed("图像帧没有可用的颜色表".to_string()))?;
    if let Some(&bad) = indices
        .iter()
        .find(|&&index| usize::from(index) >= palette.len() && control.transparent_index != Some(index))
    {
        return Err(DecodeError::Malformed(format!(
            "颜色索引 {} 超出颜色表范围（{} 项）",
            bad,
            palette.len()
        )));
    }

    let rows: Vec<u32> = if interlaced {
        interlaced_rows(rect.height)
    } else {
        (0..rect.height).collect()
    };

    Ok(compositor.render(rect, &rows, &indices, palette, control))
}
