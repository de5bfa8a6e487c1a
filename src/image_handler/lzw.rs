//! # GIF 变体 LZW 解码
//!
//! ## 设计思路
//!
//! GIF 图像数据是“最小码长 + 子块序列”承载的可变码长 LZW 流。
//! 解码器只关心码流本身：子块拼接与颜色表解析由 `gif` 模块负责。
//!
//! ## 实现思路
//!
//! - 码字按 LSB 优先从字节流中读取，初始码长为 `min_code_size + 1`，最长 12 位。
//! - 码表用 `prefix/suffix/first/length` 四个平行数组表示，输出时倒序回填，不需要递归。
//! - 清除码重置码表；结束码终止解码；码表写满后不再新增条目（延迟清除），码长保持 12 位。
//! - `KwKwK`（码字等于下一个空闲槽位）按“前缀串 + 前缀串首字节”处理。
//! - 输出达到期望长度后立即停止，避免恶意码流无限膨胀。

use super::error::DecodeError;

const MAX_CODE_WIDTH: u8 = 12;
const TABLE_CAPACITY: usize = 1 << MAX_CODE_WIDTH;

/// 允许的最小码长范围。
pub(crate) const MIN_CODE_SIZE_RANGE: std::ops::RangeInclusive<u8> = 2..=11;

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    bits: u8,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            acc: 0,
            bits: 0,
        }
    }

    /// 读取一个 `width` 位的码字，数据耗尽时返回 `None`。
    fn read(&mut self, width: u8) -> Option<u16> {
        while self.bits < width {
            let byte = *self.data.get(self.pos)?;
            self.pos += 1;
            self.acc |= u32::from(byte) << self.bits;
            self.bits += 8;
        }

        let code = (self.acc & ((1u32 << width) - 1)) as u16;
        self.acc >>= width;
        self.bits -= width;
        Some(code)
    }
}

struct CodeTable {
    prefix: Vec<u16>,
    suffix: Vec<u8>,
    first: Vec<u8>,
    length: Vec<u16>,
    clear_code: u16,
    end_code: u16,
    next_code: u16,
    width: u8,
    min_code_size: u8,
}

impl CodeTable {
    fn new(min_code_size: u8) -> Self {
        let clear_code = 1u16 << min_code_size;
        let mut table = Self {
            prefix: vec![0; TABLE_CAPACITY],
            suffix: vec![0; TABLE_CAPACITY],
            first: vec![0; TABLE_CAPACITY],
            length: vec![0; TABLE_CAPACITY],
            clear_code,
            end_code: clear_code + 1,
            next_code: clear_code + 2,
            width: min_code_size + 1,
            min_code_size,
        };

        // 颜色索引最多 8 位，更宽的字面码在解码时直接拒绝
        for (idx, literal) in (0..=u8::MAX).take(usize::from(clear_code)).enumerate() {
            table.suffix[idx] = literal;
            table.first[idx] = literal;
            table.length[idx] = 1;
        }

        table
    }

    fn reset(&mut self) {
        self.next_code = self.end_code + 1;
        self.width = self.min_code_size + 1;
    }

    /// 以 `prev` 为前缀、`byte` 为后缀新增条目；码表已满时忽略。
    fn push(&mut self, prev: u16, byte: u8) {
        let slot = usize::from(self.next_code);
        if slot >= TABLE_CAPACITY {
            return;
        }

        let prev = usize::from(prev);
        self.prefix[slot] = prev as u16;
        self.suffix[slot] = byte;
        self.first[slot] = self.first[prev];
        self.length[slot] = self.length[prev] + 1;
        self.next_code += 1;

        if usize::from(self.next_code) == 1 << self.width && self.width < MAX_CODE_WIDTH {
            self.width += 1;
        }
    }

    fn emit(&self, code: u16, out: &mut Vec<u8>) {
        let start = out.len();
        let len = usize::from(self.length[usize::from(code)]);
        out.resize(start + len, 0);

        let mut cursor = code;
        for slot in out[start..].iter_mut().rev() {
            *slot = self.suffix[usize::from(cursor)];
            cursor = self.prefix[usize::from(cursor)];
        }
    }
}

/// 解码一段完整的 GIF LZW 数据，返回恰好 `expected` 个索引（不足时返回实际解出的部分）。
///
/// 超出 `expected` 的索引被丢弃。缺失结束码时以数据耗尽为结束。
pub(crate) fn decode(min_code_size: u8, data: &[u8], expected: usize) -> Result<Vec<u8>, DecodeError> {
    if !MIN_CODE_SIZE_RANGE.contains(&min_code_size) {
        return Err(DecodeError::Malformed(format!(
            "LZW 最小码长无效：{}",
            min_code_size
        )));
    }

    let mut table = CodeTable::new(min_code_size);
    let mut reader = BitReader::new(data);
    let mut out = Vec::with_capacity(expected);
    let mut prev: Option<u16> = None;

    while out.len() < expected {
        let Some(code) = reader.read(table.width) else {
            break;
        };

        if code == table.clear_code {
            table.reset();
            prev = None;
            continue;
        }

        if code == table.end_code {
            break;
        }

        if code < table.clear_code && code > u16::from(u8::MAX) {
            return Err(DecodeError::Malformed(format!(
                "LZW 字面码 {} 超出颜色索引范围",
                code
            )));
        }

        match prev {
            None => {
                if code >= table.clear_code {
                    return Err(DecodeError::Malformed(format!(
                        "LZW 码流以非字面码开头：{}",
                        code
                    )));
                }
                table.emit(code, &mut out);
            }
            Some(prev_code) => {
                let head = if code < table.next_code {
                    table.first[usize::from(code)]
                } else if code == table.next_code {
                    table.first[usize::from(prev_code)]
                } else {
                    return Err(DecodeError::Malformed(format!(
                        "LZW 码字 {} 超出码表范围（下一个空闲槽位 {}）",
                        code, table.next_code
                    )));
                };

                table.push(prev_code, head);
                table.emit(code, &mut out);
            }
        }

        prev = Some(code);
    }

    out.truncate(expected);
    Ok(out)
}
