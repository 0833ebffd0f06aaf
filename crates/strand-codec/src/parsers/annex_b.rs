//! 起始码分隔的 NAL 单元扫描.
//!
//! # Annex B 格式
//!
//! - 3 字节起始码: `00 00 01`
//! - 4 字节起始码: `00 00 00 01` (多出的 0x00 视为前一个单元的尾部填充)
//!
//! 输入可以在任意位置被切分, 扫描器在两次调用之间保留未消费的剩余字节.
//! 每个单元附带其首个内容字节在整个流中的绝对偏移.

use strand_core::{StrandError, StrandResult};

/// 起始码 (低 24 位)
const START_CODE: u32 = 0x00_0001;

/// 从字节流中切出的单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedNal {
    /// 单元内容 (不含起始码, 已去除尾部 0x00)
    pub data: Vec<u8>,
    /// 首个内容字节的绝对流偏移
    pub position: u64,
}

/// 增量式起始码扫描器
///
/// 纯同步变换, 每次输入调用一次 [`add_bytes`](Self::add_bytes),
/// 流结束时调用 [`flush`](Self::flush) 取出最后一个单元.
#[derive(Debug, Default)]
pub struct NalScanner {
    /// 未消费的字节, 若 `marker_at_start` 则以起始码开头
    buffer: Vec<u8>,
    /// `buffer[0]` 的绝对流偏移
    buffer_offset: u64,
    /// 缓冲区是否以已发现的起始码开头
    marker_at_start: bool,
    /// 缓冲区中已扫描过的长度
    scanned: usize,
    /// 累计输入字节数
    stream_position: u64,
}

impl NalScanner {
    /// 创建扫描器
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计输入的字节数
    pub fn stream_position(&self) -> u64 {
        self.stream_position
    }

    /// 当前未消费的字节数
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// 追加输入, 返回本次可以确定边界的全部单元
    pub fn add_bytes(&mut self, data: &[u8]) -> Vec<ScannedNal> {
        self.stream_position += data.len() as u64;
        self.buffer.extend_from_slice(data);

        let mut units = Vec::new();
        let mut previous = self.marker_at_start.then_some(0usize);
        // 回退 2 字节, 以便识别跨越两次输入的起始码
        let start = self.scanned.saturating_sub(2);
        let mut window: u32 = 0xFFFF_FFFF;

        for i in start..self.buffer.len() {
            window = (window << 8) | u32::from(self.buffer[i]);
            if window & 0x00FF_FFFF != START_CODE {
                continue;
            }
            let marker = i - 2;
            if previous == Some(marker) {
                continue;
            }
            if let Some(prev) = previous {
                self.emit(prev + 3, marker, &mut units);
            }
            previous = Some(marker);
        }

        match previous {
            Some(marker) => {
                self.buffer.drain(..marker);
                self.buffer_offset += marker as u64;
                self.marker_at_start = true;
            }
            None => {
                // 尚未出现任何起始码, 之前的字节无法归属任何单元, 只保留可能的起始码前缀
                let keep_from = self.buffer.len().saturating_sub(3);
                self.buffer.drain(..keep_from);
                self.buffer_offset += keep_from as u64;
            }
        }
        self.scanned = self.buffer.len();

        units
    }

    /// 流结束: 最后一个起始码之后的内容作为最终单元输出
    pub fn flush(&mut self) -> Option<ScannedNal> {
        let mut units = Vec::with_capacity(1);
        if self.marker_at_start && self.buffer.len() > 3 {
            self.emit(3, self.buffer.len(), &mut units);
        }
        self.buffer_offset += self.buffer.len() as u64;
        self.buffer.clear();
        self.marker_at_start = false;
        self.scanned = 0;
        units.pop()
    }

    fn emit(&self, start: usize, end: usize, units: &mut Vec<ScannedNal>) {
        let mut end = end;
        while end > start && self.buffer[end - 1] == 0x00 {
            end -= 1;
        }
        if end > start {
            units.push(ScannedNal {
                data: self.buffer[start..end].to_vec(),
                position: self.buffer_offset + start as u64,
            });
        }
    }
}

/// 按长度前缀 (AVCC 风格, 大端) 切分单元
///
/// `base_offset` 为 `data[0]` 的绝对流偏移. 末尾被截断的单元直接丢弃,
/// 长度为 0 的单元跳过.
pub fn split_length_prefixed(
    data: &[u8],
    length_size: usize,
    base_offset: u64,
) -> StrandResult<Vec<ScannedNal>> {
    if !(1..=4).contains(&length_size) {
        return Err(StrandError::InvalidArgument(format!(
            "NAL 长度前缀字节数非法, length_size={}",
            length_size
        )));
    }

    let mut units = Vec::new();
    let mut pos = 0;

    while pos + length_size <= data.len() {
        let mut unit_len: usize = 0;
        for i in 0..length_size {
            unit_len = (unit_len << 8) | data[pos + i] as usize;
        }
        pos += length_size;

        if pos + unit_len > data.len() {
            log::debug!(
                "长度前缀单元被截断, declared_len={}, remain={}",
                unit_len,
                data.len() - pos
            );
            break;
        }

        if unit_len > 0 {
            units.push(ScannedNal {
                data: data[pos..pos + unit_len].to_vec(),
                position: base_offset + pos as u64,
            });
        }
        pos += unit_len;
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> Vec<u8> {
        vec![
            0x00, 0x00, 0x00, 0x01, 0x67, 0xAA, 0xBB, // SPS (4 字节起始码)
            0x00, 0x00, 0x01, 0x68, 0xCC, 0x00, 0x00, // PPS + 尾部填充
            0x00, 0x00, 0x01, 0x65, 0xDD, 0xEE, // IDR
        ]
    }

    #[test]
    fn test_scan_single_buffer() {
        let mut scanner = NalScanner::new();
        let units = scanner.add_bytes(&sample_stream());
        assert_eq!(units.len(), 2, "最后一个单元要等到下一个起始码或 flush");
        assert_eq!(units[0].data, vec![0x67, 0xAA, 0xBB]);
        assert_eq!(units[0].position, 4);
        assert_eq!(units[1].data, vec![0x68, 0xCC], "尾部 0x00 应被去除");
        assert_eq!(units[1].position, 10);

        let last = scanner.flush().expect("flush 应输出最后一个单元");
        assert_eq!(last.data, vec![0x65, 0xDD, 0xEE]);
        assert_eq!(last.position, 17);
        assert_eq!(scanner.stream_position(), 20);
    }

    #[test]
    fn test_scan_byte_by_byte_same_result() {
        let stream = sample_stream();
        let mut whole = NalScanner::new();
        let mut expected = whole.add_bytes(&stream);
        expected.extend(whole.flush());

        let mut scanner = NalScanner::new();
        let mut actual = Vec::new();
        for b in &stream {
            actual.extend(scanner.add_bytes(std::slice::from_ref(b)));
        }
        actual.extend(scanner.flush());

        assert_eq!(actual, expected, "任意切分都应得到相同的单元与偏移");
    }

    #[test]
    fn test_scan_drop_empty_units_and_leading_garbage() {
        let mut scanner = NalScanner::new();
        let data = [
            0x12, 0x34, // 起始码之前的垃圾
            0x00, 0x00, 0x01, 0x00, 0x00, // 空单元 (仅填充)
            0x00, 0x00, 0x01, 0x09, 0xF0, // AUD
            0x00, 0x00, 0x01,
        ];
        let units = scanner.add_bytes(&data);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data, vec![0x09, 0xF0]);
        assert_eq!(units[0].position, 10);
        assert!(scanner.flush().is_none(), "起始码后无内容时不输出");
    }

    #[test]
    fn test_scan_without_start_code_keeps_tail_only() {
        let mut scanner = NalScanner::new();
        assert!(scanner.add_bytes(&[0xAB; 100]).is_empty());
        assert_eq!(scanner.pending_bytes(), 3);
        let units = scanner.add_bytes(&[0x00, 0x00, 0x01, 0x41, 0x9A, 0x00, 0x00, 0x01]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data, vec![0x41, 0x9A]);
        assert_eq!(units[0].position, 103);
    }

    #[test]
    fn test_split_length_prefixed() {
        let data = [
            0x00, 0x03, 0x67, 0xAA, 0xBB, // 3 字节
            0x00, 0x00, // 空单元
            0x00, 0x02, 0x68, 0xCC, // 2 字节
            0x00, 0x09, 0x65, // 截断
        ];
        let units = split_length_prefixed(&data, 2, 1000).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].position, 1002);
        assert_eq!(units[1].data, vec![0x68, 0xCC]);
        assert_eq!(units[1].position, 1009);
    }

    #[test]
    fn test_split_length_prefixed_reject_invalid_size() {
        assert!(split_length_prefixed(&[0x00], 0, 0).is_err());
        assert!(split_length_prefixed(&[0x00], 5, 0).is_err());
    }
}
