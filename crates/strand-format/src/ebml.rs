//! EBML (Extensible Binary Meta Language) 元素读写.
//!
//! EBML 使用变长整数编码元素 ID 和数据大小.
//!
//! # 变长整数 (VINT)
//! ```text
//! 首字节的前导 1 位之前的 0 的数量决定了字节长度:
//!   1xxxxxxx                  → 1 字节 (7 位数据)
//!   01xxxxxx xxxxxxxx         → 2 字节 (14 位数据)
//!   001xxxxx xxxxxxxx ×2      → 3 字节 (21 位数据)
//!   ...依此类推, 最多 8 字节
//! ```
//!
//! 数据位全为 1 的值保留为"未知大小", 编码时跳过.

use strand_core::{StrandError, StrandResult};

use crate::io::IoContext;

/// EBML 变长整数的最大值 (表示"未知大小")
pub const EBML_UNKNOWN_SIZE: u64 = u64::MAX;

/// VINT 最大字节数
pub const MAX_VINT_LEN: usize = 8;

// ========================
// Matroska 元素 ID
// ========================

// EBML Header
pub const EBML_HEADER: u32 = 0x1A45_DFA3;
pub const EBML_VERSION: u32 = 0x4286;
pub const EBML_READ_VERSION: u32 = 0x42F7;
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
pub const EBML_DOC_TYPE: u32 = 0x4282;
pub const EBML_DOC_TYPE_VERSION: u32 = 0x4287;
pub const EBML_DOC_TYPE_READ_VERSION: u32 = 0x4285;
pub const EBML_VOID: u32 = 0xEC;

// Segment
pub const SEGMENT: u32 = 0x1853_8067;

// Segment Information
pub const SEGMENT_INFO: u32 = 0x1549_A966;
pub const INFO_TIMESCALE: u32 = 0x002A_D7B1;
pub const INFO_DURATION: u32 = 0x4489;
pub const INFO_MUXING_APP: u32 = 0x4D80;
pub const INFO_WRITING_APP: u32 = 0x5741;

// Tracks
pub const TRACKS: u32 = 0x1654_AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const TRACK_CODEC_ID: u32 = 0x86;
pub const TRACK_CODEC_PRIVATE: u32 = 0x63A2;
pub const TRACK_DEFAULT_DURATION: u32 = 0x0023_E383;

// Video settings
pub const VIDEO_SETTINGS: u32 = 0xE0;
pub const VIDEO_PIXEL_WIDTH: u32 = 0xB0;
pub const VIDEO_PIXEL_HEIGHT: u32 = 0xBA;
pub const VIDEO_DISPLAY_WIDTH: u32 = 0x54B0;
pub const VIDEO_DISPLAY_HEIGHT: u32 = 0x54BA;

// Cluster
pub const CLUSTER: u32 = 0x1F43_B675;
pub const CLUSTER_TIMESTAMP: u32 = 0xE7;
pub const CLUSTER_POSITION: u32 = 0xA7;
pub const CLUSTER_PREV_SIZE: u32 = 0xAB;
pub const CLUSTER_SILENT_TRACKS: u32 = 0x5854;
pub const CLUSTER_SILENT_TRACK_NUMBER: u32 = 0x58D7;
pub const SIMPLE_BLOCK: u32 = 0xA3;
pub const BLOCK_GROUP: u32 = 0xA0;
pub const BLOCK: u32 = 0xA1;
pub const BLOCK_DURATION: u32 = 0x9B;
pub const REFERENCE_BLOCK: u32 = 0xFB;

// Cues
pub const CUES: u32 = 0x1C53_BB6B;
pub const CUE_POINT: u32 = 0xBB;
pub const CUE_TIME: u32 = 0xB3;
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
pub const CUE_TRACK: u32 = 0xF7;
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
pub const CUE_RELATIVE_POSITION: u32 = 0xF0;

// ============================================================
// 写入
// ============================================================

/// 将 ID 转为字节 (保留前导位)
pub fn id_to_bytes(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = if id <= 0xFF {
        3
    } else if id <= 0xFFFF {
        2
    } else if id <= 0xFF_FFFF {
        1
    } else {
        0
    };
    bytes[skip..].to_vec()
}

/// 以最短长度编码 VINT
pub fn size_to_vint(size: u64) -> Vec<u8> {
    let len = (1..MAX_VINT_LEN)
        .find(|&len| size < (1u64 << (7 * len)) - 1)
        .unwrap_or(MAX_VINT_LEN);
    vint_with_len(size, len)
}

/// 以指定长度编码 VINT, 超出表示范围的高位被截断
pub fn vint_with_len(value: u64, len: usize) -> Vec<u8> {
    let len = len.clamp(1, MAX_VINT_LEN);
    let mut bytes = value.to_be_bytes()[MAX_VINT_LEN - len..].to_vec();
    let marker = 0x80u8 >> (len - 1);
    bytes[0] = (bytes[0] & (marker.wrapping_sub(1))) | marker;
    bytes
}

/// 8 字节的"未知大小"
pub fn unknown_size_vint() -> [u8; 8] {
    [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
}

/// uint 转最小字节数
pub fn uint_to_bytes(value: u64) -> Vec<u8> {
    let len = (1..=8usize)
        .find(|&len| len == 8 || value < (1u64 << (8 * len)))
        .unwrap_or(8);
    value.to_be_bytes()[8 - len..].to_vec()
}

/// sint 转最小字节数 (补码)
pub fn sint_to_bytes(value: i64) -> Vec<u8> {
    let len = (1..=8usize)
        .find(|&len| {
            if len == 8 {
                return true;
            }
            let bound = 1i64 << (8 * len - 1);
            (-bound..bound).contains(&value)
        })
        .unwrap_or(8);
    value.to_be_bytes()[8 - len..].to_vec()
}

/// 写 EBML 元素 ID 到缓冲区
pub fn write_element_id_buf(buf: &mut Vec<u8>, id: u32) {
    buf.extend_from_slice(&id_to_bytes(id));
}

/// 写 EBML 元素大小到缓冲区
pub fn write_element_size_buf(buf: &mut Vec<u8>, size: u64) {
    buf.extend_from_slice(&size_to_vint(size));
}

/// 写元素头部 (ID + 大小) 到 IoContext
pub fn write_element_header(io: &mut IoContext, id: u32, size: u64) -> StrandResult<()> {
    io.write_all(&id_to_bytes(id))?;
    io.write_all(&size_to_vint(size))
}

/// 写 uint 元素
pub fn write_uint_element(buf: &mut Vec<u8>, id: u32, value: u64) {
    write_binary_element(buf, id, &uint_to_bytes(value));
}

/// 写 sint 元素
pub fn write_sint_element(buf: &mut Vec<u8>, id: u32, value: i64) {
    write_binary_element(buf, id, &sint_to_bytes(value));
}

/// 写 float64 元素
pub fn write_float_element(buf: &mut Vec<u8>, id: u32, value: f64) {
    write_binary_element(buf, id, &value.to_be_bytes());
}

/// 写 string 元素
pub fn write_string_element(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_binary_element(buf, id, value.as_bytes());
}

/// 写 binary 元素
pub fn write_binary_element(buf: &mut Vec<u8>, id: u32, data: &[u8]) {
    write_element_id_buf(buf, id);
    write_element_size_buf(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// 写 master 元素, `content` 为已编码的子元素
pub fn write_master_element(buf: &mut Vec<u8>, id: u32, content: &[u8]) {
    write_binary_element(buf, id, content);
}

// ============================================================
// 读取
// ============================================================

/// 读取 EBML 变长整数 (用于元素 ID)
///
/// 元素 ID 保留前导位, 不做掩码处理.
pub fn read_element_id(io: &mut IoContext) -> StrandResult<(u32, u8)> {
    let first = io.read_u8()?;
    if first == 0 {
        return Err(StrandError::InvalidData("EBML: 无效的元素 ID".into()));
    }

    let len = first.leading_zeros() as u8 + 1;
    if len > 4 {
        return Err(StrandError::InvalidData("EBML: 元素 ID 超过 4 字节".into()));
    }

    let mut id = u32::from(first);
    for _ in 1..len {
        id = (id << 8) | u32::from(io.read_u8()?);
    }

    Ok((id, len))
}

/// 读取 EBML 变长整数 (用于数据大小)
///
/// 数据大小会掩掉前导标记位, 只保留纯数值.
/// 如果所有数据位都为 1, 表示"未知大小".
pub fn read_element_size(io: &mut IoContext) -> StrandResult<(u64, u8)> {
    let first = io.read_u8()?;
    if first == 0 {
        return Err(StrandError::InvalidData("EBML: 无效的元素大小".into()));
    }

    let len = first.leading_zeros() as u8 + 1;
    let mask = 0xFFu16 >> len;
    let mut size = u64::from(first & mask as u8);
    for _ in 1..len {
        size = (size << 8) | u64::from(io.read_u8()?);
    }

    let max_val = (1u64 << (7 * u32::from(len))) - 1;
    if size == max_val {
        return Ok((EBML_UNKNOWN_SIZE, len));
    }

    Ok((size, len))
}

/// 读取一个 EBML 元素头部 (ID + 大小)
///
/// 返回 (元素ID, 数据大小, 头部总字节数)
pub fn read_element_header(io: &mut IoContext) -> StrandResult<(u32, u64, u8)> {
    let (id, id_len) = read_element_id(io)?;
    let (size, size_len) = read_element_size(io)?;
    Ok((id, size, id_len + size_len))
}

/// 读取无符号整数 (大端, 1-8 字节)
pub fn read_uint(io: &mut IoContext, size: u64) -> StrandResult<u64> {
    if size == 0 || size > 8 {
        return Err(StrandError::InvalidData(format!(
            "EBML: 无效的 uint 大小: {size}"
        )));
    }
    let mut val = 0u64;
    for _ in 0..size {
        val = (val << 8) | u64::from(io.read_u8()?);
    }
    Ok(val)
}

/// 读取二进制数据
pub fn read_binary(io: &mut IoContext, size: u64) -> StrandResult<Vec<u8>> {
    io.read_bytes(size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint_encoding() {
        assert_eq!(size_to_vint(0), vec![0x80]);
        assert_eq!(size_to_vint(1), vec![0x81]);
        assert_eq!(size_to_vint(126), vec![0xFE]);
        // 127 为 1 字节保留值
        assert_eq!(size_to_vint(127), vec![0x40, 0x7F]);
        assert_eq!(size_to_vint(0x3FFE), vec![0x7F, 0xFE]);
        assert_eq!(size_to_vint(0x3FFF), vec![0x20, 0x3F, 0xFF]);
        assert_eq!(vint_with_len(5, 8), vec![0x01, 0, 0, 0, 0, 0, 0, 5]);
    }

    #[test]
    fn test_id_and_int_encoding() {
        assert_eq!(id_to_bytes(SIMPLE_BLOCK), vec![0xA3]);
        assert_eq!(id_to_bytes(INFO_DURATION), vec![0x44, 0x89]);
        assert_eq!(id_to_bytes(EBML_HEADER), vec![0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(uint_to_bytes(0), vec![0]);
        assert_eq!(uint_to_bytes(0x1_0000), vec![1, 0, 0]);
        assert_eq!(sint_to_bytes(-1), vec![0xFF]);
        assert_eq!(sint_to_bytes(-129), vec![0xFF, 0x7F]);
        assert_eq!(sint_to_bytes(128), vec![0x00, 0x80]);
    }

    #[test]
    fn test_read_back_elements() {
        let mut buf = Vec::new();
        write_uint_element(&mut buf, INFO_TIMESCALE, 1_000_000);
        write_sint_element(&mut buf, REFERENCE_BLOCK, -40);
        write_float_element(&mut buf, INFO_DURATION, 1234.0);
        write_string_element(&mut buf, TRACK_CODEC_ID, "V_MPEG4/ISO/AVC");

        let mut io = IoContext::from_data(buf);
        let (id, size, _) = read_element_header(&mut io).unwrap();
        assert_eq!(id, INFO_TIMESCALE);
        assert_eq!(read_uint(&mut io, size).unwrap(), 1_000_000);
        let (id, size, _) = read_element_header(&mut io).unwrap();
        assert_eq!(id, REFERENCE_BLOCK);
        assert_eq!(read_binary(&mut io, size).unwrap(), sint_to_bytes(-40));
        let (_, size, _) = read_element_header(&mut io).unwrap();
        assert_eq!(read_binary(&mut io, size).unwrap(), 1234.0f64.to_be_bytes());
        let (_, size, _) = read_element_header(&mut io).unwrap();
        assert_eq!(read_binary(&mut io, size).unwrap(), b"V_MPEG4/ISO/AVC");
    }

    #[test]
    fn test_unknown_size() {
        let mut data = id_to_bytes(SEGMENT);
        data.extend_from_slice(&unknown_size_vint());
        let mut io = IoContext::from_data(data);
        let (id, size, header_len) = read_element_header(&mut io).unwrap();
        assert_eq!(id, SEGMENT);
        assert_eq!(size, EBML_UNKNOWN_SIZE);
        assert_eq!(header_len, 12);
    }
}
