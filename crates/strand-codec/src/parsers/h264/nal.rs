//! H.264 NAL (Network Abstraction Layer) 单元.
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌─────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5) │
//! └─────────────────────────────────┘
//! ```
//!
//! # 长度前缀格式 (AVCC)
//!
//! 输出帧中每个 NAL 单元之前带 1/2/4 字节大端长度前缀:
//! ```text
//! [length: N bytes BE] [NAL data: length bytes]
//! ```

use strand_core::{StrandError, StrandResult};

use crate::parsers::annex_b::ScannedNal;

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum NalUnitType {
    /// 非 IDR 图像切片 (P/B slice)
    Slice,
    /// 数据分区 A (DPA)
    SliceDpa,
    /// 数据分区 B (DPB)
    SliceDpb,
    /// 数据分区 C (DPC)
    SliceDpc,
    /// IDR 图像切片 (关键帧)
    SliceIdr,
    /// 增补增强信息 (SEI)
    Sei,
    /// 序列参数集 (SPS)
    Sps,
    /// 图像参数集 (PPS)
    Pps,
    /// 访问单元分隔符 (AUD)
    Aud,
    /// 序列结束
    EndOfSequence,
    /// 流结束
    EndOfStream,
    /// 填充数据
    FillerData,
    /// SPS 扩展
    SpsExtension,
    /// 前缀 NAL (SVC/MVC)
    PrefixNal,
    /// 子集 SPS
    SubsetSps,
    /// 辅助图像切片
    AuxiliarySlice,
    /// 切片扩展 (SVC/MVC)
    SliceExtension,
    /// 未知类型
    Unknown(u8),
}

impl NalUnitType {
    /// 从 NAL 类型编号创建
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            1 => Self::Slice,
            2 => Self::SliceDpa,
            3 => Self::SliceDpb,
            4 => Self::SliceDpc,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            13 => Self::SpsExtension,
            14 => Self::PrefixNal,
            15 => Self::SubsetSps,
            19 => Self::AuxiliarySlice,
            20 => Self::SliceExtension,
            _ => Self::Unknown(type_id),
        }
    }

    /// 获取类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::SliceDpa => 2,
            Self::SliceDpb => 3,
            Self::SliceDpc => 4,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::FillerData => 12,
            Self::SpsExtension => 13,
            Self::PrefixNal => 14,
            Self::SubsetSps => 15,
            Self::AuxiliarySlice => 19,
            Self::SliceExtension => 20,
            Self::Unknown(id) => *id,
        }
    }

    /// 是否为携带完整切片头的切片 (参与帧组装)
    pub fn is_slice(&self) -> bool {
        matches!(self, Self::Slice | Self::SliceIdr)
    }

    /// 是否为数据分区 B/C (依附于当前切片)
    pub fn is_partition(&self) -> bool {
        matches!(self, Self::SliceDpb | Self::SliceDpc)
    }

    /// 是否为 VCL (Video Coding Layer) NAL
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::Slice | Self::SliceDpa | Self::SliceDpb | Self::SliceDpc | Self::SliceIdr
        )
    }

    /// 是否为关键帧 (IDR)
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::SliceIdr)
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(nalu_type_name(self.type_id()))
    }
}

/// NAL 类型编号对应的可读名称, 未定义的编号返回 "reserved" 或 "unspecified"
pub const fn nalu_type_name(type_id: u8) -> &'static str {
    match type_id {
        1 => "non-IDR slice",
        2 => "slice data partition A",
        3 => "slice data partition B",
        4 => "slice data partition C",
        5 => "IDR slice",
        6 => "supplemental enhancement information",
        7 => "sequence parameter set",
        8 => "picture parameter set",
        9 => "access unit delimiter",
        10 => "end of sequence",
        11 => "end of stream",
        12 => "filler",
        13 => "sequence parameter set extension",
        14 => "prefix NAL unit",
        15 => "subset sequence parameter set",
        16 => "depth parameter set",
        19 => "auxiliary slice",
        20 => "slice extension",
        21 => "slice extension for depth view",
        17 | 18 | 22 | 23 => "reserved",
        _ => "unspecified",
    }
}

/// 解析后的 NAL 单元
#[derive(Debug, Clone)]
pub struct NalUnit {
    /// NAL 单元类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc (参考重要性, 0-3)
    pub ref_idc: u8,
    /// NAL 单元原始数据 (不含起始码, 含 NAL 头部字节)
    pub data: Vec<u8>,
    /// 首字节的绝对流偏移
    pub position: u64,
}

impl NalUnit {
    /// 从 NAL 数据 (含头部字节) 解析
    pub fn parse(data: Vec<u8>, position: u64) -> StrandResult<Self> {
        let Some(&header) = data.first() else {
            return Err(StrandError::InvalidData("H.264: NAL 单元数据为空".into()));
        };

        let forbidden = (header >> 7) & 1;
        if forbidden != 0 {
            return Err(StrandError::InvalidData(format!(
                "H.264: forbidden_zero_bit 非法, value={}, position={}",
                forbidden, position
            )));
        }
        let ref_idc = (header >> 5) & 0x03;
        let type_id = header & 0x1F;

        Ok(Self {
            nal_type: NalUnitType::from_type_id(type_id),
            ref_idc,
            data,
            position,
        })
    }

    /// 获取 RBSP (Raw Byte Sequence Payload) 数据
    ///
    /// 移除 NAL 头部字节和 emulation prevention 字节 (0x03).
    pub fn rbsp(&self) -> Vec<u8> {
        remove_emulation_prevention(&self.data[1..])
    }

    /// 只转换前 `max_len` 字节, 切片头解析用不到整个切片
    pub fn rbsp_prefix(&self, max_len: usize) -> Vec<u8> {
        let end = self.data.len().min(max_len.saturating_add(1));
        remove_emulation_prevention(&self.data[1..end])
    }
}

impl TryFrom<ScannedNal> for NalUnit {
    type Error = StrandError;

    fn try_from(unit: ScannedNal) -> StrandResult<Self> {
        Self::parse(unit.data, unit.position)
    }
}

/// 追加一个带长度前缀的 NAL 单元
///
/// 单元长度超出前缀可表示的范围时返回错误, `out` 保持不变.
pub fn write_length_prefixed(out: &mut Vec<u8>, nal: &[u8], length_size: usize) -> StrandResult<()> {
    if !(1..=4).contains(&length_size) {
        return Err(StrandError::InvalidArgument(format!(
            "NAL 长度前缀字节数非法, length_size={}",
            length_size
        )));
    }
    let max_len = (1u64 << (8 * length_size)) - 1;
    if nal.len() as u64 > max_len {
        return Err(StrandError::InvalidData(format!(
            "H.264: NAL 单元长度超出前缀范围, len={}, length_size={}",
            nal.len(),
            length_size
        )));
    }
    let len_bytes = (nal.len() as u32).to_be_bytes();
    out.extend_from_slice(&len_bytes[4 - length_size..]);
    out.extend_from_slice(nal);
    Ok(())
}

/// avcC 配置解析结果
#[derive(Debug)]
pub struct AvccConfig {
    /// SPS 列表
    pub sps_list: Vec<Vec<u8>>,
    /// PPS 列表
    pub pps_list: Vec<Vec<u8>>,
    /// NAL 长度前缀大小 (字节)
    pub length_size: usize,
}

/// 解析 AVCDecoderConfigurationRecord (Matroska CodecPrivate / MP4 avcC 内容)
pub fn parse_avcc_config(data: &[u8]) -> StrandResult<AvccConfig> {
    if data.len() < 7 {
        return Err(StrandError::InvalidData("H.264: avcC 数据太短".into()));
    }

    let length_size = ((data[4] & 0x03) + 1) as usize;
    let num_sps = (data[5] & 0x1F) as usize;
    let mut pos = 6;

    let sps_list = read_parameter_sets(data, &mut pos, num_sps, "SPS")?;

    if pos >= data.len() {
        return Err(StrandError::InvalidData(
            "H.264: avcC 缺少 numOfPictureParameterSets 字段".into(),
        ));
    }
    let num_pps = data[pos] as usize;
    pos += 1;
    let pps_list = read_parameter_sets(data, &mut pos, num_pps, "PPS")?;

    Ok(AvccConfig {
        sps_list,
        pps_list,
        length_size,
    })
}

/// 构建 AVCDecoderConfigurationRecord
pub fn build_avcc_config(
    sps_list: &[Vec<u8>],
    pps_list: &[Vec<u8>],
    length_size: usize,
) -> StrandResult<Vec<u8>> {
    if sps_list.is_empty() {
        return Err(StrandError::InvalidData(
            "H.264: 构建 avcC 需要至少一个 SPS".into(),
        ));
    }
    if !matches!(length_size, 1 | 2 | 4) {
        return Err(StrandError::InvalidArgument(format!(
            "H.264: avcC 长度前缀字节数非法, length_size={}",
            length_size
        )));
    }
    if sps_list.len() > 31 || pps_list.len() > 255 {
        return Err(StrandError::InvalidData(format!(
            "H.264: avcC 参数集数量超限, sps={}, pps={}",
            sps_list.len(),
            pps_list.len()
        )));
    }

    let sps0 = &sps_list[0];
    if sps0.len() < 4 {
        return Err(StrandError::InvalidData("H.264: SPS 数据太短".into()));
    }

    let mut out = vec![
        1,                                // configurationVersion
        sps0[1],                          // profile_idc
        sps0[2],                          // profile_compatibility
        sps0[3],                          // level_idc
        0xFC | ((length_size as u8) - 1), // lengthSizeMinusOne
        0xE0 | (sps_list.len() as u8),    // numOfSPS
    ];
    for sps in sps_list {
        write_parameter_set(&mut out, sps)?;
    }

    out.push(pps_list.len() as u8);
    for pps in pps_list {
        write_parameter_set(&mut out, pps)?;
    }

    Ok(out)
}

// ============================================================
// 内部工具函数
// ============================================================

fn read_parameter_sets(
    data: &[u8],
    pos: &mut usize,
    count: usize,
    kind: &str,
) -> StrandResult<Vec<Vec<u8>>> {
    let mut list = Vec::with_capacity(count);
    for i in 0..count {
        if *pos + 2 > data.len() {
            return Err(StrandError::InvalidData(format!(
                "H.264: avcC {} 长度字段截断, index={}",
                kind, i
            )));
        }
        let len = (usize::from(data[*pos]) << 8) | usize::from(data[*pos + 1]);
        *pos += 2;
        if len == 0 || *pos + len > data.len() {
            return Err(StrandError::InvalidData(format!(
                "H.264: avcC {} 数据非法, index={}, declared_len={}, remain={}",
                kind,
                i,
                len,
                data.len().saturating_sub(*pos)
            )));
        }
        list.push(data[*pos..*pos + len].to_vec());
        *pos += len;
    }
    Ok(list)
}

fn write_parameter_set(out: &mut Vec<u8>, nal: &[u8]) -> StrandResult<()> {
    let len = u16::try_from(nal.len()).map_err(|_| {
        StrandError::InvalidData(format!("H.264: 参数集过长, len={}", nal.len()))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(nal);
    Ok(())
}

/// 移除 emulation prevention 字节 (0x00 0x00 0x03 → 0x00 0x00)
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let is_emulation_prevention =
            i + 2 < data.len() && data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x03;
        if is_emulation_prevention {
            rbsp.push(0x00);
            rbsp.push(0x00);
            i += 3;
        } else {
            rbsp.push(data[i]);
            i += 1;
        }
    }

    rbsp
}

/// 插入 emulation prevention 字节, 与 [`remove_emulation_prevention`] 互逆
pub fn add_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64);
    let mut zeros = 0;
    for &b in rbsp {
        if zeros >= 2 && b <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(b);
        zeros = if b == 0x00 { zeros + 1 } else { 0 };
    }
    out
}
