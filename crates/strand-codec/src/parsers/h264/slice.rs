//! H.264 切片头解析.
//!
//! 只解析到图像顺序计数 (POC) 相关字段为止, 足以完成:
//! - 切片类型识别 (I/P/B)
//! - 新图像边界检测 (7.4.1.2.4)
//! - 场对配对
//! - POC type 0 的显示顺序计算

use strand_core::bitreader::BitReader;
use strand_core::{StrandError, StrandResult};

use super::nal::{NalUnit, NalUnitType};
use super::pps::ParameterSets;
use crate::es::FrameType;

/// 切片头 RBSP 最多转换的字节数
const SLICE_HEADER_PREFIX_LEN: usize = 64;

/// 切片类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// P 切片
    P,
    /// B 切片
    B,
    /// I 切片
    I,
    /// SP 切片
    Sp,
    /// SI 切片
    Si,
}

impl SliceType {
    /// 从 slice_type 语法值 (0-9) 创建
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw % 5 {
            _ if raw > 9 => None,
            0 => Some(Self::P),
            1 => Some(Self::B),
            2 => Some(Self::I),
            3 => Some(Self::Sp),
            _ => Some(Self::Si),
        }
    }

    /// 映射为帧类型, SP/SI 分别按 P/I 处理
    pub fn frame_type(self) -> FrameType {
        match self {
            Self::I | Self::Si => FrameType::I,
            Self::P | Self::Sp => FrameType::P,
            Self::B => FrameType::B,
        }
    }
}

/// 解析后的切片头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    /// 所在 NAL 的类型
    pub nal_type: NalUnitType,
    /// 所在 NAL 的 nal_ref_idc
    pub nal_ref_idc: u8,
    /// first_mb_in_slice
    pub first_mb_in_slice: u32,
    /// slice_type 语法值 (0-9)
    pub raw_slice_type: u32,
    /// 切片类型
    pub slice_type: SliceType,
    /// pic_parameter_set_id
    pub pps_id: u32,
    /// 经由 PPS 引用的 SPS ID
    pub sps_id: u32,
    /// frame_num
    pub frame_num: u32,
    /// field_pic_flag
    pub field_pic: bool,
    /// bottom_field_flag
    pub bottom_field: bool,
    /// idr_pic_id (仅 IDR)
    pub idr_pic_id: u32,
    /// pic_order_cnt_lsb (仅 poc_type==0)
    pub pic_order_cnt_lsb: u32,
    /// delta_pic_order_cnt_bottom
    pub delta_pic_order_cnt_bottom: i32,
    /// delta_pic_order_cnt[0..2] (仅 poc_type==1)
    pub delta_pic_order_cnt: [i32; 2],
}

impl SliceHeader {
    /// 是否为 IDR 切片
    pub fn is_idr(&self) -> bool {
        self.nal_type.is_idr()
    }

    /// 是否为参考图像
    pub fn is_reference(&self) -> bool {
        self.nal_ref_idc != 0
    }

    /// 判断 `self` 是否为不同于 `prev` 所在图像的新图像的首个切片 (7.4.1.2.4)
    pub fn starts_new_picture(&self, prev: &SliceHeader) -> bool {
        self.first_mb_in_slice == 0
            || self.frame_num != prev.frame_num
            || self.pps_id != prev.pps_id
            || self.field_pic != prev.field_pic
            || (self.field_pic && self.bottom_field != prev.bottom_field)
            || self.is_reference() != prev.is_reference()
            || self.pic_order_cnt_lsb != prev.pic_order_cnt_lsb
            || self.delta_pic_order_cnt_bottom != prev.delta_pic_order_cnt_bottom
            || self.delta_pic_order_cnt != prev.delta_pic_order_cnt
            || self.is_idr() != prev.is_idr()
            || (self.is_idr() && prev.is_idr() && self.idr_pic_id != prev.idr_pic_id)
    }

    /// 判断 `self` 是否为 `first` 的互补场 (同一帧的另一场)
    pub fn completes_field_pair(&self, first: &SliceHeader) -> bool {
        self.field_pic
            && first.field_pic
            && self.bottom_field != first.bottom_field
            && self.frame_num == first.frame_num
    }
}

/// 解析切片头, 引用的参数集必须已经存在
pub fn parse_slice_header(nal: &NalUnit, params: &ParameterSets) -> StrandResult<SliceHeader> {
    let rbsp = nal.rbsp_prefix(SLICE_HEADER_PREFIX_LEN);
    let mut br = BitReader::new(&rbsp);

    let first_mb_in_slice = br.read_ue()?;
    let raw_slice_type = br.read_ue()?;
    let slice_type = SliceType::from_raw(raw_slice_type).ok_or_else(|| {
        StrandError::InvalidData(format!("H.264: slice_type 非法, value={}", raw_slice_type))
    })?;
    let pps_id = br.read_ue()?;
    let pps = params.pps(pps_id).ok_or_else(|| {
        StrandError::InvalidData(format!("H.264: 切片引用了未知的 PPS, pps_id={}", pps_id))
    })?;
    let sps = params.sps(pps.sps_id).ok_or_else(|| {
        StrandError::InvalidData(format!(
            "H.264: PPS 引用了未知的 SPS, pps_id={}, sps_id={}",
            pps_id, pps.sps_id
        ))
    })?;

    if sps.separate_colour_plane {
        br.skip_bits(2)?; // colour_plane_id
    }
    let frame_num = br.read_bits(sps.log2_max_frame_num)?;

    let mut field_pic = false;
    let mut bottom_field = false;
    if !sps.frame_mbs_only {
        field_pic = br.read_flag()?;
        if field_pic {
            bottom_field = br.read_flag()?;
        }
    }

    let idr_pic_id = if nal.nal_type.is_idr() {
        br.read_ue()?
    } else {
        0
    };

    let mut pic_order_cnt_lsb = 0;
    let mut delta_pic_order_cnt_bottom = 0;
    let mut delta_pic_order_cnt = [0; 2];
    match sps.poc_type {
        0 => {
            pic_order_cnt_lsb = br.read_bits(sps.log2_max_poc_lsb)?;
            if pps.bottom_field_pic_order_in_frame_present && !field_pic {
                delta_pic_order_cnt_bottom = br.read_se()?;
            }
        }
        1 if !sps.delta_pic_order_always_zero_flag => {
            delta_pic_order_cnt[0] = br.read_se()?;
            if pps.bottom_field_pic_order_in_frame_present && !field_pic {
                delta_pic_order_cnt[1] = br.read_se()?;
            }
        }
        _ => {}
    }

    Ok(SliceHeader {
        nal_type: nal.nal_type,
        nal_ref_idc: nal.ref_idc,
        first_mb_in_slice,
        raw_slice_type,
        slice_type,
        pps_id,
        sps_id: pps.sps_id,
        frame_num,
        field_pic,
        bottom_field,
        idr_pic_id,
        pic_order_cnt_lsb,
        delta_pic_order_cnt_bottom,
        delta_pic_order_cnt,
    })
}
