//! H.264 SPS (Sequence Parameter Set) 解析器.
//!
//! 帧组装只关心 SPS 中的以下信息:
//! - 图像尺寸 (以宏块为单位, 需要 cropping 调整)
//! - 帧号与图像顺序计数 (POC) 的编码方式
//! - VUI 中的像素宽高比 (SAR) 与 timing_info
//!
//! 量化矩阵只做语法跳过, 不保存.

use strand_core::bitreader::BitReader;
use strand_core::{Rational, StrandError, StrandResult};

/// VUI timing_info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    /// num_units_in_tick
    pub num_units_in_tick: u32,
    /// time_scale
    pub time_scale: u32,
    /// fixed_frame_rate_flag
    pub fixed_frame_rate: bool,
}

/// SPS 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    /// profile_idc (编码规格, 如 66=Baseline, 77=Main, 100=High)
    pub profile_idc: u8,
    /// constraint_set 标志位
    pub constraint_set_flags: u8,
    /// level_idc (编码级别, 如 30=3.0, 41=4.1)
    pub level_idc: u8,
    /// SPS ID (seq_parameter_set_id)
    pub sps_id: u32,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    /// separate_colour_plane_flag
    pub separate_colour_plane: bool,
    /// 亮度位深
    pub bit_depth_luma: u32,
    /// 色度位深
    pub bit_depth_chroma: u32,
    /// log2(max_frame_num)
    pub log2_max_frame_num: u32,
    /// 图像顺序计数类型 (0, 1, 2)
    pub poc_type: u32,
    /// log2(max_pic_order_cnt_lsb) (仅 poc_type==0)
    pub log2_max_poc_lsb: u32,
    /// `poc_type==1` 时的 delta_pic_order_always_zero_flag
    pub delta_pic_order_always_zero_flag: bool,
    /// 最大参考帧数
    pub max_num_ref_frames: u32,
    /// pic_width_in_mbs_minus1 + 1
    pub pic_width_in_mbs: u32,
    /// pic_height_in_map_units_minus1 + 1
    pub pic_height_in_map_units: u32,
    /// 是否只有帧编码 (无场编码)
    pub frame_mbs_only: bool,
    /// mb_adaptive_frame_field_flag
    pub mb_adaptive_frame_field: bool,
    /// cropping 偏移
    pub crop_left: u32,
    /// cropping 偏移
    pub crop_right: u32,
    /// cropping 偏移
    pub crop_top: u32,
    /// cropping 偏移
    pub crop_bottom: u32,
    /// 图像宽度 (像素, 已应用 cropping)
    pub width: u32,
    /// 图像高度 (像素, 已应用 cropping)
    pub height: u32,
    /// 是否存在 VUI 参数
    pub vui_present: bool,
    /// VUI 中是否给出了有效的宽高比
    pub ar_found: bool,
    /// SAR (Sample Aspect Ratio), 未给出时为 1:1
    pub sar: Rational,
    /// VUI timing_info
    pub timing: Option<TimingInfo>,
}

impl Sps {
    /// 由 timing_info 推导的每帧时长 (纳秒)
    ///
    /// H.264 的 tick 对应一场, 一帧为 2 个 tick.
    pub fn default_duration_ns(&self) -> Option<i64> {
        let timing = self.timing?;
        if timing.num_units_in_tick == 0 || timing.time_scale == 0 {
            return None;
        }
        let num = 2 * i128::from(timing.num_units_in_tick) * 1_000_000_000;
        let den = i128::from(timing.time_scale);
        Some(((num + den / 2) / den) as i64)
    }

    /// 帧率 (time_scale / (2 * num_units_in_tick))
    pub fn fps(&self) -> Option<Rational> {
        let timing = self.timing?;
        if timing.num_units_in_tick == 0 || timing.time_scale == 0 {
            return None;
        }
        Some(
            Rational::new(
                i64::from(timing.time_scale),
                2 * i64::from(timing.num_units_in_tick),
            )
            .reduce(),
        )
    }

    /// MaxPicOrderCntLsb
    pub fn max_poc_lsb(&self) -> i64 {
        1i64 << self.log2_max_poc_lsb
    }
}

/// 预定义的 SAR 表 (ITU-T H.264 表 E-1)
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 1),    // 0: 未指定
    (1, 1),    // 1: 1:1
    (12, 11),  // 2: 12:11
    (10, 11),  // 3: 10:11
    (16, 11),  // 4: 16:11
    (40, 33),  // 5: 40:33
    (24, 11),  // 6: 24:11
    (20, 11),  // 7: 20:11
    (32, 11),  // 8: 32:11
    (80, 33),  // 9: 80:33
    (18, 11),  // 10: 18:11
    (15, 11),  // 11: 15:11
    (64, 33),  // 12: 64:33
    (160, 99), // 13: 160:99
    (4, 3),    // 14: 4:3
    (3, 2),    // 15: 3:2
    (2, 1),    // 16: 2:1
];

/// Extended_SAR
const EXTENDED_SAR: u32 = 255;

/// 从 RBSP 数据解析 SPS
pub fn parse_sps(rbsp: &[u8]) -> StrandResult<Sps> {
    if rbsp.len() < 4 {
        return Err(StrandError::InvalidData("H.264: SPS RBSP 太短".into()));
    }

    let mut br = BitReader::new(rbsp);

    let profile_idc = br.read_bits(8)? as u8;
    let constraint_set_flags = br.read_bits(8)? as u8;
    let level_idc = br.read_bits(8)? as u8;
    let sps_id = br.read_ue()?;
    if sps_id > 31 {
        return Err(StrandError::InvalidData(format!(
            "H.264: sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }

    let mut chroma_format_idc = 1; // 默认 4:2:0
    let mut separate_colour_plane = false;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;

    // High profile 及以上有额外字段
    if is_high_profile(profile_idc) {
        chroma_format_idc = br.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(StrandError::InvalidData(format!(
                "H.264: chroma_format_idc 非法, value={}",
                chroma_format_idc
            )));
        }
        if chroma_format_idc == 3 {
            separate_colour_plane = br.read_flag()?;
        }
        bit_depth_luma = br.read_ue()? + 8;
        bit_depth_chroma = br.read_ue()? + 8;
        if !(8..=14).contains(&bit_depth_luma) || !(8..=14).contains(&bit_depth_chroma) {
            return Err(StrandError::InvalidData(format!(
                "H.264: 位深非法, luma={}, chroma={}",
                bit_depth_luma, bit_depth_chroma
            )));
        }
        br.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag

        if br.read_flag()? {
            skip_seq_scaling_lists(&mut br, chroma_format_idc)?;
        }
    }

    let log2_max_frame_num_minus4 = br.read_ue()?;
    if log2_max_frame_num_minus4 > 12 {
        return Err(StrandError::InvalidData(format!(
            "H.264: log2_max_frame_num_minus4 超出范围, value={}",
            log2_max_frame_num_minus4
        )));
    }
    let log2_max_frame_num = log2_max_frame_num_minus4 + 4;

    let poc_type = br.read_ue()?;
    let mut log2_max_poc_lsb = 0u32;
    let mut delta_pic_order_always_zero_flag = false;
    match poc_type {
        0 => {
            let log2_max_poc_lsb_minus4 = br.read_ue()?;
            if log2_max_poc_lsb_minus4 > 12 {
                return Err(StrandError::InvalidData(format!(
                    "H.264: log2_max_pic_order_cnt_lsb_minus4 超出范围, value={}",
                    log2_max_poc_lsb_minus4
                )));
            }
            log2_max_poc_lsb = log2_max_poc_lsb_minus4 + 4;
        }
        1 => {
            delta_pic_order_always_zero_flag = br.read_flag()?;
            let _offset_for_non_ref_pic = br.read_se()?;
            let _offset_for_top_to_bottom_field = br.read_se()?;
            let num_ref_in_poc = br.read_ue()?;
            if num_ref_in_poc > 255 {
                return Err(StrandError::InvalidData(format!(
                    "H.264: num_ref_frames_in_pic_order_cnt_cycle 超出范围, value={}",
                    num_ref_in_poc
                )));
            }
            for _ in 0..num_ref_in_poc {
                br.read_se()?; // offset_for_ref_frame
            }
        }
        2 => {}
        _ => {
            return Err(StrandError::InvalidData(format!(
                "H.264: pic_order_cnt_type 非法, value={}",
                poc_type
            )));
        }
    }

    let max_num_ref_frames = br.read_ue()?;
    br.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = br.read_ue()? + 1;
    let pic_height_in_map_units = br.read_ue()? + 1;

    let frame_mbs_only = br.read_flag()?;
    let mb_adaptive_frame_field = if frame_mbs_only {
        false
    } else {
        br.read_flag()?
    };

    br.skip_bits(1)?; // direct_8x8_inference_flag

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if br.read_flag()? {
        crop_left = br.read_ue()?;
        crop_right = br.read_ue()?;
        crop_top = br.read_ue()?;
        crop_bottom = br.read_ue()?;
    }

    let chroma_array_type = if separate_colour_plane {
        0
    } else {
        chroma_format_idc
    };
    let (crop_unit_x, crop_unit_y) = cropping_unit(chroma_array_type, frame_mbs_only);
    let raw_width = pic_width_in_mbs
        .checked_mul(16)
        .ok_or_else(|| StrandError::InvalidData("H.264: 计算宽度时发生溢出".into()))?;
    let raw_height = pic_height_in_map_units
        .checked_mul(if frame_mbs_only { 16 } else { 32 })
        .ok_or_else(|| StrandError::InvalidData("H.264: 计算高度时发生溢出".into()))?;
    let crop_x = crop_left
        .checked_add(crop_right)
        .and_then(|v| v.checked_mul(crop_unit_x))
        .ok_or_else(|| StrandError::InvalidData("H.264: 计算水平裁剪时发生溢出".into()))?;
    let crop_y = crop_top
        .checked_add(crop_bottom)
        .and_then(|v| v.checked_mul(crop_unit_y))
        .ok_or_else(|| StrandError::InvalidData("H.264: 计算垂直裁剪时发生溢出".into()))?;
    if crop_x >= raw_width || crop_y >= raw_height {
        return Err(StrandError::InvalidData(format!(
            "H.264: 裁剪参数非法, raw={}x{}, crop_x={}, crop_y={}",
            raw_width, raw_height, crop_x, crop_y
        )));
    }

    let mut vui = VuiInfo::default();
    let vui_present = br.read_flag()?;
    if vui_present {
        vui = parse_vui(&mut br)?;
    }

    Ok(Sps {
        profile_idc,
        constraint_set_flags,
        level_idc,
        sps_id,
        chroma_format_idc,
        separate_colour_plane,
        bit_depth_luma,
        bit_depth_chroma,
        log2_max_frame_num,
        poc_type,
        log2_max_poc_lsb,
        delta_pic_order_always_zero_flag,
        max_num_ref_frames,
        pic_width_in_mbs,
        pic_height_in_map_units,
        frame_mbs_only,
        mb_adaptive_frame_field,
        crop_left,
        crop_right,
        crop_top,
        crop_bottom,
        width: raw_width - crop_x,
        height: raw_height - crop_y,
        vui_present,
        ar_found: vui.sar.is_some(),
        sar: vui.sar.unwrap_or(Rational::ONE),
        timing: vui.timing,
    })
}

// ============================================================
// 辅助函数
// ============================================================

/// 是否为 High Profile 或更高
fn is_high_profile(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
    )
}

/// 获取 cropping 单位
fn cropping_unit(chroma_array_type: u32, frame_mbs_only: bool) -> (u32, u32) {
    let sub_width = match chroma_array_type {
        0 | 3 => 1,
        _ => 2,
    };
    let sub_height = match chroma_array_type {
        1 => 2,
        _ => 1,
    };
    let height_mult = if frame_mbs_only { 1 } else { 2 };

    (sub_width, sub_height * height_mult)
}

/// 跳过 seq_scaling_list 语法
fn skip_seq_scaling_lists(br: &mut BitReader, chroma_format_idc: u32) -> StrandResult<()> {
    let count = if chroma_format_idc == 3 { 12 } else { 8 };
    for i in 0..count {
        if br.read_flag()? {
            skip_scaling_list(br, if i < 6 { 16 } else { 64 })?;
        }
    }
    Ok(())
}

fn skip_scaling_list(br: &mut BitReader, size: usize) -> StrandResult<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = br.read_se()?;
            if !(-128..=127).contains(&delta) {
                return Err(StrandError::InvalidData(format!(
                    "H.264: delta_scale 超出范围, value={}",
                    delta
                )));
            }
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

#[derive(Default)]
struct VuiInfo {
    sar: Option<Rational>,
    timing: Option<TimingInfo>,
}

/// 解析 VUI 中与帧组装相关的部分, timing_info 之后的字段不再读取
fn parse_vui(br: &mut BitReader) -> StrandResult<VuiInfo> {
    let mut info = VuiInfo::default();

    // aspect_ratio_info_present_flag
    if br.read_flag()? {
        let ar_idc = br.read_bits(8)?;
        let (w, h) = if ar_idc == EXTENDED_SAR {
            (br.read_bits(16)?, br.read_bits(16)?)
        } else {
            SAR_TABLE.get(ar_idc as usize).copied().unwrap_or((0, 0))
        };
        if w > 0 && h > 0 {
            info.sar = Some(Rational::new(i64::from(w), i64::from(h)));
        } else {
            log::debug!("H.264: VUI 宽高比无效, 忽略, idc={}, sar={}:{}", ar_idc, w, h);
        }
    }

    // overscan_info_present_flag
    if br.read_flag()? {
        br.skip_bits(1)?;
    }

    // video_signal_type_present_flag
    if br.read_flag()? {
        br.skip_bits(4)?; // video_format + video_full_range_flag
        if br.read_flag()? {
            br.skip_bits(24)?; // colour_primaries / transfer / matrix
        }
    }

    // chroma_loc_info_present_flag
    if br.read_flag()? {
        br.read_ue()?;
        br.read_ue()?;
    }

    // timing_info_present_flag
    if br.read_flag()? {
        let num_units_in_tick = br.read_bits(32)?;
        let time_scale = br.read_bits(32)?;
        let fixed_frame_rate = br.read_flag()?;
        if num_units_in_tick > 0 && time_scale > 0 {
            info.timing = Some(TimingInfo {
                num_units_in_tick,
                time_scale,
                fixed_frame_rate,
            });
        } else {
            log::debug!(
                "H.264: VUI timing_info 无效, 忽略, num_units_in_tick={}, time_scale={}",
                num_units_in_tick,
                time_scale
            );
        }
    }

    Ok(info)
}
