//! 集成测试共用的 H.264 码流构造工具.
//!
//! 只构造解析器需要读取的语法元素, 切片其余部分以固定图案填充.

#![allow(dead_code)]

use strand::codec::parsers::h264::nal::add_emulation_prevention;
use strand::core::bitwriter::BitWriter;

/// 序列参数
pub struct SeqParams {
    /// 宽度 (宏块数)
    pub width_mbs: u32,
    /// 高度 (宏块数)
    pub height_mbs: u32,
    /// aspect_ratio_idc
    pub aspect_ratio_idc: Option<u32>,
    /// (num_units_in_tick, time_scale)
    pub timing: Option<(u32, u32)>,
}

impl Default for SeqParams {
    fn default() -> Self {
        Self {
            width_mbs: 20,
            height_mbs: 15,
            aspect_ratio_idc: None,
            timing: None,
        }
    }
}

/// 切片种类
#[derive(Debug, Clone, Copy)]
pub enum Pic {
    /// IDR 图像 (idr_pic_id)
    Idr(u32),
    /// 非 IDR 的 I 图像 (frame_num, poc_lsb)
    I(u32, u32),
    /// P 图像 (frame_num, poc_lsb)
    P(u32, u32),
    /// 非参考 B 图像 (frame_num, poc_lsb)
    B(u32, u32),
}

const LOG2_MAX_FRAME_NUM: u32 = 8;
const LOG2_MAX_POC_LSB: u32 = 8;

pub fn nal(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    out.extend(add_emulation_prevention(rbsp));
    out
}

pub fn sps_nal(p: &SeqParams) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(77, 8); // profile_idc: Main
    bw.write_bits(0, 8); // constraint_set flags
    bw.write_bits(30, 8); // level_idc
    bw.write_ue(0); // seq_parameter_set_id
    bw.write_ue(LOG2_MAX_FRAME_NUM - 4);
    bw.write_ue(0); // pic_order_cnt_type
    bw.write_ue(LOG2_MAX_POC_LSB - 4);
    bw.write_ue(2); // max_num_ref_frames
    bw.write_bit(0); // gaps_in_frame_num_value_allowed_flag
    bw.write_ue(p.width_mbs - 1);
    bw.write_ue(p.height_mbs - 1);
    bw.write_bit(1); // frame_mbs_only_flag
    bw.write_bit(1); // direct_8x8_inference_flag
    bw.write_bit(0); // frame_cropping_flag

    let vui = p.aspect_ratio_idc.is_some() || p.timing.is_some();
    bw.write_flag(vui);
    if vui {
        match p.aspect_ratio_idc {
            Some(idc) => {
                bw.write_bit(1);
                bw.write_bits(idc, 8);
            }
            None => bw.write_bit(0),
        }
        bw.write_bit(0); // overscan_info_present_flag
        bw.write_bit(0); // video_signal_type_present_flag
        bw.write_bit(0); // chroma_loc_info_present_flag
        match p.timing {
            Some((num_units_in_tick, time_scale)) => {
                bw.write_bit(1);
                bw.write_bits(num_units_in_tick, 32);
                bw.write_bits(time_scale, 32);
                bw.write_bit(1); // fixed_frame_rate_flag
            }
            None => bw.write_bit(0),
        }
        bw.write_bit(0); // nal_hrd_parameters_present_flag
        bw.write_bit(0); // vcl_hrd_parameters_present_flag
        bw.write_bit(0); // pic_struct_present_flag
        bw.write_bit(0); // bitstream_restriction_flag
    }
    bw.write_trailing_bits();
    nal(0x67, &bw.finish())
}

pub fn pps_nal() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(0); // pic_parameter_set_id
    bw.write_ue(0); // seq_parameter_set_id
    bw.write_bit(0); // entropy_coding_mode_flag
    bw.write_bit(0); // bottom_field_pic_order_in_frame_present_flag
    bw.write_ue(0); // num_slice_groups_minus1
    bw.write_ue(0); // num_ref_idx_l0_default_active_minus1
    bw.write_ue(0); // num_ref_idx_l1_default_active_minus1
    bw.write_bit(0); // weighted_pred_flag
    bw.write_bits(0, 2); // weighted_bipred_idc
    bw.write_se(0); // pic_init_qp_minus26
    bw.write_se(0); // pic_init_qs_minus26
    bw.write_se(0); // chroma_qp_index_offset
    bw.write_bit(1); // deblocking_filter_control_present_flag
    bw.write_bit(0); // constrained_intra_pred_flag
    bw.write_bit(0); // redundant_pic_cnt_present_flag
    bw.write_trailing_bits();
    nal(0x68, &bw.finish())
}

pub fn slice_nal(pic: Pic) -> Vec<u8> {
    let (nal_type, ref_idc, slice_type, frame_num, poc_lsb) = match pic {
        Pic::Idr(_) => (5u8, 3u8, 7, 0, 0),
        Pic::I(frame_num, poc) => (1, 3, 7, frame_num, poc),
        Pic::P(frame_num, poc) => (1, 2, 5, frame_num, poc),
        Pic::B(frame_num, poc) => (1, 0, 6, frame_num, poc),
    };

    let mut bw = BitWriter::new();
    bw.write_ue(0); // first_mb_in_slice
    bw.write_ue(slice_type);
    bw.write_ue(0); // pic_parameter_set_id
    bw.write_bits(frame_num, LOG2_MAX_FRAME_NUM);
    if let Pic::Idr(idr_pic_id) = pic {
        bw.write_ue(idr_pic_id);
    }
    bw.write_bits(poc_lsb, LOG2_MAX_POC_LSB);
    bw.write_bits(0xA5C3, 16);
    bw.write_trailing_bits();
    nal((ref_idc << 5) | nal_type, &bw.finish())
}

/// 参数集 + 切片
pub fn stream_nals(seq: &SeqParams, pics: &[Pic]) -> Vec<Vec<u8>> {
    let mut nals = vec![sps_nal(seq), pps_nal()];
    nals.extend(pics.iter().map(|&pic| slice_nal(pic)));
    nals
}

/// 以 4 字节起始码拼接
pub fn annex_b(nals: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for n in nals {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(n);
    }
    out
}

/// 以大端长度前缀拼接
pub fn length_prefixed(nals: &[Vec<u8>], length_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for n in nals {
        let len = (n.len() as u64).to_be_bytes();
        out.extend_from_slice(&len[8 - length_size..]);
        out.extend_from_slice(n);
    }
    out
}

/// IDR 开头, 每 `gop` 帧一个 IDR 的 IPPP 序列
pub fn ip_sequence(num_frames: u32, gop: u32) -> Vec<Pic> {
    (0..num_frames)
        .map(|i| {
            let n = i % gop;
            if n == 0 {
                Pic::Idr(i / gop)
            } else {
                Pic::P(n, n * 2)
            }
        })
        .collect()
}
