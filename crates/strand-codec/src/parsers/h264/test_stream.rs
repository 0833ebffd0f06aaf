//! 单元测试用的 H.264 码流构造工具.

use strand_core::bitwriter::BitWriter;

use super::nal::add_emulation_prevention;
use super::pps::{ParameterSets, parse_pps};
use super::sps::parse_sps;

pub(crate) struct SpsParams {
    pub profile_idc: u32,
    pub sps_id: u32,
    pub width_mbs: u32,
    pub height_map_units: u32,
    pub frame_mbs_only: bool,
    pub poc_type: u32,
    pub log2_max_poc_lsb: u32,
    pub log2_max_frame_num: u32,
    pub crop_bottom: u32,
    pub aspect_ratio_idc: Option<u32>,
    pub extended_sar: Option<(u32, u32)>,
    /// (num_units_in_tick, time_scale)
    pub timing: Option<(u32, u32)>,
}

impl Default for SpsParams {
    fn default() -> Self {
        Self {
            profile_idc: 77,
            sps_id: 0,
            width_mbs: 20,
            height_map_units: 15,
            frame_mbs_only: true,
            poc_type: 0,
            log2_max_poc_lsb: 8,
            log2_max_frame_num: 8,
            crop_bottom: 0,
            aspect_ratio_idc: None,
            extended_sar: None,
            timing: None,
        }
    }
}

#[derive(Default)]
pub(crate) struct PpsParams {
    pub pps_id: u32,
    pub sps_id: u32,
    pub entropy_coding_mode: bool,
    pub bottom_field_pic_order_in_frame_present: bool,
}

pub(crate) fn build_sps_rbsp(p: &SpsParams) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(p.profile_idc, 8);
    bw.write_bits(0, 8); // constraint_set flags
    bw.write_bits(30, 8); // level_idc
    bw.write_ue(p.sps_id);
    if p.profile_idc == 100 {
        bw.write_ue(1); // chroma_format_idc
        bw.write_ue(0); // bit_depth_luma_minus8
        bw.write_ue(0); // bit_depth_chroma_minus8
        bw.write_bit(0); // qpprime_y_zero_transform_bypass_flag
        bw.write_bit(0); // seq_scaling_matrix_present_flag
    }
    bw.write_ue(p.log2_max_frame_num - 4);
    bw.write_ue(p.poc_type);
    match p.poc_type {
        0 => bw.write_ue(p.log2_max_poc_lsb - 4),
        1 => {
            bw.write_bit(0);
            bw.write_se(0);
            bw.write_se(0);
            bw.write_ue(0);
        }
        _ => {}
    }
    bw.write_ue(2); // max_num_ref_frames
    bw.write_bit(0); // gaps_in_frame_num_value_allowed_flag
    bw.write_ue(p.width_mbs - 1);
    bw.write_ue(p.height_map_units - 1);
    bw.write_flag(p.frame_mbs_only);
    if !p.frame_mbs_only {
        bw.write_bit(0); // mb_adaptive_frame_field_flag
    }
    bw.write_bit(1); // direct_8x8_inference_flag
    if p.crop_bottom > 0 {
        bw.write_bit(1);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(p.crop_bottom);
    } else {
        bw.write_bit(0);
    }

    let vui = p.aspect_ratio_idc.is_some() || p.extended_sar.is_some() || p.timing.is_some();
    bw.write_flag(vui);
    if vui {
        if let Some(idc) = p.aspect_ratio_idc {
            bw.write_bit(1);
            bw.write_bits(idc, 8);
        } else if let Some((w, h)) = p.extended_sar {
            bw.write_bit(1);
            bw.write_bits(255, 8);
            bw.write_bits(w, 16);
            bw.write_bits(h, 16);
        } else {
            bw.write_bit(0);
        }
        bw.write_bit(0); // overscan_info_present_flag
        bw.write_bit(0); // video_signal_type_present_flag
        bw.write_bit(0); // chroma_loc_info_present_flag
        if let Some((num_units_in_tick, time_scale)) = p.timing {
            bw.write_bit(1);
            bw.write_bits(num_units_in_tick, 32);
            bw.write_bits(time_scale, 32);
            bw.write_bit(1); // fixed_frame_rate_flag
        } else {
            bw.write_bit(0);
        }
        bw.write_bit(0); // nal_hrd_parameters_present_flag
        bw.write_bit(0); // vcl_hrd_parameters_present_flag
        bw.write_bit(0); // pic_struct_present_flag
        bw.write_bit(0); // bitstream_restriction_flag
    }
    bw.write_trailing_bits();
    bw.finish()
}

pub(crate) fn build_pps_rbsp(p: &PpsParams) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(p.pps_id);
    bw.write_ue(p.sps_id);
    bw.write_flag(p.entropy_coding_mode);
    bw.write_flag(p.bottom_field_pic_order_in_frame_present);
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
    bw.finish()
}

#[derive(Clone)]
pub(crate) struct SliceParams {
    pub nal_type: u8,
    pub ref_idc: u8,
    pub first_mb: u32,
    pub slice_type: u32,
    pub pps_id: u32,
    pub frame_num: u32,
    /// Some(bottom_field)
    pub field: Option<bool>,
    pub idr_pic_id: u32,
    pub poc_lsb: u32,
}

impl SliceParams {
    pub fn idr(idr_pic_id: u32) -> Self {
        Self {
            nal_type: 5,
            ref_idc: 3,
            first_mb: 0,
            slice_type: 7,
            pps_id: 0,
            frame_num: 0,
            field: None,
            idr_pic_id,
            poc_lsb: 0,
        }
    }

    pub fn i(frame_num: u32, poc_lsb: u32) -> Self {
        Self {
            nal_type: 1,
            frame_num,
            poc_lsb,
            ..Self::idr(0)
        }
    }

    pub fn p(frame_num: u32, poc_lsb: u32) -> Self {
        Self {
            slice_type: 5,
            ..Self::i(frame_num, poc_lsb)
        }
    }

    pub fn b(frame_num: u32, poc_lsb: u32) -> Self {
        Self {
            ref_idc: 0,
            slice_type: 6,
            ..Self::i(frame_num, poc_lsb)
        }
    }

    pub fn field(self, bottom: bool) -> Self {
        Self {
            field: Some(bottom),
            ..self
        }
    }
}

pub(crate) struct StreamBuilder {
    pub sps: SpsParams,
    pub pps: PpsParams,
}

impl StreamBuilder {
    pub fn progressive() -> Self {
        Self {
            sps: SpsParams::default(),
            pps: PpsParams::default(),
        }
    }

    pub fn interlaced() -> Self {
        Self {
            sps: SpsParams {
                frame_mbs_only: false,
                height_map_units: 18,
                ..SpsParams::default()
            },
            pps: PpsParams::default(),
        }
    }

    pub fn with_sps(sps: SpsParams) -> Self {
        Self {
            sps,
            pps: PpsParams::default(),
        }
    }

    pub fn sps_nal(&self) -> Vec<u8> {
        nal(0x67, &build_sps_rbsp(&self.sps))
    }

    pub fn pps_nal(&self) -> Vec<u8> {
        nal(0x68, &build_pps_rbsp(&self.pps))
    }

    pub fn slice(&self, p: &SliceParams) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_ue(p.first_mb);
        bw.write_ue(p.slice_type);
        bw.write_ue(p.pps_id);
        bw.write_bits(p.frame_num, self.sps.log2_max_frame_num);
        if !self.sps.frame_mbs_only {
            bw.write_flag(p.field.is_some());
            if let Some(bottom) = p.field {
                bw.write_flag(bottom);
            }
        }
        if p.nal_type == 5 {
            bw.write_ue(p.idr_pic_id);
        }
        if self.sps.poc_type == 0 {
            bw.write_bits(p.poc_lsb, self.sps.log2_max_poc_lsb);
            if self.pps.bottom_field_pic_order_in_frame_present && p.field.is_none() {
                bw.write_se(0);
            }
        }
        // 切片其余部分用固定图案代替
        bw.write_bits(0xA5C3, 16);
        bw.write_trailing_bits();
        nal((p.ref_idc << 5) | p.nal_type, &bw.finish())
    }

    pub fn parameter_sets(&self) -> ParameterSets {
        let mut sets = ParameterSets::new();
        let sps_nal = self.sps_nal();
        let pps_nal = self.pps_nal();
        let sps = parse_sps(&build_sps_rbsp(&self.sps)).unwrap();
        let pps = parse_pps(&build_pps_rbsp(&self.pps)).unwrap();
        sets.insert_sps(sps, sps_nal);
        sets.insert_pps(pps, pps_nal);
        sets
    }
}

pub(crate) fn nal(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    out.extend(add_emulation_prevention(rbsp));
    out
}

/// 以 4 字节起始码拼接
pub(crate) fn annex_b(nals: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for n in nals {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(n);
    }
    out
}
