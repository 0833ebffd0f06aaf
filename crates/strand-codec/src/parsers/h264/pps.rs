//! H.264 PPS (Picture Parameter Set) 解析与参数集存储.

use std::collections::BTreeMap;

use strand_core::bitreader::BitReader;
use strand_core::{StrandError, StrandResult};

use super::sps::Sps;

/// PPS 解析结果 (仅切片头解析所需字段)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    /// pic_parameter_set_id
    pub pps_id: u32,
    /// 引用的 seq_parameter_set_id
    pub sps_id: u32,
    /// entropy_coding_mode_flag (CABAC)
    pub entropy_coding_mode: bool,
    /// bottom_field_pic_order_in_frame_present_flag
    pub bottom_field_pic_order_in_frame_present: bool,
}

/// 从 RBSP 数据解析 PPS
pub fn parse_pps(rbsp: &[u8]) -> StrandResult<Pps> {
    if rbsp.is_empty() {
        return Err(StrandError::InvalidData("H.264: PPS RBSP 为空".into()));
    }
    let mut br = BitReader::new(rbsp);

    let pps_id = br.read_ue()?;
    if pps_id > 255 {
        return Err(StrandError::InvalidData(format!(
            "H.264: pps_id 超出范围, pps_id={}",
            pps_id
        )));
    }
    let sps_id = br.read_ue()?;
    if sps_id > 31 {
        return Err(StrandError::InvalidData(format!(
            "H.264: PPS 引用的 sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }
    let entropy_coding_mode = br.read_flag()?;
    let bottom_field_pic_order_in_frame_present = br.read_flag()?;

    Ok(Pps {
        pps_id,
        sps_id,
        entropy_coding_mode,
        bottom_field_pic_order_in_frame_present,
    })
}

/// 当前已知的全部参数集, 同时保留原始 NAL 以便生成 avcC
#[derive(Debug, Default)]
pub struct ParameterSets {
    sps: BTreeMap<u32, (Sps, Vec<u8>)>,
    pps: BTreeMap<u32, (Pps, Vec<u8>)>,
}

impl ParameterSets {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存 SPS, 返回内容是否与同 ID 的旧值不同 (新增也算不同)
    pub fn insert_sps(&mut self, sps: Sps, raw: Vec<u8>) -> bool {
        let changed = self
            .sps
            .get(&sps.sps_id)
            .is_none_or(|(_, old_raw)| *old_raw != raw);
        self.sps.insert(sps.sps_id, (sps, raw));
        changed
    }

    /// 保存 PPS, 返回内容是否与同 ID 的旧值不同 (新增也算不同)
    pub fn insert_pps(&mut self, pps: Pps, raw: Vec<u8>) -> bool {
        let changed = self
            .pps
            .get(&pps.pps_id)
            .is_none_or(|(_, old_raw)| *old_raw != raw);
        self.pps.insert(pps.pps_id, (pps, raw));
        changed
    }

    /// 按 ID 查找 SPS
    pub fn sps(&self, sps_id: u32) -> Option<&Sps> {
        self.sps.get(&sps_id).map(|(sps, _)| sps)
    }

    /// 按 ID 查找 PPS
    pub fn pps(&self, pps_id: u32) -> Option<&Pps> {
        self.pps.get(&pps_id).map(|(pps, _)| pps)
    }

    /// 至少各有一个 SPS 与 PPS
    pub fn is_complete(&self) -> bool {
        !self.sps.is_empty() && !self.pps.is_empty()
    }

    /// 原始 SPS NAL 列表, 按 ID 升序
    pub fn raw_sps_list(&self) -> Vec<Vec<u8>> {
        self.sps.values().map(|(_, raw)| raw.clone()).collect()
    }

    /// 原始 PPS NAL 列表, 按 ID 升序
    pub fn raw_pps_list(&self) -> Vec<Vec<u8>> {
        self.pps.values().map(|(_, raw)| raw.clone()).collect()
    }
}
