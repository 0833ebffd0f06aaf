//! Cues 索引.
//!
//! 关键帧块先以句柄形式挂在临时引用列表上, 所在 Cluster 写出并得到位置后
//! 再转成索引点. 写出 Cues 时先清空临时列表, 写入失败也不会残留引用.

use std::mem;

use log::{debug, warn};
use strand_core::{StrandError, StrandResult};

use super::cluster::{BlockHandle, Cluster};
use crate::ebml::{
    self, CUE_CLUSTER_POSITION, CUE_POINT, CUE_TIME, CUE_TRACK, CUE_TRACK_POSITIONS, CUES,
};
use crate::io::IoContext;

/// 索引点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuePoint {
    /// 时间 (TimestampScale 单位)
    pub time: u64,
    /// 轨道号
    pub track: u64,
    /// 所在 Cluster 相对 Segment 数据起点的位置
    pub cluster_position: u64,
}

/// Cues 索引
#[derive(Debug)]
pub struct Cues {
    timestamp_scale: i64,
    /// 等待 Cluster 位置的块引用
    temp_refs: Vec<BlockHandle>,
    points: Vec<CuePoint>,
}

impl Cues {
    /// 按 TimestampScale (纳秒) 创建
    pub fn new(timestamp_scale: i64) -> StrandResult<Self> {
        if timestamp_scale <= 0 {
            return Err(StrandError::InvalidArgument(format!(
                "Cues: TimestampScale 必须为正数, value={}",
                timestamp_scale
            )));
        }
        Ok(Self {
            timestamp_scale,
            temp_refs: Vec::new(),
            points: Vec::new(),
        })
    }

    /// 登记一个需要建立索引的块
    pub fn add_block_reference(&mut self, handle: BlockHandle) {
        self.temp_refs.push(handle);
    }

    /// 尚未对应到 Cluster 的块引用数
    pub fn num_pending_references(&self) -> usize {
        self.temp_refs.len()
    }

    /// 已建立的索引点
    pub fn points(&self) -> &[CuePoint] {
        &self.points
    }

    /// 把属于该 Cluster 的块引用转成索引点
    pub fn index_cluster(&mut self, cluster: &Cluster, cluster_position: u64) {
        let (in_cluster, pending): (Vec<BlockHandle>, Vec<BlockHandle>) =
            mem::take(&mut self.temp_refs)
                .into_iter()
                .partition(|handle| cluster.block_handles().any(|h| h == *handle));
        self.temp_refs = pending;

        for handle in in_cluster {
            self.points.push(CuePoint {
                time: handle.timestamp().max(0) as u64 / self.timestamp_scale as u64,
                track: handle.track(),
                cluster_position,
            });
        }
    }

    /// 写出 Cues 元素, 没有索引点时不写
    pub fn render(&mut self, io: &mut IoContext) -> StrandResult<()> {
        let dangling = mem::take(&mut self.temp_refs);
        if !dangling.is_empty() {
            warn!("Cues: {} 个块引用没有对应的 Cluster, 已丢弃", dangling.len());
        }
        if self.points.is_empty() {
            return Ok(());
        }

        let mut content = Vec::new();
        for point in &self.points {
            let mut positions = Vec::new();
            ebml::write_uint_element(&mut positions, CUE_TRACK, point.track);
            ebml::write_uint_element(&mut positions, CUE_CLUSTER_POSITION, point.cluster_position);

            let mut cue = Vec::new();
            ebml::write_uint_element(&mut cue, CUE_TIME, point.time);
            ebml::write_master_element(&mut cue, CUE_TRACK_POSITIONS, &positions);
            ebml::write_master_element(&mut content, CUE_POINT, &cue);
        }

        ebml::write_element_header(io, CUES, content.len() as u64)?;
        io.write_all(&content)?;
        debug!("Cues: 写出 {} 个索引点", self.points.len());
        Ok(())
    }
}
