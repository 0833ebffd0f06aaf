//! Cluster 与块注册表.
//!
//! Cluster 的子元素按槽位保存: 辅助元素 (PrevSize、Position 等) 归 Cluster 所有,
//! 块只保存指向 [`BlockRegistry`] 的句柄. 块由注册表独立持有, Cluster 清理时
//! 只销毁自己拥有的辅助元素, 块在注册表中继续存活.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::trace;
use strand_core::{StrandError, StrandResult};

use super::block::BlockBlob;
use crate::ebml::{
    self, CLUSTER, CLUSTER_POSITION, CLUSTER_PREV_SIZE, CLUSTER_SILENT_TRACK_NUMBER,
    CLUSTER_SILENT_TRACKS, CLUSTER_TIMESTAMP, EBML_VOID,
};

/// 注册表中共享持有的块
pub type SharedBlock = Rc<RefCell<BlockBlob>>;

/// 指向注册表中块的句柄, 不持有块
///
/// 以登记序号区分, 同一轨道上时间戳相同的块各自拥有独立句柄.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHandle {
    seq: u64,
    track: u64,
    timestamp: i64,
}

impl BlockHandle {
    /// 轨道号
    pub fn track(&self) -> u64 {
        self.track
    }

    /// 块时间戳 (纳秒)
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// 登记序号, 按登记顺序单调递增
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// 块注册表: 独立于 Cluster 持有所有块
#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: BTreeMap<BlockHandle, SharedBlock>,
    next_seq: u64,
}

impl BlockRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个已含帧的块, 返回其句柄
    pub fn insert(&mut self, blob: BlockBlob) -> StrandResult<BlockHandle> {
        let block = blob.block();
        if block.frames().is_empty() {
            return Err(StrandError::Misuse("BlockRegistry: 不能登记空块".into()));
        }
        let handle = BlockHandle {
            seq: self.next_seq,
            track: block.track(),
            timestamp: block.timestamp(),
        };
        self.next_seq += 1;
        self.blocks.insert(handle, Rc::new(RefCell::new(blob)));
        Ok(handle)
    }

    /// 按句柄取块
    pub fn get(&self, handle: &BlockHandle) -> Option<SharedBlock> {
        self.blocks.get(handle).cloned()
    }

    /// 移除块, 其他持有者仍可继续使用
    pub fn remove(&mut self, handle: &BlockHandle) -> Option<SharedBlock> {
        self.blocks.remove(handle)
    }

    /// 块数量
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Cluster 子元素种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// SimpleBlock 或 BlockGroup
    Block,
    /// PrevSize
    PrevSize,
    /// Position
    Position,
    /// SilentTracks
    SilentTracks,
    /// Void 填充
    Void,
}

impl ElementKind {
    /// 是否为块
    pub fn is_block(self) -> bool {
        self == Self::Block
    }
}

/// Cluster 拥有的辅助元素
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxElement {
    /// 前一个 Cluster 的字节数
    PrevSize(u64),
    /// 本 Cluster 在 Segment 中的位置
    Position(u64),
    /// 本 Cluster 中静默的轨道
    SilentTracks(Vec<u64>),
    /// 指定数据长度的 Void 填充
    Void(usize),
}

impl AuxElement {
    /// 元素种类
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::PrevSize(_) => ElementKind::PrevSize,
            Self::Position(_) => ElementKind::Position,
            Self::SilentTracks(_) => ElementKind::SilentTracks,
            Self::Void(_) => ElementKind::Void,
        }
    }

    fn render(&self, buf: &mut Vec<u8>) {
        match self {
            Self::PrevSize(size) => ebml::write_uint_element(buf, CLUSTER_PREV_SIZE, *size),
            Self::Position(pos) => ebml::write_uint_element(buf, CLUSTER_POSITION, *pos),
            Self::SilentTracks(tracks) => {
                let mut content = Vec::new();
                for &track in tracks {
                    ebml::write_uint_element(&mut content, CLUSTER_SILENT_TRACK_NUMBER, track);
                }
                ebml::write_master_element(buf, CLUSTER_SILENT_TRACKS, &content);
            }
            Self::Void(len) => ebml::write_binary_element(buf, EBML_VOID, &vec![0u8; *len]),
        }
    }
}

/// Cluster 子元素槽位
#[derive(Debug)]
pub enum ClusterChild {
    /// Cluster 拥有的辅助元素
    Owned(AuxElement),
    /// 注册表中的块
    Block(BlockHandle),
}

impl ClusterChild {
    /// 元素种类
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Owned(aux) => aux.kind(),
            Self::Block(_) => ElementKind::Block,
        }
    }
}

/// Cluster: 共享同一基准时间戳的一组块
#[derive(Debug)]
pub struct Cluster {
    /// TimestampScale (纳秒)
    timestamp_scale: i64,
    /// 基准时间戳 (纳秒, 已对齐到 TimestampScale)
    global_timestamp: Option<i64>,
    children: Vec<ClusterChild>,
}

impl Cluster {
    /// 按 TimestampScale (纳秒) 创建
    pub fn new(timestamp_scale: i64) -> StrandResult<Self> {
        if timestamp_scale <= 0 {
            return Err(StrandError::InvalidArgument(format!(
                "Cluster: TimestampScale 必须为正数, value={}",
                timestamp_scale
            )));
        }
        Ok(Self {
            timestamp_scale,
            global_timestamp: None,
            children: Vec::new(),
        })
    }

    /// TimestampScale (纳秒)
    pub fn timestamp_scale(&self) -> i64 {
        self.timestamp_scale
    }

    /// 确定基准时间戳, 向下对齐到 TimestampScale
    pub fn set_global_timestamp(&mut self, timestamp: i64) {
        let aligned = timestamp.div_euclid(self.timestamp_scale) * self.timestamp_scale;
        self.global_timestamp = Some(aligned);
    }

    /// 基准时间戳
    pub fn global_timestamp(&self) -> Option<i64> {
        self.global_timestamp
    }

    /// 添加辅助元素
    pub fn push_element(&mut self, element: AuxElement) {
        self.children.push(ClusterChild::Owned(element));
    }

    /// 把注册表中的块链接到本 Cluster
    ///
    /// 基准时间戳必须已经确定, 块的相对时间戳与参考块由此得以换算.
    pub fn link_block(&mut self, registry: &BlockRegistry, handle: BlockHandle) -> StrandResult<()> {
        let base = self.global_timestamp.ok_or_else(|| {
            StrandError::Misuse("Cluster: 链接块之前必须先确定基准时间戳".into())
        })?;
        let block = registry.get(&handle).ok_or_else(|| {
            StrandError::InvalidArgument(format!(
                "Cluster: 注册表中没有该块, seq={}, track={}, timestamp={}",
                handle.seq, handle.track, handle.timestamp
            ))
        })?;
        block.borrow_mut().link(base, self.timestamp_scale);
        self.children.push(ClusterChild::Block(handle));
        Ok(())
    }

    /// 子元素槽位
    pub fn children(&self) -> &[ClusterChild] {
        &self.children
    }

    /// 子元素数量
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// 已链接的块句柄
    pub fn block_handles(&self) -> impl Iterator<Item = BlockHandle> + '_ {
        self.children.iter().filter_map(|child| match child {
            ClusterChild::Block(handle) => Some(*handle),
            ClusterChild::Owned(_) => None,
        })
    }

    /// 编码为完整的 Cluster 元素
    pub fn render(&self, registry: &BlockRegistry) -> StrandResult<Vec<u8>> {
        let base = self
            .global_timestamp
            .ok_or_else(|| StrandError::Misuse("Cluster: 基准时间戳尚未确定".into()))?;
        let scaled = u64::try_from(base / self.timestamp_scale).map_err(|_| {
            StrandError::InvalidData(format!("Cluster: 基准时间戳为负, value={}", base))
        })?;

        let mut content = Vec::new();
        ebml::write_uint_element(&mut content, CLUSTER_TIMESTAMP, scaled);
        for child in &self.children {
            match child {
                ClusterChild::Owned(aux) => aux.render(&mut content),
                ClusterChild::Block(handle) => {
                    let block = registry.get(handle).ok_or_else(|| {
                        StrandError::Internal(format!(
                            "Cluster: 已链接的块不在注册表中, seq={}, track={}, timestamp={}",
                            handle.seq, handle.track, handle.timestamp
                        ))
                    })?;
                    let bytes = block.borrow().render()?;
                    content.extend_from_slice(&bytes);
                }
            }
        }

        let mut buf = Vec::with_capacity(content.len() + 12);
        ebml::write_master_element(&mut buf, CLUSTER, &content);
        Ok(buf)
    }

    /// 销毁所有非块子元素并清空槽位, 块仍由注册表持有
    pub fn delete_non_blocks(&mut self) {
        if self.children.is_empty() {
            return;
        }
        let owned = self
            .children
            .iter()
            .filter(|child| !child.kind().is_block())
            .count();
        trace!(
            "Cluster: 清理 {} 个子元素, 其中 {} 个为自有元素",
            self.children.len(),
            owned
        );
        self.children.clear();
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.delete_non_blocks();
    }
}
