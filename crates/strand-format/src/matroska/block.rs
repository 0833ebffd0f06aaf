//! Matroska 块: SimpleBlock、BlockGroup 与两者之间的单向升级.
//!
//! 一个 [`BlockBlob`] 代表一帧 (或一组 lace 帧) 在容器中的编码.
//! 初始为 SimpleBlock; 一旦需要参考块或显式时长就升级为 BlockGroup,
//! 升级不可逆.
//!
//! 参考块保存的是被参考帧的绝对时间戳, 只有在所在块链接到 Cluster
//! (Cluster 基准时间戳已确定) 之后才能换算成相对值.

use std::mem;

use bitflags::bitflags;
use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use strand_core::{StrandError, StrandResult};

use crate::ebml::{
    self, BLOCK, BLOCK_DURATION, BLOCK_GROUP, REFERENCE_BLOCK, SIMPLE_BLOCK, size_to_vint,
    vint_with_len,
};

/// 单个 lace 块最多容纳的帧数
const MAX_LACED_FRAMES: usize = 8;

/// 帧大小达到该值后不再继续 lace
const LACE_FRAME_SIZE_LIMIT: usize = 6 * 0xFF;

/// SimpleBlock 使用策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleBlockMode {
    /// 总是使用 SimpleBlock, 忽略参考块与显式时长
    AlwaysSimple,
    /// 没有参考块时使用 SimpleBlock, 否则升级为 BlockGroup
    #[default]
    SimpleAuto,
    /// 总是使用 BlockGroup
    NoSimple,
}

/// Lacing 方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LacingType {
    /// 不 lace, 每块一帧
    #[default]
    None,
    /// Xiph lacing
    Xiph,
    /// 固定大小 lacing
    Fixed,
    /// EBML lacing
    Ebml,
    /// 在可用方式中选择头部最短的
    Auto,
}

impl LacingType {
    /// 块头 flags 中的 lacing 位
    fn flag_bits(self) -> u8 {
        match self {
            Self::Xiph => 0x02,
            Self::Fixed => 0x04,
            Self::Ebml => 0x06,
            Self::None | Self::Auto => 0x00,
        }
    }
}

bitflags! {
    /// SimpleBlock 头部标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u8 {
        /// 关键帧
        const KEYFRAME = 0x80;
        /// 不可见
        const INVISIBLE = 0x08;
        /// 可丢弃
        const DISCARDABLE = 0x01;
    }
}

/// 块所在 Cluster 的时间基准
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClusterLink {
    /// Cluster 基准时间戳 (纳秒)
    base: i64,
    /// TimestampScale (纳秒)
    timestamp_scale: i64,
}

/// Block 与 SimpleBlock 共有的帧数据
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    track: u64,
    timestamp: i64,
    frames: Vec<Bytes>,
    lacing: LacingType,
    link: Option<ClusterLink>,
}

impl BlockData {
    /// 追加一帧, 返回块是否还能继续接收帧
    pub fn add_frame(
        &mut self,
        track: u64,
        timestamp: i64,
        data: Bytes,
        lacing: LacingType,
    ) -> bool {
        if self.frames.is_empty() {
            self.track = track;
            self.timestamp = timestamp;
        }
        self.lacing = lacing;
        let frame_size = data.len();
        self.frames.push(data);

        if self.frames.len() >= MAX_LACED_FRAMES || lacing == LacingType::None {
            return false;
        }
        frame_size < LACE_FRAME_SIZE_LIMIT
    }

    /// 轨道号
    pub fn track(&self) -> u64 {
        self.track
    }

    /// 块时间戳 (纳秒)
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// 帧列表
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// 是否已链接到 Cluster
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    fn link(&mut self, base: i64, timestamp_scale: i64) {
        self.link = Some(ClusterLink {
            base,
            timestamp_scale,
        });
    }

    fn require_link(&self, what: &str) -> StrandResult<ClusterLink> {
        self.link.ok_or_else(|| {
            StrandError::Misuse(format!(
                "{}: 所在块尚未链接到 Cluster, track={}, timestamp={}",
                what, self.track, self.timestamp
            ))
        })
    }

    /// 相对 Cluster 基准的时间戳 (TimestampScale 单位)
    pub fn relative_timestamp(&self) -> StrandResult<i16> {
        let link = self.require_link("Block")?;
        let relative = (self.timestamp - link.base) / link.timestamp_scale;
        i16::try_from(relative).map_err(|_| {
            StrandError::InvalidData(format!(
                "Block: 相对时间戳超出 16 位范围, relative={}",
                relative
            ))
        })
    }

    /// 编码块体: 轨道号 + 相对时间戳 + flags + lace 头 + 帧数据
    fn render_body(&self, flags: u8) -> StrandResult<Vec<u8>> {
        if self.frames.is_empty() {
            return Err(StrandError::Misuse("Block: 块中没有帧".into()));
        }
        let relative = self.relative_timestamp()?;
        let sizes: Vec<usize> = self.frames.iter().map(Bytes::len).collect();
        let (lacing, lace_header) = encode_lacing(self.lacing, &sizes)?;

        let payload_len: usize = sizes.iter().sum();
        let mut body = Vec::with_capacity(payload_len + lace_header.len() + 8);
        body.extend_from_slice(&size_to_vint(self.track));
        body.write_i16::<BigEndian>(relative)?;
        body.push(flags | lacing.flag_bits());
        body.extend_from_slice(&lace_header);
        for frame in &self.frames {
            body.extend_from_slice(frame);
        }
        Ok(body)
    }
}

/// 参考块: 保存被参考帧的绝对时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceBlock {
    referenced: i64,
}

impl ReferenceBlock {
    /// 以被参考帧的绝对时间戳 (纳秒) 创建
    pub fn new(referenced_timestamp: i64) -> Self {
        Self {
            referenced: referenced_timestamp,
        }
    }

    /// 被参考帧的绝对时间戳
    pub fn referenced_timestamp(&self) -> i64 {
        self.referenced
    }

    /// 相对所在块的有符号偏移 (TimestampScale 单位)
    ///
    /// 所在块链接到 Cluster 之前调用返回 [`StrandError::Misuse`].
    pub fn value(&self, parent: &BlockData) -> StrandResult<i64> {
        let link = parent.require_link("ReferenceBlock")?;
        Ok((self.referenced - parent.timestamp) / link.timestamp_scale)
    }
}

/// SimpleBlock
#[derive(Debug, Clone, Default)]
pub struct SimpleBlock {
    block: BlockData,
    flags: BlockFlags,
}

impl SimpleBlock {
    /// 帧数据
    pub fn block(&self) -> &BlockData {
        &self.block
    }

    /// 头部标志
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// 设置关键帧标志
    pub fn set_keyframe(&mut self, keyframe: bool) {
        self.flags.set(BlockFlags::KEYFRAME, keyframe);
    }

    /// 设置可丢弃标志
    pub fn set_discardable(&mut self, discardable: bool) {
        self.flags.set(BlockFlags::DISCARDABLE, discardable);
    }

    /// 是否为关键帧
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(BlockFlags::KEYFRAME)
    }

    /// 是否可丢弃
    pub fn is_discardable(&self) -> bool {
        self.flags.contains(BlockFlags::DISCARDABLE)
    }

    fn render(&self) -> StrandResult<Vec<u8>> {
        let body = self.block.render_body(self.flags.bits())?;
        let mut buf = Vec::with_capacity(body.len() + 9);
        ebml::write_binary_element(&mut buf, SIMPLE_BLOCK, &body);
        Ok(buf)
    }
}

/// BlockGroup: Block + 可选的 BlockDuration 与参考块
#[derive(Debug, Clone, Default)]
pub struct BlockGroup {
    block: BlockData,
    /// 显式时长 (纳秒)
    duration: Option<u64>,
    /// 参考块, 同时给出两个方向时向后参考在前
    references: Vec<ReferenceBlock>,
}

impl BlockGroup {
    fn from_block(block: BlockData) -> Self {
        Self {
            block,
            ..Self::default()
        }
    }

    /// 帧数据
    pub fn block(&self) -> &BlockData {
        &self.block
    }

    /// 显式时长 (纳秒)
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    /// 参考块列表
    pub fn references(&self) -> &[ReferenceBlock] {
        &self.references
    }

    /// 追加一帧并记录参考块, 每个方向至多一个参考块
    pub fn add_frame(
        &mut self,
        track: u64,
        timestamp: i64,
        data: Bytes,
        past_ref: Option<i64>,
        forward_ref: Option<i64>,
        lacing: LacingType,
    ) -> bool {
        let result = self.block.add_frame(track, timestamp, data, lacing);

        if let Some(past) = past_ref {
            self.set_reference(0, past);
        }
        if let Some(forward) = forward_ref {
            let slot = if past_ref.is_some() { 1 } else { 0 };
            self.set_reference(slot, forward);
        }
        result
    }

    fn set_reference(&mut self, slot: usize, referenced: i64) {
        let reference = ReferenceBlock::new(referenced);
        match self.references.get_mut(slot) {
            Some(existing) => *existing = reference,
            None => self.references.push(reference),
        }
    }

    fn render(&self) -> StrandResult<Vec<u8>> {
        let mut content = Vec::new();
        let body = self.block.render_body(0)?;
        ebml::write_binary_element(&mut content, BLOCK, &body);

        if let Some(duration) = self.duration {
            let link = self.block.require_link("BlockDuration")?;
            let scaled = duration / link.timestamp_scale.max(1) as u64;
            ebml::write_uint_element(&mut content, BLOCK_DURATION, scaled);
        }
        for reference in &self.references {
            ebml::write_sint_element(&mut content, REFERENCE_BLOCK, reference.value(&self.block)?);
        }

        let mut buf = Vec::with_capacity(content.len() + 9);
        ebml::write_master_element(&mut buf, BLOCK_GROUP, &content);
        Ok(buf)
    }
}

/// 块的两种表示, 只能从 Simple 升级到 Group
#[derive(Debug, Clone)]
enum BlockRepr {
    Simple(SimpleBlock),
    Group(BlockGroup),
}

/// 一帧在容器中的编码, SimpleBlock 或 BlockGroup
#[derive(Debug, Clone)]
pub struct BlockBlob {
    mode: SimpleBlockMode,
    repr: BlockRepr,
}

impl BlockBlob {
    /// 按 SimpleBlock 策略创建空块
    pub fn new(mode: SimpleBlockMode) -> Self {
        let repr = match mode {
            SimpleBlockMode::NoSimple => BlockRepr::Group(BlockGroup::default()),
            _ => BlockRepr::Simple(SimpleBlock::default()),
        };
        Self { mode, repr }
    }

    /// SimpleBlock 策略
    pub fn mode(&self) -> SimpleBlockMode {
        self.mode
    }

    /// 当前是否为 SimpleBlock
    pub fn is_simple(&self) -> bool {
        matches!(self.repr, BlockRepr::Simple(_))
    }

    /// 当前为 SimpleBlock 时返回它
    pub fn simple_block(&self) -> Option<&SimpleBlock> {
        match &self.repr {
            BlockRepr::Simple(simple) => Some(simple),
            BlockRepr::Group(_) => None,
        }
    }

    /// 当前为 BlockGroup 时返回它
    pub fn block_group(&self) -> Option<&BlockGroup> {
        match &self.repr {
            BlockRepr::Group(group) => Some(group),
            BlockRepr::Simple(_) => None,
        }
    }

    /// 帧数据
    pub fn block(&self) -> &BlockData {
        match &self.repr {
            BlockRepr::Simple(simple) => &simple.block,
            BlockRepr::Group(group) => &group.block,
        }
    }

    fn block_mut(&mut self) -> &mut BlockData {
        match &mut self.repr {
            BlockRepr::Simple(simple) => &mut simple.block,
            BlockRepr::Group(group) => &mut group.block,
        }
    }

    /// 追加一帧, 按策略选择 SimpleBlock 或 BlockGroup
    ///
    /// `past_ref`/`forward_ref` 为被参考帧的绝对时间戳. 未显式给出标志时,
    /// 无参考的帧为关键帧; 有参考的帧仅当存在晚于自身的参考时可丢弃.
    /// 返回块是否还能继续接收帧.
    #[allow(clippy::too_many_arguments)]
    pub fn add_frame_auto(
        &mut self,
        track: u64,
        timestamp: i64,
        data: Bytes,
        lacing: LacingType,
        past_ref: Option<i64>,
        forward_ref: Option<i64>,
        key_flag: Option<bool>,
        discardable_flag: Option<bool>,
    ) -> bool {
        let no_refs = past_ref.is_none() && forward_ref.is_none();
        let wants_simple = match self.mode {
            SimpleBlockMode::AlwaysSimple => true,
            SimpleBlockMode::SimpleAuto => no_refs,
            SimpleBlockMode::NoSimple => false,
        };

        if wants_simple {
            if let BlockRepr::Simple(simple) = &mut self.repr {
                let result = simple.block.add_frame(track, timestamp, data, lacing);
                if key_flag.is_some() || discardable_flag.is_some() {
                    simple.set_keyframe(key_flag == Some(true));
                    simple.set_discardable(discardable_flag == Some(true));
                } else if no_refs {
                    simple.set_keyframe(true);
                    simple.set_discardable(false);
                } else {
                    // 没有任何参考晚于自身时, 后续帧可能依赖它
                    let not_after = |reference: Option<i64>| reference.is_none_or(|r| r <= timestamp);
                    simple.set_keyframe(false);
                    simple.set_discardable(!(not_after(forward_ref) && not_after(past_ref)));
                }
                return result;
            }
        }

        if !self.replace_simple_by_group() {
            return false;
        }
        match &mut self.repr {
            BlockRepr::Group(group) => {
                group.add_frame(track, timestamp, data, past_ref, forward_ref, lacing)
            }
            BlockRepr::Simple(_) => false,
        }
    }

    /// 升级为 BlockGroup, 已有的帧数据保留; AlwaysSimple 策略下返回 false
    fn replace_simple_by_group(&mut self) -> bool {
        if self.mode == SimpleBlockMode::AlwaysSimple {
            return false;
        }
        if let BlockRepr::Simple(simple) = &mut self.repr {
            let block = mem::take(&mut simple.block);
            trace!(
                "Block: SimpleBlock 升级为 BlockGroup, track={}, timestamp={}",
                block.track, block.timestamp
            );
            self.repr = BlockRepr::Group(BlockGroup::from_block(block));
        }
        true
    }

    /// 设置显式时长 (纳秒), 必要时升级为 BlockGroup; AlwaysSimple 策略下忽略
    pub fn set_block_duration(&mut self, duration: u64) {
        if !self.replace_simple_by_group() {
            debug!("Block: AlwaysSimple 策略下忽略显式时长 {}", duration);
            return;
        }
        if let BlockRepr::Group(group) = &mut self.repr {
            group.duration = Some(duration);
        }
    }

    /// 链接到 Cluster, 确定时间基准
    pub fn link(&mut self, cluster_base: i64, timestamp_scale: i64) {
        self.block_mut().link(cluster_base, timestamp_scale);
    }

    /// 编码为完整的 SimpleBlock 或 BlockGroup 元素
    pub fn render(&self) -> StrandResult<Vec<u8>> {
        match &self.repr {
            BlockRepr::Simple(simple) => simple.render(),
            BlockRepr::Group(group) => group.render(),
        }
    }
}

// ============================================================
// Lacing 编码
// ============================================================

/// 选择实际使用的 lacing 方式并编码 lace 头
///
/// 单帧块不使用 lacing.
pub fn encode_lacing(lacing: LacingType, sizes: &[usize]) -> StrandResult<(LacingType, Vec<u8>)> {
    if sizes.len() <= 1 {
        return Ok((LacingType::None, Vec::new()));
    }
    match lacing {
        LacingType::None => Err(StrandError::InvalidArgument(format!(
            "Block: 未启用 lacing 的块包含 {} 帧",
            sizes.len()
        ))),
        LacingType::Xiph => Ok((LacingType::Xiph, xiph_lace_header(sizes))),
        LacingType::Fixed => Ok((LacingType::Fixed, fixed_lace_header(sizes)?)),
        LacingType::Ebml => Ok((LacingType::Ebml, ebml_lace_header(sizes)?)),
        LacingType::Auto => {
            let mut best = (LacingType::Xiph, xiph_lace_header(sizes));
            if let Ok(header) = fixed_lace_header(sizes) {
                best = (LacingType::Fixed, header);
            }
            if let Ok(header) = ebml_lace_header(sizes) {
                if header.len() < best.1.len() {
                    best = (LacingType::Ebml, header);
                }
            }
            Ok(best)
        }
    }
}

/// Xiph lace 头: 帧数-1, 除最后一帧外每帧大小按 255 拆分
pub fn xiph_lace_header(sizes: &[usize]) -> Vec<u8> {
    let mut header = vec![(sizes.len() - 1) as u8];
    for &size in &sizes[..sizes.len() - 1] {
        header.extend(std::iter::repeat_n(0xFF, size / 0xFF));
        header.push((size % 0xFF) as u8);
    }
    header
}

/// 固定大小 lace 头: 仅帧数-1, 要求所有帧等长
pub fn fixed_lace_header(sizes: &[usize]) -> StrandResult<Vec<u8>> {
    if sizes.windows(2).any(|pair| pair[0] != pair[1]) {
        return Err(StrandError::InvalidArgument(
            "Block: 固定大小 lacing 要求所有帧等长".into(),
        ));
    }
    Ok(vec![(sizes.len() - 1) as u8])
}

/// EBML lace 头: 帧数-1, 首帧大小, 其后为与前一帧大小之差 (有符号 VINT)
pub fn ebml_lace_header(sizes: &[usize]) -> StrandResult<Vec<u8>> {
    let mut header = vec![(sizes.len() - 1) as u8];
    header.extend_from_slice(&size_to_vint(sizes[0] as u64));
    for pair in sizes[..sizes.len() - 1].windows(2) {
        let diff = pair[1] as i64 - pair[0] as i64;
        header.extend_from_slice(&signed_vint(diff)?);
    }
    Ok(header)
}

/// 有符号 VINT: 加上偏置 2^(7n-1)-1 后按 n 字节 VINT 编码
fn signed_vint(value: i64) -> StrandResult<Vec<u8>> {
    for len in 1..=ebml::MAX_VINT_LEN {
        let bias = (1i64 << (7 * len - 1)) - 1;
        if (-bias..=bias).contains(&value) {
            return Ok(vint_with_len((value + bias) as u64, len));
        }
    }
    Err(StrandError::InvalidArgument(format!(
        "Block: EBML lace 大小差值超出范围, value={}",
        value
    )))
}
