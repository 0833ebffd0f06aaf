//! Matroska 封装器.
//!
//! 写入流程:
//! 1. `write_header()` - 写入 EBML Header + Segment + Info + Tracks
//! 2. `write_frame()` - 按策略生成 SimpleBlock 或 BlockGroup, 新 Cluster 按需创建
//! 3. `write_trailer()` - 写出最后一个 Cluster 与 Cues, 回填 Duration 与 Segment 大小

use std::io::SeekFrom;

use log::{debug, trace};
use strand_codec::Frame;
use strand_core::{StrandError, StrandResult};

use super::block::{BlockBlob, LacingType, SimpleBlockMode};
use super::cluster::{AuxElement, BlockRegistry, Cluster};
use super::cues::{CuePoint, Cues};
use crate::ebml::{
    self, EBML_DOC_TYPE, EBML_DOC_TYPE_READ_VERSION, EBML_DOC_TYPE_VERSION, EBML_HEADER,
    EBML_MAX_ID_LENGTH, EBML_MAX_SIZE_LENGTH, EBML_READ_VERSION, EBML_VERSION, INFO_DURATION,
    INFO_MUXING_APP, INFO_TIMESCALE, INFO_WRITING_APP, SEGMENT, SEGMENT_INFO, TRACK_CODEC_ID,
    TRACK_CODEC_PRIVATE, TRACK_DEFAULT_DURATION, TRACK_ENTRY, TRACK_NUMBER, TRACK_TYPE,
    TRACK_UID, TRACKS, VIDEO_DISPLAY_HEIGHT, VIDEO_DISPLAY_WIDTH, VIDEO_PIXEL_HEIGHT,
    VIDEO_PIXEL_WIDTH, VIDEO_SETTINGS,
};
use crate::io::IoContext;

/// 默认 TimestampScale: 1ms (1_000_000 纳秒)
pub const DEFAULT_TIMESTAMP_SCALE_NS: i64 = 1_000_000;

/// 每个 Cluster 的默认最大时长 (毫秒)
pub const DEFAULT_MAX_CLUSTER_DURATION_MS: i64 = 5000;

/// H.264 轨道的 CodecID
const CODEC_ID_AVC: &str = "V_MPEG4/ISO/AVC";

/// 视频轨道号, 只写一个轨道
const VIDEO_TRACK_NUMBER: u64 = 1;

/// TrackType: 视频
const TRACK_TYPE_VIDEO: u64 = 1;

/// 封装选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxerOptions {
    /// SimpleBlock 使用策略
    pub simple_block_mode: SimpleBlockMode,
    /// lacing 方式
    pub lacing: LacingType,
    /// TimestampScale (纳秒)
    pub timestamp_scale_ns: i64,
    /// 单个 Cluster 的最大时长 (毫秒)
    pub max_cluster_duration_ms: i64,
    /// 是否写出 Cues
    pub write_cues: bool,
}

impl Default for MuxerOptions {
    fn default() -> Self {
        Self {
            simple_block_mode: SimpleBlockMode::default(),
            lacing: LacingType::default(),
            timestamp_scale_ns: DEFAULT_TIMESTAMP_SCALE_NS,
            max_cluster_duration_ms: DEFAULT_MAX_CLUSTER_DURATION_MS,
            write_cues: true,
        }
    }
}

impl MuxerOptions {
    /// 检查选项取值
    pub fn validate(&self) -> StrandResult<()> {
        if self.timestamp_scale_ns <= 0 {
            return Err(StrandError::InvalidArgument(format!(
                "MKV: TimestampScale 必须为正数, value={}",
                self.timestamp_scale_ns
            )));
        }
        if self.max_cluster_duration_ms <= 0 {
            return Err(StrandError::InvalidArgument(format!(
                "MKV: Cluster 最大时长必须为正数, value={}",
                self.max_cluster_duration_ms
            )));
        }
        Ok(())
    }
}

/// 视频轨道参数
#[derive(Debug, Clone, Default)]
pub struct VideoTrackInfo {
    /// CodecPrivate (AVCDecoderConfigurationRecord)
    pub codec_private: Vec<u8>,
    /// 编码宽度
    pub pixel_width: u32,
    /// 编码高度
    pub pixel_height: u32,
    /// 显示宽度
    pub display_width: Option<u32>,
    /// 显示高度
    pub display_height: Option<u32>,
    /// 默认帧时长 (纳秒)
    pub default_duration_ns: Option<i64>,
}

/// 尚未登记的 lace 块, 继续接收时间上相接的无参考帧
struct OpenBlock {
    blob: BlockBlob,
    keyframe: bool,
    /// 下一帧应有的时间戳 (纳秒)
    next_timestamp: i64,
}

/// 写入状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Created,
    Writing,
    Finished,
}

/// Matroska 封装器 (单个 H.264 视频轨道)
pub struct MatroskaWriter {
    options: MuxerOptions,
    state: WriterState,
    /// 轨道默认帧时长 (纳秒)
    default_duration: Option<i64>,
    /// Segment 大小字段的绝对偏移
    segment_size_offset: u64,
    /// Segment 数据起点的绝对偏移
    segment_data_start: u64,
    /// Duration 数据的绝对偏移
    duration_offset: u64,
    registry: BlockRegistry,
    cluster: Option<Cluster>,
    open_block: Option<OpenBlock>,
    /// 上一个 Cluster 的字节数
    prev_cluster_size: Option<u64>,
    cues: Cues,
    /// 已写帧的最大结束时间戳 (纳秒)
    max_end: i64,
    num_frames: u64,
    num_clusters: u64,
}

impl MatroskaWriter {
    /// 创建封装器
    pub fn new(options: MuxerOptions) -> StrandResult<Self> {
        options.validate()?;
        let cues = Cues::new(options.timestamp_scale_ns)?;
        Ok(Self {
            options,
            state: WriterState::Created,
            default_duration: None,
            segment_size_offset: 0,
            segment_data_start: 0,
            duration_offset: 0,
            registry: BlockRegistry::new(),
            cluster: None,
            open_block: None,
            prev_cluster_size: None,
            cues,
            max_end: 0,
            num_frames: 0,
            num_clusters: 0,
        })
    }

    /// 封装选项
    pub fn options(&self) -> &MuxerOptions {
        &self.options
    }

    /// 已写入的帧数
    pub fn num_frames(&self) -> u64 {
        self.num_frames
    }

    /// 已写出的 Cluster 数
    pub fn num_clusters(&self) -> u64 {
        self.num_clusters
    }

    /// 已建立的索引点
    pub fn cue_points(&self) -> &[CuePoint] {
        self.cues.points()
    }

    /// 写入 EBML Header + Segment + Info + Tracks
    pub fn write_header(&mut self, io: &mut IoContext, track: &VideoTrackInfo) -> StrandResult<()> {
        if self.state != WriterState::Created {
            return Err(StrandError::Misuse("MKV: 文件头已经写入".into()));
        }
        if track.codec_private.is_empty() {
            return Err(StrandError::InvalidArgument(
                "MKV: 缺少 CodecPrivate (avcC)".into(),
            ));
        }

        // EBML Header
        let mut ebml_content = Vec::new();
        ebml::write_uint_element(&mut ebml_content, EBML_VERSION, 1);
        ebml::write_uint_element(&mut ebml_content, EBML_READ_VERSION, 1);
        ebml::write_uint_element(&mut ebml_content, EBML_MAX_ID_LENGTH, 4);
        ebml::write_uint_element(&mut ebml_content, EBML_MAX_SIZE_LENGTH, 8);
        ebml::write_string_element(&mut ebml_content, EBML_DOC_TYPE, "matroska");
        ebml::write_uint_element(&mut ebml_content, EBML_DOC_TYPE_VERSION, 4);
        ebml::write_uint_element(&mut ebml_content, EBML_DOC_TYPE_READ_VERSION, 2);
        ebml::write_element_header(io, EBML_HEADER, ebml_content.len() as u64)?;
        io.write_all(&ebml_content)?;

        // Segment (先写未知大小, trailer 回填)
        io.write_all(&ebml::id_to_bytes(SEGMENT))?;
        self.segment_size_offset = io.position()?;
        io.write_all(&ebml::unknown_size_vint())?;
        self.segment_data_start = io.position()?;

        // Info
        let mut info_content = Vec::new();
        ebml::write_uint_element(
            &mut info_content,
            INFO_TIMESCALE,
            self.options.timestamp_scale_ns as u64,
        );
        let app = format!("strand-{}", env!("CARGO_PKG_VERSION"));
        ebml::write_string_element(&mut info_content, INFO_MUXING_APP, &app);
        ebml::write_string_element(&mut info_content, INFO_WRITING_APP, &app);
        // Duration (float64, 先写 0.0, 数据位于元素末尾 8 字节)
        ebml::write_float_element(&mut info_content, INFO_DURATION, 0.0);
        let duration_data_pos = info_content.len() - 8;

        ebml::write_element_header(io, SEGMENT_INFO, info_content.len() as u64)?;
        let info_data_start = io.position()?;
        io.write_all(&info_content)?;
        self.duration_offset = info_data_start + duration_data_pos as u64;

        // Tracks
        let entry = build_track_entry(track);
        let mut tracks_content = Vec::new();
        ebml::write_master_element(&mut tracks_content, TRACK_ENTRY, &entry);
        ebml::write_element_header(io, TRACKS, tracks_content.len() as u64)?;
        io.write_all(&tracks_content)?;

        self.default_duration = track.default_duration_ns.filter(|&d| d > 0);
        self.state = WriterState::Writing;
        debug!(
            "MKV: 写入 EBML header + Segment + Info + Tracks, {}x{}, avcC {} 字节",
            track.pixel_width,
            track.pixel_height,
            track.codec_private.len()
        );
        Ok(())
    }

    /// 写入一帧
    pub fn write_frame(&mut self, io: &mut IoContext, frame: Frame) -> StrandResult<()> {
        if self.state != WriterState::Writing {
            return Err(StrandError::Misuse(
                "MKV: 必须在 write_header 之后、write_trailer 之前写入帧".into(),
            ));
        }

        if self.needs_new_cluster(frame.timestamp) {
            self.close_open_block()?;
            self.flush_cluster(io)?;
            self.start_cluster(frame.timestamp)?;
        }

        let end = frame.end();
        let needs_duration = frame.duration > 0
            && self.default_duration != Some(frame.duration)
            && self.options.simple_block_mode != SimpleBlockMode::AlwaysSimple;
        // 只有时长等于默认值的无参考帧才能 lace, 块内后续帧的时间戳由默认时长推出
        let laceable = self.options.lacing != LacingType::None
            && self.default_duration == Some(frame.duration)
            && frame.past_ref.is_none()
            && frame.forward_ref.is_none();

        let mut joined = None;
        if laceable {
            if let Some(open) = self.open_block.as_mut() {
                if open.next_timestamp == frame.timestamp && open.keyframe == frame.keyframe {
                    let more = open.blob.add_frame_auto(
                        VIDEO_TRACK_NUMBER,
                        frame.timestamp,
                        frame.data.clone(),
                        self.options.lacing,
                        None,
                        None,
                        None,
                        None,
                    );
                    open.next_timestamp = end;
                    joined = Some(more);
                }
            }
        }

        match joined {
            Some(true) => {}
            Some(false) => self.close_open_block()?,
            None => {
                self.close_open_block()?;
                let mut blob = BlockBlob::new(self.options.simple_block_mode);
                let more = blob.add_frame_auto(
                    VIDEO_TRACK_NUMBER,
                    frame.timestamp,
                    frame.data,
                    self.options.lacing,
                    frame.past_ref,
                    frame.forward_ref,
                    None,
                    None,
                );
                if needs_duration {
                    blob.set_block_duration(frame.duration as u64);
                }
                if laceable && more {
                    self.open_block = Some(OpenBlock {
                        blob,
                        keyframe: frame.keyframe,
                        next_timestamp: end,
                    });
                } else {
                    self.register_block(blob, frame.keyframe)?;
                }
            }
        }

        trace!(
            "MKV: 写入帧, type={}, timestamp={}, duration={}, key={}",
            frame.frame_type.as_char(),
            frame.timestamp,
            frame.duration,
            frame.keyframe
        );
        self.max_end = self.max_end.max(end);
        self.num_frames += 1;
        Ok(())
    }

    /// 写出最后一个 Cluster 与 Cues, 回填 Duration 与 Segment 大小
    pub fn write_trailer(&mut self, io: &mut IoContext) -> StrandResult<()> {
        if self.state != WriterState::Writing {
            return Err(StrandError::Misuse(
                "MKV: write_trailer 只能在 write_header 之后调用一次".into(),
            ));
        }
        self.state = WriterState::Finished;

        self.close_open_block()?;
        self.flush_cluster(io)?;
        if self.options.write_cues {
            self.cues.render(io)?;
        }

        if io.is_seekable() {
            let end = io.position()?;
            let scale = self.options.timestamp_scale_ns as f64;
            let duration = self.max_end as f64 / scale;
            io.seek(SeekFrom::Start(self.duration_offset))?;
            io.write_f64_be(duration)?;
            io.seek(SeekFrom::Start(self.segment_size_offset))?;
            io.write_all(&ebml::vint_with_len(end - self.segment_data_start, 8))?;
            io.seek(SeekFrom::Start(end))?;
        }

        debug!(
            "MKV: trailer 完成, {} 帧, {} 个 Cluster, {} 个索引点, duration={}ns",
            self.num_frames,
            self.num_clusters,
            self.cues.points().len(),
            self.max_end
        );
        Ok(())
    }

    /// 当前 Cluster 是否已装不下该时间戳的块
    fn needs_new_cluster(&self, timestamp: i64) -> bool {
        let Some(base) = self.cluster.as_ref().and_then(Cluster::global_timestamp) else {
            return true;
        };
        let elapsed = timestamp - base;
        if elapsed >= self.options.max_cluster_duration_ms * 1_000_000 {
            return true;
        }
        // 相对时间戳必须能放进 16 位
        let relative = elapsed.div_euclid(self.options.timestamp_scale_ns);
        i16::try_from(relative).is_err()
    }

    /// 登记块并链接到当前 Cluster, 关键帧块加入索引
    fn register_block(&mut self, blob: BlockBlob, keyframe: bool) -> StrandResult<()> {
        let handle = self.registry.insert(blob)?;
        let cluster = self
            .cluster
            .as_mut()
            .ok_or_else(|| StrandError::Internal("MKV: 当前没有打开的 Cluster".into()))?;
        cluster.link_block(&self.registry, handle)?;
        if keyframe && self.options.write_cues {
            self.cues.add_block_reference(handle);
        }
        Ok(())
    }

    /// 结束正在 lace 的块
    fn close_open_block(&mut self) -> StrandResult<()> {
        match self.open_block.take() {
            Some(open) => self.register_block(open.blob, open.keyframe),
            None => Ok(()),
        }
    }

    /// 开始新 Cluster
    fn start_cluster(&mut self, timestamp: i64) -> StrandResult<()> {
        let mut cluster = Cluster::new(self.options.timestamp_scale_ns)?;
        cluster.set_global_timestamp(timestamp);
        if let Some(prev) = self.prev_cluster_size {
            cluster.push_element(AuxElement::PrevSize(prev));
        }
        self.cluster = Some(cluster);
        Ok(())
    }

    /// 写出当前 Cluster, 建立索引并释放其中的块
    fn flush_cluster(&mut self, io: &mut IoContext) -> StrandResult<()> {
        let Some(mut cluster) = self.cluster.take() else {
            return Ok(());
        };

        let position = io.position()? - self.segment_data_start;
        let bytes = cluster.render(&self.registry)?;
        io.write_all(&bytes)?;
        self.cues.index_cluster(&cluster, position);

        let handles: Vec<_> = cluster.block_handles().collect();
        for handle in &handles {
            self.registry.remove(handle);
        }
        cluster.delete_non_blocks();

        self.prev_cluster_size = Some(bytes.len() as u64);
        self.num_clusters += 1;
        debug!(
            "MKV: 写出 Cluster, position={}, {} 个块, {} 字节",
            position,
            handles.len(),
            bytes.len()
        );
        Ok(())
    }
}

/// 构建 TrackEntry 内容
fn build_track_entry(track: &VideoTrackInfo) -> Vec<u8> {
    let mut entry = Vec::new();
    ebml::write_uint_element(&mut entry, TRACK_NUMBER, VIDEO_TRACK_NUMBER);
    ebml::write_uint_element(&mut entry, TRACK_UID, VIDEO_TRACK_NUMBER);
    ebml::write_uint_element(&mut entry, TRACK_TYPE, TRACK_TYPE_VIDEO);
    ebml::write_string_element(&mut entry, TRACK_CODEC_ID, CODEC_ID_AVC);
    ebml::write_binary_element(&mut entry, TRACK_CODEC_PRIVATE, &track.codec_private);
    if let Some(duration) = track.default_duration_ns.filter(|&d| d > 0) {
        ebml::write_uint_element(&mut entry, TRACK_DEFAULT_DURATION, duration as u64);
    }

    let mut video = Vec::new();
    ebml::write_uint_element(&mut video, VIDEO_PIXEL_WIDTH, u64::from(track.pixel_width));
    ebml::write_uint_element(&mut video, VIDEO_PIXEL_HEIGHT, u64::from(track.pixel_height));
    if let (Some(width), Some(height)) = (track.display_width, track.display_height) {
        ebml::write_uint_element(&mut video, VIDEO_DISPLAY_WIDTH, u64::from(width));
        ebml::write_uint_element(&mut video, VIDEO_DISPLAY_HEIGHT, u64::from(height));
    }
    ebml::write_master_element(&mut entry, VIDEO_SETTINGS, &video);
    entry
}
