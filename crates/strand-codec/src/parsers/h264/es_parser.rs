//! H.264 基本流帧组装器.
//!
//! 输入 Annex B 字节流 (或长度前缀的 NAL 序列) 与可选的外部时间戳,
//! 输出带长度前缀的完整帧, 帧按显示时间戳非递减顺序取出.
//!
//! # 帧边界
//!
//! - 切片头字段表明新图像开始 (7.4.1.2.4)
//! - AUD / 序列结束 / 流结束 / SPS / PPS / SEI 等非 VCL 单元
//! - 互补场对的第二场并入第一场所在的帧
//!
//! # 批处理边界
//!
//! 新的 IDR 帧到达且缓存非空, 缓存帧数达到上限, 或流结束.

use std::mem;

use bytes::Bytes;
use log::{debug, trace, warn};
use strand_core::{Rational, StrandError, StrandResult};

use super::nal::{NalUnit, NalUnitType, build_avcc_config, nalu_type_name, write_length_prefixed};
use super::pps::{ParameterSets, parse_pps};
use super::slice::{SliceHeader, parse_slice_header};
use super::sps::parse_sps;
use crate::es::config::{DEFAULT_FRAME_DURATION_NS, validate_nalu_size_length};
use crate::es::{
    EsParserConfig, Frame, FrameType, ParserStats, PictureOrder, PictureStructure, Timeline,
};
use crate::parsers::annex_b::{NalScanner, ScannedNal, split_length_prefixed};

/// 正在组装的帧
struct IncompleteFrame {
    data: Vec<u8>,
    position: u64,
    first: SliceHeader,
    last: SliceHeader,
    structure: PictureStructure,
    /// 有 NAL 单元没能写入, 整帧作废
    broken: bool,
}

/// POC type 0 的解码状态 (8.2.1.1)
#[derive(Debug, Default)]
struct PocState {
    group: u64,
    prev_msb: i64,
    prev_lsb: i64,
}

/// H.264 基本流解析器
pub struct H264EsParser {
    config: EsParserConfig,
    scanner: NalScanner,
    /// 累计输入字节数
    stream_position: u64,
    params: ParameterSets,
    timeline: Timeline,
    incomplete: Option<IncompleteFrame>,
    /// 等待并入下一帧的非 VCL 单元
    pending_nalus: Vec<NalUnit>,
    /// 参数集齐全之前收到的切片
    unhandled: Vec<NalUnit>,
    poc: PocState,
    /// 当前批次使用的 SPS
    batch_sps_id: Option<u32>,
    /// 当前批次退化为解码顺序
    simple_picture_order: bool,
    decode_counter: u64,
    width: Option<u32>,
    height: Option<u32>,
    par: Option<Rational>,
    stream_default_duration: Option<i64>,
    configuration_record_ready: bool,
    configuration_record_changed: bool,
}

impl Default for H264EsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl H264EsParser {
    /// 使用默认配置创建解析器
    pub fn new() -> Self {
        Self::build(EsParserConfig::default())
    }

    /// 使用指定配置创建解析器
    pub fn with_config(config: EsParserConfig) -> StrandResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EsParserConfig) -> Self {
        Self {
            config,
            scanner: NalScanner::new(),
            stream_position: 0,
            params: ParameterSets::new(),
            timeline: Timeline::new(),
            incomplete: None,
            pending_nalus: Vec::new(),
            unhandled: Vec::new(),
            poc: PocState::default(),
            batch_sps_id: None,
            simple_picture_order: false,
            decode_counter: 0,
            width: None,
            height: None,
            par: None,
            stream_default_duration: None,
            configuration_record_ready: false,
            configuration_record_changed: false,
        }
    }

    /// NAL 类型编号对应的名称
    pub const fn nalu_type_name(type_id: u8) -> &'static str {
        nalu_type_name(type_id)
    }

    // ========================
    // 配置
    // ========================

    /// 当前配置
    pub fn config(&self) -> &EsParserConfig {
        &self.config
    }

    /// 设置输出帧的 NAL 长度前缀字节数
    pub fn set_nalu_size_length(&mut self, len: usize) -> StrandResult<()> {
        validate_nalu_size_length(len)?;
        self.config.nalu_size_length = len;
        Ok(())
    }

    /// 是否采用码流中的像素宽高比
    pub fn set_keep_ar_info(&mut self, keep: bool) {
        self.config.keep_ar_info = keep;
    }

    /// 强制帧时长
    pub fn force_default_duration(&mut self, duration: i64) {
        self.config.forced_default_duration = Some(duration);
    }

    /// 是否强制了帧时长
    pub fn is_default_duration_forced(&self) -> bool {
        self.config.forced_default_duration.is_some()
    }

    /// 设置容器给出的帧时长
    pub fn set_container_default_duration(&mut self, duration: i64) {
        self.config.container_default_duration = Some(duration);
    }

    /// 非 IDR 的 I 帧是否视为关键帧
    pub fn set_all_i_slices_are_key_frames(&mut self, enable: bool) {
        self.config.all_i_slices_are_key_frames = enable;
    }

    /// 切换丢弃模式: 之后处理的批次全部丢弃
    pub fn discard_actual_frames(&mut self, discard: bool) {
        self.timeline.discard_actual_frames(discard);
    }

    // ========================
    // 输入
    // ========================

    /// 记录外部时间戳, 对应紧接着输入的字节
    pub fn add_timestamp(&mut self, timestamp: i64) {
        self.timeline.add_timestamp(timestamp, self.stream_position);
    }

    /// 输入 Annex B 字节流
    pub fn add_bytes(&mut self, data: &[u8]) {
        self.stream_position += data.len() as u64;
        for unit in self.scanner.add_bytes(data) {
            self.handle_scanned(unit);
        }
    }

    /// 输入长度前缀的 NAL 序列
    pub fn add_bytes_framed(&mut self, data: &[u8], length_size: usize) -> StrandResult<()> {
        let units = split_length_prefixed(data, length_size, self.stream_position)?;
        self.stream_position += data.len() as u64;
        for unit in units {
            self.handle_scanned(unit);
        }
        Ok(())
    }

    /// 流结束: 输出全部剩余帧
    pub fn flush(&mut self) {
        if let Some(unit) = self.scanner.flush() {
            self.handle_scanned(unit);
        }

        for nal in mem::take(&mut self.unhandled) {
            if self.params.is_complete() {
                self.handle_slice(nal);
            } else {
                debug!(
                    "H.264: 流结束时仍缺少参数集, 丢弃切片, position={}",
                    nal.position
                );
                self.timeline.stats_mut().num_unparsable_nalus += 1;
            }
        }

        self.flush_incomplete_frame();
        self.cleanup();
        debug!("H.264: 解析结束, {}", self.timeline.stats());
    }

    // ========================
    // 输出
    // ========================

    /// 输出队列是否非空
    pub fn frame_available(&self) -> bool {
        self.timeline.frame_available()
    }

    /// 取出下一帧, 队列为空时返回 [`StrandError::Misuse`]
    pub fn get_frame(&mut self) -> StrandResult<Frame> {
        self.timeline.get_frame()
    }

    /// 输出队列长度
    pub fn num_frames_available(&self) -> usize {
        self.timeline.num_frames_available()
    }

    /// 最常用的帧时长
    pub fn most_often_used_duration(&self) -> i64 {
        self.timeline.most_often_used_duration()
    }

    /// 被丢弃的帧数
    pub fn num_skipped_frames(&self) -> u64 {
        self.timeline.stats().num_frames_discarded
    }

    /// 解析统计
    pub fn stats(&self) -> &ParserStats {
        self.timeline.stats()
    }

    // ========================
    // 配置记录
    // ========================

    /// 图像宽度 (像素)
    pub fn width(&self) -> Option<u32> {
        self.width
    }

    /// 图像高度 (像素)
    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// SPS 与 PPS 均已收到
    pub fn is_configuration_record_ready(&self) -> bool {
        self.configuration_record_ready
    }

    /// 配置记录在就绪后是否发生过变化
    pub fn configuration_record_changed(&self) -> bool {
        self.configuration_record_changed
    }

    /// 清除配置记录变化标志
    pub fn clear_configuration_record_changed(&mut self) {
        self.configuration_record_changed = false;
    }

    /// AVCDecoderConfigurationRecord
    pub fn configuration_record(&self) -> StrandResult<Vec<u8>> {
        self.ensure_ready("configuration_record")?;
        build_avcc_config(
            &self.params.raw_sps_list(),
            &self.params.raw_pps_list(),
            self.config.nalu_size_length,
        )
    }

    /// 码流 timing_info 给出的帧时长
    pub fn stream_default_duration(&self) -> Option<i64> {
        self.stream_default_duration
    }

    /// 实际使用的帧时长: 强制值 > 码流 > 容器 > 40ms
    pub fn default_duration(&self) -> i64 {
        self.config
            .forced_default_duration
            .or(self.stream_default_duration)
            .or(self.config.container_default_duration)
            .unwrap_or(DEFAULT_FRAME_DURATION_NS)
    }

    /// 码流中是否给出了像素宽高比
    pub fn has_par_been_found(&self) -> StrandResult<bool> {
        self.ensure_ready("has_par_been_found")?;
        Ok(self.par.is_some())
    }

    /// 像素宽高比
    pub fn par(&self) -> StrandResult<Rational> {
        self.ensure_ready("par")?;
        self.par
            .ok_or_else(|| StrandError::Misuse("码流中未给出像素宽高比".into()))
    }

    /// 按像素宽高比计算显示尺寸
    ///
    /// PAR >= 1 时拉伸宽度, 否则拉伸高度. 未指定的尺寸取码流中的值.
    pub fn display_dimensions(
        &self,
        width: Option<u32>,
        height: Option<u32>,
    ) -> StrandResult<(u32, u32)> {
        let par = self.par()?;
        let width = width
            .or(self.width)
            .ok_or_else(|| StrandError::Misuse("图像宽度未知".into()))?;
        let height = height
            .or(self.height)
            .ok_or_else(|| StrandError::Misuse("图像高度未知".into()))?;

        let (display_width, display_height) = if par >= Rational::ONE {
            (par.scale_rounded(i64::from(width)), i64::from(height))
        } else {
            (i64::from(width), par.unscale_rounded(i64::from(height)))
        };
        let to_u32 = |v: i64| {
            u32::try_from(v)
                .map_err(|_| StrandError::InvalidData(format!("显示尺寸超出范围, value={}", v)))
        };
        Ok((to_u32(display_width)?, to_u32(display_height)?))
    }

    fn ensure_ready(&self, operation: &str) -> StrandResult<()> {
        if self.configuration_record_ready {
            Ok(())
        } else {
            Err(StrandError::Misuse(format!(
                "配置记录就绪之前调用了 {}",
                operation
            )))
        }
    }

    // ============================================================
    // NAL 处理
    // ============================================================

    fn handle_scanned(&mut self, unit: ScannedNal) {
        match NalUnit::try_from(unit) {
            Ok(nal) => self.handle_nalu(nal),
            Err(err) => {
                debug!("H.264: 丢弃非法 NAL 单元, err={}", err);
                self.timeline.stats_mut().num_unparsable_nalus += 1;
            }
        }
    }

    fn handle_nalu(&mut self, nal: NalUnit) {
        self.timeline.stats_mut().count_nalu(nal.nal_type.type_id());
        trace!(
            "H.264: NAL {} ({}), len={}, position={}",
            nal.nal_type.type_id(),
            nal.nal_type,
            nal.data.len(),
            nal.position
        );

        match nal.nal_type {
            NalUnitType::Slice | NalUnitType::SliceIdr => self.handle_slice(nal),
            NalUnitType::SliceDpa | NalUnitType::SliceDpb | NalUnitType::SliceDpc => {
                self.handle_partition(nal)
            }
            NalUnitType::Sps => {
                self.flush_incomplete_frame();
                self.handle_sps(nal);
            }
            NalUnitType::Pps => {
                self.flush_incomplete_frame();
                self.handle_pps(nal);
            }
            NalUnitType::Aud | NalUnitType::EndOfSequence | NalUnitType::EndOfStream => {
                self.flush_incomplete_frame();
            }
            NalUnitType::FillerData => {}
            _ => {
                self.flush_incomplete_frame();
                self.pending_nalus.push(nal);
            }
        }
    }

    fn handle_sps(&mut self, nal: NalUnit) {
        let sps = match parse_sps(&nal.rbsp()) {
            Ok(sps) => sps,
            Err(err) => {
                debug!("H.264: SPS 解析失败, position={}, err={}", nal.position, err);
                self.timeline.stats_mut().num_unparsable_nalus += 1;
                return;
            }
        };

        let par = (self.config.keep_ar_info && sps.ar_found).then(|| sps.sar.reduce());
        let (width, height) = (sps.width, sps.height);
        if let Some(duration) = sps.default_duration_ns() {
            self.stream_default_duration = Some(duration);
        }
        debug!(
            "H.264: SPS id={}, {}x{}, profile={}, level={}, poc_type={}, sar={}",
            sps.sps_id, sps.width, sps.height, sps.profile_idc, sps.level_idc, sps.poc_type, sps.sar
        );

        let changed = self.params.insert_sps(sps, nal.data.clone());
        if changed && self.configuration_record_ready {
            debug!("H.264: SPS 内容变化, 随下一帧内联输出");
            self.configuration_record_changed = true;
            self.pending_nalus.push(nal);
        }

        self.update_geometry(width, height, par);
        self.check_configuration_ready();
    }

    fn handle_pps(&mut self, nal: NalUnit) {
        let pps = match parse_pps(&nal.rbsp()) {
            Ok(pps) => pps,
            Err(err) => {
                debug!("H.264: PPS 解析失败, position={}, err={}", nal.position, err);
                self.timeline.stats_mut().num_unparsable_nalus += 1;
                return;
            }
        };

        let changed = self.params.insert_pps(pps, nal.data.clone());
        if changed && self.configuration_record_ready {
            debug!("H.264: PPS 内容变化, 随下一帧内联输出");
            self.configuration_record_changed = true;
            self.pending_nalus.push(nal);
        }

        self.check_configuration_ready();
    }

    fn update_geometry(&mut self, width: u32, height: u32, par: Option<Rational>) {
        let previous = (self.width, self.height, self.par);
        self.width = Some(width);
        self.height = Some(height);
        // 新 SPS 未给出宽高比时不沿用旧值
        self.par = par;
        if previous.0.is_some() && previous != (self.width, self.height, self.par) {
            debug!(
                "H.264: 几何参数变化, {:?}x{:?} → {}x{}, par={:?}",
                previous.0, previous.1, width, height, self.par
            );
            self.configuration_record_changed = true;
        }
    }

    fn check_configuration_ready(&mut self) {
        if self.configuration_record_ready || !self.params.is_complete() {
            return;
        }
        self.configuration_record_ready = true;
        debug!(
            "H.264: 参数集齐全, 重新处理 {} 个暂存切片",
            self.unhandled.len()
        );
        for nal in mem::take(&mut self.unhandled) {
            self.handle_slice(nal);
        }
    }

    fn handle_slice(&mut self, nal: NalUnit) {
        if !self.params.is_complete() {
            trace!("H.264: 参数集未齐全, 暂存切片, position={}", nal.position);
            self.unhandled.push(nal);
            return;
        }

        let header = match parse_slice_header(&nal, &self.params) {
            Ok(header) => header,
            Err(err) => {
                debug!(
                    "H.264: 切片头解析失败, 丢弃, position={}, err={}",
                    nal.position, err
                );
                self.timeline.stats_mut().num_unparsable_nalus += 1;
                return;
            }
        };
        self.timeline
            .stats_mut()
            .count_slice(header.raw_slice_type, header.field_pic);

        let nalu_size_length = self.config.nalu_size_length;
        if let Some(incomplete) = self.incomplete.as_mut() {
            let same_picture = !header.starts_new_picture(&incomplete.last);
            let second_field = !same_picture
                && incomplete.structure == PictureStructure::Field
                && header.completes_field_pair(&incomplete.last);
            if same_picture || second_field {
                if second_field {
                    incomplete.structure = PictureStructure::FieldPair;
                }
                if let Err(err) =
                    write_length_prefixed(&mut incomplete.data, &nal.data, nalu_size_length)
                {
                    warn!("H.264: 切片无法写入帧, 整帧丢弃, err={}", err);
                    incomplete.broken = true;
                }
                incomplete.last = header;
                return;
            }
            self.flush_incomplete_frame();
        }

        self.start_frame(nal, header);
    }

    fn handle_partition(&mut self, nal: NalUnit) {
        let nalu_size_length = self.config.nalu_size_length;
        match self.incomplete.as_mut() {
            Some(incomplete) => {
                if let Err(err) =
                    write_length_prefixed(&mut incomplete.data, &nal.data, nalu_size_length)
                {
                    warn!("H.264: 数据分区无法写入帧, 整帧丢弃, err={}", err);
                    incomplete.broken = true;
                }
            }
            None => {
                debug!("H.264: 数据分区之前没有切片, 丢弃, position={}", nal.position);
                self.timeline.stats_mut().num_unparsable_nalus += 1;
            }
        }
    }

    fn start_frame(&mut self, nal: NalUnit, header: SliceHeader) {
        if header.is_idr() && self.timeline.num_buffered_frames() > 0 {
            self.cleanup();
        }

        let pending = mem::take(&mut self.pending_nalus);
        let position = pending.first().map_or(nal.position, |first| first.position);
        let mut data = Vec::with_capacity(nal.data.len() + 64);
        let mut broken = false;
        for unit in pending.iter().chain(std::iter::once(&nal)) {
            if let Err(err) =
                write_length_prefixed(&mut data, &unit.data, self.config.nalu_size_length)
            {
                warn!("H.264: NAL {} 无法写入帧, 整帧丢弃, err={}", unit.nal_type, err);
                broken = true;
            }
        }

        let structure = if header.field_pic {
            PictureStructure::Field
        } else {
            PictureStructure::Frame
        };
        self.incomplete = Some(IncompleteFrame {
            data,
            position,
            first: header.clone(),
            last: header,
            structure,
            broken,
        });
    }

    fn flush_incomplete_frame(&mut self) {
        let Some(incomplete) = self.incomplete.take() else {
            return;
        };
        if incomplete.broken {
            warn!(
                "H.264: 帧缺少 NAL 单元, 不输出, position={}, 长度前缀字节数={}",
                incomplete.position, self.config.nalu_size_length
            );
            self.timeline.stats_mut().num_frames_discarded += 1;
            return;
        }

        let frame_type = incomplete.first.slice_type.frame_type();
        let keyframe = incomplete.first.is_idr()
            || (self.config.all_i_slices_are_key_frames && frame_type == FrameType::I);

        let mut frame = Frame::new(
            Bytes::from(incomplete.data),
            incomplete.position,
            frame_type,
            keyframe,
        );
        frame.decode_order = self.decode_counter;
        frame.structure = incomplete.structure;
        frame.picture_order = self.picture_order(&incomplete.first);
        self.decode_counter += 1;

        trace!(
            "H.264: 帧 #{} 完成, 类型={}, 关键帧={}, 结构={:?}, position={}, 顺序键={:?}",
            frame.decode_order,
            frame.frame_type.as_char(),
            frame.keyframe,
            frame.structure,
            frame.position,
            frame.picture_order
        );
        self.timeline.add_frame(frame);

        if self.timeline.num_buffered_frames() >= self.config.max_buffered_frames {
            self.cleanup();
        }
    }

    /// 计算显示顺序键 (POC type 0), 其他情况返回 None
    fn picture_order(&mut self, first: &SliceHeader) -> Option<PictureOrder> {
        if self.batch_sps_id.is_some_and(|id| id != first.sps_id) {
            debug!("H.264: 批次内 SPS 切换, 该批次保持解码顺序");
            self.simple_picture_order = true;
        }
        self.batch_sps_id = Some(first.sps_id);

        if first.is_idr() {
            self.poc = PocState {
                group: self.poc.group + 1,
                prev_msb: 0,
                prev_lsb: 0,
            };
        }

        let (poc_type, max_lsb) = {
            let sps = self.params.sps(first.sps_id)?;
            (sps.poc_type, sps.max_poc_lsb())
        };
        if poc_type != 0 || self.simple_picture_order {
            return None;
        }

        let lsb = i64::from(first.pic_order_cnt_lsb);
        let (prev_msb, prev_lsb) = (self.poc.prev_msb, self.poc.prev_lsb);
        let msb = if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
            prev_msb + max_lsb
        } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
            prev_msb - max_lsb
        } else {
            prev_msb
        };
        if first.is_reference() {
            self.poc.prev_msb = msb;
            self.poc.prev_lsb = lsb;
        }

        Some(PictureOrder {
            group: self.poc.group,
            poc: msb + lsb,
        })
    }

    fn cleanup(&mut self) {
        let duration = self.default_duration();
        self.timeline.cleanup(|frame| match frame.structure {
            PictureStructure::Field => duration / 2,
            PictureStructure::Frame | PictureStructure::FieldPair => duration,
        });
        self.batch_sps_id = None;
        self.simple_picture_order = false;
    }
}
