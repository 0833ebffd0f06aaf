//! 帧缓存、显示顺序重排与时间戳分配.
//!
//! 帧按解码顺序进入缓存, 每次 [`Timeline::cleanup`] 处理一批:
//! 1. 按显示顺序键稳定排序 (任一帧缺少键则整批保持解码顺序)
//! 2. 外部时间戳按流位置与帧逐一对齐, 取出的值排序后依显示顺序分配
//! 3. 未匹配到外部时间戳的帧接续前一帧的结束时间
//! 4. 早于上一批最后入队帧的时间戳被抬到该值, 输出跨批次保持不减
//! 5. 计算参考帧时间戳
//! 6. 首批处理必须以关键帧开头, 否则整批丢弃
//! 7. 按时间戳稳定排序后进入输出队列

use std::collections::VecDeque;

use log::{debug, trace};
use strand_core::timestamp::format_timestamp;
use strand_core::{StrandError, StrandResult};

use super::frame::{Frame, FrameType};
use super::stats::{DurationFrequency, ParserStats};

/// H.264 slice_type 语法值个数
const NUM_SLICE_TYPES: usize = 10;

/// NAL 类型个数
const NUM_NALU_TYPES: usize = 32;

/// 外部提供的时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvidedTimestamp {
    /// 时间戳 (纳秒)
    pub timestamp: i64,
    /// 记录时的输入流位置
    pub position: u64,
}

/// 时间戳与显示顺序引擎
#[derive(Debug)]
pub struct Timeline {
    /// 自上次处理以来完成的帧 (解码顺序)
    frames: Vec<Frame>,
    /// 待匹配的外部时间戳, 按记录位置升序
    provided: VecDeque<ProvidedTimestamp>,
    /// 输出队列
    frames_out: VecDeque<Frame>,
    /// 首批处理门限: 生效期间, 不以关键帧开头的批次被整批丢弃
    first_cleanup: bool,
    /// 丢弃模式
    discard_actual_frames: bool,
    /// 已输出帧的最大结束时间
    max_timestamp: i64,
    /// 最近一个入队帧的时间戳
    last_queued_timestamp: Option<i64>,
    /// 跨批次保留的最近一个 I/P 帧开始时间
    previous_i_p_start: Option<i64>,
    stats: ParserStats,
    duration_frequency: DurationFrequency,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// 创建引擎
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            provided: VecDeque::new(),
            frames_out: VecDeque::new(),
            first_cleanup: true,
            discard_actual_frames: false,
            max_timestamp: 0,
            last_queued_timestamp: None,
            previous_i_p_start: None,
            stats: ParserStats::new(NUM_SLICE_TYPES, NUM_NALU_TYPES),
            duration_frequency: DurationFrequency::new(),
        }
    }

    /// 记录外部时间戳及其对应的输入流位置
    pub fn add_timestamp(&mut self, timestamp: i64, position: u64) {
        trace!(
            "记录外部时间戳 {} @ {}",
            format_timestamp(timestamp),
            position
        );
        self.stats.num_timestamps_in += 1;
        self.provided.push_back(ProvidedTimestamp {
            timestamp,
            position,
        });
    }

    /// 加入一个完成组装的帧
    pub fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// 缓存中尚未处理的帧数
    pub fn num_buffered_frames(&self) -> usize {
        self.frames.len()
    }

    /// 尚未匹配的外部时间戳数
    pub fn num_pending_timestamps(&self) -> usize {
        self.provided.len()
    }

    /// 切换丢弃模式
    pub fn discard_actual_frames(&mut self, discard: bool) {
        self.discard_actual_frames = discard;
    }

    /// 是否处于丢弃模式
    pub fn is_discarding(&self) -> bool {
        self.discard_actual_frames
    }

    /// 输出队列是否非空
    pub fn frame_available(&self) -> bool {
        !self.frames_out.is_empty()
    }

    /// 输出队列长度
    pub fn num_frames_available(&self) -> usize {
        self.frames_out.len()
    }

    /// 取出下一帧, 队列为空属于调用方误用
    pub fn get_frame(&mut self) -> StrandResult<Frame> {
        self.frames_out
            .pop_front()
            .ok_or_else(|| StrandError::Misuse("输出队列为空时调用 get_frame".into()))
    }

    /// 已输出帧的最大结束时间
    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp
    }

    /// 统计
    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    /// 可变统计, 供帧组装器记录切片与 NAL 计数
    pub fn stats_mut(&mut self) -> &mut ParserStats {
        &mut self.stats
    }

    /// 帧时长直方图
    pub fn duration_frequency(&self) -> &DurationFrequency {
        &self.duration_frequency
    }

    /// 最常用的帧时长
    pub fn most_often_used_duration(&self) -> i64 {
        self.duration_frequency.most_often_used_duration()
    }

    /// 处理缓存中的全部帧, `duration_for` 给出每帧时长
    pub fn cleanup(&mut self, duration_for: impl Fn(&Frame) -> i64) {
        if self.frames.is_empty() {
            return;
        }

        if self.discard_actual_frames {
            let num_frames = self.frames.len() as u64;
            let num_timestamps = self.provided.len() as u64;
            debug!(
                "丢弃模式: 丢弃 {} 帧与 {} 个外部时间戳",
                num_frames, num_timestamps
            );
            self.stats.num_frames_discarded += num_frames;
            self.stats.num_timestamps_discarded += num_timestamps;
            self.frames.clear();
            self.provided.clear();
            return;
        }

        let mut frames = std::mem::take(&mut self.frames);
        frames.sort_by_key(|f| f.position);

        let mut provided_values = self.match_provided_timestamps(&mut frames);
        provided_values.sort_unstable();

        let has_picture_order = frames.iter().all(|f| f.picture_order.is_some());
        if has_picture_order {
            frames.sort_by_key(|f| f.picture_order);
        } else {
            trace!("批次中存在无显示顺序键的帧, 保持解码顺序");
        }

        self.assign_timestamps(&mut frames, provided_values, &duration_for);
        self.assign_references(&mut frames);

        if self.first_cleanup {
            let leading_keyframe = frames
                .iter()
                .min_by_key(|f| f.position)
                .is_some_and(|f| f.keyframe);
            if !leading_keyframe {
                debug!("首个关键帧之前的批次被整批丢弃, 帧数={}", frames.len());
                self.stats.num_frames_discarded += frames.len() as u64;
                return;
            }
            self.first_cleanup = false;
        }

        frames.sort_by_key(|f| f.timestamp);
        if let Some(last) = frames.last() {
            self.last_queued_timestamp = Some(last.timestamp);
        }
        if let Some(end) = frames.iter().map(Frame::end).max() {
            self.max_timestamp = self.max_timestamp.max(end);
        }

        debug!(
            "批次处理完成: {} 帧, 类型序列 {}",
            frames.len(),
            frames.iter().map(|f| f.frame_type.as_char()).collect::<String>()
        );
        self.stats.num_frames_out += frames.len() as u64;
        self.frames_out.extend(frames);
    }

    /// 按流位置将外部时间戳与帧 (解码顺序) 逐一对齐
    ///
    /// 对每帧消费全部记录位置不晚于其位置的条目, 采用最后一个.
    fn match_provided_timestamps(&mut self, frames: &mut [Frame]) -> Vec<i64> {
        let mut values = Vec::new();

        for frame in frames.iter_mut() {
            if self.provided.is_empty() {
                break;
            }
            let mut matched = None;
            while let Some(entry) = self.provided.front() {
                if entry.position > frame.position {
                    break;
                }
                matched = Some(entry.timestamp);
                self.provided.pop_front();
            }
            if let Some(timestamp) = matched {
                frame.has_provided_timestamp = true;
                values.push(timestamp);
            }
        }

        values
    }

    /// 按显示顺序分配时间戳与时长
    fn assign_timestamps(
        &mut self,
        frames: &mut [Frame],
        provided_values: Vec<i64>,
        duration_for: &impl Fn(&Frame) -> i64,
    ) {
        let mut provided_values = provided_values.into_iter();
        let mut previous_end = self.max_timestamp;
        let mut previous_provided_start: Option<i64> = None;

        for frame in frames.iter_mut() {
            frame.duration = duration_for(frame);

            let provided = if frame.has_provided_timestamp {
                provided_values.next()
            } else {
                None
            };
            match provided {
                Some(timestamp) => {
                    frame.timestamp = timestamp;
                    self.stats.num_timestamps_used += 1;
                    if let Some(prev) = previous_provided_start {
                        if timestamp > prev {
                            self.duration_frequency.record(timestamp - prev);
                        }
                    }
                    previous_provided_start = Some(timestamp);
                }
                None => {
                    frame.has_provided_timestamp = false;
                    frame.timestamp = previous_end;
                    self.stats.num_timestamps_generated += 1;
                }
            }
            if let Some(floor) = self.last_queued_timestamp {
                if frame.timestamp < floor {
                    debug!(
                        "时间戳 {} 早于已入队帧 {}, 调整为后者",
                        format_timestamp(frame.timestamp),
                        format_timestamp(floor)
                    );
                    frame.timestamp = floor;
                }
            }
            previous_end = frame.end();
        }
    }

    /// 按显示顺序计算参考帧时间戳
    fn assign_references(&mut self, frames: &mut [Frame]) {
        let i_p_starts: Vec<Option<i64>> = frames
            .iter()
            .map(|f| (f.frame_type != FrameType::B).then_some(f.timestamp))
            .collect();

        for idx in 0..frames.len() {
            let frame = &mut frames[idx];
            if frame.keyframe {
                frame.past_ref = None;
                frame.forward_ref = None;
                self.previous_i_p_start = Some(frame.timestamp);
                continue;
            }

            frame.past_ref = self.previous_i_p_start;
            if frame.frame_type == FrameType::B {
                frame.forward_ref = i_p_starts[idx + 1..].iter().flatten().next().copied();
            } else {
                frame.forward_ref = None;
                self.previous_i_p_start = Some(frame.timestamp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::es::frame::PictureOrder;

    const D: i64 = 40_000_000;

    fn frame(position: u64, frame_type: FrameType, keyframe: bool) -> Frame {
        Frame::new(Bytes::from_static(b"\x00\x00\x00\x01\x65"), position, frame_type, keyframe)
    }

    fn ordered(position: u64, frame_type: FrameType, keyframe: bool, poc: i64) -> Frame {
        let mut f = frame(position, frame_type, keyframe);
        f.picture_order = Some(PictureOrder { group: 1, poc });
        f
    }

    fn drain(timeline: &mut Timeline) -> Vec<Frame> {
        let mut out = Vec::new();
        while timeline.frame_available() {
            out.push(timeline.get_frame().unwrap());
        }
        out
    }

    #[test]
    fn test_cleanup_empty_is_noop() {
        let mut timeline = Timeline::new();
        timeline.cleanup(|_| D);
        assert!(!timeline.frame_available());
        assert_eq!(timeline.stats().num_frames_discarded, 0);
    }

    #[test]
    fn test_get_frame_on_empty_queue_is_misuse() {
        let mut timeline = Timeline::new();
        let err = timeline.get_frame().expect_err("空队列应返回错误");
        assert!(err.is_misuse());
    }

    #[test]
    fn test_generated_timestamps_follow_durations() {
        let mut timeline = Timeline::new();
        timeline.add_frame(frame(0, FrameType::I, true));
        timeline.add_frame(frame(100, FrameType::P, false));
        timeline.add_frame(frame(200, FrameType::P, false));
        timeline.cleanup(|_| D);

        let out = drain(&mut timeline);
        let timestamps: Vec<i64> = out.iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![0, D, 2 * D]);
        assert_eq!(out[1].past_ref, Some(0));
        assert_eq!(out[2].past_ref_distance(), Some(D));
        assert_eq!(timeline.max_timestamp(), 3 * D);
        assert_eq!(timeline.stats().num_timestamps_generated, 3);
    }

    #[test]
    fn test_reorder_b_frames_to_presentation_order() {
        // 解码顺序 I P B B, 显示顺序 I B B P
        let mut timeline = Timeline::new();
        timeline.add_frame(ordered(0, FrameType::I, true, 0));
        timeline.add_frame(ordered(100, FrameType::P, false, 6));
        timeline.add_frame(ordered(200, FrameType::B, false, 2));
        timeline.add_frame(ordered(300, FrameType::B, false, 4));
        timeline.cleanup(|_| D);

        let out = drain(&mut timeline);
        let positions: Vec<u64> = out.iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![0, 200, 300, 100]);
        let timestamps: Vec<i64> = out.iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![0, D, 2 * D, 3 * D]);

        let first_b = &out[1];
        assert_eq!(first_b.past_ref, Some(0));
        assert_eq!(first_b.forward_ref, Some(3 * D), "B 帧前向参考为其后的 P 帧");
        assert_eq!(out[3].past_ref, Some(0), "P 帧参考前一个 I/P 帧");
    }

    #[test]
    fn test_missing_picture_order_keeps_decode_order() {
        let mut timeline = Timeline::new();
        timeline.add_frame(ordered(0, FrameType::I, true, 0));
        timeline.add_frame(frame(100, FrameType::P, false));
        timeline.add_frame(ordered(200, FrameType::B, false, 2));
        timeline.cleanup(|_| D);
        let positions: Vec<u64> = drain(&mut timeline).iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![0, 100, 200]);
    }

    #[test]
    fn test_provided_timestamps_sorted_into_presentation_order() {
        // 外部时间戳按解码顺序给出 (DTS 风格), 重排后应变为单调
        let mut timeline = Timeline::new();
        let frames = [
            ordered(0, FrameType::I, true, 0),
            ordered(100, FrameType::P, false, 6),
            ordered(200, FrameType::B, false, 2),
            ordered(300, FrameType::B, false, 4),
        ];
        for (i, f) in frames.into_iter().enumerate() {
            timeline.add_timestamp(i as i64 * D, f.position);
            timeline.add_frame(f);
        }
        timeline.cleanup(|_| D);

        let out = drain(&mut timeline);
        assert!(out.iter().all(|f| f.has_provided_timestamp));
        let timestamps: Vec<i64> = out.iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![0, D, 2 * D, 3 * D]);
        assert_eq!(out[3].position, 100);
        assert_eq!(timeline.num_pending_timestamps(), 0);
        assert_eq!(timeline.stats().num_timestamps_used, 4);
        assert_eq!(timeline.most_often_used_duration(), D);
    }

    #[test]
    fn test_latest_entry_wins_and_entries_never_reused() {
        let mut timeline = Timeline::new();
        timeline.add_timestamp(1_000, 0);
        timeline.add_timestamp(5_000_000, 0);
        timeline.add_frame(frame(10, FrameType::I, true));
        timeline.add_frame(frame(20, FrameType::P, false));
        timeline.add_timestamp(90_000_000, 30);
        timeline.cleanup(|_| D);

        let out = drain(&mut timeline);
        assert_eq!(out[0].timestamp, 5_000_000, "同一帧之前的多个条目取最后一个");
        assert!(!out[1].has_provided_timestamp);
        assert_eq!(out[1].timestamp, 5_000_000 + D);
        assert_eq!(timeline.num_pending_timestamps(), 1, "位置在后的条目保留");

        timeline.add_frame(frame(30, FrameType::P, false));
        timeline.cleanup(|_| D);
        let out = drain(&mut timeline);
        assert_eq!(out[0].timestamp, 90_000_000);
        assert_eq!(timeline.num_pending_timestamps(), 0);
    }

    #[test]
    fn test_leading_non_keyframe_batch_discarded_entirely() {
        let mut timeline = Timeline::new();
        timeline.add_frame(frame(0, FrameType::P, false));
        timeline.add_frame(frame(10, FrameType::P, false));
        timeline.add_frame(frame(20, FrameType::I, true));
        timeline.add_frame(frame(30, FrameType::P, false));
        timeline.cleanup(|_| D);

        assert!(!timeline.frame_available());
        assert_eq!(timeline.stats().num_frames_discarded, 4);

        // 门限仍然生效, 下一批以关键帧开头才会输出
        timeline.add_frame(frame(40, FrameType::I, true));
        timeline.add_frame(frame(50, FrameType::P, false));
        timeline.cleanup(|_| D);
        assert_eq!(drain(&mut timeline).len(), 2);

        // 门限已解除
        timeline.add_frame(frame(60, FrameType::P, false));
        timeline.cleanup(|_| D);
        assert_eq!(drain(&mut timeline).len(), 1);
        assert_eq!(timeline.stats().num_frames_discarded, 4);
    }

    #[test]
    fn test_discard_mode_drops_frames_and_timestamps() {
        let mut timeline = Timeline::new();
        timeline.discard_actual_frames(true);
        timeline.add_timestamp(0, 0);
        timeline.add_timestamp(D, 10);
        timeline.add_frame(frame(0, FrameType::I, true));
        timeline.add_frame(frame(10, FrameType::P, false));
        timeline.cleanup(|_| D);

        assert!(!timeline.frame_available());
        assert_eq!(timeline.num_buffered_frames(), 0);
        assert_eq!(timeline.num_pending_timestamps(), 0);
        assert_eq!(timeline.stats().num_frames_discarded, 2);
        assert_eq!(timeline.stats().num_timestamps_discarded, 2);
    }

    #[test]
    fn test_output_non_decreasing_across_batches() {
        let mut timeline = Timeline::new();
        let mut position = 0;
        for batch in 0..3i64 {
            timeline.add_frame(ordered(position, FrameType::I, true, 0));
            timeline.add_frame(ordered(position + 1, FrameType::P, false, 4));
            timeline.add_frame(ordered(position + 2, FrameType::B, false, 2));
            position += 10;
            timeline.cleanup(|f| (if f.is_b_frame() { D / 2 } else { D }) + batch);
        }
        let out = drain(&mut timeline);
        assert_eq!(out.len(), 9);
        assert!(out.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_provided_timestamp_behind_previous_batch_is_raised() {
        let mut timeline = Timeline::new();
        timeline.add_timestamp(0, 0);
        timeline.add_frame(frame(0, FrameType::I, true));
        for position in [10, 20, 30] {
            timeline.add_frame(frame(position, FrameType::P, false));
        }
        timeline.cleanup(|_| D);

        timeline.add_timestamp(50_000_000, 40);
        timeline.add_frame(frame(40, FrameType::I, true));
        timeline.add_frame(frame(50, FrameType::P, false));
        timeline.cleanup(|_| D);

        let out = drain(&mut timeline);
        let timestamps: Vec<i64> = out.iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![0, D, 2 * D, 3 * D, 3 * D, 4 * D]);
        assert!(out[4].has_provided_timestamp);
        assert_eq!(out[5].past_ref, Some(3 * D), "参考时间戳使用调整后的值");
    }
}
