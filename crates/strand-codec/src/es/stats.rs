//! 解析统计与帧时长直方图.

use std::fmt;

use log::debug;

/// 无任何时长记录时的默认值 (25 fps)
const FALLBACK_DURATION_NS: i64 = 40_000_000;

/// 吸附阈值: 与常见帧时长相差小于该值时取常见值
const SNAP_THRESHOLD_NS: i64 = 20_000;

/// 常见帧时长: 50, 25, 60, 30, 47.952, 23.976, 59.94, 29.97 fps
const COMMON_DEFAULT_DURATIONS: [i64; 8] = [
    1_000_000_000 / 50,
    1_000_000_000 / 25,
    1_000_000_000 / 60,
    1_000_000_000 / 30,
    1_001_000_000_000 / 48_000,
    1_001_000_000_000 / 24_000,
    1_001_000_000_000 / 60_000,
    1_001_000_000_000 / 30_000,
];

/// 帧时长出现次数表, 保持首次插入顺序
#[derive(Debug, Clone, Default)]
pub struct DurationFrequency {
    entries: Vec<(i64, u64)>,
}

impl DurationFrequency {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次时长
    pub fn record(&mut self, duration: i64) {
        match self.entries.iter_mut().find(|(d, _)| *d == duration) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((duration, 1)),
        }
    }

    /// 记录多次同一时长
    pub fn record_n(&mut self, duration: i64, times: u64) {
        if times == 0 {
            return;
        }
        match self.entries.iter_mut().find(|(d, _)| *d == duration) {
            Some((_, count)) => *count += times,
            None => self.entries.push((duration, times)),
        }
    }

    /// 不同时长的个数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按插入顺序遍历 (时长, 次数)
    pub fn iter(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.entries.iter().copied()
    }

    /// 出现次数最多的时长, 并列时取最先插入的
    pub fn most_frequent(&self) -> Option<i64> {
        let mut best: Option<(i64, u64)> = None;
        for &(duration, count) in &self.entries {
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((duration, count));
            }
        }
        best.map(|(duration, _)| duration)
    }

    /// 最常用的帧时长, 接近常见帧率时吸附到标准值, 空表返回 40ms
    pub fn most_often_used_duration(&self) -> i64 {
        let Some(most_often) = self.most_frequent() else {
            debug!("帧时长表为空, 使用默认值 {}", FALLBACK_DURATION_NS);
            return FALLBACK_DURATION_NS;
        };

        for &common in &COMMON_DEFAULT_DURATIONS {
            if (most_often - common).abs() < SNAP_THRESHOLD_NS {
                debug!("最常用帧时长 {} 吸附到常见值 {}", most_often, common);
                return common;
            }
        }

        debug!("最常用帧时长 {} 不接近任何常见值, 原样返回", most_often);
        most_often
    }
}

/// 解析统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserStats {
    /// 按 slice_type 语法值计数, 最后一项为无法识别的类型
    pub num_slices_by_type: Vec<u64>,
    /// 按 NAL 类型计数
    pub num_nalus_by_type: Vec<u64>,
    /// 场切片数
    pub num_field_slices: u64,
    /// 帧切片数
    pub num_frame_slices: u64,
    /// 无法解析而丢弃的 NAL 单元数
    pub num_unparsable_nalus: u64,
    /// 收到的外部时间戳数
    pub num_timestamps_in: u64,
    /// 由外部时间戳确定的帧数
    pub num_timestamps_used: u64,
    /// 内部推算时间戳的帧数
    pub num_timestamps_generated: u64,
    /// 丢弃的外部时间戳数
    pub num_timestamps_discarded: u64,
    /// 输出帧数
    pub num_frames_out: u64,
    /// 丢弃的帧数
    pub num_frames_discarded: u64,
}

impl ParserStats {
    /// 按编码的切片类型数与 NAL 类型数创建
    pub fn new(num_slice_types: usize, num_nalu_types: usize) -> Self {
        Self {
            num_slices_by_type: vec![0; num_slice_types + 1],
            num_nalus_by_type: vec![0; num_nalu_types],
            num_field_slices: 0,
            num_frame_slices: 0,
            num_unparsable_nalus: 0,
            num_timestamps_in: 0,
            num_timestamps_used: 0,
            num_timestamps_generated: 0,
            num_timestamps_discarded: 0,
            num_frames_out: 0,
            num_frames_discarded: 0,
        }
    }

    /// 记录一个切片, 超出范围的类型计入最后一项
    pub fn count_slice(&mut self, raw_slice_type: u32, field_pic: bool) {
        let last = self.num_slices_by_type.len() - 1;
        let idx = (raw_slice_type as usize).min(last);
        self.num_slices_by_type[idx] += 1;
        if field_pic {
            self.num_field_slices += 1;
        } else {
            self.num_frame_slices += 1;
        }
    }

    /// 记录一个 NAL 单元
    pub fn count_nalu(&mut self, type_id: u8) {
        if let Some(count) = self.num_nalus_by_type.get_mut(type_id as usize) {
            *count += 1;
        }
    }
}

impl fmt::Display for ParserStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames_out={}, frames_discarded={}, timestamps_in={}, used={}, generated={}, \
             discarded={}, field_slices={}, frame_slices={}, unparsable={}",
            self.num_frames_out,
            self.num_frames_discarded,
            self.num_timestamps_in,
            self.num_timestamps_used,
            self.num_timestamps_generated,
            self.num_timestamps_discarded,
            self.num_field_slices,
            self.num_frame_slices,
            self.num_unparsable_nalus,
        )
    }
}
