//! 组装完成的视频帧.

use bytes::Bytes;

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// 帧内编码
    I,
    /// 前向预测
    P,
    /// 双向预测
    B,
}

impl FrameType {
    /// 单字符表示, 用于日志
    pub fn as_char(self) -> char {
        match self {
            Self::I => 'I',
            Self::P => 'P',
            Self::B => 'B',
        }
    }
}

/// 图像结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureStructure {
    /// 帧编码图像
    Frame,
    /// 未配对的单场
    Field,
    /// 互补场对
    FieldPair,
}

/// 显示顺序键
///
/// `group` 在每个 IDR 处递增, 组内按 `poc` 排序.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PictureOrder {
    /// IDR 分组序号
    pub group: u64,
    /// 图像顺序计数
    pub poc: i64,
}

/// 视频帧
///
/// 时间戳、时长与参考时间戳均为纳秒.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 帧数据 (每个 NAL 单元带长度前缀)
    pub data: Bytes,
    /// 解码顺序位置: 首个组成单元的绝对流偏移
    pub position: u64,
    /// 解码顺序序号
    pub decode_order: u64,
    /// 帧类型
    pub frame_type: FrameType,
    /// 图像结构
    pub structure: PictureStructure,
    /// 是否为关键帧
    pub keyframe: bool,
    /// 是否匹配到了外部提供的时间戳
    pub has_provided_timestamp: bool,
    /// 显示时间戳
    pub timestamp: i64,
    /// 时长
    pub duration: i64,
    /// 向后参考帧的显示时间戳
    pub past_ref: Option<i64>,
    /// 向前参考帧的显示时间戳 (仅 B 帧)
    pub forward_ref: Option<i64>,
    /// 显示顺序键, 无法计算时为 None
    pub picture_order: Option<PictureOrder>,
}

impl Frame {
    /// 创建尚未分配时间戳的帧
    pub fn new(data: Bytes, position: u64, frame_type: FrameType, keyframe: bool) -> Self {
        Self {
            data,
            position,
            decode_order: 0,
            frame_type,
            structure: PictureStructure::Frame,
            keyframe,
            has_provided_timestamp: false,
            timestamp: 0,
            duration: 0,
            past_ref: None,
            forward_ref: None,
            picture_order: None,
        }
    }

    /// 结束时间戳
    pub fn end(&self) -> i64 {
        self.timestamp + self.duration
    }

    /// 是否为 B 帧
    pub fn is_b_frame(&self) -> bool {
        self.frame_type == FrameType::B
    }

    /// 是否为场图像 (单场或场对)
    pub fn is_field(&self) -> bool {
        self.structure != PictureStructure::Frame
    }

    /// 与向后参考帧的时间差
    pub fn past_ref_distance(&self) -> Option<i64> {
        self.past_ref.map(|r| self.timestamp - r)
    }

    /// 与向前参考帧的时间差
    pub fn forward_ref_distance(&self) -> Option<i64> {
        self.forward_ref.map(|r| r - self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ref_distances() {
        let mut frame = Frame::new(Bytes::from_static(b"\x00"), 10, FrameType::B, false);
        frame.timestamp = 80;
        frame.duration = 40;
        frame.past_ref = Some(0);
        frame.forward_ref = Some(120);
        assert_eq!(frame.end(), 120);
        assert_eq!(frame.past_ref_distance(), Some(80));
        assert_eq!(frame.forward_ref_distance(), Some(40));
        assert!(frame.is_b_frame());
        assert!(!frame.is_field());
    }

    #[test]
    fn test_picture_order_sorting() {
        let a = PictureOrder { group: 1, poc: 8 };
        let b = PictureOrder { group: 2, poc: 0 };
        assert!(a < b, "后一个 IDR 分组整体排在后面");
        assert!(PictureOrder { group: 1, poc: 2 } < a);
    }
}
