//! 基本流解析器配置.

use strand_core::{StrandError, StrandResult};

/// 无任何时长来源时的默认帧时长 (25 fps)
pub const DEFAULT_FRAME_DURATION_NS: i64 = 40_000_000;

/// 未遇到 IDR 时, 缓存帧数达到该值也会触发一次处理
pub const DEFAULT_MAX_BUFFERED_FRAMES: usize = 256;

/// 解析器配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsParserConfig {
    /// 输出帧中 NAL 长度前缀的字节数 (1, 2 或 4)
    pub nalu_size_length: usize,
    /// 是否采用码流中的像素宽高比
    pub keep_ar_info: bool,
    /// 强制的帧时长, 优先于一切码流信息
    pub forced_default_duration: Option<i64>,
    /// 容器给出的帧时长, 码流没有 timing_info 时使用
    pub container_default_duration: Option<i64>,
    /// 非 IDR 的 I 帧也视为关键帧
    pub all_i_slices_are_key_frames: bool,
    /// 缓存帧数上限
    pub max_buffered_frames: usize,
}

impl Default for EsParserConfig {
    fn default() -> Self {
        Self {
            nalu_size_length: 4,
            keep_ar_info: true,
            forced_default_duration: None,
            container_default_duration: None,
            all_i_slices_are_key_frames: false,
            max_buffered_frames: DEFAULT_MAX_BUFFERED_FRAMES,
        }
    }
}

impl EsParserConfig {
    /// 校验配置
    pub fn validate(&self) -> StrandResult<()> {
        validate_nalu_size_length(self.nalu_size_length)?;
        if self.max_buffered_frames == 0 {
            return Err(StrandError::InvalidArgument(
                "max_buffered_frames 不能为 0".into(),
            ));
        }
        for (name, value) in [
            ("forced_default_duration", self.forced_default_duration),
            ("container_default_duration", self.container_default_duration),
        ] {
            if value.is_some_and(|d| d <= 0) {
                return Err(StrandError::InvalidArgument(format!(
                    "{} 必须为正数, value={:?}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// 校验 NAL 长度前缀字节数
pub fn validate_nalu_size_length(len: usize) -> StrandResult<()> {
    if matches!(len, 1 | 2 | 4) {
        Ok(())
    } else {
        Err(StrandError::InvalidArgument(format!(
            "NAL 长度前缀字节数必须为 1, 2 或 4, value={}",
            len
        )))
    }
}
