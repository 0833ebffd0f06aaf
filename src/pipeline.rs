//! H.264 → Matroska 转封装流程.
//!
//! 输入字节分块送入 [`H264EsParser`], 每次输入后取出已排好序的帧交给
//! [`MatroskaWriter`]. 文件头在第一帧输出时才写, 此时配置记录与图像尺寸已知.

use std::path::Path;

use anyhow::{Context, Result, bail};
use strand_codec::H264EsParser;
use strand_format::{IoContext, MatroskaWriter, VideoTrackInfo};
use tracing::{debug, info, warn};

use crate::config::StrandConfig;

/// Annex B 输入每次读取的字节数
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// 转封装结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemuxSummary {
    /// 写入的帧数
    pub frames_written: u64,
    /// 被解析器丢弃的帧数
    pub frames_skipped: u64,
    /// 写出的 Cluster 数
    pub clusters_written: u64,
    /// 索引点数
    pub cue_points: usize,
    /// 图像宽度
    pub width: u32,
    /// 图像高度
    pub height: u32,
    /// 轨道默认帧时长 (纳秒)
    pub default_duration_ns: i64,
    /// 出现次数最多的帧时长 (纳秒)
    pub most_often_used_duration_ns: i64,
    /// 文件头写出后配置记录变化的次数
    pub configuration_changes: u64,
}

/// 把 H.264 基本流文件转封装为 Matroska 文件
pub fn remux_h264(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &StrandConfig,
) -> Result<RemuxSummary> {
    let input = input.as_ref();
    let output = output.as_ref();
    let mut reader = IoContext::open_read(input)
        .with_context(|| format!("打开输入文件失败, path={}", input.display()))?;
    let mut writer = IoContext::open_write(output)
        .with_context(|| format!("创建输出文件失败, path={}", output.display()))?;

    let summary = remux_stream(&mut reader, &mut writer, config)
        .with_context(|| format!("转封装失败, input={}", input.display()))?;
    info!(
        "转封装完成: {} -> {}, {} 帧, {} 个 Cluster",
        input.display(),
        output.display(),
        summary.frames_written,
        summary.clusters_written
    );
    Ok(summary)
}

/// 在任意输入/输出上下文之间转封装
pub fn remux_stream(
    input: &mut IoContext,
    output: &mut IoContext,
    config: &StrandConfig,
) -> Result<RemuxSummary> {
    let parser = H264EsParser::with_config(config.parser.to_es_config())
        .context("解析器配置无效")?;
    let writer = MatroskaWriter::new(config.muxer.to_options()).context("封装配置无效")?;
    let mut remuxer = Remuxer {
        parser,
        writer,
        header_written: false,
        summary: RemuxSummary::default(),
    };

    match config.parser.input_nalu_size_length {
        Some(length_size) => {
            while let Some(unit) = read_length_prefixed_unit(input, length_size)? {
                remuxer.parser.add_bytes_framed(&unit, length_size)?;
                remuxer.drain(output)?;
            }
        }
        None => {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let read = input.read_some(&mut buf)?;
                if read == 0 {
                    break;
                }
                remuxer.parser.add_bytes(&buf[..read]);
                remuxer.drain(output)?;
            }
        }
    }

    remuxer.parser.flush();
    remuxer.drain(output)?;
    remuxer.finish(output)
}

/// 读取一个带长度前缀的 NAL 单元 (含前缀), 输入结束时返回 None
fn read_length_prefixed_unit(io: &mut IoContext, length_size: usize) -> Result<Option<Vec<u8>>> {
    if !(1..=4).contains(&length_size) {
        bail!("长度前缀字节数必须在 1 到 4 之间, value={}", length_size);
    }

    let mut prefix = vec![0u8; length_size];
    if io.read_some(&mut prefix[..1])? == 0 {
        return Ok(None);
    }
    io.read_exact(&mut prefix[1..]).context("长度前缀被截断")?;
    let len = prefix
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));

    let payload = io
        .read_bytes(len)
        .with_context(|| format!("NAL 单元被截断, 声明长度={}", len))?;
    let mut unit = prefix;
    unit.extend_from_slice(&payload);
    Ok(Some(unit))
}

struct Remuxer {
    parser: H264EsParser,
    writer: MatroskaWriter,
    header_written: bool,
    summary: RemuxSummary,
}

impl Remuxer {
    /// 把输出队列中的帧全部写出
    fn drain(&mut self, output: &mut IoContext) -> Result<()> {
        while self.parser.frame_available() {
            let frame = self.parser.get_frame()?;
            if !self.header_written {
                self.write_header(output)?;
            } else if self.parser.configuration_record_changed() {
                warn!("配置记录在文件头写出后发生变化, CodecPrivate 保持不变");
                self.parser.clear_configuration_record_changed();
                self.summary.configuration_changes += 1;
            }
            self.writer.write_frame(output, frame)?;
        }
        Ok(())
    }

    fn write_header(&mut self, output: &mut IoContext) -> Result<()> {
        let track = self.track_info()?;
        self.writer.write_header(output, &track)?;
        self.parser.clear_configuration_record_changed();
        self.header_written = true;

        self.summary.width = track.pixel_width;
        self.summary.height = track.pixel_height;
        self.summary.default_duration_ns = track.default_duration_ns.unwrap_or(0);
        debug!(
            "文件头: {}x{}, 显示尺寸 {:?}x{:?}, 默认帧时长 {:?}ns",
            track.pixel_width,
            track.pixel_height,
            track.display_width,
            track.display_height,
            track.default_duration_ns
        );
        Ok(())
    }

    fn track_info(&self) -> Result<VideoTrackInfo> {
        let codec_private = self
            .parser
            .configuration_record()
            .context("输出帧时配置记录尚未就绪")?;
        let (Some(pixel_width), Some(pixel_height)) = (self.parser.width(), self.parser.height())
        else {
            bail!("输出帧时图像尺寸未知");
        };

        let (display_width, display_height) = match self.parser.display_dimensions(None, None) {
            Ok((width, height)) => (Some(width), Some(height)),
            // 码流中没有像素宽高比
            Err(err) if err.is_misuse() => (None, None),
            Err(err) => return Err(err.into()),
        };

        Ok(VideoTrackInfo {
            codec_private,
            pixel_width,
            pixel_height,
            display_width,
            display_height,
            default_duration_ns: Some(self.parser.default_duration()),
        })
    }

    fn finish(mut self, output: &mut IoContext) -> Result<RemuxSummary> {
        if !self.header_written {
            if !self.parser.is_configuration_record_ready() {
                bail!("输入中没有找到 SPS/PPS, 无法生成 CodecPrivate");
            }
            warn!("输入中没有可输出的帧, 只写出文件头");
            self.write_header(output)?;
        }
        self.writer.write_trailer(output)?;

        self.summary.frames_written = self.writer.num_frames();
        self.summary.clusters_written = self.writer.num_clusters();
        self.summary.cue_points = self.writer.cue_points().len();
        self.summary.frames_skipped = self.parser.num_skipped_frames();
        self.summary.most_often_used_duration_ns = self.parser.most_often_used_duration();
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_length_prefixed_unit() {
        let mut io = IoContext::from_data(vec![0, 2, 0xAA, 0xBB, 0, 1, 0xCC]);
        assert_eq!(
            read_length_prefixed_unit(&mut io, 2).unwrap(),
            Some(vec![0, 2, 0xAA, 0xBB])
        );
        assert_eq!(
            read_length_prefixed_unit(&mut io, 2).unwrap(),
            Some(vec![0, 1, 0xCC])
        );
        assert_eq!(read_length_prefixed_unit(&mut io, 2).unwrap(), None);
    }

    #[test]
    fn test_truncated_unit_is_error() {
        let mut io = IoContext::from_data(vec![0, 0, 0, 9, 0xAA]);
        assert!(read_length_prefixed_unit(&mut io, 4).is_err());

        let mut io = IoContext::from_data(vec![0]);
        assert!(read_length_prefixed_unit(&mut io, 2).is_err());
        assert!(read_length_prefixed_unit(&mut IoContext::from_data(vec![]), 5).is_err());
    }

    #[test]
    fn test_empty_input_fails_without_parameter_sets() {
        let mut input = IoContext::from_data(Vec::new());
        let mut output = IoContext::memory();
        let err = remux_stream(&mut input, &mut output, &StrandConfig::default()).unwrap_err();
        assert!(err.to_string().contains("SPS/PPS"));
    }
}
