//! JSON 配置.
//!
//! 所有字段都有默认值, 空对象 `{}` 即为合法配置.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strand_codec::EsParserConfig;
use strand_codec::es::config::DEFAULT_MAX_BUFFERED_FRAMES;
use strand_format::matroska::writer::{
    DEFAULT_MAX_CLUSTER_DURATION_MS, DEFAULT_TIMESTAMP_SCALE_NS,
};
use strand_format::{LacingType, MuxerOptions, SimpleBlockMode};

use crate::logging::LoggingConfig;

/// 顶层配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrandConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub parser: ParserSection,
    #[serde(default)]
    pub muxer: MuxerSection,
}

impl StrandConfig {
    /// 从 JSON 文本解析
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("解析配置 JSON 失败")
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("配置文件无效, path={}", path.display()))
    }
}

/// 基本流解析配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParserSection {
    /// 输入为长度前缀格式时的前缀字节数, 不设置表示 Annex B 起始码格式
    #[serde(default)]
    pub input_nalu_size_length: Option<usize>,
    /// 输出帧的 NAL 长度前缀字节数
    #[serde(default = "default_nalu_size_length")]
    pub nalu_size_length: usize,
    #[serde(default = "default_true")]
    pub keep_ar_info: bool,
    #[serde(default)]
    pub forced_default_duration_ns: Option<i64>,
    #[serde(default)]
    pub container_default_duration_ns: Option<i64>,
    #[serde(default)]
    pub all_i_slices_are_key_frames: bool,
    #[serde(default = "default_max_buffered_frames")]
    pub max_buffered_frames: usize,
}

impl Default for ParserSection {
    fn default() -> Self {
        Self {
            input_nalu_size_length: None,
            nalu_size_length: default_nalu_size_length(),
            keep_ar_info: true,
            forced_default_duration_ns: None,
            container_default_duration_ns: None,
            all_i_slices_are_key_frames: false,
            max_buffered_frames: default_max_buffered_frames(),
        }
    }
}

impl ParserSection {
    /// 转换为解析器配置
    pub fn to_es_config(&self) -> EsParserConfig {
        EsParserConfig {
            nalu_size_length: self.nalu_size_length,
            keep_ar_info: self.keep_ar_info,
            forced_default_duration: self.forced_default_duration_ns,
            container_default_duration: self.container_default_duration_ns,
            all_i_slices_are_key_frames: self.all_i_slices_are_key_frames,
            max_buffered_frames: self.max_buffered_frames,
        }
    }
}

/// 封装配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MuxerSection {
    #[serde(default)]
    pub simple_block_mode: SimpleBlockMode,
    #[serde(default)]
    pub lacing: LacingType,
    #[serde(default = "default_timestamp_scale_ns")]
    pub timestamp_scale_ns: i64,
    #[serde(default = "default_max_cluster_duration_ms")]
    pub max_cluster_duration_ms: i64,
    #[serde(default = "default_true")]
    pub write_cues: bool,
}

impl Default for MuxerSection {
    fn default() -> Self {
        Self {
            simple_block_mode: SimpleBlockMode::default(),
            lacing: LacingType::default(),
            timestamp_scale_ns: default_timestamp_scale_ns(),
            max_cluster_duration_ms: default_max_cluster_duration_ms(),
            write_cues: true,
        }
    }
}

impl MuxerSection {
    /// 转换为封装选项
    pub fn to_options(&self) -> MuxerOptions {
        MuxerOptions {
            simple_block_mode: self.simple_block_mode,
            lacing: self.lacing,
            timestamp_scale_ns: self.timestamp_scale_ns,
            max_cluster_duration_ms: self.max_cluster_duration_ms,
            write_cues: self.write_cues,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_nalu_size_length() -> usize {
    4
}

fn default_max_buffered_frames() -> usize {
    DEFAULT_MAX_BUFFERED_FRAMES
}

fn default_timestamp_scale_ns() -> i64 {
    DEFAULT_TIMESTAMP_SCALE_NS
}

fn default_max_cluster_duration_ms() -> i64 {
    DEFAULT_MAX_CLUSTER_DURATION_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = StrandConfig::from_json_str("{}").unwrap();
        assert_eq!(config.parser.to_es_config(), EsParserConfig::default());
        assert_eq!(config.muxer.to_options(), MuxerOptions::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let text = r#"{
            "parser": { "nalu_size_length": 2, "forced_default_duration_ns": 20000000 },
            "muxer": { "simple_block_mode": "no_simple", "lacing": "auto", "write_cues": false }
        }"#;
        let config = StrandConfig::from_json_str(text).unwrap();
        let es = config.parser.to_es_config();
        assert_eq!(es.nalu_size_length, 2);
        assert_eq!(es.forced_default_duration, Some(20_000_000));
        assert!(es.keep_ar_info);

        let options = config.muxer.to_options();
        assert_eq!(options.simple_block_mode, SimpleBlockMode::NoSimple);
        assert_eq!(options.lacing, LacingType::Auto);
        assert!(!options.write_cues);
        assert_eq!(options.timestamp_scale_ns, 1_000_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strand.json");
        fs::write(&path, r#"{ "logging": { "file_prefix": "remux" } }"#).unwrap();
        let config = StrandConfig::load(&path).unwrap();
        assert_eq!(config.logging.file_prefix, "remux");

        let missing = StrandConfig::load(dir.path().join("missing.json"));
        let err = missing.unwrap_err();
        assert!(format!("{err:#}").contains("missing.json"));

        assert!(StrandConfig::from_json_str(r#"{ "muxer": { "lacing": "bogus" } }"#).is_err());
    }
}
