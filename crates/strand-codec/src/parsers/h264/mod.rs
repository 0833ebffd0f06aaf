//! H.264/AVC 基本流解析器.
//!
//! - NAL 单元类型识别
//! - SPS / PPS 解析
//! - 切片头解析与新图像检测
//! - 帧组装与 AVCC 重封装 ([`H264EsParser`])

pub mod es_parser;
pub mod nal;
pub mod pps;
pub mod slice;
pub mod sps;

#[cfg(test)]
pub(crate) mod test_stream;

pub use es_parser::H264EsParser;
pub use nal::{
    AvccConfig, NalUnit, NalUnitType, build_avcc_config, nalu_type_name, parse_avcc_config,
};
pub use pps::{ParameterSets, Pps, parse_pps};
pub use slice::{SliceHeader, SliceType, parse_slice_header};
pub use sps::{Sps, TimingInfo, parse_sps};
