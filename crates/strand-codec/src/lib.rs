//! # strand-codec
//!
//! 视频基本流 (elementary stream) 解析层.
//!
//! 数据流向:
//! 1. [`parsers::annex_b::NalScanner`] 把任意切分的字节流拆成 NAL 单元
//! 2. [`parsers::h264::H264EsParser`] 把 NAL 单元组装成帧, 识别帧类型与关键帧
//! 3. [`es::Timeline`] 缓存帧, 解码顺序 → 显示顺序重排, 对齐外部时间戳
//!
//! 最终帧按显示时间戳非递减顺序从输出队列取出, 交给容器封装层.

pub mod es;
pub mod parsers;

pub use es::{EsParserConfig, Frame, FrameType, ParserStats, PictureStructure, Timeline};
pub use parsers::h264::H264EsParser;
