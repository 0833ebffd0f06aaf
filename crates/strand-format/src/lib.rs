//! # strand-format
//!
//! Strand 容器格式库, 负责把基本流解析器输出的帧写入 Matroska 容器.
//!
//! - [`ebml`]: EBML 元素 ID、变长整数与元素读写
//! - [`io`]: I/O 抽象层
//! - [`matroska`]: Block/SimpleBlock/BlockGroup、Cluster、Cues 与封装器

pub mod ebml;
pub mod io;
pub mod matroska;

// 重导出常用类型
pub use io::IoContext;
pub use matroska::{
    BlockBlob, BlockHandle, BlockRegistry, Cluster, Cues, LacingType, MatroskaWriter,
    MuxerOptions, SimpleBlockMode, VideoTrackInfo,
};
