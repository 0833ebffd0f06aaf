//! Matroska 块与 Cluster 组装.
//!
//! # 输出结构
//! ```text
//! EBML Header (DocType: "matroska")
//! Segment (回填大小)
//! ├── Info (TimestampScale, Duration 回填)
//! ├── Tracks (单个 H.264 视频轨道)
//! ├── Cluster... (PrevSize + SimpleBlock/BlockGroup)
//! └── Cues (关键帧索引)
//! ```
//!
//! 块由 [`BlockRegistry`] 持有, [`Cluster`] 只保存句柄; Cluster 写出后
//! 注册表中对应的块随之释放.

pub mod block;
pub mod cluster;
pub mod cues;
pub mod writer;

pub use block::{
    BlockBlob, BlockData, BlockFlags, BlockGroup, LacingType, ReferenceBlock, SimpleBlock,
    SimpleBlockMode,
};
pub use cluster::{
    AuxElement, BlockHandle, BlockRegistry, Cluster, ClusterChild, ElementKind, SharedBlock,
};
pub use cues::{CuePoint, Cues};
pub use writer::{MatroskaWriter, MuxerOptions, VideoTrackInfo};
