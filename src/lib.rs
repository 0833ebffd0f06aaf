//! # Strand
//!
//! H.264 基本流帧提取与 Matroska 块/Cluster 组装.
//!
//! 处理流程:
//! - **帧提取**: 把 Annex B 或长度前缀的 H.264 字节流拆成 NAL 单元并组装成帧
//! - **排序与时间戳**: 解码顺序 → 显示顺序重排, 对齐外部时间戳, 统计帧时长
//! - **容器封装**: 按策略生成 SimpleBlock/BlockGroup, 组装 Cluster 与 Cues
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use strand::config::StrandConfig;
//!
//! let config = StrandConfig::default();
//! let summary = strand::pipeline::remux_h264("input.h264", "output.mkv", &config)?;
//! println!("写入 {} 帧, {} 个 Cluster", summary.frames_written, summary.clusters_written);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `strand-core` | 错误类型、有理数、位流读写 |
//! | `strand-codec` | NAL 扫描、H.264 帧组装、时间戳与排序 |
//! | `strand-format` | EBML 写入、Block/Cluster/Cues 与 Matroska 封装 |

/// 核心类型与工具
pub use strand_core as core;

/// 基本流解析
pub use strand_codec as codec;

/// 容器封装
pub use strand_format as format;

pub mod config;
pub mod logging;
pub mod pipeline;

/// 获取 Strand 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
