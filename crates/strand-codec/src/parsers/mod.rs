//! 码流解析器.

pub mod annex_b;
pub mod h264;
