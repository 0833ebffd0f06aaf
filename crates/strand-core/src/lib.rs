//! # strand-core
//!
//! Strand 核心库, 提供基础类型定义、错误处理和位流工具.
//!
//! 所有上层 crate (码流解析、容器封装) 共用本 crate 的错误类型与有理数类型.

pub mod bitreader;
pub mod bitwriter;
pub mod error;
pub mod rational;
pub mod timestamp;

// 重导出常用类型
pub use error::{StrandError, StrandResult};
pub use rational::Rational;
