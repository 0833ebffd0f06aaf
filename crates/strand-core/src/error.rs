//! 统一错误类型定义.
//!
//! 区分两类错误:
//! - 数据错误 (码流损坏、截断等), 由输入引起
//! - 调用方误用 (`Misuse`), 表示调用顺序或前置条件不满足, 属于编程错误

use thiserror::Error;

/// Strand 统一错误类型
#[derive(Debug, Error)]
pub enum StrandError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 容器格式错误
    #[error("格式错误: {0}")]
    Format(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 调用方违反接口前置条件 (例如输出队列为空时取帧)
    #[error("接口误用: {0}")]
    Misuse(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl StrandError {
    /// 是否为调用方误用, 而非数据错误
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::Misuse(_))
    }
}

/// Strand 统一 Result 类型
pub type StrandResult<T> = Result<T, StrandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misuse_category() {
        assert!(StrandError::Misuse("empty".into()).is_misuse());
        assert!(!StrandError::InvalidData("bad".into()).is_misuse());
        assert!(!StrandError::Eof.is_misuse());
    }

    #[test]
    fn test_io_error_convert() {
        let io = std::io::Error::other("disk full");
        let err: StrandError = io.into();
        assert!(format!("{err}").contains("disk full"));
    }
}
