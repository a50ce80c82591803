//! 缓冲层错误定义。
//!
//! # 模块定位（Why）
//! - 为 `GrowableBuffer`、`ReadCursor` 与 `BufferFactory` 提供统一的失败语义；
//! - 上层（`spark-blob`）以透明方式转发这些错误，调用方可以拿到原始 `io::Error`。
//!
//! # 契约说明（What）
//! - 每个变体对应 [`codes`] 中的稳定错误码，遵循 `<域>.<语义>` 命名；
//! - I/O 失败保持原样透传，本层不做重试。

use std::io;

use thiserror::Error;

/// 稳定错误码。
pub mod codes {
    /// 底层读写源/汇返回的 I/O 失败。
    pub const BUFFER_IO: &str = "buffer.io";
    /// 扩容请求超过 [`GrowthPolicy::max_capacity`](crate::GrowthPolicy::max_capacity)。
    pub const BUFFER_CAPACITY_EXCEEDED: &str = "buffer.capacity_exceeded";
}

/// 缓冲操作的错误域。
#[derive(Debug, Error)]
pub enum BufferError {
    /// 填充或排空过程中外部通道的 I/O 失败，原样透传。
    #[error(transparent)]
    Io(#[from] io::Error),

    /// 写入或分配会让容量超过增长策略设定的上限。
    ///
    /// - `requested`：完成本次操作所需的总容量；
    /// - `limit`：策略允许的最大容量。
    #[error("缓冲容量超限：需要 {requested} 字节，上限 {limit} 字节")]
    CapacityExceeded { requested: usize, limit: usize },
}

impl BufferError {
    /// 返回稳定错误码，供日志与告警分类使用。
    pub fn code(&self) -> &'static str {
        match self {
            BufferError::Io(_) => codes::BUFFER_IO,
            BufferError::CapacityExceeded { .. } => codes::BUFFER_CAPACITY_EXCEEDED,
        }
    }
}

impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Io(inner) => inner,
            other => io::Error::other(other),
        }
    }
}

/// `spark-buffer` 内部使用的结果别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;
