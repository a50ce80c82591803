//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义 BLOB 管理器对外暴露的失败语义；
//! - 区分“调用方用错了”（未知标识、结束后继续使用）与“底层通道失败”（I/O、容量超限）。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，并提供稳定错误码 [`BlobError::code`]；
//! - 底层 [`BufferError`] 以透明方式携带，I/O 错误不做改写也不在本层重试；
//! - 缓存/引用跟踪失步属于不可恢复的一致性故障，不在此枚举中，
//!   由管理器记录 [`codes::BLOB_CACHE_INVARIANT`] 事件后直接 panic。

use std::io;

use spark_buffer::BufferError;
use thiserror::Error;

use crate::id::BlobId;

/// 稳定错误码，遵循 `<域>.<语义>` 命名。
pub mod codes {
    pub use spark_buffer::codes::{BUFFER_CAPACITY_EXCEEDED, BUFFER_IO};

    /// 标识不在活跃登记表中（从未签发，或已处置）。
    pub const BLOB_UNKNOWN_IDENTIFIER: &str = "blob.unknown_identifier";
    /// 生产者/消费者在 `finish()` 之后仍被使用。
    pub const BLOB_USE_AFTER_FINISH: &str = "blob.use_after_finish";
    /// 消息中剩余字节不足以读出 8 字节标识。
    pub const BLOB_TRUNCATED_IDENTIFIER: &str = "blob.truncated_identifier";
    /// 配置校验失败。
    pub const BLOB_INVALID_CONFIG: &str = "blob.invalid_config";
    /// 回收队列报告的句柄在缓存中找不到；进程随即中止。
    pub const BLOB_CACHE_INVARIANT: &str = "blob.cache_invariant";
}

/// BLOB 管理器错误域。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `UnknownIdentifier`：解析标识时未命中活跃登记表，管理器不会以空 BLOB 代替；
///   - `UseAfterFinish`：确定性的编程错误，调用方不应重试；
///   - `Buffer`：来自后备缓冲的失败，包括外部通道 I/O 错误与容量超限。
/// - **执行 (How)**：`From<io::Error>` 经由 [`BufferError::from_io`] 转换，
///   因而回调里通过 `?` 冒泡上来的容量错误会还原为原始变体。
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("BLOB 标识 {id} 未登记或已处置")]
    UnknownIdentifier { id: BlobId },

    #[error("BLOB {id} 已结束，拒绝执行 `{operation}`")]
    UseAfterFinish {
        id: BlobId,
        operation: &'static str,
    },

    #[error("消息剩余 {available} 字节，不足以读出 8 字节 BLOB 标识")]
    TruncatedIdentifier { available: usize },

    #[error("BLOB 管理器配置无效：{reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl BlobError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BlobError::UnknownIdentifier { .. } => codes::BLOB_UNKNOWN_IDENTIFIER,
            BlobError::UseAfterFinish { .. } => codes::BLOB_USE_AFTER_FINISH,
            BlobError::TruncatedIdentifier { .. } => codes::BLOB_TRUNCATED_IDENTIFIER,
            BlobError::InvalidConfig { .. } => codes::BLOB_INVALID_CONFIG,
            BlobError::Buffer(inner) => inner.code(),
        }
    }

    pub(crate) fn use_after_finish(id: BlobId, operation: &'static str) -> Self {
        BlobError::UseAfterFinish { id, operation }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        BlobError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for BlobError {
    fn from(err: io::Error) -> Self {
        BlobError::Buffer(BufferError::from_io(err))
    }
}

/// `spark-blob` 的结果别名。
pub type Result<T, E = BlobError> = core::result::Result<T, E>;
