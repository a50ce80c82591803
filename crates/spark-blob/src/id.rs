use core::fmt;

use bytes::{Buf, BufMut};

use crate::error::{BlobError, Result};

/// 标识在消息中的编码长度（字节）。
pub const ENCODED_LEN: usize = 8;

/// 进程内 BLOB 标识。
///
/// # 契约说明（What）
/// - 由所属管理器的计数器单调签发，从 1 开始，0 永不签发；
/// - 只在签发它的管理器（及其所在进程）内有意义；
/// - 线上编码为 8 字节大端有符号整数，与 `bytes::BufMut::put_i64` 一致。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobId(i64);

impl BlobId {
    /// 用原始数值构造标识，通常只在测试或跨层桥接时使用。
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i64 {
        self.0
    }

    /// 把标识写入消息。
    pub fn write_to(self, dst: &mut impl BufMut) {
        dst.put_i64(self.0);
    }

    /// 从消息中读出一个标识。
    ///
    /// 剩余字节不足 8 个时返回 [`BlobError::TruncatedIdentifier`]，且不消耗任何字节。
    pub fn read_from(src: &mut impl Buf) -> Result<Self> {
        let available = src.remaining();
        if available < ENCODED_LEN {
            return Err(BlobError::TruncatedIdentifier { available });
        }
        Ok(Self(src.get_i64()))
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob#{}", self.0)
    }
}

/// 单调递增的计数器。
///
/// 管理器内部各持有一份用于 BLOB 标识、一份用于缓存插入序号；
/// 两者均在管理器锁内推进，因此无需原子操作。
#[derive(Debug)]
pub(crate) struct IdSequence {
    next: u64,
}

impl IdSequence {
    pub(crate) const fn starting_at_one() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next(&mut self) -> u64 {
        let current = self.next;
        self.next += 1;
        current
    }

    pub(crate) fn next_blob_id(&mut self) -> BlobId {
        // 计数器从 1 开始且每次加一，在 i64 耗尽之前不会溢出到负数区间。
        BlobId(self.next() as i64)
    }
}
