use std::{fmt, io};

use bytes::BytesMut;

use crate::{
    error::{BufferError, Result},
    factory::GrowthPolicy,
};

/// 单次 `read` 的窗口上限，窗口在读取前清零。
pub(crate) const FILL_CHUNK: usize = 64 * 1024;

/// `GrowableBuffer` 是 BLOB 的后备存储：一段连续字节区域加一个写游标。
///
/// # 设计概要（How）
/// - 底层使用 `BytesMut`，`len()` 即写/生产游标，`capacity()` 只增不减；
/// - 读游标不内置于缓冲，而由 [`ReadCursor`](crate::ReadCursor) 独立持有，
///   同一缓冲可被多个读者以各自的进度读取；
/// - 扩容统一经过 [`GrowthPolicy::next_capacity`]，保证系数与上限在所有写入路径上一致。
///
/// # 契约说明（What）
/// - `clear` 只重置写游标，容量保留，供缓存复用；
/// - 任何写入失败（容量超限或 I/O 失败）都不会破坏已写入的数据。
pub struct GrowableBuffer {
    inner: BytesMut,
    policy: GrowthPolicy,
}

impl GrowableBuffer {
    /// 按精确容量分配一个空缓冲。
    pub fn with_capacity(capacity: usize, policy: GrowthPolicy) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
            policy,
        }
    }

    /// 当前容量（字节）。
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// 已写入的字节数。
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// 不触发重新分配即可写入的字节数。
    pub fn remaining_mut(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// 判断还能否再接收 `additional` 字节（允许扩容，但不得超过策略上限）。
    pub fn can_accept(&self, additional: usize) -> bool {
        self.len()
            .checked_add(additional)
            .is_some_and(|total| self.policy.admits(total))
    }

    /// 缓冲携带的增长策略。
    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    /// 清空内容，保留容量。
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// 全部已写入字节。
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// 从 `offset` 起的可读区域；`offset` 越过写游标时返回空切片。
    pub fn readable_from(&self, offset: usize) -> &[u8] {
        self.inner.get(offset..).unwrap_or(&[])
    }

    /// 确保至少还能追加 `additional` 字节。
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let limit = self.policy.limit();
        let required =
            self.len()
                .checked_add(additional)
                .ok_or(BufferError::CapacityExceeded {
                    requested: usize::MAX,
                    limit,
                })?;
        if !self.policy.admits(required) {
            return Err(BufferError::CapacityExceeded {
                requested: required,
                limit,
            });
        }
        if required <= self.capacity() {
            return Ok(());
        }
        let target = self.policy.next_capacity(self.capacity(), required)?;
        // 容量严格取 `next_capacity`，不走 `BytesMut::reserve` 的倍增。
        let mut grown = BytesMut::with_capacity(target);
        grown.extend_from_slice(&self.inner);
        self.inner = grown;
        Ok(())
    }

    /// 追加整段字节。
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        self.reserve(src.len())?;
        self.inner.extend_from_slice(src);
        Ok(())
    }

    /// 从外部可读源批量填充。
    ///
    /// # 契约说明（What）
    /// - `limit` 为 `Some(n)` 时最多读取 `n` 字节，否则一直读到 EOF；
    /// - `Interrupted` 会被重试，其余 I/O 错误原样返回，已读入的数据保留；
    /// - 写游标到达容量上限时，若源还有数据则返回 [`BufferError::CapacityExceeded`]。
    ///
    /// 返回本次读入的字节数。
    pub fn fill_from(&mut self, src: &mut dyn io::Read, limit: Option<usize>) -> Result<usize> {
        let mut total = 0usize;
        loop {
            let budget = limit.map_or(usize::MAX, |limit| limit - total);
            if budget == 0 {
                break;
            }
            if !self.can_accept(1) {
                if source_exhausted(src)? {
                    break;
                }
                return Err(BufferError::CapacityExceeded {
                    requested: self.len().saturating_add(1),
                    limit: self.policy.limit(),
                });
            }
            if self.remaining_mut() == 0 {
                self.reserve(1)?;
            }

            let start = self.len();
            let window = self
                .remaining_mut()
                .min(budget)
                .min(self.policy.limit() - start)
                .min(FILL_CHUNK);
            self.inner.resize(start + window, 0);
            match src.read(&mut self.inner[start..]) {
                Ok(0) => {
                    self.inner.truncate(start);
                    break;
                }
                Ok(read) => {
                    self.inner.truncate(start + read);
                    total += read;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    self.inner.truncate(start);
                }
                Err(err) => {
                    self.inner.truncate(start);
                    return Err(err.into());
                }
            }
        }
        Ok(total)
    }

    /// 以回调方式追加结构化数据。
    ///
    /// 回调拿到 [`BufferWriter`]，可以按 `std::io::Write` 的方式写入；
    /// 回调返回的错误若源自本缓冲（例如容量超限），会还原为对应的 [`BufferError`] 变体。
    pub fn produce<R>(
        &mut self,
        f: impl FnOnce(&mut BufferWriter<'_>) -> io::Result<R>,
    ) -> Result<R> {
        let mut writer = BufferWriter { buffer: self };
        f(&mut writer).map_err(BufferError::from_io)
    }
}

fn source_exhausted(src: &mut dyn io::Read) -> Result<bool> {
    let mut byte = [0u8; 1];
    loop {
        match src.read(&mut byte) {
            Ok(read) => return Ok(read == 0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

impl fmt::Debug for GrowableBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("policy", &self.policy)
            .finish()
    }
}

impl BufferError {
    /// 把经过 `io::Error` 包装的错误还原为 [`BufferError`]。
    pub fn from_io(err: io::Error) -> Self {
        let wraps_buffer_error = err
            .get_ref()
            .is_some_and(|inner| inner.is::<BufferError>());
        if !wraps_buffer_error {
            return BufferError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<BufferError>()) {
            Some(Ok(original)) => *original,
            Some(Err(other)) => BufferError::Io(io::Error::new(kind, other)),
            None => BufferError::Io(io::Error::from(kind)),
        }
    }
}

/// 生产回调使用的写入句柄。
pub struct BufferWriter<'a> {
    buffer: &'a mut GrowableBuffer,
}

impl BufferWriter<'_> {
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        self.buffer.put_slice(src)
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.buffer.put_slice(&[value])
    }

    /// 以大端序写入 8 字节有符号整数，与 `bytes::BufMut::put_i64` 的编码一致。
    pub fn put_i64(&mut self, value: i64) -> Result<()> {
        self.buffer.put_slice(&value.to_be_bytes())
    }

    /// 缓冲当前的总写入量。
    pub fn written(&self) -> usize {
        self.buffer.len()
    }
}

impl io::Write for BufferWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.put_slice(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
