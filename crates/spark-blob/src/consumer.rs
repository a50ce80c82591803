use std::{fmt, io, sync::Arc};

use spark_buffer::ReadCursor;

use crate::{
    error::{BlobError, Result},
    id::BlobId,
    manager::Shared,
    registry::BlobCell,
};

/// BLOB 的只读视图。
///
/// # 教案式说明
/// - **意图 (Why)**：接收方凭标识拿到消费者，直接从共享的后备缓冲读取负载，不做拷贝；
/// - **契约 (What)**：
///   - 每个消费者持有自己的 [`ReadCursor`]，同一 BLOB 的多个消费者互不干扰；
///   - `drain_to` 排空到外部可写汇，`consume` 把剩余区域整体交给回调，
///     `length` 返回剩余可读字节，`rewind_to_start` 回到偏移 0；
///   - `finish` 对每个实例幂等，释放该消费者的领取；
///     生产者已结束且最后一个领取释放时 BLOB 被处置。
/// - **注意 (Trade-offs)**：未 `finish` 就丢弃的消费者只记录告警，不会处置 BLOB，
///   其领取会一直占用登记表直到进程退出。
pub struct BlobConsumer {
    shared: Arc<Shared>,
    cell: Arc<BlobCell>,
    cursor: ReadCursor,
    finished: bool,
}

impl BlobConsumer {
    pub(crate) fn new(shared: Arc<Shared>, cell: Arc<BlobCell>) -> Self {
        Self {
            shared,
            cell,
            cursor: ReadCursor::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> BlobId {
        self.cell.id()
    }

    fn guard(&self, operation: &'static str) -> Result<()> {
        if self.finished {
            return Err(BlobError::use_after_finish(self.id(), operation));
        }
        Ok(())
    }

    /// 把剩余内容写入外部可写汇，`limit` 为 `Some(n)` 时至多写出 `n` 字节。
    pub fn drain_to(&mut self, dst: &mut dyn io::Write, limit: Option<usize>) -> Result<usize> {
        self.guard("drain_to")?;
        let cursor = &mut self.cursor;
        self.cell
            .read("drain_to", |buffer| Ok(cursor.drain_to(buffer, dst, limit)?))
    }

    /// 把剩余区域整体交给回调，随后推进到末尾。
    pub fn consume<R>(&mut self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.guard("consume")?;
        let cursor = &mut self.cursor;
        self.cell
            .read("consume", |buffer| Ok(cursor.consume(buffer, f)))
    }

    /// 剩余可读字节。
    pub fn length(&self) -> Result<usize> {
        self.guard("length")?;
        self.cell
            .read("length", |buffer| Ok(self.cursor.remaining(buffer)))
    }

    pub fn rewind_to_start(&mut self) -> Result<()> {
        self.guard("rewind_to_start")?;
        if self.cell.is_disposed() {
            return Err(BlobError::use_after_finish(self.id(), "rewind_to_start"));
        }
        self.cursor.rewind();
        Ok(())
    }

    /// 结束读取，重复调用无副作用。
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shared.release_consumer(self.id());
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for BlobConsumer {
    fn drop(&mut self) {
        if !self.finished && !self.cell.is_disposed() {
            tracing::warn!(blob_id = %self.id(), "blob consumer dropped without finish");
        }
    }
}

impl fmt::Debug for BlobConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobConsumer")
            .field("id", &self.id())
            .field("position", &self.cursor.position())
            .field("finished", &self.finished)
            .finish()
    }
}
