use std::{fmt, io, sync::Arc};

use bytes::BufMut;
use spark_buffer::BufferWriter;

use crate::{
    error::{BlobError, Result},
    id::BlobId,
    manager::Shared,
    registry::BlobCell,
};

/// BLOB 的写入端。
///
/// # 教案式说明
/// - **意图 (Why)**：生产者在发布标识之前独占地写入负载，写入发生在管理器锁之外，
///   只占用该 BLOB 自己的写锁；
/// - **契约 (What)**：
///   - `fill_from`/`produce` 追加数据，增长按缓冲的 [`spark_buffer::GrowthPolicy`] 进行；
///   - `write_block` 把 8 字节标识写入普通消息，接收方用
///     [`crate::BlobManager::retrieve_consumer`] 解析；
///   - 生产者本身占一份领取：消费者先结束不会处置 BLOB，生产者在 `finish` 之前始终可写；
///   - `finish` 可重入，只有第一次调用生效；没有未结束的消费者时 BLOB 立即处置，
///     否则由最后一个消费者的 `finish` 处置；
///   - `finish` 之后任何操作都返回 [`BlobError::UseAfterFinish`]。
/// - **注意 (Trade-offs)**：析构不会自动 `finish`，只记录告警；发布标识后仍需显式 `finish`，
///   否则 BLOB 会一直留在登记表中。
pub struct BlobProducer {
    shared: Arc<Shared>,
    cell: Arc<BlobCell>,
    finished: bool,
}

impl BlobProducer {
    pub(crate) fn new(shared: Arc<Shared>, cell: Arc<BlobCell>) -> Self {
        Self {
            shared,
            cell,
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

    /// 从外部可读源填充，`limit` 为 `Some(n)` 时至多读取 `n` 字节；返回实际读取量。
    pub fn fill_from(&mut self, src: &mut dyn io::Read, limit: Option<usize>) -> Result<usize> {
        self.guard("fill_from")?;
        self.cell
            .write("fill_from", |buffer| Ok(buffer.fill_from(src, limit)?))
    }

    /// 以回调方式追加结构化数据。
    pub fn produce<R>(
        &mut self,
        populate: impl FnOnce(&mut BufferWriter<'_>) -> io::Result<R>,
    ) -> Result<R> {
        self.guard("produce")?;
        self.cell
            .write("produce", |buffer| Ok(buffer.produce(populate)?))
    }

    /// 当前已写入的字节数。
    pub fn bytes_held(&self) -> Result<usize> {
        self.guard("bytes_held")?;
        self.cell.read("bytes_held", |buffer| Ok(buffer.len()))
    }

    pub fn capacity(&self) -> Result<usize> {
        self.guard("capacity")?;
        self.cell.read("capacity", |buffer| Ok(buffer.capacity()))
    }

    /// 是否还能再追加 `additional` 字节（允许扩容）。
    pub fn can_accept(&self, additional: usize) -> Result<bool> {
        self.guard("can_accept")?;
        self.cell
            .read("can_accept", |buffer| Ok(buffer.can_accept(additional)))
    }

    /// 把标识写入普通消息。
    pub fn write_block(&self, dst: &mut impl BufMut) -> Result<()> {
        self.guard("write_block")?;
        if self.cell.is_disposed() {
            return Err(BlobError::use_after_finish(self.id(), "write_block"));
        }
        self.id().write_to(dst);
        Ok(())
    }

    /// 结束生产。
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shared.finish_producer(self.id());
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for BlobProducer {
    fn drop(&mut self) {
        if !self.finished && !self.cell.is_disposed() {
            tracing::warn!(blob_id = %self.id(), "blob producer dropped without finish");
        }
    }
}

impl fmt::Debug for BlobProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobProducer")
            .field("id", &self.id())
            .field("finished", &self.finished)
            .finish()
    }
}
