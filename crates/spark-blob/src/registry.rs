//! 活跃登记表与 BLOB 单元。
//!
//! # 设计背景（Why）
//! - 登记表是活跃 BLOB 的唯一强引用持有者：标识在表中当且仅当 BLOB 已构造且尚未处置；
//! - 负载 I/O 不在管理器锁内进行，因此后备缓冲放在每个 BLOB 自己的读写锁里，
//!   生产者写入取写锁，多个消费者读取取读锁。
//!
//! # 契约说明（What）
//! - 生产者本身算一份领取，每个消费者各算一份；领取与释放都在管理器锁内裁决，
//!   返回的 [`Release`] 告诉调用方是否需要处置；
//! - 只有生产者已结束且全部消费者都已结束时才处置，先结束的消费者不会拆掉仍在写入的 BLOB；
//! - 处置分两步：锁内从表中摘除并标记 `disposed`，锁外取出缓冲交回缓存。

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::RwLock;
use spark_buffer::GrowableBuffer;

use crate::{
    error::{BlobError, Result},
    id::BlobId,
};

/// 一个 BLOB 的共享状态，生产者与消费者都持有它。
#[derive(Debug)]
pub(crate) struct BlobCell {
    id: BlobId,
    buffer: RwLock<Option<GrowableBuffer>>,
    disposed: AtomicBool,
}

impl BlobCell {
    pub(crate) fn new(id: BlobId, buffer: GrowableBuffer) -> Self {
        Self {
            id,
            buffer: RwLock::new(Some(buffer)),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> BlobId {
        self.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// 以写锁访问缓冲；BLOB 已处置时返回 `UseAfterFinish`。
    pub(crate) fn write<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut GrowableBuffer) -> Result<R>,
    ) -> Result<R> {
        if self.is_disposed() {
            return Err(BlobError::use_after_finish(self.id, operation));
        }
        let mut guard = self.buffer.write();
        match guard.as_mut() {
            Some(buffer) => f(buffer),
            None => Err(BlobError::use_after_finish(self.id, operation)),
        }
    }

    /// 以读锁访问缓冲；BLOB 已处置时返回 `UseAfterFinish`。
    pub(crate) fn read<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&GrowableBuffer) -> Result<R>,
    ) -> Result<R> {
        if self.is_disposed() {
            return Err(BlobError::use_after_finish(self.id, operation));
        }
        let guard = self.buffer.read();
        match guard.as_ref() {
            Some(buffer) => f(buffer),
            None => Err(BlobError::use_after_finish(self.id, operation)),
        }
    }

    /// 取走后备缓冲，只在处置流程中调用一次。
    pub(crate) fn take_buffer(&self) -> Option<GrowableBuffer> {
        self.buffer.write().take()
    }
}

/// 登记表对一次释放的裁决。
#[derive(Debug)]
pub(crate) enum Release {
    /// 仍有持有者，BLOB 保持活跃。
    Retained,
    /// 已从登记表摘除，调用方需在锁外完成处置。
    Dispose(Arc<BlobCell>),
    /// 标识已不在表中（此前已处置）。
    Absent,
}

#[derive(Debug)]
struct RegistryEntry {
    cell: Arc<BlobCell>,
    producer_open: bool,
    outstanding_consumers: usize,
}

impl RegistryEntry {
    fn is_released(&self) -> bool {
        !self.producer_open && self.outstanding_consumers == 0
    }
}

#[derive(Debug, Default)]
pub(crate) struct ActiveRegistry {
    entries: HashMap<BlobId, RegistryEntry>,
}

impl ActiveRegistry {
    pub(crate) fn register(&mut self, cell: Arc<BlobCell>) {
        let previous = self.entries.insert(
            cell.id(),
            RegistryEntry {
                cell,
                producer_open: true,
                outstanding_consumers: 0,
            },
        );
        debug_assert!(previous.is_none(), "BLOB 标识被重复登记");
    }

    /// 为一个新的消费者登记领取。
    pub(crate) fn acquire_consumer(&mut self, id: BlobId) -> Option<Arc<BlobCell>> {
        let entry = self.entries.get_mut(&id)?;
        entry.outstanding_consumers += 1;
        Some(Arc::clone(&entry.cell))
    }

    /// 消费者结束：生产者已结束且这是最后一份消费者领取时处置。
    pub(crate) fn release_consumer(&mut self, id: BlobId) -> Release {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Release::Absent;
        };
        entry.outstanding_consumers = entry.outstanding_consumers.saturating_sub(1);
        self.settle(id)
    }

    /// 生产者结束：没有未结束的消费者时立即处置。
    pub(crate) fn finish_producer(&mut self, id: BlobId) -> Release {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Release::Absent;
        };
        entry.producer_open = false;
        self.settle(id)
    }

    fn settle(&mut self, id: BlobId) -> Release {
        match self.entries.get(&id) {
            None => Release::Absent,
            Some(entry) if entry.is_released() => self.remove(id),
            Some(_) => Release::Retained,
        }
    }

    fn remove(&mut self, id: BlobId) -> Release {
        match self.entries.remove(&id) {
            Some(entry) => {
                entry.cell.mark_disposed();
                Release::Dispose(entry.cell)
            }
            None => Release::Absent,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
