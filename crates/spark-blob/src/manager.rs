//! BLOB 管理器门面。
//!
//! # 模块定位（Why）
//! - 签发标识、构造生产者、把标识解析为消费者，并编排登记表与缓存之间的迁移；
//! - 管理器是显式的上下文对象，按进程或按服务实例创建一次，克隆后传给需要 BLOB 服务的调用点，
//!   不存在全局单例。
//!
//! # 并发模型（How）
//! - 登记表、缓存与两个计数器共享一把 `spin::Mutex`，锁内操作都不等待 I/O，
//!   时延只取决于缓存规模与回收队列长度；
//! - 闲置缓冲停放在独立加锁的竞技场里，[`IdleReclaimer`] 可在任意线程回收，
//!   回收报告由下一次分配前的清理过程消化；
//! - 加锁顺序固定为“管理器锁 → 竞技场锁”；BLOB 自身的读写锁从不在管理器锁内获取。
//!
//! # 处置策略（What）
//! - 生产者与每个消费者各占一份领取，全部领取都释放时才处置；
//! - 生产者 `finish` 时若没有未结束的消费者则立即处置，否则交给最后一个消费者；
//!   生产者未结束时，消费者全部结束也不会处置；
//! - 处置后缓冲以 `(容量, 插入序号)` 入缓存；配置了 `max_idle_bytes` 时按停放先后回收超出部分。

use std::{io, sync::Arc};

use bytes::Buf;
use spark_buffer::{BufferFactory, BufferWriter, DefaultBufferFactory};
use spin::Mutex;

use crate::{
    arena::{IdleArena, IdleReclaimer},
    cache::{CacheDesync, CacheKey, CapacityCache},
    config::BlobManagerConfig,
    consumer::BlobConsumer,
    error::{BlobError, Result, codes},
    id::{BlobId, IdSequence},
    producer::BlobProducer,
    registry::{ActiveRegistry, BlobCell, Release},
    stats::{BlobMetrics, BlobStats},
};

struct ManagerState {
    registry: ActiveRegistry,
    cache: CapacityCache,
    blob_ids: IdSequence,
    cache_ids: IdSequence,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            registry: ActiveRegistry::default(),
            cache: CapacityCache::default(),
            blob_ids: IdSequence::starting_at_one(),
            cache_ids: IdSequence::starting_at_one(),
        }
    }
}

/// 生产者、消费者与管理器句柄共享的内部状态。
pub(crate) struct Shared {
    state: Mutex<ManagerState>,
    arena: Arc<IdleArena>,
    factory: Arc<dyn BufferFactory>,
    config: BlobManagerConfig,
    metrics: BlobMetrics,
}

impl Shared {
    /// 消化回收队列：逐个从缓存删除被回收的句柄。
    fn cleanup(&self, state: &mut ManagerState) {
        let reclaimed = self.arena.drain_reclaimed();
        if reclaimed.is_empty() {
            return;
        }
        tracing::trace!(count = reclaimed.len(), "draining reclaimed blob buffers");
        for handle in reclaimed {
            if let Err(desync) = state.cache.remove_reclaimed(handle) {
                cache_desync(desync);
            }
        }
    }

    /// 取得一块至少 `indicative_size` 字节、已清空的缓冲，并登记为新的活跃 BLOB。
    fn construct_cell(&self, indicative_size: usize) -> Result<Arc<BlobCell>> {
        let reused = {
            let mut state = self.state.lock();
            self.cleanup(&mut state);
            let found = state
                .cache
                .take_best_fit(indicative_size, |handle| self.arena.take(handle));
            self.metrics.record_stale(found.stale_skipped);
            found.hit.map(|(_, buffer)| buffer)
        };

        let (mut buffer, was_reused) = match reused {
            Some(buffer) => {
                self.metrics.record_hit();
                (buffer, true)
            }
            None => {
                let buffer = self.factory.allocate(indicative_size)?;
                self.metrics.record_miss(buffer.capacity());
                (buffer, false)
            }
        };
        buffer.clear();
        let capacity = buffer.capacity();

        let cell = {
            let mut state = self.state.lock();
            let id = state.blob_ids.next_blob_id();
            let cell = Arc::new(BlobCell::new(id, buffer));
            state.registry.register(Arc::clone(&cell));
            cell
        };
        tracing::debug!(
            blob_id = %cell.id(),
            indicative_size,
            capacity,
            reused = was_reused,
            "constructed blob"
        );
        Ok(cell)
    }

    fn acquire_consumer(&self, id: BlobId) -> Option<Arc<BlobCell>> {
        self.state.lock().registry.acquire_consumer(id)
    }

    pub(crate) fn finish_producer(&self, id: BlobId) {
        let release = self.state.lock().registry.finish_producer(id);
        self.apply(id, release);
    }

    pub(crate) fn release_consumer(&self, id: BlobId) {
        let release = self.state.lock().registry.release_consumer(id);
        self.apply(id, release);
    }

    fn apply(&self, id: BlobId, release: Release) {
        match release {
            Release::Dispose(cell) => self.dispose(&cell),
            Release::Retained => {
                tracing::trace!(blob_id = %id, "blob retained by outstanding holders")
            }
            Release::Absent => {}
        }
    }

    /// 锁外取出缓冲，再回到锁内停放并入缓存。
    fn dispose(&self, cell: &BlobCell) {
        let Some(buffer) = cell.take_buffer() else {
            return;
        };
        let capacity = buffer.capacity();
        {
            let mut state = self.state.lock();
            let handle = self.arena.park(buffer);
            let insertion = state.cache_ids.next();
            state.cache.insert(
                CacheKey {
                    capacity,
                    insertion,
                },
                handle,
            );
        }
        self.metrics.record_disposal();
        tracing::debug!(blob_id = %cell.id(), capacity, "disposed blob");

        if let Some(max_idle_bytes) = self.config.max_idle_bytes {
            let outcome = self.arena.reclaim_until(max_idle_bytes);
            if outcome.buffers > 0 {
                tracing::warn!(
                    buffers = outcome.buffers,
                    bytes = outcome.bytes,
                    max_idle_bytes,
                    "idle blob buffers exceeded budget, reclaimed oldest"
                );
            }
        }
    }

    fn consumer_for(self: &Arc<Self>, id: BlobId) -> Result<BlobConsumer> {
        match self.acquire_consumer(id) {
            Some(cell) => {
                tracing::debug!(blob_id = %id, "retrieved blob consumer");
                Ok(BlobConsumer::new(Arc::clone(self), cell))
            }
            None => {
                tracing::debug!(blob_id = %id, "unknown blob identifier");
                Err(BlobError::UnknownIdentifier { id })
            }
        }
    }
}

#[cold]
#[inline(never)]
fn cache_desync(desync: CacheDesync) -> ! {
    tracing::error!(
        code = codes::BLOB_CACHE_INVARIANT,
        handle = %desync.handle,
        "reclaimed buffer is missing from the blob cache"
    );
    panic!(
        "blob cache desynchronized: reclaimed handle {} is not cached",
        desync.handle
    );
}

/// BLOB 管理器。
///
/// # 教案式说明
/// - **意图 (Why)**：大负载只写一次，之后凭 8 字节标识在同进程的工作上下文之间传递；
/// - **契约 (What)**：
///   - [`construct_blob`](Self::construct_blob)：best-fit 复用或按指示大小新分配，返回生产者；
///   - [`construct_blob_with`](Self::construct_blob_with)：一次性填充整段负载并返回消费者，
///     回调失败时 BLOB 被处置、错误原样返回；
///   - [`retrieve_consumer`](Self::retrieve_consumer)：从消息读出标识并解析，
///     未知标识返回 [`BlobError::UnknownIdentifier`]，从不以空 BLOB 代替；
///   - 回收报告与缓存失步属于不可恢复故障，记录 `blob.cache_invariant` 后 panic。
/// - **使用 (How)**：
/// ```rust
/// use spark_blob::BlobManager;
///
/// let manager = BlobManager::default();
/// let mut producer = manager.construct_blob(64).expect("构造 BLOB");
/// producer.produce(|w| w.put_slice(b"payload").map_err(Into::into)).expect("写入负载");
///
/// let mut message = Vec::new();
/// producer.write_block(&mut message).expect("写出标识");
///
/// let mut consumer = manager.retrieve_consumer(&mut message.as_slice()).expect("解析标识");
/// let mut out = Vec::new();
/// consumer.drain_to(&mut out, None).expect("读取负载");
/// consumer.finish();
/// producer.finish();
/// assert_eq!(out, b"payload");
/// assert_eq!(manager.active_blobs(), 0);
/// ```
#[derive(Clone)]
pub struct BlobManager {
    shared: Arc<Shared>,
}

impl BlobManager {
    /// 校验配置并使用 [`DefaultBufferFactory`] 创建管理器。
    pub fn new(config: BlobManagerConfig) -> Result<Self> {
        config.validate()?;
        let factory = Arc::new(DefaultBufferFactory::new(config.growth));
        Ok(Self::assemble(config, factory))
    }

    /// 使用自定义缓冲工厂创建管理器。
    pub fn with_factory(
        config: BlobManagerConfig,
        factory: Arc<dyn BufferFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, factory))
    }

    fn assemble(config: BlobManagerConfig, factory: Arc<dyn BufferFactory>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ManagerState::new()),
                arena: Arc::new(IdleArena::default()),
                factory,
                config,
                metrics: BlobMetrics::default(),
            }),
        }
    }

    pub fn config(&self) -> &BlobManagerConfig {
        &self.shared.config
    }

    /// 构造一个至少 `indicative_size` 字节的 BLOB，返回其生产者。
    pub fn construct_blob(&self, indicative_size: usize) -> Result<BlobProducer> {
        let cell = self.shared.construct_cell(indicative_size)?;
        Ok(BlobProducer::new(Arc::clone(&self.shared), cell))
    }

    /// 构造 BLOB 并用回调一次性填充，返回同一标识上的消费者。
    pub fn construct_blob_with<F>(
        &self,
        indicative_size: usize,
        populate: F,
    ) -> Result<BlobConsumer>
    where
        F: FnOnce(&mut BufferWriter<'_>) -> io::Result<()>,
    {
        let mut producer = self.construct_blob(indicative_size)?;
        if let Err(err) = producer.produce(populate) {
            producer.finish();
            return Err(err);
        }
        let consumer = self.shared.consumer_for(producer.id());
        producer.finish();
        consumer
    }

    /// 从消息中读出 8 字节标识并解析为消费者。
    pub fn retrieve_consumer(&self, reader: &mut impl Buf) -> Result<BlobConsumer> {
        let id = BlobId::read_from(reader)?;
        self.consumer_for(id)
    }

    /// 按标识解析消费者，省去消息解码这一步。
    pub fn consumer_for(&self, id: BlobId) -> Result<BlobConsumer> {
        self.shared.consumer_for(id)
    }

    /// 面向内存压力钩子的回收句柄。
    pub fn reclaimer(&self) -> IdleReclaimer {
        IdleReclaimer::new(Arc::clone(&self.shared.arena))
    }

    /// 回收全部闲置缓冲并清理缓存，返回释放的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        let outcome = self.shared.arena.reclaim_until(0);
        {
            let mut state = self.shared.state.lock();
            self.shared.cleanup(&mut state);
        }
        tracing::debug!(
            buffers = outcome.buffers,
            bytes = outcome.bytes,
            "shrank blob cache"
        );
        outcome.bytes
    }

    pub fn statistics(&self) -> BlobStats {
        let mut stats = BlobStats::default();
        {
            let mut state = self.shared.state.lock();
            self.shared.cleanup(&mut state);
            stats.active_blobs = state.registry.len();
            stats.cached_entries = state.cache.len();
        }
        stats.idle_bytes = self.shared.arena.idle_bytes();
        stats.reclaimed_buffers = self.shared.arena.reclaimed_total();
        self.shared.metrics.fill(&mut stats);
        stats
    }

    /// 活跃（已构造、未处置）的 BLOB 数。
    pub fn active_blobs(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    /// 缓存中的闲置缓冲数（先消化回收队列）。
    pub fn cached_buffers(&self) -> usize {
        let mut state = self.shared.state.lock();
        self.shared.cleanup(&mut state);
        state.cache.len()
    }
}

impl Default for BlobManager {
    fn default() -> Self {
        let config = BlobManagerConfig::default();
        let factory = Arc::new(DefaultBufferFactory::new(config.growth));
        Self::assemble(config, factory)
    }
}

impl std::fmt::Debug for BlobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobManager")
            .field("config", &self.shared.config)
            .field("statistics", &self.statistics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use spark_buffer::{BufferError, GrowableBuffer, GrowthPolicy};

    use super::*;

    fn manager() -> BlobManager {
        BlobManager::default()
    }

    /// 构造并立即处置一个 BLOB，返回其缓冲容量。
    fn park_idle(manager: &BlobManager, size: usize) -> usize {
        let mut producer = manager.construct_blob(size).expect("构造 BLOB");
        let capacity = producer.capacity().expect("查询容量");
        producer.finish();
        capacity
    }

    fn cached_handle(manager: &BlobManager, capacity: usize) -> crate::arena::ArenaHandle {
        manager
            .shared
            .state
            .lock()
            .cache
            .handle_with_capacity(capacity)
            .expect("缓存中应有该容量的条目")
    }

    #[test]
    fn stale_entry_mid_scan_falls_through_to_next_candidate() {
        let manager = manager();
        let small = park_idle(&manager, 100);
        let middle = park_idle(&manager, 250);
        let large = park_idle(&manager, 400);

        // 回收已发生、报告尚未送达：扫描必须跳过失效条目。
        let stale = cached_handle(&manager, middle);
        assert!(manager.shared.arena.reclaim_deferred(stale));

        let mut producer = manager.construct_blob(200).expect("构造 BLOB");
        assert_eq!(producer.capacity().expect("查询容量"), large);
        producer.finish();

        let stats = manager.statistics();
        assert_eq!(stats.stale_entries_skipped, 1);
        assert_eq!(stats.cache_hits, 1);

        // 报告晚到：条目已被自愈移除，不构成失步。
        manager.shared.arena.deliver_deferred();
        let mut again = manager.construct_blob(small).expect("构造 BLOB");
        assert_eq!(again.capacity().expect("查询容量"), small);
        again.finish();
    }

    #[test]
    fn stale_only_candidate_falls_through_to_fresh_allocation() {
        let manager = manager();
        let capacity = park_idle(&manager, 300);
        let stale = cached_handle(&manager, capacity);
        assert!(manager.shared.arena.reclaim_deferred(stale));

        let before = manager.statistics();
        let mut producer = manager.construct_blob(200).expect("构造 BLOB");
        producer.finish();
        let after = manager.statistics();
        assert_eq!(after.cache_misses, before.cache_misses + 1);
        assert_eq!(after.stale_entries_skipped, 1);
    }

    #[test]
    fn reported_reclamation_is_removed_before_lookup() {
        let manager = manager();
        let capacity = park_idle(&manager, 128);
        let handle = cached_handle(&manager, capacity);
        assert!(manager.shared.arena.reclaim(handle));

        let mut producer = manager.construct_blob(64).expect("构造 BLOB");
        producer.finish();
        let stats = manager.statistics();
        assert_eq!(stats.stale_entries_skipped, 0);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.reclaimed_buffers, 1);
    }

    #[test]
    #[should_panic(expected = "blob cache desynchronized")]
    fn unknown_reclaimed_handle_is_fatal() {
        let manager = manager();
        let orphan = manager
            .shared
            .arena
            .park(GrowableBuffer::with_capacity(8, GrowthPolicy::default()));
        assert!(manager.shared.arena.reclaim(orphan));
        let _ = manager.construct_blob(8);
    }

    #[test]
    fn populate_failure_disposes_blob() {
        let manager = manager();
        let err = manager
            .construct_blob_with(32, |writer| {
                writer.put_slice(b"partial")?;
                Err(io::Error::new(io::ErrorKind::InvalidData, "source went away"))
            })
            .expect_err("回调失败应返回错误");
        match err {
            BlobError::Buffer(BufferError::Io(inner)) => {
                assert_eq!(inner.kind(), io::ErrorKind::InvalidData)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(manager.active_blobs(), 0);
        assert_eq!(manager.cached_buffers(), 1);
    }
}
