use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// 管理器运行指标快照。
///
/// # 契约说明（What）
/// - `active_blobs`/`cached_entries`：取快照时登记表与缓存中的条目数；
/// - `idle_bytes`：竞技场中闲置缓冲的容量总和；
/// - `cache_hits`/`cache_misses`：构造 BLOB 时复用与新分配的次数；
/// - `fresh_allocated_bytes`：新分配缓冲的初始容量累计；
/// - `disposed_blobs`：已处置的 BLOB 数；
/// - `reclaimed_buffers`：被回收（丢弃）的闲置缓冲数；
/// - `stale_entries_skipped`：best-fit 扫描中自愈移除的失效条目数。
///
/// 计数器使用 `Relaxed` 原子操作累加，快照各字段之间不保证同一时刻的一致性。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlobStats {
    pub active_blobs: usize,
    pub cached_entries: usize,
    pub idle_bytes: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fresh_allocated_bytes: usize,
    pub disposed_blobs: u64,
    pub reclaimed_buffers: u64,
    pub stale_entries_skipped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct BlobMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fresh_allocated_bytes: AtomicUsize,
    disposed_blobs: AtomicU64,
    stale_entries_skipped: AtomicU64,
}

impl BlobMetrics {
    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self, capacity: usize) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.fresh_allocated_bytes
            .fetch_add(capacity, Ordering::Relaxed);
    }

    pub(crate) fn record_disposal(&self) {
        self.disposed_blobs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self, skipped: usize) {
        if skipped > 0 {
            self.stale_entries_skipped
                .fetch_add(skipped as u64, Ordering::Relaxed);
        }
    }

    /// 把计数器部分填入快照，容量类字段由调用方补齐。
    pub(crate) fn fill(&self, stats: &mut BlobStats) {
        stats.cache_hits = self.cache_hits.load(Ordering::Relaxed);
        stats.cache_misses = self.cache_misses.load(Ordering::Relaxed);
        stats.fresh_allocated_bytes = self.fresh_allocated_bytes.load(Ordering::Relaxed);
        stats.disposed_blobs = self.disposed_blobs.load(Ordering::Relaxed);
        stats.stale_entries_skipped = self.stale_entries_skipped.load(Ordering::Relaxed);
    }
}
