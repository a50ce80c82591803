//! 按容量排序的闲置缓冲缓存。
//!
//! # 设计背景（Why）
//! - 复用已处置 BLOB 的后备缓冲，按 `(容量, 插入序号)` 全序排列，
//!   同容量条目按插入先后稳定排序；
//! - 条目只持有 [`ArenaHandle`]，缓冲本身停放在竞技场，可能随时被回收。
//!
//! # 契约说明（What）
//! - `take_best_fit` 自 `(min_capacity, 0)` 起做 ceiling 查找，沿途遇到的失效条目一律移除（自愈）；
//! - `remove_reclaimed` 按句柄身份删除；被自愈扫描提前移除的句柄同样视为已处理；
//! - 条目写入后不再原地修改。

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::arena::ArenaHandle;

/// 缓存条目的排序键。
///
/// 先按容量升序，再按插入序号升序。插入序号从 1 开始，
/// 因此 `(n, 0)` 恰好排在所有容量为 `n` 的条目之前。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct CacheKey {
    pub(crate) capacity: usize,
    pub(crate) insertion: u64,
}

impl CacheKey {
    pub(crate) const fn search(min_capacity: usize) -> Self {
        Self {
            capacity: min_capacity,
            insertion: 0,
        }
    }
}

/// 回收报告的句柄既不在缓存中，也不曾被自愈移除。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheDesync {
    pub(crate) handle: ArenaHandle,
}

/// 一次 best-fit 查找的结果：命中的条目及沿途跳过的失效条目数。
#[derive(Debug)]
pub(crate) struct BestFit<T> {
    pub(crate) hit: Option<(CacheKey, T)>,
    pub(crate) stale_skipped: usize,
}

#[derive(Debug, Default)]
pub(crate) struct CapacityCache {
    entries: BTreeMap<CacheKey, ArenaHandle>,
    by_handle: HashMap<ArenaHandle, CacheKey>,
    healed: HashSet<ArenaHandle>,
}

impl CapacityCache {
    pub(crate) fn insert(&mut self, key: CacheKey, handle: ArenaHandle) {
        self.entries.insert(key, handle);
        self.by_handle.insert(handle, key);
    }

    /// 取出容量不小于 `min_capacity` 的最小存活条目。
    ///
    /// `upgrade` 尝试把句柄升级为所有权；返回 `None` 表示条目已失效，
    /// 该条目被丢弃并记入自愈集合，扫描继续向更大的容量推进。
    pub(crate) fn take_best_fit<T>(
        &mut self,
        min_capacity: usize,
        mut upgrade: impl FnMut(ArenaHandle) -> Option<T>,
    ) -> BestFit<T> {
        let mut stale_skipped = 0;
        loop {
            let Some((&key, &handle)) = self.entries.range(CacheKey::search(min_capacity)..).next()
            else {
                return BestFit {
                    hit: None,
                    stale_skipped,
                };
            };
            self.entries.remove(&key);
            self.by_handle.remove(&handle);
            match upgrade(handle) {
                Some(value) => {
                    return BestFit {
                        hit: Some((key, value)),
                        stale_skipped,
                    };
                }
                None => {
                    tracing::trace!(%handle, capacity = key.capacity, "skipped stale cache entry");
                    self.healed.insert(handle);
                    stale_skipped += 1;
                }
            }
        }
    }

    /// 处理一条回收报告。
    pub(crate) fn remove_reclaimed(&mut self, handle: ArenaHandle) -> Result<(), CacheDesync> {
        if let Some(key) = self.by_handle.remove(&handle) {
            self.entries.remove(&key);
            return Ok(());
        }
        if self.healed.remove(&handle) {
            return Ok(());
        }
        Err(CacheDesync { handle })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn capacities(&self) -> Vec<usize> {
        self.entries.keys().map(|key| key.capacity).collect()
    }

    #[cfg(test)]
    pub(crate) fn handle_with_capacity(&self, capacity: usize) -> Option<ArenaHandle> {
        self.entries
            .iter()
            .find(|(key, _)| key.capacity == capacity)
            .map(|(_, handle)| *handle)
    }
}
