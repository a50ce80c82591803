//! 闲置缓冲竞技场（arena）与回收队列。
//!
//! # 模块定位（Why）
//! - 已处置 BLOB 的后备缓冲停放在这里，缓存条目只持有一个非拥有的 [`ArenaHandle`]；
//! - 句柄带代际号：槽位被取走或被回收后代际号递增，旧句柄随之失效，
//!   相当于一个可以被撤销的弱引用；
//! - 回收（内存压力下释放闲置缓冲）只需竞技场自己的锁，可以在任意线程上进行，
//!   被回收的句柄进入回收队列，由管理器在下一次分配前统一清理缓存。
//!
//! # 契约说明（What）
//! - `take` 是“升级并取走”：成功时缓冲的所有权移交给调用方，不产生回收报告；
//! - `reclaim` 丢弃缓冲并把句柄压入回收队列，每个句柄至多报告一次；
//! - 闲置总量 `idle_bytes` 按停放时的容量统计。

use std::{collections::VecDeque, fmt, mem, sync::Arc};

use spark_buffer::GrowableBuffer;
use spin::Mutex;

/// 指向竞技场槽位的代际句柄。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ArenaHandle {
    index: usize,
    generation: u64,
}

impl fmt::Display for ArenaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}@{}", self.index, self.generation)
    }
}

/// 一次回收动作的结果。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    pub buffers: usize,
    pub bytes: usize,
}

struct ArenaSlot {
    generation: u64,
    buffer: Option<GrowableBuffer>,
}

#[derive(Default)]
struct ArenaState {
    slots: Vec<ArenaSlot>,
    free: Vec<usize>,
    parked_order: VecDeque<ArenaHandle>,
    reclaimed: Vec<ArenaHandle>,
    #[cfg(test)]
    deferred: Vec<ArenaHandle>,
    idle_bytes: usize,
    idle_buffers: usize,
    reclaimed_total: u64,
}

impl ArenaState {
    fn is_live(&self, handle: ArenaHandle) -> bool {
        self.slots
            .get(handle.index)
            .is_some_and(|slot| slot.generation == handle.generation && slot.buffer.is_some())
    }

    fn park(&mut self, buffer: GrowableBuffer) -> ArenaHandle {
        self.idle_bytes += buffer.capacity();
        self.idle_buffers += 1;
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.buffer = Some(buffer);
                ArenaHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len();
                self.slots.push(ArenaSlot {
                    generation: 0,
                    buffer: Some(buffer),
                });
                ArenaHandle {
                    index,
                    generation: 0,
                }
            }
        };
        self.parked_order.push_back(handle);
        self.compact_order();
        handle
    }

    fn release(&mut self, handle: ArenaHandle) -> Option<GrowableBuffer> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let buffer = slot.buffer.take()?;
        slot.generation += 1;
        self.free.push(handle.index);
        self.idle_bytes -= buffer.capacity();
        self.idle_buffers -= 1;
        Some(buffer)
    }

    fn reclaim(&mut self, handle: ArenaHandle) -> Option<usize> {
        let buffer = self.release(handle)?;
        self.reclaimed.push(handle);
        self.reclaimed_total += 1;
        Some(buffer.capacity())
    }

    /// 被取走的句柄仍留在停放顺序里，数量明显多于存活缓冲时整理一次。
    fn compact_order(&mut self) {
        if self.parked_order.len() <= self.idle_buffers * 2 + 16 {
            return;
        }
        let order = mem::take(&mut self.parked_order);
        self.parked_order = order
            .into_iter()
            .filter(|handle| self.is_live(*handle))
            .collect();
    }
}

/// 闲置缓冲的停放处。
#[derive(Default)]
pub(crate) struct IdleArena {
    state: Mutex<ArenaState>,
}

impl IdleArena {
    pub(crate) fn park(&self, buffer: GrowableBuffer) -> ArenaHandle {
        self.state.lock().park(buffer)
    }

    pub(crate) fn take(&self, handle: ArenaHandle) -> Option<GrowableBuffer> {
        self.state.lock().release(handle)
    }

    #[cfg(test)]
    pub(crate) fn is_live(&self, handle: ArenaHandle) -> bool {
        self.state.lock().is_live(handle)
    }

    #[cfg(test)]
    pub(crate) fn reclaim(&self, handle: ArenaHandle) -> bool {
        self.state.lock().reclaim(handle).is_some()
    }

    /// 按停放先后回收，直到闲置总量不超过 `max_idle_bytes`。
    pub(crate) fn reclaim_until(&self, max_idle_bytes: usize) -> ReclaimOutcome {
        let mut state = self.state.lock();
        let mut outcome = ReclaimOutcome::default();
        while state.idle_bytes > max_idle_bytes {
            let Some(handle) = state.parked_order.pop_front() else {
                break;
            };
            if let Some(bytes) = state.reclaim(handle) {
                outcome.buffers += 1;
                outcome.bytes += bytes;
            }
        }
        outcome
    }

    /// 取出回收队列中的全部句柄。
    pub(crate) fn drain_reclaimed(&self) -> Vec<ArenaHandle> {
        mem::take(&mut self.state.lock().reclaimed)
    }

    pub(crate) fn idle_bytes(&self) -> usize {
        self.state.lock().idle_bytes
    }

    pub(crate) fn idle_buffers(&self) -> usize {
        self.state.lock().idle_buffers
    }

    pub(crate) fn reclaimed_total(&self) -> u64 {
        self.state.lock().reclaimed_total
    }

    /// 模拟“已被回收但报告尚未送达”：释放槽位，报告暂存到 [`Self::deliver_deferred`]。
    #[cfg(test)]
    pub(crate) fn reclaim_deferred(&self, handle: ArenaHandle) -> bool {
        let mut state = self.state.lock();
        match state.release(handle) {
            Some(_) => {
                state.deferred.push(handle);
                state.reclaimed_total += 1;
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn deliver_deferred(&self) {
        let mut state = self.state.lock();
        let deferred = mem::take(&mut state.deferred);
        state.reclaimed.extend(deferred);
    }
}

/// 面向内存压力钩子的回收句柄。
///
/// 可克隆、可跨线程传递；只触碰竞技场自己的锁，不会与管理器锁竞争。
/// 被回收的缓冲会在管理器下一次分配前从缓存中清理。
#[derive(Clone)]
pub struct IdleReclaimer {
    arena: Arc<IdleArena>,
}

impl IdleReclaimer {
    pub(crate) fn new(arena: Arc<IdleArena>) -> Self {
        Self { arena }
    }

    /// 回收最早停放的闲置缓冲，直到闲置总量不超过 `max_idle_bytes`。
    pub fn reclaim_until(&self, max_idle_bytes: usize) -> ReclaimOutcome {
        let outcome = self.arena.reclaim_until(max_idle_bytes);
        if outcome.buffers > 0 {
            tracing::debug!(
                buffers = outcome.buffers,
                bytes = outcome.bytes,
                max_idle_bytes,
                "reclaimed idle blob buffers"
            );
        }
        outcome
    }

    /// 回收全部闲置缓冲。
    pub fn reclaim_all(&self) -> ReclaimOutcome {
        self.reclaim_until(0)
    }

    pub fn idle_bytes(&self) -> usize {
        self.arena.idle_bytes()
    }

    pub fn idle_buffers(&self) -> usize {
        self.arena.idle_buffers()
    }
}

impl fmt::Debug for IdleReclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleReclaimer")
            .field("idle_bytes", &self.idle_bytes())
            .finish()
    }
}
