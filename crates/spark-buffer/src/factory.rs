use serde::{Deserialize, Serialize};

use crate::{
    error::{BufferError, Result},
    growable::GrowableBuffer,
};

/// `GrowthPolicy` 描述可增长缓冲的扩容规则。
///
/// # 契约说明（What）
/// - `growth_factor`：扩容时在当前容量上乘以的系数，必须是有限值且不小于 `1.0`；
///   实际目标容量为 `max(所需容量, ceil(当前容量 * growth_factor))`；
/// - `max_capacity`：可选的容量上限，`None` 表示不设限；
///   超过上限的写入或分配返回 [`BufferError::CapacityExceeded`]。
///
/// # 使用方式（How）
/// - 随 [`DefaultBufferFactory`] 注入，工厂分配出的每个缓冲都携带一份副本；
/// - 支持 `serde` 反序列化，可直接嵌入上层配置文件。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrowthPolicy {
    pub growth_factor: f64,
    pub max_capacity: Option<usize>,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            growth_factor: 2.0,
            max_capacity: None,
        }
    }
}

impl GrowthPolicy {
    /// 以指定扩容系数构造策略，不设容量上限。
    pub fn with_factor(growth_factor: f64) -> Self {
        Self {
            growth_factor,
            max_capacity: None,
        }
    }

    /// 设置容量上限。
    pub fn with_max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = Some(max_capacity);
        self
    }

    /// 生效的容量上限；未设置时为 `usize::MAX`。
    pub fn limit(&self) -> usize {
        self.max_capacity.unwrap_or(usize::MAX)
    }

    /// 判断总容量 `total` 是否落在上限之内。
    pub fn admits(&self, total: usize) -> bool {
        total <= self.limit()
    }

    /// 计算从 `current` 扩容到至少 `required` 时的目标容量。
    ///
    /// - `required` 超过上限时返回 [`BufferError::CapacityExceeded`]；
    /// - 按系数放大后的结果会被截断到上限，但不会低于 `required`。
    pub fn next_capacity(&self, current: usize, required: usize) -> Result<usize> {
        let limit = self.limit();
        if required > limit {
            return Err(BufferError::CapacityExceeded {
                requested: required,
                limit,
            });
        }
        let scaled = scale(current, self.growth_factor);
        Ok(scaled.max(required).min(limit))
    }
}

fn scale(current: usize, factor: f64) -> usize {
    let scaled = (current as f64 * factor).ceil();
    if scaled.is_finite() && scaled < usize::MAX as f64 {
        scaled as usize
    } else {
        usize::MAX
    }
}

/// `BufferFactory` 是 BLOB 管理器获取全新后备缓冲的唯一入口。
///
/// # 契约说明（What）
/// - `allocate(indicative_size)` 返回容量至少为 `indicative_size` 的空缓冲；
/// - 实现必须线程安全，管理器会在多个工作线程之间共享同一个工厂；
/// - 分配失败（例如超过容量上限）需以 [`BufferError`] 报告，不得 panic。
pub trait BufferFactory: Send + Sync + 'static {
    /// 分配一个新的后备缓冲。
    fn allocate(&self, indicative_size: usize) -> Result<GrowableBuffer>;
}

/// 默认工厂：按指示大小精确分配，并把 [`GrowthPolicy`] 附着到每个缓冲上。
#[derive(Clone, Debug, Default)]
pub struct DefaultBufferFactory {
    policy: GrowthPolicy,
}

impl DefaultBufferFactory {
    /// 使用给定增长策略创建工厂。
    pub fn new(policy: GrowthPolicy) -> Self {
        Self { policy }
    }

    /// 返回工厂附着到缓冲上的增长策略。
    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }
}

impl BufferFactory for DefaultBufferFactory {
    fn allocate(&self, indicative_size: usize) -> Result<GrowableBuffer> {
        if !self.policy.admits(indicative_size) {
            return Err(BufferError::CapacityExceeded {
                requested: indicative_size,
                limit: self.policy.limit(),
            });
        }
        Ok(GrowableBuffer::with_capacity(indicative_size, self.policy))
    }
}
