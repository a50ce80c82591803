use serde::{Deserialize, Serialize};
use spark_buffer::GrowthPolicy;

use crate::error::{BlobError, Result};

/// `BlobManagerConfig` 汇总管理器的可调参数。
///
/// # 契约说明（What）
/// - `growth`：交给默认缓冲工厂的增长策略（扩容系数、容量上限）；
/// - `max_idle_bytes`：闲置缓冲的总容量预算。每次处置后若闲置总量超出预算，
///   按停放先后顺序回收最早的缓冲；`None` 表示不设预算，`Some(0)` 表示不保留任何闲置缓冲。
///
/// # 使用方式（How）
/// ```rust
/// use spark_blob::BlobManagerConfig;
///
/// let config = BlobManagerConfig::from_toml_str(
///     r#"
///     max_idle_bytes = 1048576
///
///     [growth]
///     growth_factor = 1.5
///     "#,
/// )
/// .expect("配置应合法");
/// assert_eq!(config.max_idle_bytes, Some(1 << 20));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlobManagerConfig {
    pub growth: GrowthPolicy,
    pub max_idle_bytes: Option<usize>,
}

impl BlobManagerConfig {
    /// 解析 TOML 文本并校验。
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|err| BlobError::invalid_config(format!("TOML 解析失败: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth.growth_factor = growth_factor;
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: usize) -> Self {
        self.growth.max_capacity = Some(max_capacity);
        self
    }

    pub fn with_max_idle_bytes(mut self, max_idle_bytes: usize) -> Self {
        self.max_idle_bytes = Some(max_idle_bytes);
        self
    }

    /// 校验参数组合。
    ///
    /// - 扩容系数必须是有限值且不小于 `1.0`；
    /// - 容量上限若设置则不得为 0。
    pub fn validate(&self) -> Result<()> {
        let factor = self.growth.growth_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(BlobError::invalid_config(format!(
                "growth_factor 必须为不小于 1.0 的有限值，实际为 {factor}"
            )));
        }
        if self.growth.max_capacity == Some(0) {
            return Err(BlobError::invalid_config("max_capacity 不得为 0"));
        }
        Ok(())
    }
}
