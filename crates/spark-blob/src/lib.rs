//! `spark-blob`：进程内大负载的旁路交换。
//!
//! # 模块定位（Why）
//! - 普通消息走固定格式的小缓冲；负载过大或大小多变时，生产者把它写入一块可复用的后备缓冲，
//!   只把 8 字节标识随普通消息发给同进程内另一个工作上下文中的消费者；
//! - 消费者凭标识直接读取共享缓冲，生产者与全部消费者都结束后，
//!   缓冲按容量回到缓存供下次复用。
//!
//! # 设计概要（How）
//! - [`BlobManager`]：显式上下文对象，签发标识、构造 [`BlobProducer`]、解析 [`BlobConsumer`]；
//! - 活跃登记表持有在用 BLOB 的强引用；已处置的缓冲停放在代际竞技场中，
//!   缓存按 `(容量, 插入序号)` 排序、只持有可失效的句柄；
//! - [`IdleReclaimer`] 可在任意线程回收闲置缓冲，管理器在下一次分配前消化回收报告；
//! - 后备缓冲、增长策略与缓冲工厂来自 [`spark_buffer`]。
//!
//! # 错误与日志（What）
//! - [`BlobError`] 携带稳定错误码（见 [`codes`]），I/O 错误原样透传、不做重试；
//! - 缓存与回收报告失步是不可恢复的一致性故障：记录 `blob.cache_invariant` 后 panic；
//! - 通过 `tracing` 输出结构化事件，库本身不安装订阅者。

mod arena;
mod cache;
mod config;
mod consumer;
mod error;
mod id;
mod manager;
mod producer;
mod registry;
mod stats;

pub use arena::{IdleReclaimer, ReclaimOutcome};
pub use config::BlobManagerConfig;
pub use consumer::BlobConsumer;
pub use error::{BlobError, Result, codes};
pub use id::{BlobId, ENCODED_LEN};
pub use manager::BlobManager;
pub use producer::BlobProducer;
pub use spark_buffer::{BufferError, BufferFactory, BufferWriter, GrowthPolicy};
pub use stats::BlobStats;
