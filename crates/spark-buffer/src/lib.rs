//! `spark-buffer` 为 BLOB 旁路交换提供可增长的后备缓冲。
//!
//! # 模块定位（Why）
//! - `spark-blob` 只关心“拿到一块足够大的字节区域、写入、读取、归还”，
//!   分配大小、扩容系数与上限等策略全部落在本 crate；
//! - 以 `bytes::BytesMut` 作为底层存储，容量只增不减，便于按容量复用。
//!
//! # 设计概要（How）
//! - [`GrowableBuffer`]：字节区域 + 写游标，提供从 `io::Read` 填充、回调式生产、清空等能力；
//! - [`ReadCursor`]：独立的读游标，负责排空到 `io::Write`、整段消费与回绕；
//! - [`BufferFactory`] / [`DefaultBufferFactory`]：按指示大小分配全新缓冲，
//!   并把 [`GrowthPolicy`] 附着到缓冲上；
//! - [`BufferError`]：I/O 失败原样透传，容量超限给出稳定错误码。

mod cursor;
mod error;
mod factory;
mod growable;

pub use cursor::ReadCursor;
pub use error::{BufferError, Result, codes};
pub use factory::{BufferFactory, DefaultBufferFactory, GrowthPolicy};
pub use growable::{BufferWriter, GrowableBuffer};
