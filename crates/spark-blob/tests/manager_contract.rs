//! `manager_contract` 集成测试：以外部调用者身份验证 BLOB 管理器的公开契约。
//!
//! # 测试目标（Why）
//! - 覆盖往返、best-fit、标识唯一性、处置后清空、未知标识拒绝等核心行为；
//! - 结束后继续使用、配置校验、闲置预算与统计快照同样属于对外承诺。

use std::io::{self, Cursor};

use spark_blob::{BlobError, BlobId, BlobManager, BlobManagerConfig, BlobProducer, codes};

fn produce(manager: &BlobManager, size: usize, payload: &[u8]) -> BlobProducer {
    let mut producer = manager.construct_blob(size).expect("构造 BLOB");
    producer
        .fill_from(&mut Cursor::new(payload), None)
        .expect("填充负载");
    producer
}

/// 构造并立即处置，返回缓冲的实际容量。
fn park_idle(manager: &BlobManager, size: usize) -> usize {
    let mut producer = manager.construct_blob(size).expect("构造 BLOB");
    let capacity = producer.capacity().expect("查询容量");
    producer.finish();
    capacity
}

#[test]
fn payload_round_trips_through_message_identifier() {
    let manager = BlobManager::default();
    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let mut producer = manager.construct_blob(512).expect("构造 BLOB");
    producer
        .fill_from(&mut Cursor::new(&payload), None)
        .expect("填充负载");
    assert_eq!(producer.bytes_held().expect("查询长度"), payload.len());

    let mut message = Vec::new();
    producer.write_block(&mut message).expect("写出标识");
    assert_eq!(message.len(), spark_blob::ENCODED_LEN);

    let mut consumer = manager
        .retrieve_consumer(&mut message.as_slice())
        .expect("解析标识");
    assert_eq!(consumer.id(), producer.id());
    assert_eq!(consumer.length().expect("查询长度"), payload.len());

    let mut out = Vec::new();
    consumer.drain_to(&mut out, None).expect("排空负载");
    assert_eq!(out, payload);
    assert_eq!(consumer.length().expect("查询长度"), 0);
    consumer.finish();
    assert_eq!(manager.active_blobs(), 1, "生产者尚未结束");
    producer.finish();
    assert_eq!(manager.active_blobs(), 0);
}

#[test]
fn populate_callback_builds_whole_payload() {
    let manager = BlobManager::default();
    let mut consumer = manager
        .construct_blob_with(4, |writer| {
            writer.put_i64(7)?;
            writer.put_u8(0xFF)?;
            io::Write::write_all(writer, b"tail")
        })
        .expect("构造 BLOB");

    let bytes = consumer.consume(<[u8]>::to_vec).expect("整段消费");
    assert_eq!(&bytes[..8], &7i64.to_be_bytes());
    assert_eq!(&bytes[8..], &[0xFF, b't', b'a', b'i', b'l']);
    consumer.finish();
}

#[test]
fn best_fit_reuses_smallest_sufficient_buffer() {
    let manager = BlobManager::default();
    let small = park_idle(&manager, 100);
    let middle = park_idle(&manager, 250);
    let large = park_idle(&manager, 400);
    assert_eq!(manager.cached_buffers(), 3);

    let mut producer = manager.construct_blob(200).expect("构造 BLOB");
    assert_eq!(producer.capacity().expect("查询容量"), middle);
    assert_eq!(manager.cached_buffers(), 2, "只应取走一个条目");

    // 剩下的两个条目仍可被各自命中。
    let mut second = manager.construct_blob(large).expect("构造 BLOB");
    assert_eq!(second.capacity().expect("查询容量"), large);
    let mut third = manager.construct_blob(1).expect("构造 BLOB");
    assert_eq!(third.capacity().expect("查询容量"), small);

    for handle in [&mut producer, &mut second, &mut third] {
        handle.finish();
    }
    assert_eq!(manager.statistics().cache_hits, 3);
}

#[test]
fn identifiers_are_distinct_and_increasing() {
    let manager = BlobManager::default();
    let mut producers: Vec<BlobProducer> = (0..32)
        .map(|_| manager.construct_blob(8).expect("构造 BLOB"))
        .collect();
    let ids: Vec<BlobId> = producers.iter().map(BlobProducer::id).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(ids[0].as_raw() >= 1);
    assert_eq!(manager.active_blobs(), 32);

    producers.iter_mut().for_each(BlobProducer::finish);
    assert_eq!(manager.active_blobs(), 0);
}

#[test]
fn disposal_returns_capacity_not_content() {
    let manager = BlobManager::default();
    let mut producer = manager.construct_blob(64).expect("构造 BLOB");
    producer
        .fill_from(&mut Cursor::new(vec![1u8; 64]), None)
        .expect("填充负载");
    let capacity = producer.capacity().expect("查询容量");
    producer.finish();

    let mut reused = manager.construct_blob(capacity / 2).expect("构造 BLOB");
    assert_eq!(reused.capacity().expect("查询容量"), capacity);
    assert_eq!(reused.bytes_held().expect("查询长度"), 0);

    let mut consumer = manager.consumer_for(reused.id()).expect("解析标识");
    assert_eq!(consumer.length().expect("查询长度"), 0);
    consumer.finish();
    reused.finish();
}

#[test]
fn unknown_and_disposed_identifiers_are_rejected() {
    let manager = BlobManager::default();
    let err = manager
        .consumer_for(BlobId::from_raw(99))
        .expect_err("从未签发的标识应被拒绝");
    assert_eq!(err.code(), codes::BLOB_UNKNOWN_IDENTIFIER);

    let mut producer = produce(&manager, 16, b"short-lived");
    let id = producer.id();
    let mut consumer = manager.consumer_for(id).expect("解析标识");
    consumer.finish();
    producer.finish();
    match manager.consumer_for(id) {
        Err(BlobError::UnknownIdentifier { id: rejected }) => assert_eq!(rejected, id),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn truncated_message_is_rejected() {
    let manager = BlobManager::default();
    let err = manager
        .retrieve_consumer(&mut &[0u8, 0, 1][..])
        .expect_err("不足 8 字节应失败");
    assert_eq!(err.code(), codes::BLOB_TRUNCATED_IDENTIFIER);
}

#[test]
fn finished_producer_rejects_further_use() {
    let manager = BlobManager::default();
    let mut producer = manager.construct_blob(8).expect("构造 BLOB");
    producer.finish();
    producer.finish();
    assert!(producer.is_finished());

    let err = producer
        .fill_from(&mut Cursor::new(b"late"), None)
        .expect_err("结束后写入应失败");
    assert_eq!(err.code(), codes::BLOB_USE_AFTER_FINISH);
    assert!(producer.bytes_held().is_err());
    assert!(producer.write_block(&mut Vec::new()).is_err());
}

#[test]
fn early_consumer_finish_leaves_producer_writable() {
    let manager = BlobManager::default();
    let mut producer = produce(&manager, 8, b"head");

    let mut early = manager.consumer_for(producer.id()).expect("解析标识");
    assert_eq!(early.length().expect("查询长度"), 4);
    early.finish();
    assert_eq!(manager.active_blobs(), 1, "生产者仍持有 BLOB");

    let mut late = manager
        .consumer_for(producer.id())
        .expect("生产者未结束时标识仍然有效");
    producer
        .produce(|writer| writer.put_slice(b"-tail").map_err(Into::into))
        .expect("生产者仍可写入");
    assert_eq!(producer.bytes_held().expect("查询长度"), 9);
    assert_eq!(late.consume(<[u8]>::to_vec).expect("整段消费"), b"head-tail");

    late.finish();
    assert_eq!(manager.active_blobs(), 1);
    producer.finish();
    assert_eq!(manager.active_blobs(), 0);
    assert_eq!(manager.statistics().disposed_blobs, 1);

    let err = producer
        .produce(|writer| writer.put_u8(1).map_err(Into::into))
        .expect_err("结束后写入应失败");
    assert!(matches!(err, BlobError::UseAfterFinish { .. }));
}

#[test]
fn capped_fill_and_drain_move_partial_payloads() {
    let manager = BlobManager::default();
    let mut producer = manager.construct_blob(4).expect("构造 BLOB");
    let read = producer
        .fill_from(&mut Cursor::new(b"0123456789"), Some(6))
        .expect("填充负载");
    assert_eq!(read, 6);

    let mut consumer = manager.consumer_for(producer.id()).expect("解析标识");
    let mut head = Vec::new();
    assert_eq!(consumer.drain_to(&mut head, Some(4)).expect("排空"), 4);
    assert_eq!(head, b"0123");
    assert_eq!(consumer.length().expect("查询长度"), 2);

    consumer.rewind_to_start().expect("回绕");
    let mut whole = Vec::new();
    consumer.drain_to(&mut whole, None).expect("排空");
    assert_eq!(whole, b"012345");
    consumer.finish();
    producer.finish();
}

#[test]
fn capacity_limit_surfaces_buffer_error() {
    let manager =
        BlobManager::new(BlobManagerConfig::default().with_max_capacity(16)).expect("配置合法");
    let mut producer = manager.construct_blob(8).expect("构造 BLOB");
    assert!(producer.can_accept(16).expect("查询"));
    assert!(!producer.can_accept(17).expect("查询"));

    let err = producer
        .fill_from(&mut Cursor::new(vec![0u8; 32]), None)
        .expect_err("超过上限应失败");
    assert_eq!(err.code(), codes::BUFFER_CAPACITY_EXCEEDED);

    let oversized = manager.construct_blob(17).expect_err("超过上限的指示大小应失败");
    assert_eq!(oversized.code(), codes::BUFFER_CAPACITY_EXCEEDED);
    producer.finish();
}

#[test]
fn invalid_config_is_rejected() {
    let err = BlobManager::new(BlobManagerConfig::default().with_growth_factor(f64::NAN))
        .expect_err("NaN 系数应被拒绝");
    assert_eq!(err.code(), codes::BLOB_INVALID_CONFIG);
}

#[test]
fn idle_budget_reclaims_oldest_buffers() {
    let manager = BlobManager::new(BlobManagerConfig::default().with_max_idle_bytes(0))
        .expect("配置合法");
    park_idle(&manager, 128);
    let stats = manager.statistics();
    assert_eq!(stats.idle_bytes, 0);
    assert_eq!(stats.cached_entries, 0);
    assert_eq!(stats.reclaimed_buffers, 1);
    assert_eq!(stats.disposed_blobs, 1);
}

#[test]
fn reclaimer_and_shrink_release_idle_memory() {
    let manager = BlobManager::default();
    let first = park_idle(&manager, 100);
    let second = park_idle(&manager, 200);

    let reclaimer = manager.reclaimer();
    assert_eq!(reclaimer.idle_bytes(), first + second);
    let outcome = std::thread::spawn(move || reclaimer.reclaim_until(second))
        .join()
        .expect("回收线程不应 panic");
    assert_eq!(outcome.buffers, 1);
    assert_eq!(outcome.bytes, first);
    assert_eq!(manager.cached_buffers(), 1);

    assert_eq!(manager.shrink_to_fit(), second);
    let stats = manager.statistics();
    assert_eq!(stats.cached_entries, 0);
    assert_eq!(stats.idle_bytes, 0);
    assert_eq!(stats.reclaimed_buffers, 2);

    // 回收之后的分配走新分配路径。
    park_idle(&manager, 100);
    assert_eq!(manager.statistics().cache_misses, 3);
}
