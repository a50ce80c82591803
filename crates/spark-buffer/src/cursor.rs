use std::io;

use crate::{error::Result, growable::GrowableBuffer};

/// `ReadCursor` 是独立于缓冲存在的读/消费游标。
///
/// # 设计概要（How）
/// - 游标只保存一个偏移量，读取时借用 [`GrowableBuffer`]；
/// - 多个游标可以同时指向同一缓冲而互不干扰，每个读者各自推进、各自回绕。
///
/// # 契约说明（What）
/// - `remaining` 为写游标与读偏移之差，偏移越过写游标（例如缓冲被清空）时视为 0；
/// - `drain_to` 只按目标实际接收的字节推进偏移，中途失败时已写出的部分仍计入偏移。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadCursor {
    position: usize,
}

impl ReadCursor {
    pub const fn new() -> Self {
        Self { position: 0 }
    }

    /// 当前读偏移。
    pub fn position(&self) -> usize {
        self.position
    }

    /// 剩余可读字节。
    pub fn remaining(&self, buffer: &GrowableBuffer) -> usize {
        buffer.len().saturating_sub(self.position)
    }

    /// 回到偏移 0，整段内容重新可读。
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// 把剩余区域整体交给回调，随后推进到末尾。
    pub fn consume<R>(&mut self, buffer: &GrowableBuffer, f: impl FnOnce(&[u8]) -> R) -> R {
        let chunk = buffer.readable_from(self.position);
        let consumed = chunk.len();
        let output = f(chunk);
        self.position += consumed;
        output
    }

    /// 把剩余内容排空到外部可写汇。
    ///
    /// - `limit` 为 `Some(n)` 时至多写出 `n` 字节；
    /// - `Interrupted` 会被重试；目标返回写入 0 字节时报告 `WriteZero`。
    ///
    /// 返回本次写出的字节数。
    pub fn drain_to(
        &mut self,
        buffer: &GrowableBuffer,
        dst: &mut dyn io::Write,
        limit: Option<usize>,
    ) -> Result<usize> {
        let available = self.remaining(buffer);
        let target = limit.map_or(available, |limit| limit.min(available));
        let mut moved = 0usize;
        while moved < target {
            let chunk = &buffer.readable_from(self.position)[..target - moved];
            match dst.write(chunk) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(written) => {
                    self.position += written;
                    moved += written;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferError, GrowthPolicy};

    fn filled(payload: &[u8]) -> GrowableBuffer {
        let mut buffer = GrowableBuffer::with_capacity(payload.len(), GrowthPolicy::default());
        buffer.put_slice(payload).expect("写入不应失败");
        buffer
    }

    /// 每次最多接收 3 字节的写汇。
    struct Narrow(Vec<u8>);

    impl io::Write for Narrow {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let take = buf.len().min(3);
            self.0.extend_from_slice(&buf[..take]);
            Ok(take)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Closed;

    impl io::Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn drain_handles_short_writes_and_limit() {
        let buffer = filled(b"0123456789");
        let mut cursor = ReadCursor::new();
        let mut sink = Narrow(Vec::new());
        let moved = cursor
            .drain_to(&buffer, &mut sink, Some(7))
            .expect("排空不应失败");
        assert_eq!(moved, 7);
        assert_eq!(sink.0, b"0123456");
        assert_eq!(cursor.remaining(&buffer), 3);
    }

    #[test]
    fn independent_cursors_do_not_interfere() {
        let buffer = filled(b"shared");
        let mut first = ReadCursor::new();
        let mut second = ReadCursor::new();
        let all = first.consume(&buffer, <[u8]>::to_vec);
        assert_eq!(all, b"shared");
        assert_eq!(first.remaining(&buffer), 0);
        assert_eq!(second.remaining(&buffer), 6);
        let mut out = Vec::new();
        second
            .drain_to(&buffer, &mut out, Some(2))
            .expect("排空不应失败");
        assert_eq!(out, b"sh");
        first.rewind();
        assert_eq!(first.remaining(&buffer), 6);
    }

    #[test]
    fn zero_length_sink_reports_write_zero() {
        let buffer = filled(b"x");
        let mut cursor = ReadCursor::new();
        let err = cursor
            .drain_to(&buffer, &mut Closed, None)
            .expect_err("目标不接收数据时应失败");
        match err {
            BufferError::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::WriteZero),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(cursor.position(), 0);
    }
}
