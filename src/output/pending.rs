use std::io::{self, ErrorKind, Write};

/// 아직 내보내지 못한 바이트를 들고 있는 writer.
///
/// `write`는 내부 버퍼에 쌓기만 하고 실패하지 않는다. 실제 출력은 `flush`에서 한다.
/// 출력이 중간에 실패하면 이미 나간 바이트는 건너뛰고, 다음 `flush`가 남은 부분만 보낸다.
/// 그래서 재시도가 같은 레코드를 두 번 쓰거나 반쪽 행을 남기지 않는다.
pub struct PendingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
    sent: usize,
}

impl<W: Write> PendingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            sent: 0,
        }
    }

    /// 아직 inner로 나가지 않은 바이트 수
    pub fn pending_len(&self) -> usize {
        self.pending.len() - self.sent
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// 남은 바이트를 내보낸 뒤 inner를 돌려준다
    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for PendingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        while self.sent < self.pending.len() {
            match self.inner.write(&self.pending[self.sent..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => self.sent += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.pending.clear();
        self.sent = 0;
        self.inner.flush()
    }
}
