//! Buffered postgres stream.
use bytes::{Buf, BufMut, BytesMut};
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::{Instant, Sleep, sleep},
};

use crate::{
    Result,
    common::{unit_error, verbose},
    postgres::{BackendProtocol, ErrorResponse, FrontendProtocol, frame, frontend},
    transport::PgTransport,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Default maximum message body accepted from the backend.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

const NOTICE_RESPONSE: u8 = b'N';

unit_error! {
    /// Stream closed before a complete message is received.
    pub struct UnexpectedEof("unexpected end of stream");
}

unit_error! {
    /// An io operation did not complete within configured timeout.
    pub struct Timeout("operation timed out");
}

/// Buffered connection to postgres.
///
/// Messages sent are buffered until flushed, every message received is read
/// from an internal buffer which is filled from the underlying io as needed.
pub struct PgStream<IO> {
    io: IO,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_frame_len: usize,
    timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
    armed: bool,
}

impl<IO> PgStream<IO> {
    pub fn new(io: IO) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            timeout: None,
            deadline: None,
            armed: false,
        }
    }

    /// Set maximum message body accepted from the backend.
    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Set timeout for every wait on the underlying io.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Called when the underlying io is pending.
    ///
    /// The deadline is armed on the first pending poll of an operation,
    /// and disarmed once the operation complete or [`reset_deadline`][1] is called.
    ///
    /// [1]: PgTransport::reset_deadline
    fn poll_deadline(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        let Some(timeout) = self.timeout else {
            return Poll::Pending;
        };

        let deadline = self.deadline.get_or_insert_with(|| Box::pin(sleep(timeout)));
        if !self.armed {
            deadline.as_mut().reset(Instant::now() + timeout);
            self.armed = true;
        }

        ready!(deadline.as_mut().poll(cx));
        self.armed = false;
        verbose!(?timeout, "io timed out");
        Poll::Ready(Err(Timeout.into()))
    }
}

impl<IO> PgStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Fill the read buffer with at least one byte.
    fn poll_fill(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        if self.read_buf.capacity() == self.read_buf.len() {
            self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
        }

        let n = {
            let dst = self.read_buf.chunk_mut();
            // SAFETY: `ReadBuf` never de-initialize memory and `dst` is only written to
            let dst = unsafe { dst.as_uninit_slice_mut() };
            let mut buf = ReadBuf::uninit(dst);
            let ptr = buf.filled().as_ptr();
            match Pin::new(&mut self.io).poll_read(cx, &mut buf) {
                Poll::Ready(result) => result?,
                Poll::Pending => return self.poll_deadline(cx),
            }

            // Ensure the pointer does not change from under us
            assert_eq!(ptr, buf.filled().as_ptr());
            buf.filled().len()
        };

        if n == 0 {
            verbose!(buffered = self.read_buf.len(), "stream closed");
            return Poll::Ready(Err(UnexpectedEof.into()));
        }

        // SAFETY: This is guaranteed to be the number of initialized (and read)
        // bytes due to the invariants provided by `ReadBuf::filled`.
        unsafe {
            self.read_buf.advance_mut(n);
        }

        Poll::Ready(Ok(()))
    }

    fn poll_write_all(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        while self.write_buf.has_remaining() {
            let n = match Pin::new(&mut self.io).poll_write(cx, self.write_buf.chunk()) {
                Poll::Ready(result) => result?,
                Poll::Pending => return self.poll_deadline(cx),
            };
            if n == 0 {
                return Poll::Ready(Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()));
            }
            self.write_buf.advance(n);
        }

        match Pin::new(&mut self.io).poll_flush(cx) {
            Poll::Ready(result) => result?,
            Poll::Pending => return self.poll_deadline(cx),
        }

        self.armed = false;
        Poll::Ready(Ok(()))
    }
}

impl<IO> PgTransport for PgStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        self.poll_write_all(cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        if !self.write_buf.is_empty() {
            ready!(self.poll_write_all(cx)?);
        }

        loop {
            let Some(frame) = frame::decode(&mut self.read_buf, self.max_frame_len)? else {
                ready!(self.poll_fill(cx)?);
                continue;
            };

            self.armed = false;
            verbose!(msgtype = ?(frame.msgtype as char), len = frame.body.len(), "frame received");

            match frame.msgtype {
                ErrorResponse::MSGTYPE => {
                    let err = ErrorResponse::parse(frame.body)?;
                    return Poll::Ready(Err(err.into()));
                },
                NOTICE_RESPONSE => {
                    notice(ErrorResponse::parse(frame.body)?);
                },
                msgtype => return Poll::Ready(Ok(B::decode(msgtype, frame.body)?)),
            }
        }
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        ready!(self.poll_write_all(cx)?);
        match Pin::new(&mut self.io).poll_shutdown(cx) {
            Poll::Ready(result) => Poll::Ready(result.map_err(Into::into)),
            Poll::Pending => self.poll_deadline(cx),
        }
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        let offset = self.write_buf.len();
        frontend::write(message, &mut self.write_buf);
        verbose!(msgtype = ?(F::MSGTYPE as char), len = self.write_buf.len() - offset, "frame sent");
        let _ = offset;
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        let offset = self.write_buf.len();
        startup.write(&mut self.write_buf);
        verbose!(len = self.write_buf.len() - offset, "startup sent");
        let _ = offset;
    }

    fn reset_deadline(&mut self) {
        self.armed = false;
    }
}

fn notice(notice: ErrorResponse) {
    #[cfg(feature = "log")]
    log::warn!("{notice}");
    verbose!(severity = notice.severity(), code = notice.code(), "{}", notice.message());
    let _ = notice;
}

impl<IO: std::fmt::Debug> std::fmt::Debug for PgStream<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStream")
            .field("io", &self.io)
            .field("read_buf", &self.read_buf.len())
            .field("write_buf", &self.write_buf.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{
        error::ErrorKind,
        postgres::{BackendMessage, backend, frame, frontend::Query},
        transport::PgTransportExt,
    };

    fn frame(msgtype: u8, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        frame::encode(msgtype, body, &mut buf);
        buf
    }

    #[tokio::test]
    async fn send_and_recv() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = PgStream::new(client);

        stream.send(Query { sql: "SELECT 1" });
        stream.flush().await.unwrap();

        let mut buf = [0u8; 14];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"Q\0\0\0\x0dSELECT 1\0");

        // larger than the duplex buffer, delivered in pieces
        let mut reply = frame(b'S', b"server_version_with_a_long_name\0some value that is long enough\0");
        reply.extend_from_slice(&frame(b'Z', b"I"));
        let writer = tokio::spawn(async move {
            server.write_all(&reply).await.unwrap();
            server
        });

        let BackendMessage::ParameterStatus(param) = stream.recv().await.unwrap() else {
            panic!("expected ParameterStatus")
        };
        assert_eq!(param.name, "server_version_with_a_long_name");
        let ready = stream.recv::<backend::ReadyForQuery>().await.unwrap();
        assert_eq!(ready.status, backend::TransactionStatus::Idle);

        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn notice_skipped_and_error_returned() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = PgStream::new(client);

        let mut reply = frame(b'N', b"SWARNING\0Mthere is no transaction in progress\0\0");
        reply.extend_from_slice(&frame(b'E', b"SERROR\0C42601\0Msyntax error\0\0"));
        server.write_all(&reply).await.unwrap();

        let err = stream.recv::<BackendMessage>().await.unwrap_err();
        let ErrorKind::Database(db) = err.kind() else {
            panic!("expected database error, found {err}")
        };
        assert_eq!(db.code(), "42601");
    }

    #[tokio::test]
    async fn truncated_frame() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = PgStream::new(client);

        let reply = frame(b'Z', b"I");
        server.write_all(&reply[..4]).await.unwrap();
        drop(server);

        let err = stream.recv::<BackendMessage>().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedEof(_)));
    }

    #[tokio::test]
    async fn frame_too_large() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = PgStream::new(client).with_max_frame_len(16);

        server.write_all(&[b'D', 0, 0, 1, 0]).await.unwrap();

        let err = stream.recv::<BackendMessage>().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn recv_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let mut stream = PgStream::new(client).with_timeout(Some(Duration::from_secs(5)));

        let err = stream.recv::<BackendMessage>().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_recv_resets_timeout() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = PgStream::new(client).with_timeout(Some(Duration::from_secs(5)));

        let cancelled = tokio::time::timeout(Duration::from_secs(1), stream.recv::<BackendMessage>()).await;
        assert!(cancelled.is_err());
        tokio::time::sleep(Duration::from_millis(3900)).await;

        let reply = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            server.write_all(&frame(b'Z', b"I")).await.unwrap();
            server
        });

        let start = Instant::now();
        let ready = stream.recv::<backend::ReadyForQuery>().await.unwrap();
        assert_eq!(ready.status, backend::TransactionStatus::Idle);
        assert!(start.elapsed() < Duration::from_secs(2));

        drop(reply.await.unwrap());
    }
}
