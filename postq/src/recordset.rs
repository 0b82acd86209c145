//! Lazily read query result.
use futures_core::Stream;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Result,
    common::span,
    connection::Connection,
    net::Socket,
    postgres::{BackendMessage, backend::CommandComplete},
    row::{Column, FromRow, Row},
};

/// Rows returned by [`Connection::execute`].
///
/// Each call to [`next`][Recordset::next] reads from the socket until a row is available,
/// once `ReadyForQuery` is received it keeps returning `None`.
///
/// If dropped before finished, the remaining messages are discarded by the next
/// [`execute`][Connection::execute].
///
/// This is also a [`Stream`] of `Result<Row>`.
pub struct Recordset<'a, IO = Socket> {
    conn: &'a mut Connection<IO>,
    columns: Arc<[Column]>,
    row: Option<Row>,
    tag: Option<CommandComplete>,
    done: bool,
}

impl<'a, IO> Recordset<'a, IO> {
    pub(crate) fn new(
        conn: &'a mut Connection<IO>,
        columns: Arc<[Column]>,
        row: Option<Row>,
        tag: Option<CommandComplete>,
        done: bool,
    ) -> Self {
        Self { conn, columns, row, tag, done }
    }

    /// Columns description of the current statement, empty if it returns no rows.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Tag of the last completed statement, e.g. `INSERT 0 1`.
    pub fn command_tag(&self) -> Option<&str> {
        self.tag.as_ref().map(|e| e.tag.as_str())
    }

    /// Number of rows affected by the last completed statement.
    pub fn rows_affected(&self) -> u64 {
        self.tag.as_ref().map(CommandComplete::rows_affected).unwrap_or_default()
    }

    /// Returns `true` if `ReadyForQuery` is received.
    pub fn is_finished(&self) -> bool {
        self.done
    }
}

impl<IO> Recordset<'_, IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Poll for the next row.
    pub fn poll_next_row(&mut self, cx: &mut Context) -> Poll<Result<Option<Row>>> {
        if let Some(row) = self.row.take() {
            return Poll::Ready(Ok(Some(row)));
        }

        span!("recordset");

        loop {
            if self.done {
                return Poll::Ready(Ok(None));
            }

            let message = match ready!(self.conn.poll_message(cx)) {
                Ok(ok) => ok,
                Err(err) => {
                    self.done = true;
                    return Poll::Ready(Err(err));
                },
            };

            match message {
                BackendMessage::DataRow(data) => {
                    return match Row::new(self.columns.clone(), data) {
                        Ok(row) => Poll::Ready(Ok(Some(row))),
                        Err(err) => Poll::Ready(Err(self.fault(err))),
                    };
                },
                BackendMessage::CommandComplete(tag) => {
                    self.tag = Some(tag);
                },
                BackendMessage::EmptyQueryResponse(_) => { },
                // next statement in multi statement query
                BackendMessage::RowDescription(desc) => {
                    match Column::parse_all(desc) {
                        Ok(columns) => self.columns = columns,
                        Err(err) => return Poll::Ready(Err(self.fault(err))),
                    }
                },
                BackendMessage::ReadyForQuery(_) => {
                    self.done = true;
                },
                f => {
                    let err = f.unexpected("simple query");
                    return Poll::Ready(Err(self.fault(err)));
                },
            }
        }
    }

    /// Read the next row, `None` once the result is finished.
    ///
    /// Each call waits with its own timeout, a cancelled call does not shorten the next one.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        self.conn.reset_deadline();
        std::future::poll_fn(|cx| self.poll_next_row(cx)).await
    }

    /// Read the next row and decode it.
    pub async fn next_as<R: FromRow>(&mut self) -> Result<Option<R>> {
        match self.next().await? {
            Some(row) => Ok(Some(row.decode()?)),
            None => Ok(None),
        }
    }

    /// Read all remaining rows.
    pub async fn fetch_all(mut self) -> Result<Vec<Row>> {
        let mut rows = vec![];
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn fault(&mut self, err: impl Into<crate::Error>) -> crate::Error {
        self.done = true;
        self.conn.fault(err)
    }
}

impl<IO> Stream for Recordset<'_, IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match ready!(self.get_mut().poll_next_row(cx)) {
            Ok(Some(row)) => Poll::Ready(Some(Ok(row))),
            Ok(None) => Poll::Ready(None),
            Err(err) => Poll::Ready(Some(Err(err))),
        }
    }
}

impl<IO> std::fmt::Debug for Recordset<'_, IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recordset")
            .field("columns", &self.columns.len())
            .field("tag", &self.command_tag())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use tokio::io::DuplexStream;

    use super::*;
    use crate::{
        connection::{Config, ConnectionState},
        error::ErrorKind,
        mock::{self, Script},
    };

    async fn connect(script: Script) -> (Connection<DuplexStream>, DuplexStream) {
        let (io, server) = mock::serve(Script::new().handshake().then(script)).await;
        let conn = Connection::connect_with(io, &Config::default()).await.unwrap();
        (conn, server)
    }

    #[tokio::test]
    async fn multi_statement() {
        let script = Script::new()
            .row_description(&[("a", 23)])
            .data_row(&[Some("1")])
            .complete("SELECT 1")
            .complete("INSERT 0 2")
            .row_description(&[("b", 25), ("c", 25)])
            .data_row(&[Some("x"), None])
            .complete("SELECT 1")
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let mut rs = conn.execute("SELECT 1 a; INSERT INTO t VALUES (1), (2); SELECT 'x' b, NULL c").await.unwrap();

        let first = rs.next().await.unwrap().unwrap();
        assert_eq!(first.field("a").unwrap(), Some("1"));
        assert_eq!(rs.columns().len(), 1);

        let second = rs.next().await.unwrap().unwrap();
        assert_eq!(rs.command_tag(), Some("INSERT 0 2"));
        assert_eq!(rs.rows_affected(), 2);
        assert_eq!(second.field("b").unwrap(), Some("x"));
        assert_eq!(second.field("c").unwrap(), None);
        assert_eq!(rs.columns().len(), 2);

        assert!(rs.next().await.unwrap().is_none());
        assert!(rs.is_finished());
    }

    #[tokio::test]
    async fn notice_between_rows() {
        let script = Script::new()
            .row_description(&[("n", 23)])
            .data_row(&[Some("1")])
            .notice(&[(b'S', "NOTICE"), (b'C', "00000"), (b'M', "hello")])
            .data_row(&[Some("2")])
            .complete("SELECT 2")
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let rows = conn.execute("SELECT 1").await.unwrap().fetch_all().await.unwrap();
        let ns = rows.iter().map(|r| r.try_get::<_, i64>("n").unwrap()).collect::<Vec<_>>();
        assert_eq!(ns, [1, 2]);
    }

    #[tokio::test]
    async fn error_mid_stream() {
        let script = Script::new()
            .row_description(&[("n", 23)])
            .data_row(&[Some("1")])
            .error(&[(b'S', "ERROR"), (b'C', "22012"), (b'M', "division by zero")])
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let mut rs = conn.execute("SELECT 1 / (n - 2) FROM generate_series(1, 2) n").await.unwrap();
        assert!(rs.next().await.unwrap().is_some());

        let err = rs.next().await.unwrap_err();
        assert_eq!(err.as_database().unwrap().code(), "22012");
        assert!(rs.next().await.unwrap().is_none());
        drop(rs);

        assert_eq!(conn.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn mismatched_row_faults() {
        let script = Script::new()
            .row_description(&[("n", 23)])
            .data_row(&[Some("1")])
            .data_row(&[Some("1"), Some("2")])
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let mut rs = conn.execute("SELECT 1").await.unwrap();
        assert!(rs.next().await.unwrap().is_some());
        let err = rs.next().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
        drop(rs);

        assert_eq!(conn.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn as_stream() {
        let script = Script::new()
            .row_description(&[("n", 23)])
            .data_row(&[Some("1")])
            .data_row(&[Some("2")])
            .complete("SELECT 2")
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let mut rs = conn.execute("SELECT 1").await.unwrap();
        let mut ns = vec![];
        while let Some(row) = std::future::poll_fn(|cx| Pin::new(&mut rs).poll_next(cx)).await {
            ns.push(row.unwrap().try_get::<_, i32>(0).unwrap());
        }
        assert_eq!(ns, [1, 2]);
        assert!(std::future::poll_fn(|cx| Pin::new(&mut rs).poll_next(cx)).await.is_none());
    }

    #[tokio::test]
    async fn decode_rows() {
        let script = Script::new()
            .row_description(&[("id", 23), ("name", 25)])
            .data_row(&[Some("1"), Some("kirit")])
            .complete("SELECT 1")
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let mut rs = conn.execute("SELECT id, name FROM users").await.unwrap();
        let (id, name) = rs.next_as::<(i32, String)>().await.unwrap().unwrap();
        assert_eq!((id, name.as_str()), (1, "kirit"));
        assert!(rs.next_as::<(i32, String)>().await.unwrap().is_none());
    }
}
