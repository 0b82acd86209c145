//! Postgres connection.
use std::{
    collections::HashMap,
    fmt, io,
    sync::Arc,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Error, Result,
    common::{ByteStr, debug, verbose},
    net::Socket,
    phase,
    postgres::{
        BackendMessage,
        backend::{BackendKeyData, TransactionStatus},
        frontend::{Query, Terminate},
    },
    recordset::Recordset,
    row::{Column, Row},
    stream::{PgStream, Timeout},
    transport::{PgTransport, PgTransportExt},
};

mod config;

pub use config::{Config, Host, ParseError};

/// Protocol state of a [`Connection`].
///
/// `Disconnected` and `Connecting` are only seen in the state change log, a
/// [`Connection`] is returned to the caller once ready and is consumed by
/// [`close`][Connection::close].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The socket is closed.
    Disconnected,
    /// Startup phase is in progress.
    Connecting,
    /// Ready to accept a query.
    Ready,
    /// A query result has not been read up to `ReadyForQuery`.
    ///
    /// The rest of the result is discarded on the next query.
    Streaming,
    /// An error occurred, the connection cannot be used anymore.
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::Faulted => "faulted",
        })
    }
}

/// Postgres connection, speaking the simple query protocol.
///
/// ```no_run
/// use postq::Connection;
///
/// # async fn app() -> postq::Result<()> {
/// let mut conn = Connection::connect_url("postgres://postgres@localhost:5432/post").await?;
///
/// let mut rows = conn.execute("SELECT id, name FROM users").await?;
/// while let Some(row) = rows.next().await? {
///     let id: i32 = row.try_get("id")?;
///     let name: Option<&str> = row.field("name")?;
///     println!("{id}: {name:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct Connection<IO = Socket> {
    stream: PgStream<IO>,
    state: ConnectionState,
    backend_key_data: Option<BackendKeyData>,
    params: HashMap<ByteStr, ByteStr>,
    transaction_status: TransactionStatus,
}

impl Connection {
    /// Connect to the configured host and perform startup.
    pub async fn connect(config: &Config) -> Result<Self> {
        let socket = connect_socket(config).await?;
        Self::connect_with(socket, config).await
    }

    /// Connect using url, see [`Config::parse`].
    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(&Config::parse(url)?).await
    }

    /// Connect using environment variable, see [`Config::from_env`].
    pub async fn connect_env() -> Result<Self> {
        Self::connect(&Config::from_env()).await
    }
}

async fn connect_socket(config: &Config) -> Result<Socket> {
    let port = config.port();
    let target = match config.host() {
        Host::Tcp(host) => format!("{host}:{port}"),
        Host::Socket(dir) => Host::socket_path(dir, port).display().to_string(),
    };

    debug!(%target, "connecting");

    let connect = async {
        match config.host() {
            Host::Tcp(host) => Socket::connect_tcp(host, port).await,
            Host::Socket(dir) => Socket::connect_socket(Host::socket_path(dir, port)).await,
        }
    };

    let result = match config.timeout() {
        Some(timeout) => match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => return Err(Timeout.into()),
        },
        None => connect.await,
    };

    result.map_err(|source| ConnectError { target, source }.into())
}

impl<IO> Connection<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Perform startup over already connected `io`.
    pub async fn connect_with(io: IO, config: &Config) -> Result<Self> {
        let stream = PgStream::new(io)
            .with_max_frame_len(config.max_frame_len())
            .with_timeout(config.timeout());

        let mut me = Self {
            stream,
            state: ConnectionState::Connecting,
            backend_key_data: None,
            params: HashMap::new(),
            transaction_status: TransactionStatus::Idle,
        };

        let res = match phase::startup(config, &mut me.stream).await {
            Ok(ok) => ok,
            Err(err) => return Err(me.fault(err).context("startup failed")),
        };

        me.backend_key_data = res.backend_key_data;
        me.transaction_status = res.transaction_status;
        me.params.extend(res.param_status.into_iter().map(|p| (p.name, p.value)));
        me.set_state(ConnectionState::Ready);

        Ok(me)
    }

    /// Execute a simple query.
    ///
    /// The returned [`Recordset`] borrows the connection until it is dropped, rows are
    /// read from the socket as they are requested.
    ///
    /// Multiple statements separated by semicolon are allowed, all of their rows are
    /// returned by the same [`Recordset`].
    ///
    /// Query containing nul character, or larger than [`MAX_BODY_LEN`][1], is rejected
    /// before anything is sent and the connection stays usable.
    ///
    /// [1]: crate::postgres::frontend::MAX_BODY_LEN
    pub async fn execute(&mut self, sql: &str) -> Result<Recordset<'_, IO>> {
        let query = Query { sql };
        query.check()?;

        match self.state {
            ConnectionState::Ready => {},
            ConnectionState::Streaming => self.drain().await?,
            state => return Err(NotConnected { state }.into()),
        }

        debug!(sql, "execute");

        self.stream.send(query);
        self.set_state(ConnectionState::Streaming);
        if let Err(err) = self.stream.flush().await {
            return Err(self.fault(err));
        }

        let mut columns: Arc<[Column]> = Arc::from([]);

        loop {
            let message = self.recv_message().await?;
            match message {
                BackendMessage::RowDescription(desc) => {
                    columns = Column::parse_all(desc).map_err(|err| self.fault(err))?;
                },
                BackendMessage::DataRow(data) => {
                    let row = Row::new(columns.clone(), data).map_err(|err| self.fault(err))?;
                    return Ok(Recordset::new(self, columns, Some(row), None, false));
                },
                BackendMessage::CommandComplete(tag) => {
                    return Ok(Recordset::new(self, columns, None, Some(tag), false));
                },
                BackendMessage::EmptyQueryResponse(_) => {
                    return Ok(Recordset::new(self, columns, None, None, false));
                },
                BackendMessage::ReadyForQuery(_) => {
                    return Ok(Recordset::new(self, columns, None, None, true));
                },
                f => return Err(self.fault(f.unexpected("simple query"))),
            }
        }
    }

    /// Send `Terminate` and close the socket.
    pub async fn close(mut self) -> Result<()> {
        if matches!(self.state, ConnectionState::Ready | ConnectionState::Streaming) {
            self.stream.send(Terminate);
        }
        self.stream.shutdown().await?;
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Discard unfinished result up to `ReadyForQuery`.
    async fn drain(&mut self) -> Result<()> {
        debug!("discarding unfinished result");
        loop {
            let message = self.recv_message().await?;
            if let BackendMessage::ReadyForQuery(_) = message {
                return Ok(());
            }
        }
    }

    /// Receive a message while a query is in progress, with a fresh deadline.
    pub(crate) fn recv_message(&mut self) -> impl Future<Output = Result<BackendMessage>> {
        self.reset_deadline();
        std::future::poll_fn(|cx| self.poll_message(cx))
    }

    pub(crate) fn reset_deadline(&mut self) {
        self.stream.reset_deadline();
    }

    /// Poll a message while a query is in progress.
    ///
    /// `ParameterStatus` is recorded and never returned. `ReadyForQuery` ends the query.
    /// Any error faults the connection.
    pub(crate) fn poll_message(&mut self, cx: &mut Context) -> Poll<Result<BackendMessage>> {
        loop {
            let message = match ready!(self.stream.poll_recv(cx)) {
                Ok(ok) => ok,
                Err(err) => return Poll::Ready(Err(self.fault(err))),
            };

            match message {
                BackendMessage::ParameterStatus(param) => {
                    verbose!(name = %param.name, value = %param.value, "parameter status");
                    self.params.insert(param.name, param.value);
                },
                BackendMessage::ReadyForQuery(ready) => {
                    self.transaction_status = ready.status;
                    self.set_state(ConnectionState::Ready);
                    return Poll::Ready(Ok(BackendMessage::ReadyForQuery(ready)));
                },
                message => return Poll::Ready(Ok(message)),
            }
        }
    }
}

impl<IO> Connection<IO> {
    /// Current protocol state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Cancellation key sent by the server at startup.
    pub fn backend_key_data(&self) -> Option<BackendKeyData> {
        self.backend_key_data
    }

    /// Server run-time parameter, e.g. `server_version`.
    ///
    /// Includes parameter changes reported after startup.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(ByteStr::as_str)
    }

    /// Transaction status reported by the last `ReadyForQuery`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub(crate) fn fault(&mut self, err: impl Into<Error>) -> Error {
        let err = err.into();
        debug!(error = %err.kind(), "connection faulted");
        self.set_state(ConnectionState::Faulted);
        err
    }

    fn set_state(&mut self, state: ConnectionState) {
        verbose!(from = %self.state, to = %state, "state changed");
        self.state = state;
    }
}

impl<IO> fmt::Debug for Connection<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("backend_key_data", &self.backend_key_data)
            .field("transaction_status", &self.transaction_status)
            .finish()
    }
}

/// Failed to open the socket.
pub struct ConnectError {
    target: String,
    source: io::Error,
}

impl ConnectError {
    /// The address or socket path that failed.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to {}: {}", self.target, self.source)
    }
}

impl fmt::Debug for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Operation requires a ready connection.
pub struct NotConnected {
    state: ConnectionState,
}

impl NotConnected {
    /// State of the connection when the operation is attempted.
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

impl std::error::Error for NotConnected { }

impl fmt::Display for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection is not ready, current state is {}", self.state)
    }
}

impl fmt::Debug for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;
    use tokio::io::DuplexStream;

    use super::*;
    use crate::{
        error::ErrorKind,
        mock::{self, Script},
        postgres::ErrorField,
    };

    const INT4: u32 = 23;

    async fn connect(script: Script) -> (Connection<DuplexStream>, DuplexStream) {
        let (io, server) = mock::serve(Script::new().handshake().then(script)).await;
        let conn = Connection::connect_with(io, &Config::default()).await.unwrap();
        (conn, server)
    }

    fn ints(script: Script, ints: &[&str]) -> Script {
        ints.iter().fold(script.row_description(&[("n", INT4)]), |s, n| s.data_row(&[Some(*n)]))
    }

    #[tokio::test]
    async fn handshake_reaches_ready() {
        let (conn, mut server) = connect(Script::new()).await;

        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(conn.backend_key_data(), Some(BackendKeyData { process_id: 42, secret_key: 7 }));
        assert_eq!(conn.parameter("server_version"), Some("17.0"));
        assert_eq!(conn.parameter("TimeZone"), None);
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

        let startup = mock::recv_startup(&mut server).await;
        assert_eq!(&startup[4..], b"user\0postgres\0client_encoding\0UTF8\0\0");
    }

    #[tokio::test]
    async fn zero_rows() {
        let script = Script::new()
            .row_description(&[("id", INT4)])
            .complete("SELECT 0")
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let mut rs = conn.execute("SELECT id FROM users WHERE false").await.unwrap();
        assert_eq!(rs.columns().len(), 1);
        assert_eq!(rs.columns()[0].name(), "id");
        assert!(rs.next().await.unwrap().is_none());
        assert_eq!(rs.rows_affected(), 0);
        assert_eq!(rs.command_tag(), Some("SELECT 0"));
        drop(rs);

        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn rows_in_order() {
        let script = ints(Script::new(), &["1", "2", "3"]).complete("SELECT 3").ready(b'I');
        let (mut conn, mut server) = connect(script).await;

        let mut rs = conn.execute("SELECT * FROM generate_series(1, 3)").await.unwrap();
        for n in [1, 2, 3] {
            let row = rs.next().await.unwrap().unwrap();
            assert_eq!(row.try_get::<_, i32>(0).unwrap(), n);
        }
        assert!(rs.next().await.unwrap().is_none());
        assert!(rs.next().await.unwrap().is_none());
        assert_eq!(rs.rows_affected(), 3);
        drop(rs);

        assert_eq!(conn.state(), ConnectionState::Ready);

        mock::recv_startup(&mut server).await;
        let query = mock::recv_frame(&mut server).await;
        assert_eq!(query.msgtype, b'Q');
        assert_eq!(&query.body[..], b"SELECT * FROM generate_series(1, 3)\0");
    }

    #[tokio::test]
    async fn server_error_faults() {
        let script = Script::new()
            .error(&[(b'S', "ERROR"), (b'C', "42601"), (b'M', "syntax error")])
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let err = conn.execute("SELEC 1").await.unwrap_err();
        let db = err.as_database().unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.get(ErrorField::Severity), Some("ERROR"));
        assert_eq!(db.get(ErrorField::Code), Some("42601"));
        assert_eq!(db.get(ErrorField::Message), Some("syntax error"));
        assert_eq!(conn.state(), ConnectionState::Faulted);

        let err = conn.execute("SELECT 1").await.unwrap_err();
        let ErrorKind::NotConnected(nc) = err.kind() else {
            panic!("expected not connected, found {err}")
        };
        assert_eq!(nc.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn closed_during_startup() {
        let script = Script::new().auth_ok().raw(&[b'K', 0, 0, 0, 12, 0, 0]);
        let (io, _server) = mock::serve_then_close(script).await;

        let err = Connection::connect_with(io, &Config::default()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedEof(_)));
    }

    #[tokio::test]
    async fn closed_during_query() {
        let script = Script::new().row_description(&[("n", INT4)]).raw(&[b'D', 0, 0, 0, 20, 0, 1]);
        let (io, _server) = mock::serve_then_close(Script::new().handshake().then(script)).await;
        let mut conn = Connection::connect_with(io, &Config::default()).await.unwrap();

        let err = conn.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedEof(_)));
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert!(conn.execute("SELECT 1").await.is_err());
        assert_eq!(conn.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn closed_while_streaming() {
        let script = ints(Script::new(), &["1"]).raw(&[b'D', 0, 0]);
        let (io, _server) = mock::serve_then_close(Script::new().handshake().then(script)).await;
        let mut conn = Connection::connect_with(io, &Config::default()).await.unwrap();

        let mut rs = conn.execute("SELECT 1").await.unwrap();
        assert!(rs.next().await.unwrap().is_some());
        let err = rs.next().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedEof(_)));
        drop(rs);

        assert_eq!(conn.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn dropped_recordset_is_drained() {
        let script = ints(Script::new(), &["1", "2", "3"]).complete("SELECT 3").ready(b'I');
        let script = ints(script, &["4"]).complete("SELECT 1").ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let mut rs = conn.execute("SELECT 1").await.unwrap();
        assert_eq!(rs.next().await.unwrap().unwrap().field(0).unwrap(), Some("1"));
        drop(rs);
        assert_eq!(conn.state(), ConnectionState::Streaming);

        let rows = conn.execute("SELECT 4").await.unwrap().fetch_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("n").unwrap(), Some("4"));
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn parameter_status_after_startup() {
        let script = Script::new()
            .complete("SET")
            .param("TimeZone", "Asia/Jakarta")
            .ready(b'I');
        let (mut conn, _server) = connect(script).await;

        let mut rs = conn.execute("SET TIME ZONE 'Asia/Jakarta'").await.unwrap();
        assert!(rs.columns().is_empty());
        assert!(rs.next().await.unwrap().is_none());
        assert_eq!(rs.command_tag(), Some("SET"));
        drop(rs);

        assert_eq!(conn.parameter("TimeZone"), Some("Asia/Jakarta"));
    }

    #[tokio::test]
    async fn empty_query() {
        let (mut conn, _server) = connect(Script::new().empty_query().ready(b'I')).await;

        let mut rs = conn.execute("").await.unwrap();
        assert!(rs.next().await.unwrap().is_none());
        assert_eq!(rs.command_tag(), None);
    }

    #[tokio::test]
    async fn immediate_ready() {
        let (mut conn, _server) = connect(Script::new().ready(b'T')).await;

        let mut rs = conn.execute("").await.unwrap();
        assert!(rs.is_finished());
        assert!(rs.next().await.unwrap().is_none());
        drop(rs);
        assert_eq!(conn.transaction_status(), TransactionStatus::Transaction);
    }

    #[tokio::test]
    async fn unexpected_message_in_query() {
        let (mut conn, _server) = connect(Script::new().key_data(1, 2).ready(b'I')).await;

        let err = conn.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
        assert_eq!(conn.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn close_sends_terminate() {
        let (conn, mut server) = connect(Script::new()).await;

        conn.close().await.unwrap();

        mock::recv_startup(&mut server).await;
        let terminate = mock::recv_frame(&mut server).await;
        assert_eq!(terminate.msgtype, b'X');
        assert!(terminate.body.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn startup_timeout() {
        let (io, _server) = mock::serve(Script::new().auth_ok()).await;
        let config = Config::default().set_timeout(Duration::from_secs(10));

        let err = Connection::connect_with(io, &config).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout(_)));
    }

    #[tokio::test]
    async fn nul_in_query_rejected() {
        let (mut conn, mut server) = connect(ints(Script::new(), &["1"]).complete("SELECT 1").ready(b'I')).await;

        let err = conn.execute("SELECT 1\0; DROP TABLE x").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidMessage(_)));
        assert_eq!(conn.state(), ConnectionState::Ready);

        let rows = conn.execute("SELECT 1").await.unwrap().fetch_all().await.unwrap();
        assert_eq!(rows.len(), 1);

        mock::recv_startup(&mut server).await;
        let query = mock::recv_frame(&mut server).await;
        assert_eq!(&query.body[..], b"SELECT 1\0");
    }

    #[tokio::test]
    async fn nul_in_startup_rejected() {
        let (io, _server) = mock::serve(Script::new().handshake()).await;
        let config = Config::default().set_param("application_name", "a\0b");

        let err = Connection::connect_with(io, &config).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidMessage(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_next_keeps_timeout() {
        let (io, mut server) = mock::serve(Script::new().handshake().then(ints(Script::new(), &["1"]))).await;
        let config = Config::default().set_timeout(Duration::from_secs(5));
        let mut conn = Connection::connect_with(io, &config).await.unwrap();

        let mut rs = conn.execute("SELECT 1").await.unwrap();
        assert!(rs.next().await.unwrap().is_some());
        assert!(tokio::time::timeout(Duration::from_secs(1), rs.next()).await.is_err());
        tokio::time::sleep(Duration::from_millis(3900)).await;

        let reply = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let script = Script::new().data_row(&[Some("2")]).complete("SELECT 2").ready(b'I');
            mock::reply(&mut server, script).await;
            server
        });

        let row = rs.next().await.unwrap().unwrap();
        assert_eq!(row.field(0).unwrap(), Some("2"));
        assert!(rs.next().await.unwrap().is_none());
        drop(rs);
        assert_eq!(conn.state(), ConnectionState::Ready);

        drop(reply.await.unwrap());
    }
}
