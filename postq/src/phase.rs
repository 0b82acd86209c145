//! Postgres startup phase.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use std::fmt;

use crate::{
    Result,
    common::{ByteStr, debug, verbose},
    postgres::{
        BackendMessage,
        backend::{Authentication, BackendKeyData, ParameterStatus, TransactionStatus},
        frontend,
    },
    transport::{PgTransport, PgTransportExt},
};

/// A config for postgres startup phase.
#[derive(Debug, Clone, Copy)]
pub struct StartupConfig<'a> {
    pub(crate) user: &'a str,
    pub(crate) database: Option<&'a str>,
    pub(crate) params: &'a [(ByteStr, ByteStr)],
}

impl<'a> StartupConfig<'a> {
    /// Create new config, the database user name is required.
    pub fn new(user: &'a str) -> Self {
        Self { user, database: None, params: &[] }
    }

    /// The database user name to connect as.
    pub fn user(&self) -> &str {
        self.user
    }

    /// The database to connect to. Defaults to the user name.
    pub fn database(&self) -> Option<&str> {
        self.database
    }

    /// The database to connect to. Defaults to the user name.
    pub fn set_database(mut self, database: &'a str) -> Self {
        self.database = Some(database);
        self
    }

    /// Additional run-time parameters, applied as session defaults.
    pub fn set_params(mut self, params: &'a [(ByteStr, ByteStr)]) -> Self {
        self.params = params;
        self
    }
}

/// Startup phase successful response.
#[derive(Debug)]
pub struct StartupResponse {
    /// Cancellation key, postgres may not send it, e.g. some poolers.
    pub backend_key_data: Option<BackendKeyData>,
    pub param_status: Vec<ParameterStatus>,
    pub transaction_status: TransactionStatus,
}

enum Phase {
    Start,
    AwaitReady,
    Ready(TransactionStatus),
}

/// Perform the startup phase.
///
/// Only trust authentication is supported, any other authentication request returns
/// [`UnsupportedAuth`].
pub async fn startup<'a, IO: PgTransport>(
    config: impl Into<StartupConfig<'a>>,
    mut io: IO,
) -> Result<StartupResponse> {
    let config: StartupConfig = config.into();

    let mut phase = Phase::Start;
    let mut backend_key_data = None;
    let mut param_status = vec![];

    let transaction_status = loop {
        phase = match phase {
            // To begin a session, a frontend opens a connection to the server and sends a startup message.
            Phase::Start => {
                let startup = frontend::Startup {
                    user: config.user,
                    database: config.database,
                    params: config.params,
                };
                startup.check()?;
                io.send_startup(startup);
                io.flush().await?;
                Phase::AwaitReady
            },
            // The server then sends an appropriate authentication request message. Once authenticated,
            // the backend sends some ParameterStatus messages, BackendKeyData, and finally ReadyForQuery.
            Phase::AwaitReady => match io.recv().await? {
                BackendMessage::Authentication(Authentication::Ok) => {
                    debug!("authenticated");
                    Phase::AwaitReady
                },
                BackendMessage::Authentication(auth) => {
                    return Err(UnsupportedAuth { method: auth.method_name() }.into());
                },
                BackendMessage::BackendKeyData(key_data) => {
                    backend_key_data = Some(key_data);
                    Phase::AwaitReady
                },
                BackendMessage::ParameterStatus(param) => {
                    verbose!(name = %param.name, value = %param.value, "parameter status");
                    param_status.push(param);
                    Phase::AwaitReady
                },
                BackendMessage::ReadyForQuery(ready) => Phase::Ready(ready.status),
                f => return Err(f.unexpected("startup phase").into()),
            },
            Phase::Ready(status) => break status,
        };
    };

    debug!(params = param_status.len(), "startup complete");

    Ok(StartupResponse { backend_key_data, param_status, transaction_status })
}

/// Server requested authentication method other than trust.
pub struct UnsupportedAuth {
    method: &'static str,
}

impl UnsupportedAuth {
    /// The requested authentication method name.
    pub fn method(&self) -> &'static str {
        self.method
    }
}

impl std::error::Error for UnsupportedAuth { }

impl fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported authentication method `{}`, only trust is supported", self.method)
    }
}

impl fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
