//! Asynchronous Postgres Simple Query Client
//!
//! Speaks the postgres frontend/backend protocol version 3 over a TCP or unix domain
//! socket, using the simple query flow. Only trust authentication is supported and every
//! value is transmitted in text format.
//!
//! # Examples
//!
//! ```no_run
//! use postq::Connection;
//!
//! # async fn app() -> postq::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let mut rows = conn.execute("SELECT 420, 'Foo'").await?;
//!
//! let row = rows.next().await?.unwrap();
//! assert_eq!(row.field(0)?, Some("420"));
//!
//! let (id, name) = row.decode::<(i32, String)>()?;
//! assert_eq!(id, 420);
//! assert_eq!(name, "Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Rows are read lazily, a [`Recordset`] borrows the [`Connection`] until it is dropped:
//!
//! ```no_run
//! # async fn app(mut conn: postq::Connection) -> postq::Result<()> {
//! conn.execute("CREATE TEMP TABLE foo(id int)").await?;
//! conn.execute("INSERT INTO foo VALUES (1), (2), (3)").await?;
//!
//! let rows = conn.execute("SELECT id FROM foo").await?.fetch_all().await?;
//! assert_eq!(rows.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod common;
mod net;
mod ext;

// Protocol
pub mod postgres;
pub mod stream;
pub mod transport;
pub mod phase;

// Component
pub mod row;
pub mod types;

// Operation
pub mod connection;
pub mod recordset;

mod error;

#[cfg(test)]
mod mock;

pub use row::{Row, Column, Field, FromRow, Decode, DecodeError};
pub use net::Socket;
pub use connection::{Connection, ConnectionState, Config};
pub use recordset::Recordset;
pub use error::{Error, ErrorKind, Result};
