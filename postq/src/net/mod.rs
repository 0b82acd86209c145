//! Socket channel.
mod socket;

pub use socket::Socket;
