//! Scripted fake server for tests.
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::{
    ext::BufMutExt,
    postgres::{Frame, frame},
};

/// Backend messages written in order.
#[derive(Default)]
pub struct Script {
    buf: BytesMut,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(mut self, msgtype: u8, body: &[u8]) -> Self {
        frame::encode(msgtype, body, &mut self.buf);
        self
    }

    fn with(mut self, msgtype: u8, f: impl FnOnce(&mut BytesMut)) -> Self {
        let mut body = BytesMut::new();
        f(&mut body);
        frame::encode(msgtype, &body, &mut self.buf);
        self
    }

    pub fn auth(self, code: u32) -> Self {
        self.with(b'R', |b| b.put_u32(code))
    }

    pub fn auth_ok(self) -> Self {
        self.auth(0)
    }

    pub fn key_data(self, process_id: u32, secret_key: u32) -> Self {
        self.with(b'K', |b| {
            b.put_u32(process_id);
            b.put_u32(secret_key);
        })
    }

    pub fn param(self, name: &str, value: &str) -> Self {
        self.with(b'S', |b| {
            b.put_nul_string(name);
            b.put_nul_string(value);
        })
    }

    pub fn ready(self, status: u8) -> Self {
        self.frame(b'Z', &[status])
    }

    /// Trust authentication followed by ready.
    pub fn handshake(self) -> Self {
        self.auth_ok()
            .param("server_version", "17.0")
            .param("client_encoding", "UTF8")
            .key_data(42, 7)
            .ready(b'I')
    }

    /// Text format columns as `(name, type oid)`.
    pub fn row_description(self, columns: &[(&str, u32)]) -> Self {
        self.with(b'T', |b| {
            b.put_u16(columns.len() as u16);
            for (i, (name, oid)) in columns.iter().enumerate() {
                b.put_nul_string(name);
                b.put_u32(16384);
                b.put_i16(i as i16 + 1);
                b.put_u32(*oid);
                b.put_i16(-1);
                b.put_i32(-1);
                b.put_i16(0);
            }
        })
    }

    pub fn data_row(self, values: &[Option<&str>]) -> Self {
        self.with(b'D', |b| {
            b.put_u16(values.len() as u16);
            for value in values {
                match value {
                    Some(value) => {
                        b.put_i32(value.len() as i32);
                        b.put_slice(value.as_bytes());
                    },
                    None => b.put_i32(-1),
                }
            }
        })
    }

    pub fn complete(self, tag: &str) -> Self {
        self.with(b'C', |b| b.put_nul_string(tag))
    }

    pub fn empty_query(self) -> Self {
        self.frame(b'I', &[])
    }

    pub fn error(self, fields: &[(u8, &str)]) -> Self {
        self.fields(b'E', fields)
    }

    pub fn notice(self, fields: &[(u8, &str)]) -> Self {
        self.fields(b'N', fields)
    }

    fn fields(self, msgtype: u8, fields: &[(u8, &str)]) -> Self {
        self.with(msgtype, |b| {
            for (code, value) in fields {
                b.put_u8(*code);
                b.put_nul_string(value);
            }
            b.put_u8(0);
        })
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Append another script.
    pub fn then(mut self, script: Script) -> Self {
        self.buf.extend_from_slice(&script.buf);
        self
    }

    /// Split the script back into frames.
    pub fn frames(mut self) -> Vec<Frame> {
        let mut frames = vec![];
        while let Some(frame) = frame::decode(&mut self.buf, usize::MAX).unwrap() {
            frames.push(frame);
        }
        frames
    }
}

/// Client io with the script already buffered on the server side.
///
/// The returned server half must be kept alive, otherwise client writes fail.
pub async fn serve(script: Script) -> (DuplexStream, DuplexStream) {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    server.write_all(&script.buf).await.unwrap();
    (client, server)
}

/// Like [`serve`], but the server closes its write half after the script.
pub async fn serve_then_close(script: Script) -> (DuplexStream, DuplexStream) {
    let (client, mut server) = serve(script).await;
    server.shutdown().await.unwrap();
    (client, server)
}

/// Write more messages after the client is connected.
pub async fn reply(server: &mut DuplexStream, script: Script) {
    server.write_all(&script.buf).await.unwrap();
}

/// Read the startup message sent by the client, excluding the length.
pub async fn recv_startup(server: &mut DuplexStream) -> Bytes {
    let len = server.read_u32().await.unwrap();
    let mut body = vec![0u8; len as usize - 4];
    server.read_exact(&mut body).await.unwrap();
    body.into()
}

/// Read one tagged frame sent by the client.
pub async fn recv_frame(server: &mut DuplexStream) -> Frame {
    let msgtype = server.read_u8().await.unwrap();
    let len = server.read_u32().await.unwrap();
    let mut body = vec![0u8; len as usize - 4];
    server.read_exact(&mut body).await.unwrap();
    Frame { msgtype, body: body.into() }
}
