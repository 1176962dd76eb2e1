/// Buffered wire connection to one backend
///
/// Owns the socket plus a write buffer with explicit flush points, the
/// "backend" side tag, and the node id stamped by the session builder.
use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::core::transport::BackendStream;

#[derive(Debug)]
pub struct BackendConnection {
    stream: BackendStream,
    wbuf: BytesMut,
    node_id: i32,
    is_backend: bool,
}

impl BackendConnection {
    pub fn open(stream: BackendStream) -> Self {
        Self {
            stream,
            wbuf: BytesMut::with_capacity(8192),
            node_id: -1,
            is_backend: false,
        }
    }

    /// Tag this connection as the backend side of the proxy.
    pub fn mark_backend(&mut self) {
        self.is_backend = true;
    }

    pub fn is_backend(&self) -> bool {
        self.is_backend
    }

    pub fn set_node_id(&mut self, node_id: i32) {
        self.node_id = node_id;
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    /// Append bytes to the write buffer; nothing hits the wire until a
    /// flush.
    pub fn write(&mut self, bytes: &[u8]) {
        self.wbuf.extend_from_slice(bytes);
    }

    /// Bytes buffered and not yet flushed.
    pub fn pending(&self) -> usize {
        self.wbuf.len()
    }

    /// Flush the write buffer to the socket.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.wbuf.is_empty() {
            let n = self.stream.write(&self.wbuf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "backend closed while flushing",
                ));
            }
            self.wbuf.advance(n);
        }
        self.stream.flush()
    }

    pub fn write_and_flush(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write(bytes);
        self.flush()
    }

    /// Best-effort flush with the socket temporarily non-blocking.
    ///
    /// The backend may already have closed its side; a blocking flush here
    /// would stall on a dead peer and trip failover handling during normal
    /// termination (long COPY streams are the known case). Residual bytes
    /// are dropped, not escalated.
    pub fn flush_best_effort(&mut self) {
        if self.wbuf.is_empty() {
            return;
        }
        if self.stream.set_nonblocking(true).is_err() {
            self.wbuf.clear();
            return;
        }
        while !self.wbuf.is_empty() {
            match self.stream.write(&self.wbuf) {
                Ok(0) => break,
                Ok(n) => self.wbuf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!(error = %e, "dropping residual bytes on teardown");
                    break;
                }
            }
        }
        let _ = self.stream.set_nonblocking(false);
        self.wbuf.clear();
    }
}

impl Read for BackendConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
