/// Socket setup for backend endpoints
///
/// Opens UNIX- or TCP-domain sockets with an optional bounded retry and
/// exposes the blocking-mode toggle the session teardown relies on.
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::BackendEndpoint;
use crate::error::ConnectError;

/// Connect behavior knobs taken from the pool configuration.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Per-attempt timeout for TCP connects.
    pub timeout: Duration,
    /// Extra attempts made when the caller asks for retry.
    pub retry_attempts: u32,
    /// Pause between retry attempts.
    pub retry_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_attempts: 2,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// An open socket to a backend, UNIX- or TCP-domain.
#[derive(Debug)]
pub enum BackendStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl BackendStream {
    /// Toggle O_NONBLOCK on the underlying socket. Idempotent.
    pub fn set_nonblocking(&self, on: bool) -> io::Result<()> {
        match self {
            BackendStream::Tcp(s) => s.set_nonblocking(on),
            BackendStream::Unix(s) => s.set_nonblocking(on),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            BackendStream::Tcp(s) => s.set_read_timeout(timeout),
            BackendStream::Unix(s) => s.set_read_timeout(timeout),
        }
    }
}

impl Read for BackendStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BackendStream::Tcp(s) => s.read(buf),
            BackendStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for BackendStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BackendStream::Tcp(s) => s.write(buf),
            BackendStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BackendStream::Tcp(s) => s.flush(),
            BackendStream::Unix(s) => s.flush(),
        }
    }
}

/// Path of the conventional socket file inside the endpoint's directory.
pub fn unix_socket_path(endpoint: &BackendEndpoint) -> PathBuf {
    PathBuf::from(&endpoint.host).join(format!(".s.PGSQL.{}", endpoint.port))
}

/// Open a socket to `endpoint`.
///
/// `retry` selects between fail-fast and the bounded retry policy from
/// `opts`; the schedule itself is a configuration concern.
pub fn connect(
    endpoint: &BackendEndpoint,
    opts: &ConnectOptions,
    retry: bool,
) -> Result<BackendStream, ConnectError> {
    let attempts = if retry { 1 + opts.retry_attempts } else { 1 };
    let mut last_err: Option<io::Error> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            warn!(
                endpoint = %endpoint,
                attempt,
                "retrying backend connect"
            );
            thread::sleep(opts.retry_interval);
        }

        match connect_once(endpoint, opts) {
            Ok(stream) => {
                debug!(endpoint = %endpoint, "connected to backend");
                return Ok(stream);
            }
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "backend connect failed");
                last_err = Some(e);
            }
        }
    }

    Err(ConnectError {
        host: endpoint.host.clone(),
        port: endpoint.port,
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no connect attempt made")),
    })
}

fn connect_once(endpoint: &BackendEndpoint, opts: &ConnectOptions) -> io::Result<BackendStream> {
    if endpoint.is_unix_socket() {
        let path = unix_socket_path(endpoint);
        let stream = UnixStream::connect(&path)?;
        Ok(BackendStream::Unix(stream))
    } else {
        let addrs = (endpoint.host.as_str(), endpoint.port).to_socket_addrs()?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, opts.timeout) {
                Ok(stream) => {
                    // Reduce latency on the small startup/auth messages
                    stream.set_nodelay(true)?;
                    return Ok(BackendStream::Tcp(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")))
    }
}
