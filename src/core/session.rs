/// Persistent backend session construction and teardown
///
/// A session slot owns one authenticated backend connection plus its
/// startup packet. Construction is all-or-nothing: any failure releases
/// everything acquired so far before the error surfaces.
use std::io;
use std::time::SystemTime;

use tracing::{debug, error, warn};

use crate::config::PoolConfig;
use crate::core::connection::BackendConnection;
use crate::core::protocol::{self, StartupPacket};
use crate::core::transport;
use crate::core::{BackendEndpoint, Credentials};
use crate::error::{ErrorSeverity, PoolError, SessionError};

/// Transport-security negotiation hook, run right after the socket opens.
pub trait TlsNegotiator {
    fn negotiate(&self, conn: &mut BackendConnection) -> Result<(), SessionError>;
}

/// Plaintext sessions: negotiation succeeds without touching the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTlsNegotiation;

impl TlsNegotiator for NoTlsNegotiation {
    fn negotiate(&self, _conn: &mut BackendConnection) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Authentication sub-protocol hook, run after the startup packet is sent.
/// The handler reads the backend's challenge and feeds the optional
/// password.
pub trait Authenticator {
    fn authenticate(
        &self,
        conn: &mut BackendConnection,
        credentials: &Credentials,
    ) -> Result<(), SessionError>;
}

/// Trust authentication: the backend is expected to ask for nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustAuthenticator;

impl Authenticator for TrustAuthenticator {
    fn authenticate(
        &self,
        _conn: &mut BackendConnection,
        _credentials: &Credentials,
    ) -> Result<(), SessionError> {
        Ok(())
    }
}

/// One authenticated backend session, exclusively owning its connection
/// and startup packet. Only the session builder constructs these.
#[derive(Debug)]
pub struct SessionSlot {
    connection: BackendConnection,
    startup: StartupPacket,
    close_time: Option<SystemTime>,
    terminated: bool,
}

impl SessionSlot {
    pub(crate) fn from_parts(connection: BackendConnection, startup: StartupPacket) -> Self {
        Self {
            connection,
            startup,
            close_time: None,
            terminated: false,
        }
    }

    pub fn connection(&mut self) -> &mut BackendConnection {
        &mut self.connection
    }

    pub fn startup(&self) -> &StartupPacket {
        &self.startup
    }

    pub fn node_id(&self) -> i32 {
        self.connection.node_id()
    }

    /// When the slot allocator last parked this slot, if ever.
    pub fn close_time(&self) -> Option<SystemTime> {
        self.close_time
    }

    /// Stamp the park time; the slot allocator uses this for reuse
    /// lifetime checks.
    pub fn mark_closed(&mut self) {
        self.close_time = Some(SystemTime::now());
    }

    /// Say goodbye and tear the session down.
    pub fn discard(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        debug!(node_id = self.connection.node_id(), "discarding backend session");
        self.connection.write(&protocol::terminate_frame());
        self.connection.flush_best_effort();
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Builds authenticated sessions against explicit `(node, endpoint,
/// credentials)` tuples for the pool and for persistent administrative
/// connections.
pub struct SessionBuilder<'a> {
    config: &'a PoolConfig,
    tls: &'a dyn TlsNegotiator,
    auth: &'a dyn Authenticator,
}

impl<'a> SessionBuilder<'a> {
    pub fn new(
        config: &'a PoolConfig,
        tls: &'a dyn TlsNegotiator,
        auth: &'a dyn Authenticator,
    ) -> Self {
        Self { config, tls, auth }
    }

    /// Build a persistent authenticated session to `endpoint`.
    ///
    /// Fails all-or-nothing: on any error path the socket is closed and
    /// every buffer acquired for the slot is released before the error
    /// reaches the caller.
    pub fn build(
        &self,
        node_id: i32,
        endpoint: &BackendEndpoint,
        credentials: &Credentials,
        retry: bool,
    ) -> Result<SessionSlot, SessionError> {
        let stream = transport::connect(endpoint, &self.config.connect_options(), retry)?;

        let mut conn = BackendConnection::open(stream);
        conn.mark_backend();
        conn.set_node_id(node_id);

        self.tls.negotiate(&mut conn)?;

        let startup =
            protocol::build_startup_packet(&credentials.user, &credentials.database)?;
        send_startup_packet(&mut conn, &startup)?;

        self.auth.authenticate(&mut conn, credentials)?;

        debug!(
            node_id,
            endpoint = %endpoint,
            user = %credentials.user,
            database = %credentials.database,
            "backend session established"
        );

        Ok(SessionSlot {
            connection: conn,
            startup,
            close_time: None,
            terminated: false,
        })
    }

    /// Opportunistic variant: failures are reported and swallowed, and
    /// the caller gets no slot. Nothing acquired during the attempt
    /// outlives it.
    pub fn build_opt(
        &self,
        node_id: i32,
        endpoint: &BackendEndpoint,
        credentials: &Credentials,
        retry: bool,
    ) -> Option<SessionSlot> {
        match self.build(node_id, endpoint, credentials, retry) {
            Ok(slot) => Some(slot),
            Err(e) => {
                let report = PoolError::from(e);
                match report.severity() {
                    ErrorSeverity::Warning => warn!(node_id, endpoint = %endpoint, "{report}"),
                    _ => error!(node_id, endpoint = %endpoint, "{report}"),
                }
                None
            }
        }
    }
}

/// Transmit the startup message: length field first, then the version
/// word and parameter block, flushed as one unit.
pub fn send_startup_packet(
    conn: &mut BackendConnection,
    startup: &StartupPacket,
) -> io::Result<()> {
    conn.write(&startup.length().to_be_bytes());
    conn.write_and_flush(startup.raw())
}
