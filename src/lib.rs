pub mod balancer;
pub mod config;
pub mod error;
/// Compuerta - backend-connection and load-balancing core for
/// streaming-replication PostgreSQL clusters
///
/// The crate covers three tightly-coupled concerns of a protocol-aware
/// connection pooling proxy:
/// 1. Building persistent authenticated backend sessions: socket setup,
///    transport-security negotiation, startup packet, authentication,
///    and graceful termination, with all-or-nothing cleanup.
/// 2. Load-balancing node selection honoring per-database and
///    per-application redirect preferences with weighted randomization.
/// 3. A process-wide backend-version cache probed once per lifetime.
///
/// Cluster membership, failover, the query router, and the listener are
/// external collaborators; the core consumes a read-only cluster view
/// and trait hooks for TLS, authentication, and query caching.
pub mod core;
pub mod version;

pub use crate::balancer::{resolve_token, LoadBalancer, RedirectRule, RedirectRuleList};
pub use crate::config::{PoolConfig, RedirectRuleSpec};
pub use crate::core::connection::BackendConnection;
pub use crate::core::protocol::{
    build_startup_packet, simple_query_frame, terminate_frame, StartupPacket,
    PROTOCOL_VERSION, STARTUP_PARAM_CAPACITY,
};
pub use crate::core::session::{
    send_startup_packet, Authenticator, NoTlsNegotiation, SessionBuilder, SessionSlot,
    TlsNegotiator, TrustAuthenticator,
};
pub use crate::core::transport::{connect, unix_socket_path, BackendStream, ConnectOptions};
pub use crate::core::{BackendEndpoint, BackendNode, ClusterView, Credentials};
pub use crate::error::{
    ConfigError, ConnectError, ErrorSeverity, FrameError, PoolError, PoolResult, SessionError,
    StartupField, VersionError,
};
pub use crate::version::{
    parse_version, pg_version, PgVersion, RelationCache, RelationCacheFactory, VersionCache,
    VERSION_QUERY,
};
