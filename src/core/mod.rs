/// Core abstractions shared between the session builder and the balancer
pub mod connection;
pub mod protocol;
pub mod session;
pub mod transport;

use std::fmt;

/// Address of one backend database server.
///
/// A host beginning with `/` names a directory holding a UNIX-domain
/// socket; anything else is resolved as a TCP host name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// UNIX-domain endpoints are identified by an absolute path host.
    pub fn is_unix_socket(&self) -> bool {
        self.host.starts_with('/')
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity a session presents to a backend.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub database: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            database: database.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Per-node entry of the cluster view.
#[derive(Debug, Clone)]
pub struct BackendNode {
    pub endpoint: BackendEndpoint,
    /// Routing weight; zero receives no load-balanced traffic.
    pub weight: f64,
    /// Node is nominally up.
    pub valid_raw: bool,
    /// Node is up and allowed to serve the current session mode.
    pub valid: bool,
}

/// Read-only snapshot of the cluster handed in by the cluster manager.
///
/// The core never mutates a view; selection takes the snapshot as-is and
/// its result is bounded to nodes eligible at snapshot time.
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub nodes: Vec<BackendNode>,
    /// -1 when the cluster currently has no primary.
    pub primary_node_id: i32,
    /// The nominal "first" backend, always defined; safety default.
    pub master_node_id: i32,
    pub streaming_replication_mode: bool,
}

impl ClusterView {
    pub fn num_backends(&self) -> i32 {
        self.nodes.len() as i32
    }

    pub fn node(&self, id: i32) -> Option<&BackendNode> {
        usize::try_from(id).ok().and_then(|i| self.nodes.get(i))
    }

    /// Node is nominally up.
    pub fn valid_raw(&self, id: i32) -> bool {
        self.node(id).map(|n| n.valid_raw).unwrap_or(false)
    }

    /// Node is up and may serve the current session mode.
    pub fn valid(&self, id: i32) -> bool {
        self.node(id).map(|n| n.valid).unwrap_or(false)
    }

    pub fn weight(&self, id: i32) -> f64 {
        self.node(id).map(|n| n.weight).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_endpoint_detection() {
        assert!(BackendEndpoint::new("/tmp", 5432).is_unix_socket());
        assert!(!BackendEndpoint::new("db1.example.com", 5432).is_unix_socket());
        assert!(!BackendEndpoint::new("127.0.0.1", 5432).is_unix_socket());
    }

    #[test]
    fn test_endpoint_display() {
        let ep = BackendEndpoint::new("10.0.1.5", 5433);
        assert_eq!(ep.to_string(), "10.0.1.5:5433");
    }

    #[test]
    fn test_cluster_view_accessors() {
        let view = ClusterView {
            nodes: vec![
                BackendNode {
                    endpoint: BackendEndpoint::new("127.0.0.1", 5432),
                    weight: 1.0,
                    valid_raw: true,
                    valid: true,
                },
                BackendNode {
                    endpoint: BackendEndpoint::new("127.0.0.1", 5433),
                    weight: 3.0,
                    valid_raw: true,
                    valid: false,
                },
            ],
            primary_node_id: 0,
            master_node_id: 0,
            streaming_replication_mode: true,
        };

        assert_eq!(view.num_backends(), 2);
        assert!(view.valid_raw(1));
        assert!(!view.valid(1));
        assert_eq!(view.weight(1), 3.0);

        // Out-of-range ids are simply not valid
        assert!(!view.valid_raw(-1));
        assert!(!view.valid_raw(2));
        assert_eq!(view.weight(7), 0.0);
    }

    #[test]
    fn test_credentials_builder() {
        let creds = Credentials::new("alice", "app").with_password("secret");
        assert_eq!(creds.user, "alice");
        assert_eq!(creds.database, "app");
        assert_eq!(creds.password.as_deref(), Some("secret"));
    }
}
