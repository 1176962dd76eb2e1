/// Backend version probe
///
/// Issues `SELECT version()` once per process lifetime through a
/// relation-cache collaborator, normalizes the reported version, and
/// memoizes it. All probe failures are fatal to the session process:
/// they indicate an incompatible backend.
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::core::session::SessionSlot;
use crate::error::VersionError;

/// The probe query, also the relation-cache key space for the memo.
pub const VERSION_QUERY: &str = "SELECT version()";

const VERSION_STRING_MAX: usize = 1024;

/// Normalized backend version.
///
/// `major` is the reported major times ten: 100 for version 10, 96 for
/// version 9.6, and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgVersion {
    major: i32,
    minor: i32,
    version_string: String,
}

impl PgVersion {
    pub fn major(&self) -> i32 {
        self.major
    }

    pub fn minor(&self) -> i32 {
        self.minor
    }

    /// The raw string the backend reported, bounded in length.
    pub fn version_string(&self) -> &str {
        &self.version_string
    }
}

/// Memoization layer over one SQL query, keyed by a human-readable name.
pub trait RelationCache: Send + Sync {
    /// Look up `key`, issuing the cached query over `session` on a miss.
    fn search(&self, session: &mut SessionSlot, key: &str) -> Result<String, VersionError>;
}

/// Creates relation caches; supplied by the query-execution layer.
pub trait RelationCacheFactory: Send + Sync {
    fn create(
        &self,
        size: u32,
        query: &str,
        is_table: bool,
    ) -> Result<Box<dyn RelationCache>, VersionError>;
}

/// Version memo plus the lazily-created relation cache behind it.
pub struct VersionCache {
    relcache: OnceCell<Box<dyn RelationCache>>,
    version: OnceCell<PgVersion>,
}

impl VersionCache {
    pub const fn new() -> Self {
        Self {
            relcache: OnceCell::new(),
            version: OnceCell::new(),
        }
    }

    /// The backend version, probing on first call and serving the memo
    /// with no further I/O afterwards.
    pub fn get(
        &self,
        session: &mut SessionSlot,
        factory: &dyn RelationCacheFactory,
        relcache_size: u32,
    ) -> Result<&PgVersion, VersionError> {
        if let Some(version) = self.version.get() {
            debug!("backend version served from local cache");
            return Ok(version);
        }

        let relcache = self
            .relcache
            .get_or_try_init(|| factory.create(relcache_size, VERSION_QUERY, false))?;

        let result = relcache.search(session, "version")?;
        debug!(version_string = %result, "probed backend version");

        let parsed = parse_version(&result)?;
        // First writer wins; a racing probe observes one fully-built value
        Ok(self.version.get_or_init(|| parsed))
    }
}

impl Default for VersionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide memo, never invalidated during the process lifetime.
static PG_VERSION: VersionCache = VersionCache::new();

/// The backend version for this process, probed once.
pub fn pg_version(
    session: &mut SessionSlot,
    factory: &dyn RelationCacheFactory,
    relcache_size: u32,
) -> Result<&'static PgVersion, VersionError> {
    PG_VERSION.get(session, factory, relcache_size)
}

/// Normalize a `version()` result string.
///
/// The component collectors stop at the first non-digit and convert
/// leniently, so "12beta1" yields major 120 with an empty (zero) minor.
pub fn parse_version(result: &str) -> Result<PgVersion, VersionError> {
    // Per-component collection bound, leaving digits enough for any
    // plausible component
    const COMPONENT_MAX: usize = 9;

    let bytes = result.as_bytes();
    let space = result.find(' ').ok_or_else(|| {
        VersionError::Unparsable(format!("no space in version string: {result}"))
    })?;

    let mut pos = space + 1;
    let first = lenient_atoi(collect_component(bytes, &mut pos, COMPONENT_MAX, b"."));
    if !(6..=100).contains(&first) {
        return Err(VersionError::OutOfRange {
            component: "major",
            value: first,
        });
    }

    let major = if first >= 10 {
        first * 10
    } else {
        pos += 1;
        let second = lenient_atoi(collect_component(bytes, &mut pos, COMPONENT_MAX, b". "));
        first * 10 + second
    };

    pos += 1;
    let minor = lenient_atoi(collect_component(bytes, &mut pos, COMPONENT_MAX, b". "));
    if !(0..=100).contains(&minor) {
        return Err(VersionError::OutOfRange {
            component: "minor",
            value: minor,
        });
    }

    Ok(PgVersion {
        major,
        minor,
        version_string: bounded(result, VERSION_STRING_MAX),
    })
}

/// Advance `pos` over at most `max` bytes, stopping at any delimiter,
/// and return the bytes walked over.
fn collect_component<'a>(bytes: &'a [u8], pos: &mut usize, max: usize, stop: &[u8]) -> &'a [u8] {
    let start = (*pos).min(bytes.len());
    let mut end = start;
    while end < bytes.len() && end - start < max && !stop.contains(&bytes[end]) {
        end += 1;
    }
    *pos = end;
    &bytes[start..end]
}

/// Leading-digit conversion: stops at the first non-digit, empty input
/// converts to 0.
fn lenient_atoi(bytes: &[u8]) -> i32 {
    let mut value: i32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + i32::from(b - b'0');
    }
    value
}

fn bounded(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::BackendConnection;
    use crate::core::protocol::build_startup_packet;
    use crate::core::transport::BackendStream;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_slot() -> SessionSlot {
        let (ours, _peer) = UnixStream::pair().unwrap();
        let conn = BackendConnection::open(BackendStream::Unix(ours));
        SessionSlot::from_parts(conn, build_startup_packet("alice", "app").unwrap())
    }

    struct FakeCache {
        result: String,
        searches: Arc<AtomicUsize>,
    }

    impl RelationCache for FakeCache {
        fn search(&self, _session: &mut SessionSlot, key: &str) -> Result<String, VersionError> {
            assert_eq!(key, "version");
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct FakeFactory {
        result: String,
        searches: Arc<AtomicUsize>,
        fail_create: bool,
    }

    impl RelationCacheFactory for FakeFactory {
        fn create(
            &self,
            size: u32,
            query: &str,
            is_table: bool,
        ) -> Result<Box<dyn RelationCache>, VersionError> {
            if self.fail_create {
                return Err(VersionError::CacheCreation);
            }
            assert!(size > 0);
            assert_eq!(query, VERSION_QUERY);
            assert!(!is_table);
            Ok(Box::new(FakeCache {
                result: self.result.clone(),
                searches: Arc::clone(&self.searches),
            }))
        }
    }

    fn fake_factory(result: &str) -> (FakeFactory, Arc<AtomicUsize>) {
        let searches = Arc::new(AtomicUsize::new(0));
        (
            FakeFactory {
                result: result.to_string(),
                searches: Arc::clone(&searches),
                fail_create: false,
            },
            searches,
        )
    }

    #[test]
    fn test_parse_pre_10_version() {
        let v = parse_version("PostgreSQL 9.6.5 on x86_64-pc-linux-gnu").unwrap();
        assert_eq!(v.major(), 96);
        assert_eq!(v.minor(), 5);
    }

    #[test]
    fn test_parse_modern_version() {
        let v = parse_version("PostgreSQL 12.3 on x86_64-pc-linux-gnu").unwrap();
        assert_eq!(v.major(), 120);
        assert_eq!(v.minor(), 3);
    }

    #[test]
    fn test_parse_version_10() {
        let v = parse_version("PostgreSQL 10.1 on x86_64-pc-linux-gnu").unwrap();
        assert_eq!(v.major(), 100);
        assert_eq!(v.minor(), 1);
    }

    #[test]
    fn test_parse_beta_version() {
        let v = parse_version("PostgreSQL 12beta1 on x86_64-pc-linux-gnu").unwrap();
        assert_eq!(v.major(), 120);
        assert_eq!(v.minor(), 0);
    }

    #[test]
    fn test_parse_keeps_version_string() {
        let s = "PostgreSQL 11.7 on x86_64-pc-linux-gnu, compiled by gcc";
        let v = parse_version(s).unwrap();
        assert_eq!(v.version_string(), s);
    }

    #[test]
    fn test_parse_bounds_version_string() {
        let s = format!("PostgreSQL 11.7 {}", "x".repeat(4096));
        let v = parse_version(&s).unwrap();
        assert_eq!(v.version_string().len(), VERSION_STRING_MAX);
    }

    #[test]
    fn test_parse_rejects_missing_space() {
        assert!(matches!(
            parse_version("PostgreSQL-12.3"),
            Err(VersionError::Unparsable(_))
        ));
    }

    #[test]
    fn test_parse_rejects_out_of_range_major() {
        assert!(matches!(
            parse_version("PostgreSQL 5.9.1 on x86_64"),
            Err(VersionError::OutOfRange {
                component: "major",
                value: 5
            })
        ));
        assert!(matches!(
            parse_version("PostgreSQL 101.0 on x86_64"),
            Err(VersionError::OutOfRange {
                component: "major",
                value: 101
            })
        ));
    }

    #[test]
    fn test_parse_rejects_out_of_range_minor() {
        assert!(matches!(
            parse_version("PostgreSQL 9.6.101 on x86_64"),
            Err(VersionError::OutOfRange {
                component: "minor",
                value: 101
            })
        ));
    }

    #[test]
    fn test_probe_memoizes() {
        let cache = VersionCache::new();
        let (factory, searches) = fake_factory("PostgreSQL 13.2 on x86_64");
        let mut slot = test_slot();

        let v1 = cache.get(&mut slot, &factory, 256).unwrap();
        assert_eq!(v1.major(), 130);
        assert_eq!(v1.minor(), 2);
        assert_eq!(searches.load(Ordering::SeqCst), 1);

        let v2 = cache.get(&mut slot, &factory, 256).unwrap();
        assert_eq!(v2.major(), 130);
        // No further I/O after the first successful probe
        assert_eq!(searches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_cache_creation_failure() {
        let cache = VersionCache::new();
        let factory = FakeFactory {
            result: String::new(),
            searches: Arc::new(AtomicUsize::new(0)),
            fail_create: true,
        };
        let mut slot = test_slot();

        assert!(matches!(
            cache.get(&mut slot, &factory, 256),
            Err(VersionError::CacheCreation)
        ));
    }

    #[test]
    fn test_probe_unparsable_result_is_not_memoized() {
        let cache = VersionCache::new();
        let (factory, searches) = fake_factory("garbage");
        let mut slot = test_slot();

        assert!(cache.get(&mut slot, &factory, 256).is_err());
        assert_eq!(searches.load(Ordering::SeqCst), 1);

        // Still no memo; a second probe hits the backend again
        assert!(cache.get(&mut slot, &factory, 256).is_err());
        assert_eq!(searches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_process_wide_probe_returns_stable_reference() {
        let (factory, _searches) = fake_factory("PostgreSQL 14.4 on x86_64");
        let mut slot = test_slot();

        let v1 = pg_version(&mut slot, &factory, 256).unwrap();
        let v2 = pg_version(&mut slot, &factory, 256).unwrap();
        assert!(std::ptr::eq(v1, v2));
        assert_eq!(v1.major(), 140);
    }
}
