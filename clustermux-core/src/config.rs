//! Connection and cache configuration.
//!
//! Configuration is loaded from environment variables with defaults suited
//! to a local development server, or built directly with the `with_*`
//! builders.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::partition::PartitionId;
use crate::scheme::{RestMapper, Scheme, StaticRestMapper};

/// Default path segment between the base host and a partition identifier.
pub const DEFAULT_PARTITION_SEGMENT: &str = "clusters";

// ============================================================================
// CONNECTION
// ============================================================================

/// Base connection descriptor shared by every partition.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base endpoint, e.g. `https://127.0.0.1:6443`.
    pub host: String,
    /// Bearer token presented to the server.
    #[serde(default, skip_serializing)]
    pub bearer_token: Option<String>,
    /// Path segment inserted before the partition identifier.
    pub partition_segment: String,
    /// Per-request timeout handed to the underlying client.
    pub timeout: Duration,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("partition_segment", &self.partition_segment)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "https://127.0.0.1:6443".to_string(),
            bearer_token: None,
            partition_segment: DEFAULT_PARTITION_SEGMENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_partition_segment(mut self, segment: impl Into<String>) -> Self {
        self.partition_segment = segment.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the descriptor before any cache is built from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "host".to_string(),
            });
        }
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "host".to_string(),
                value: self.host.clone(),
                reason: "host must start with http:// or https://".to_string(),
            });
        }
        let segment = self.partition_segment.trim_matches('/');
        if segment.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "partition_segment".to_string(),
            });
        }
        Ok(())
    }

    /// Connection scoped to one partition: `<host>/<segment>/<id>`.
    ///
    /// The wildcard derives `<host>/<segment>/*`.
    pub fn for_partition(&self, partition: &PartitionId) -> Self {
        let mut scoped = self.clone();
        scoped.host = format!(
            "{}/{}/{}",
            self.host.trim_end_matches('/'),
            self.partition_segment.trim_matches('/'),
            partition
        );
        scoped
    }
}

// ============================================================================
// CACHE OPTIONS
// ============================================================================

/// Type registry and REST mapping handed to every partition cache.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub scheme: Arc<Scheme>,
    /// Filled from the scheme by [`CacheOptions::with_defaults`] when unset.
    pub mapper: Option<Arc<dyn RestMapper>>,
    /// How often informers replay their full store to handlers.
    pub resync_period: Option<Duration>,
}

impl CacheOptions {
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme: Arc::new(scheme),
            mapper: None,
            resync_period: None,
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn RestMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }

    /// Fill in a mapper derived from the scheme when none was supplied.
    pub fn with_defaults(mut self) -> Self {
        if self.mapper.is_none() {
            self.mapper = Some(Arc::new(StaticRestMapper::from_scheme(&self.scheme)));
        }
        self
    }

    /// Every registered kind must be resolvable through the mapper.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(mapper) = &self.mapper else {
            return Err(ConfigError::MissingRequired {
                field: "mapper".to_string(),
            });
        };
        if let Some(unmapped) = self.scheme.kinds().find(|gvk| mapper.mapping(gvk).is_none()) {
            return Err(ConfigError::InvalidValue {
                field: "mapper".to_string(),
                value: unmapped.to_string(),
                reason: "registered kind has no REST mapping".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything needed to construct the cache for one partition.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub partition: PartitionId,
    pub connection: ConnectionConfig,
    pub options: CacheOptions,
}

impl PartitionConfig {
    /// Derive the scoped connection for `partition` from the shared base.
    ///
    /// The identifier becomes a path segment, so it is validated first.
    pub fn derive(
        base: &ConnectionConfig,
        options: &CacheOptions,
        partition: PartitionId,
    ) -> Result<Self, ConfigError> {
        partition.validate()?;
        base.validate()?;
        options.validate()?;
        Ok(Self {
            connection: base.for_partition(&partition),
            options: options.clone(),
            partition,
        })
    }
}

// ============================================================================
// MULTI-PARTITION CONFIG
// ============================================================================

/// Top-level configuration of the multi-partition cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiCacheConfig {
    pub connection: ConnectionConfig,
    /// Partitions whose caches are built eagerly at construction.
    #[serde(default)]
    pub initial_partitions: Vec<PartitionId>,
    /// Upper bound callers should put on `wait_for_cache_sync`.
    pub sync_timeout: Duration,
}

impl Default for MultiCacheConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            initial_partitions: Vec::new(),
            sync_timeout: Duration::from_secs(120),
        }
    }
}

impl MultiCacheConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }

    pub fn with_initial_partitions(mut self, partitions: Vec<PartitionId>) -> Self {
        self.initial_partitions = partitions;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Create config from environment variables.
    ///
    /// Environment variables:
    /// - `CLUSTERMUX_HOST`: Base endpoint (default: https://127.0.0.1:6443)
    /// - `CLUSTERMUX_TOKEN`: Bearer token (default: none)
    /// - `CLUSTERMUX_PARTITION_SEGMENT`: Path segment before the partition (default: clusters)
    /// - `CLUSTERMUX_PARTITIONS`: Comma-separated partitions built at startup (default: none)
    /// - `CLUSTERMUX_SYNC_TIMEOUT_SECS`: Cache sync timeout (default: 120)
    /// - `CLUSTERMUX_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 30)
    ///
    /// Malformed partition identifiers are an error; malformed numbers fall
    /// back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("CLUSTERMUX_HOST").unwrap_or(defaults.connection.host);

        let bearer_token = std::env::var("CLUSTERMUX_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let partition_segment = std::env::var("CLUSTERMUX_PARTITION_SEGMENT")
            .unwrap_or(defaults.connection.partition_segment);

        let timeout = std::env::var("CLUSTERMUX_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.connection.timeout);

        let initial_partitions = match std::env::var("CLUSTERMUX_PARTITIONS") {
            Ok(raw) => parse_partition_list(&raw)?,
            Err(_) => Vec::new(),
        };

        let sync_timeout = std::env::var("CLUSTERMUX_SYNC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.sync_timeout);

        let config = Self {
            connection: ConnectionConfig {
                host,
                bearer_token,
                partition_segment,
                timeout,
            },
            initial_partitions,
            sync_timeout,
        };
        config.connection.validate()?;
        Ok(config)
    }
}

/// Parse a comma-separated partition list, skipping empty items.
pub fn parse_partition_list(raw: &str) -> Result<Vec<PartitionId>, ConfigError> {
    raw.split(',')
        .filter(|item| !item.trim().is_empty())
        .map(PartitionId::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::GroupVersionKind;
    use crate::scheme::{ResourceScope, RestMapping};

    #[derive(Debug)]
    struct EmptyMapper;

    impl RestMapper for EmptyMapper {
        fn mapping(&self, _gvk: &GroupVersionKind) -> Option<RestMapping> {
            None
        }
    }

    fn scheme() -> Scheme {
        Scheme::new().register(
            GroupVersionKind::new("", "v1", "ConfigMap"),
            ResourceScope::Namespaced,
        )
    }

    #[test]
    fn test_for_partition_appends_segment() {
        let base = ConnectionConfig::new("https://api.example.dev/");
        assert_eq!(
            base.for_partition(&PartitionId::new("root:a")).host,
            "https://api.example.dev/clusters/root:a"
        );
        assert_eq!(
            base.for_partition(&PartitionId::wildcard()).host,
            "https://api.example.dev/clusters/*"
        );

        let custom = base.with_partition_segment("/workspaces/");
        assert_eq!(
            custom.for_partition(&PartitionId::new("b")).host,
            "https://api.example.dev/workspaces/b"
        );
    }

    #[test]
    fn test_validate_rejects_bad_hosts() {
        assert!(ConnectionConfig::new("").validate().is_err());
        assert!(ConnectionConfig::new("api.example.dev").validate().is_err());
        assert!(ConnectionConfig::new("http://localhost:8080").validate().is_ok());
        assert!(ConnectionConfig::default()
            .with_partition_segment("/")
            .validate()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ConnectionConfig::default().with_bearer_token("s3cret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_options_defaults_fill_mapper() {
        let options = CacheOptions::new(scheme());
        assert!(options.validate().is_err());
        let options = options.with_defaults();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_reject_unmapped_kind() {
        let options = CacheOptions::new(scheme()).with_mapper(Arc::new(EmptyMapper));
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("no REST mapping"));
    }

    #[test]
    fn test_partition_config_derive() {
        let base = ConnectionConfig::new("https://api.example.dev");
        let options = CacheOptions::new(scheme()).with_defaults();
        let config = PartitionConfig::derive(&base, &options, PartitionId::new("a")).unwrap();
        assert_eq!(config.connection.host, "https://api.example.dev/clusters/a");
        assert_eq!(config.partition.as_str(), "a");

        let bad = ConnectionConfig::new("not-a-url");
        assert!(PartitionConfig::derive(&bad, &options, PartitionId::new("a")).is_err());
    }

    #[test]
    fn test_partition_config_rejects_path_segments() {
        let base = ConnectionConfig::new("https://api.example.dev");
        let options = CacheOptions::new(scheme()).with_defaults();
        let err = PartitionConfig::derive(&base, &options, PartitionId::new("a/../b")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "partition"));
    }

    #[test]
    fn test_parse_partition_list() {
        let parsed = parse_partition_list("a, b,,c ").unwrap();
        assert_eq!(
            parsed,
            vec![PartitionId::new("a"), PartitionId::new("b"), PartitionId::new("c")]
        );
        assert!(parse_partition_list("a,b/c").is_err());
    }

    #[test]
    fn test_multi_config_builder() {
        let config = MultiCacheConfig::new(ConnectionConfig::new("http://localhost"))
            .with_initial_partitions(vec![PartitionId::new("a")])
            .with_sync_timeout(Duration::from_secs(5));
        assert_eq!(config.initial_partitions.len(), 1);
        assert_eq!(config.sync_timeout, Duration::from_secs(5));
    }

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    // Every env case lives in one test so they never race each other.
    #[test]
    fn test_multi_config_from_env() {
        let _token = EnvVarGuard::set("CLUSTERMUX_TOKEN", None);
        let _segment = EnvVarGuard::set("CLUSTERMUX_PARTITION_SEGMENT", None);
        let _timeout = EnvVarGuard::set("CLUSTERMUX_REQUEST_TIMEOUT_SECS", None);
        {
            let _host = EnvVarGuard::set("CLUSTERMUX_HOST", None);
            let _parts = EnvVarGuard::set("CLUSTERMUX_PARTITIONS", None);
            let _sync = EnvVarGuard::set("CLUSTERMUX_SYNC_TIMEOUT_SECS", None);
            assert_eq!(MultiCacheConfig::from_env().unwrap(), MultiCacheConfig::default());
        }
        {
            let _host = EnvVarGuard::set("CLUSTERMUX_HOST", Some("https://kcp.example.dev"));
            let _parts = EnvVarGuard::set("CLUSTERMUX_PARTITIONS", Some("root:a, root:b"));
            let _sync = EnvVarGuard::set("CLUSTERMUX_SYNC_TIMEOUT_SECS", Some("15"));
            let config = MultiCacheConfig::from_env().unwrap();
            assert_eq!(config.connection.host, "https://kcp.example.dev");
            assert_eq!(
                config.initial_partitions,
                vec![PartitionId::new("root:a"), PartitionId::new("root:b")]
            );
            assert_eq!(config.sync_timeout, Duration::from_secs(15));
        }
        {
            let _host = EnvVarGuard::set("CLUSTERMUX_HOST", Some("kcp.example.dev"));
            let _parts = EnvVarGuard::set("CLUSTERMUX_PARTITIONS", None);
            assert!(MultiCacheConfig::from_env().is_err());
        }
    }
}
