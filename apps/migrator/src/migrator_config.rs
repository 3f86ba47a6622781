use std::env;
use std::path::PathBuf;
use std::time::Duration;

use aegis_application::{AuthorizationConfig, MigrationConfig, PermissionCacheConfig};
use aegis_core::{AppError, AppResult};
use tracing_subscriber::EnvFilter;

/// Backend selected for the permission cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendConfig {
    /// Pass-through cache; every read misses.
    None,
    /// Process-local cache.
    Memory,
    /// Shared Redis cache.
    Redis {
        /// Connection URL.
        redis_url: String,
    },
}

/// Runtime configuration of the migrator.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    pub cache_backend: CacheBackendConfig,
    pub cache_timeout: Duration,
    pub rollout_percentage: u8,
    pub actors_fixture_path: Option<PathBuf>,
    pub legacy_matrix_path: Option<PathBuf>,
    pub max_hierarchy_depth: u32,
}

impl MigratorConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let cache_backend = match lookup("PERMISSION_CACHE_BACKEND")
            .unwrap_or_else(|| "memory".to_owned())
            .trim()
        {
            "none" => CacheBackendConfig::None,
            "memory" => CacheBackendConfig::Memory,
            "redis" => CacheBackendConfig::Redis {
                redis_url: lookup("REDIS_URL")
                    .filter(|value| !value.trim().is_empty())
                    .ok_or_else(|| {
                        AppError::Validation(
                            "REDIS_URL is required when PERMISSION_CACHE_BACKEND is 'redis'"
                                .to_owned(),
                        )
                    })?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "PERMISSION_CACHE_BACKEND must be 'none', 'memory' or 'redis', got '{other}'"
                )));
            }
        };

        let cache_timeout_ms = parse_or(&lookup, "PERMISSION_CACHE_TIMEOUT_MS", 50_u64)?;
        if cache_timeout_ms == 0 {
            return Err(AppError::Validation(
                "PERMISSION_CACHE_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

        let rollout_percentage = parse_or(&lookup, "ROLLOUT_PERCENTAGE", 10_u8)?;
        if rollout_percentage > 100 {
            return Err(AppError::Validation(format!(
                "ROLLOUT_PERCENTAGE must be between 0 and 100, got {rollout_percentage}"
            )));
        }

        let max_hierarchy_depth = parse_or(&lookup, "MAX_HIERARCHY_DEPTH", 10_u32)?;
        if max_hierarchy_depth == 0 {
            return Err(AppError::Validation(
                "MAX_HIERARCHY_DEPTH must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            cache_backend,
            cache_timeout: Duration::from_millis(cache_timeout_ms),
            rollout_percentage,
            actors_fixture_path: optional_path(&lookup, "ACTORS_FIXTURE_PATH"),
            legacy_matrix_path: optional_path(&lookup, "LEGACY_MATRIX_PATH"),
            max_hierarchy_depth,
        })
    }

    pub fn authorization(&self) -> AppResult<AuthorizationConfig> {
        AuthorizationConfig::default().with_max_hierarchy_depth(self.max_hierarchy_depth)
    }

    pub fn cache(&self) -> PermissionCacheConfig {
        PermissionCacheConfig::default().with_operation_timeout(self.cache_timeout)
    }

    pub fn migration(&self) -> AppResult<MigrationConfig> {
        MigrationConfig::default().with_rollout_percentage(self.rollout_percentage)
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

fn optional_path(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<PathBuf> {
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}
