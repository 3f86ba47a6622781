use std::sync::Arc;

use aegis_application::{
    AuthorizationService, CompatibilityRouter, ConsistencyService, HierarchyResolver,
    LegacyEvaluator, LegacyPermissionMatrix, MigrationService, MigrationStores,
    NoopPermissionCacheBackend, PermissionAggregator, PermissionCache, PermissionCacheBackend,
    SeedCatalog,
};
use aegis_core::{AppError, AppResult};
use aegis_domain::ActorRecord;
use aegis_infrastructure::{
    InMemoryPermissionCacheBackend, InMemoryRbacStore, RedisPermissionCacheBackend,
    StaticLegacyPermissionMatrix, parse_actor_fixture,
};

use crate::migrator_config::{CacheBackendConfig, MigratorConfig};

const DEFAULT_ACTORS_FIXTURE: &str = include_str!("../fixtures/pharmacy_actors.json");

/// Fully wired engine over one store.
#[derive(Clone)]
pub struct MigratorServices {
    pub router: CompatibilityRouter,
    pub migration: MigrationService,
    pub dry_run_migration: MigrationService,
    pub consistency: ConsistencyService,
}

impl MigratorServices {
    pub fn from_config(config: &MigratorConfig) -> AppResult<Self> {
        let actors = match &config.actors_fixture_path {
            Some(path) => parse_actor_fixture(read_file(path, "actor fixture")?.as_str())?,
            None => parse_actor_fixture(DEFAULT_ACTORS_FIXTURE)?,
        };
        let matrix = match &config.legacy_matrix_path {
            Some(path) => {
                StaticLegacyPermissionMatrix::from_json(read_file(path, "legacy matrix")?.as_str())?
            }
            None => StaticLegacyPermissionMatrix::pharmacy()?,
        };
        let backend: Arc<dyn PermissionCacheBackend> = match &config.cache_backend {
            CacheBackendConfig::None => Arc::new(NoopPermissionCacheBackend),
            CacheBackendConfig::Memory => Arc::new(InMemoryPermissionCacheBackend::new()),
            CacheBackendConfig::Redis { redis_url } => {
                Arc::new(RedisPermissionCacheBackend::from_url(redis_url)?)
            }
        };

        tracing::info!(
            actors = actors.len(),
            legacy_actions = matrix.actions().len(),
            cache_backend = ?config.cache_backend,
            "migrator inputs loaded"
        );

        Self::build(config, actors, Arc::new(matrix), backend)
    }

    pub fn build(
        config: &MigratorConfig,
        actors: Vec<ActorRecord>,
        matrix: Arc<dyn LegacyPermissionMatrix>,
        backend: Arc<dyn PermissionCacheBackend>,
    ) -> AppResult<Self> {
        let authorization_config = config.authorization()?;
        let migration_config = config.migration()?;
        let store = Arc::new(InMemoryRbacStore::with_actors(actors));
        let cache = PermissionCache::new(backend, config.cache());

        let hierarchy =
            HierarchyResolver::new(store.clone(), cache.clone(), authorization_config.clone());
        let aggregator = PermissionAggregator::new(store.clone(), store.clone(), hierarchy.clone());
        let legacy =
            LegacyEvaluator::new(matrix, authorization_config.super_admin_role.clone());
        let authorization = AuthorizationService::new(
            store.clone(),
            store.clone(),
            aggregator,
            legacy,
            cache.clone(),
            authorization_config,
        );
        let router = CompatibilityRouter::new(authorization, store.clone());

        let stores = MigrationStores {
            permissions: store.clone(),
            roles: store.clone(),
            assignments: store.clone(),
            actors: store.clone(),
            state: store.clone(),
        };
        let catalog = SeedCatalog::healthcare()?;
        let migration = MigrationService::new(
            stores.clone(),
            hierarchy.clone(),
            router.clone(),
            cache.clone(),
            catalog.clone(),
            migration_config.clone(),
        );
        let dry_run_migration = MigrationService::new(
            stores,
            hierarchy,
            router.clone(),
            cache.clone(),
            catalog,
            migration_config.dry_run(),
        );
        let consistency =
            ConsistencyService::new(store.clone(), store.clone(), store.clone(), store, cache);

        Ok(Self {
            router,
            migration,
            dry_run_migration,
            consistency,
        })
    }
}

fn read_file(path: &std::path::Path, label: &str) -> AppResult<String> {
    std::fs::read_to_string(path).map_err(|error| {
        AppError::Validation(format!(
            "failed to read {label} '{}': {error}",
            path.display()
        ))
    })
}
