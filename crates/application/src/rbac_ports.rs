mod actors;
mod assignments;
mod cache;
mod legacy;
mod migration_state;
mod permissions;
mod roles;

pub use actors::{ActorMigrationPlan, ActorRepository};
pub use assignments::RoleAssignmentRepository;
pub use cache::{PermissionCacheBackend, key_matches_pattern};
pub use legacy::{LegacyPermissionMatrix, LegacyRequirement};
pub use migration_state::{MigrationState, MigrationStateRepository};
pub use permissions::PermissionRepository;
pub use roles::RoleRepository;
