//! Schema version gate: compares the persisted schema version with the one this
//! build requires and, when asked to, migrates forward under a cluster-wide lock.

use crate::domain::error::MigrationError;
use crate::domain::migration::{Direction, MigrationSet};
use crate::storage::MigrationStore;
use std::time::Duration;

pub const DEFAULT_LOCK_NAME: &str = "generic_rw_schema_migrations";
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(1);

/// Outcome of a schema check. Only `Matched` and `Migrated` are ready.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchemaState {
    #[default]
    Unchecked,
    Matched {
        version: i64,
    },
    MismatchPending {
        current: i64,
        required: i64,
    },
    Migrated {
        from: i64,
        version: i64,
    },
    LockFailed {
        current: i64,
        required: i64,
    },
    MigrationFailed {
        current: i64,
        required: i64,
        reason: String,
    },
    DowngradeRequired {
        current: i64,
        required: i64,
    },
    VersionUnknown {
        reason: String,
    },
}

impl SchemaState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SchemaState::Matched { .. } | SchemaState::Migrated { .. })
    }

    /// Schema version in force, for ready states.
    pub fn version(&self) -> Option<i64> {
        match self {
            SchemaState::Matched { version } | SchemaState::Migrated { version, .. } => {
                Some(*version)
            }
            _ => None,
        }
    }

    /// Why the service is not ready, `None` for ready states.
    pub fn error(&self) -> Option<MigrationError> {
        let err = match self {
            SchemaState::Matched { .. } | SchemaState::Migrated { .. } => return None,
            SchemaState::Unchecked => MigrationError::Unchecked,
            SchemaState::MismatchPending { current, required } => MigrationError::Required {
                current: *current,
                required: *required,
            },
            SchemaState::LockFailed { current, required } => MigrationError::LockFailed {
                current: *current,
                required: *required,
            },
            SchemaState::MigrationFailed {
                current,
                required,
                reason,
            } => MigrationError::Failed {
                current: *current,
                required: *required,
                reason: reason.clone(),
            },
            SchemaState::DowngradeRequired { current, required } => {
                MigrationError::DowngradeRequired {
                    current: *current,
                    required: *required,
                }
            }
            SchemaState::VersionUnknown { reason } => MigrationError::VersionUnknown {
                reason: reason.clone(),
            },
        };
        Some(err)
    }
}

pub struct SchemaMigrator {
    migrations: MigrationSet,
    lock_name: String,
    lock_wait: Duration,
}

impl SchemaMigrator {
    pub fn new(migrations: MigrationSet) -> Self {
        Self {
            migrations,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn required_version(&self) -> i64 {
        self.migrations.required_version()
    }

    /// Reads the persisted version and, for an older schema with `migrate` set,
    /// applies every pending migration while holding the migration lock.
    ///
    /// The lock is attempted once. Whatever happens after it is taken, it is released.
    pub async fn check<S: MigrationStore>(&self, store: &S, migrate: bool) -> SchemaState {
        let current = match store.current_version().await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "unable to discover database schema version");
                return SchemaState::VersionUnknown {
                    reason: e.to_string(),
                };
            }
        };
        let required = self.required_version();

        if current == required {
            tracing::info!(version = current, "Database schema is at version {}", current);
            return SchemaState::Matched { version: current };
        }
        if current > required {
            tracing::error!(
                current,
                required,
                "migrating database DOWN from {} to {} is required",
                current,
                required
            );
            return SchemaState::DowngradeRequired { current, required };
        }
        if !migrate {
            tracing::warn!(
                current,
                required,
                "migrating database from {} to {} is required",
                current,
                required
            );
            return SchemaState::MismatchPending { current, required };
        }

        let Some(mut lock) = self.acquire(store).await else {
            tracing::error!(
                current,
                required,
                lock = %self.lock_name,
                "migrating database from {} to {} failed: unable to obtain database lock",
                current,
                required
            );
            return SchemaState::LockFailed { current, required };
        };

        tracing::info!(current, required, "migrating database from {} to {}", current, required);
        let mut applied = Ok(());
        for migration in self.migrations.pending(current) {
            tracing::info!(migration = %migration.label(), "applying migration");
            if let Err(e) = store.apply(&mut lock, migration, Direction::Up).await {
                applied = Err(format!("{}: {}", migration.label(), e));
                break;
            }
        }
        self.release(store, lock).await;

        if let Err(reason) = applied {
            tracing::error!(
                current,
                required,
                reason = %reason,
                "migrating database from {} to {} failed",
                current,
                required
            );
            return SchemaState::MigrationFailed {
                current,
                required,
                reason,
            };
        }

        match store.current_version().await {
            Ok(version) if version == required => {
                tracing::info!(version, "Database schema is at version {}", version);
                SchemaState::Migrated {
                    from: current,
                    version,
                }
            }
            Ok(version) => SchemaState::MigrationFailed {
                current,
                required,
                reason: format!("schema is at version {} after migrating", version),
            },
            Err(e) => SchemaState::VersionUnknown {
                reason: e.to_string(),
            },
        }
    }

    /// Rolls the schema back to `target`, newest migration first. Operator use only.
    /// Returns the resulting version.
    pub async fn revert_to<S: MigrationStore>(
        &self,
        store: &S,
        target: i64,
    ) -> Result<i64, MigrationError> {
        let current = store
            .current_version()
            .await
            .map_err(|e| MigrationError::VersionUnknown {
                reason: e.to_string(),
            })?;
        if target >= current {
            return Ok(current);
        }

        let mut lock = self
            .acquire(store)
            .await
            .ok_or(MigrationError::LockFailed {
                current,
                required: target,
            })?;

        tracing::info!(current, target, "migrating database DOWN from {} to {}", current, target);
        let mut reverted = Ok(());
        for migration in self.migrations.applied_above(target, current) {
            tracing::info!(migration = %migration.label(), "reverting migration");
            if let Err(e) = store.apply(&mut lock, migration, Direction::Down).await {
                reverted = Err(MigrationError::Failed {
                    current,
                    required: target,
                    reason: format!("{}: {}", migration.label(), e),
                });
                break;
            }
        }
        self.release(store, lock).await;
        reverted?;

        store
            .current_version()
            .await
            .map_err(|e| MigrationError::VersionUnknown {
                reason: e.to_string(),
            })
    }

    async fn acquire<S: MigrationStore>(&self, store: &S) -> Option<S::Lock> {
        match store.try_lock(&self.lock_name, self.lock_wait).await {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                tracing::warn!(lock = %self.lock_name, "database lock is held by another session");
                None
            }
            Err(e) => {
                tracing::warn!(lock = %self.lock_name, error = %e, "unable to obtain database lock");
                None
            }
        }
    }

    async fn release<S: MigrationStore>(&self, store: &S, lock: S::Lock) {
        if let Err(e) = store.unlock(lock).await {
            tracing::error!(lock = %self.lock_name, error = %e, "unable to release database lock");
        }
    }
}
