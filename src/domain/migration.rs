//! Ordered schema migrations and the schema version they imply.

use crate::domain::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// One schema change. `up` and `down` may hold several `;`-separated statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub ordinal: i64,
    pub name: String,
    pub up: String,
    pub down: String,
}

impl Migration {
    pub fn new(
        ordinal: i64,
        name: impl Into<String>,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> Self {
        Self {
            ordinal,
            name: name.into(),
            up: up.into(),
            down: down.into(),
        }
    }

    pub fn statements(&self, direction: Direction) -> Vec<&str> {
        let sql = match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        };
        sql.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// `00003_initial-draft-content-table`
    pub fn label(&self) -> String {
        format!("{:05}_{}", self.ordinal, self.name)
    }
}

/// A validated migration list, in strictly ascending ordinal order.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        let mut previous = 0;
        for m in &migrations {
            if m.ordinal <= previous {
                return Err(MigrationError::InvalidMigrations {
                    reason: format!(
                        "migration {} must have an ordinal greater than {}",
                        m.label(),
                        previous
                    ),
                });
            }
            if m.statements(Direction::Up).is_empty() {
                return Err(MigrationError::InvalidMigrations {
                    reason: format!("migration {} has no forward statements", m.label()),
                });
            }
            previous = m.ordinal;
        }
        Ok(Self { migrations })
    }

    /// The schema version this code expects: the highest registered ordinal.
    pub fn required_version(&self) -> i64 {
        self.migrations.iter().map(|m| m.ordinal).max().unwrap_or(0)
    }

    /// Migrations above `current`, ascending.
    pub fn pending(&self, current: i64) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().filter(move |m| m.ordinal > current)
    }

    /// Migrations in `(target, current]`, descending.
    pub fn applied_above(&self, target: i64, current: i64) -> impl Iterator<Item = &Migration> {
        self.migrations
            .iter()
            .rev()
            .filter(move |m| m.ordinal > target && m.ordinal <= current)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
