//! The schema this service owns, as an ordered migration list.

use crate::domain::error::MigrationError;
use crate::domain::migration::{Migration, MigrationSet};

pub fn registered() -> Result<MigrationSet, MigrationError> {
    MigrationSet::new(vec![
        Migration::new(
            1,
            "initial-annotations-tables",
            r#"
            CREATE TABLE draft_annotations (
                uuid VARCHAR(36) PRIMARY KEY,
                last_modified VARCHAR(32) NOT NULL,
                publish_ref VARCHAR(50) NOT NULL,
                body TEXT NOT NULL
            );
            CREATE TABLE published_annotations (
                uuid VARCHAR(36) PRIMARY KEY,
                last_modified VARCHAR(32) NOT NULL,
                publish_ref VARCHAR(50) NOT NULL,
                body TEXT NOT NULL
            );
            "#,
            r#"
            DROP TABLE published_annotations;
            DROP TABLE draft_annotations;
            "#,
        ),
        Migration::new(
            2,
            "add-hash-annotations-tables",
            r#"
            ALTER TABLE draft_annotations ADD COLUMN hash VARCHAR(56) NOT NULL;
            ALTER TABLE published_annotations ADD COLUMN hash VARCHAR(56) NOT NULL;
            "#,
            r#"
            ALTER TABLE draft_annotations DROP COLUMN hash;
            ALTER TABLE published_annotations DROP COLUMN hash;
            "#,
        ),
        Migration::new(
            3,
            "initial-draft-content-table",
            r#"
            CREATE TABLE draft_content (
                uuid VARCHAR(36) PRIMARY KEY,
                last_modified VARCHAR(32) NOT NULL,
                draft_ref VARCHAR(50) NOT NULL,
                origin_system VARCHAR(50) NOT NULL,
                hash VARCHAR(56) NOT NULL,
                body TEXT NOT NULL
            );
            "#,
            "DROP TABLE draft_content",
        ),
    ])
}
