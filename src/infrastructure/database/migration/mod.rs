//! Schema migrations
//!
//! Schema creation is a single non-interleaved step: all tables, the
//! `db_info` row, and the required indexes come from the one initial
//! migration. Opening a case re-checks the recorded schema version instead
//! of migrating forward.

use sea_orm_migration::prelude::*;

mod m20250601_000001_create_catalog_tables;

/// Version stamped into `db_info` and checked on every case open.
pub const SCHEMA_VERSION: i32 = 1;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![Box::new(m20250601_000001_create_catalog_tables::Migration)]
	}
}
