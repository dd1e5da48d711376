//! Database infrastructure using sea-orm
//!
//! Connection bootstrap for both dialects plus the schema lifecycle. Schema
//! creation is one non-interleaved step: all tables, indexes, and the
//! `db_info` version row are written before the connection is handed out.

use std::path::Path;
use std::time::Duration;

use sea_orm::ActiveValue::Set;
use sea_orm::{
	ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection, DbErr,
	EntityTrait, Statement,
};
use sea_orm_migration::MigratorTrait;
use tracing::info;

pub mod backend;
pub mod entities;
pub mod facade;
pub mod migration;

pub use backend::SeaOrmBackend;
pub use facade::{
	CaseDatabase, CatalogSummary, DbError, FileRowData, FsCatalogRow, ImageRowData, ObjectInfo,
	VolumeCatalogRow, VolumeSystemCatalogRow,
};
pub use migration::SCHEMA_VERSION;

/// Connection parameters for a multi-user (PostgreSQL) case.
#[derive(Clone, Debug)]
pub struct PostgresConfig {
	pub host: String,
	pub port: u16,
	pub database: String,
	pub user: String,
	pub password: String,
}

impl PostgresConfig {
	fn url(&self) -> String {
		format!(
			"postgres://{}:{}@{}:{}/{}",
			self.user, self.password, self.host, self.port, self.database
		)
	}

	fn maintenance_url(&self) -> String {
		format!(
			"postgres://{}:{}@{}:{}/postgres",
			self.user, self.password, self.host, self.port
		)
	}
}

/// Failures while setting up or reaching a case database.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
	#[error("a case database already exists at this location")]
	AlreadyExists,

	#[error("no case database at this location")]
	NotFound,

	#[error("invalid location: {0}")]
	BadLocation(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Db(#[from] DbErr),
}

/// Database wrapper produced by the bootstrap routines.
pub struct Database {
	conn: DatabaseConnection,
}

impl Database {
	/// Create a new single-user case database at `path`. Fails if a file is
	/// already there.
	pub async fn create_sqlite(path: &Path) -> Result<Self, SetupError> {
		if path.exists() {
			return Err(SetupError::AlreadyExists);
		}
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent)?;
			}
		}
		let url = format!("sqlite://{}?mode=rwc", path.display());
		let conn = connect(url).await?;
		apply_sqlite_pragmas(&conn).await;
		let db = Self { conn };
		db.create_schema().await?;
		info!(path = %path.display(), "created case database");
		Ok(db)
	}

	/// Open an existing single-user case database.
	pub async fn open_sqlite(path: &Path) -> Result<Self, SetupError> {
		if !path.exists() {
			return Err(SetupError::NotFound);
		}
		let url = format!("sqlite://{}", path.display());
		let conn = connect(url).await?;
		apply_sqlite_pragmas(&conn).await;
		info!(path = %path.display(), "opened case database");
		Ok(Self { conn })
	}

	/// Create a new multi-user case database on a PostgreSQL server.
	pub async fn create_postgres(config: &PostgresConfig) -> Result<Self, SetupError> {
		check_pg_identifier(&config.database)?;
		let admin = connect(config.maintenance_url()).await?;
		let exists = admin
			.query_one(Statement::from_sql_and_values(
				sea_orm::DatabaseBackend::Postgres,
				"SELECT 1 FROM pg_database WHERE datname = $1",
				[config.database.clone().into()],
			))
			.await?;
		if exists.is_some() {
			return Err(SetupError::AlreadyExists);
		}
		admin
			.execute(Statement::from_string(
				sea_orm::DatabaseBackend::Postgres,
				format!("CREATE DATABASE \"{}\"", config.database),
			))
			.await?;
		drop(admin);

		let conn = connect(config.url()).await?;
		let db = Self { conn };
		db.create_schema().await?;
		info!(database = %config.database, host = %config.host, "created case database");
		Ok(db)
	}

	/// Open an existing multi-user case database.
	pub async fn open_postgres(config: &PostgresConfig) -> Result<Self, SetupError> {
		check_pg_identifier(&config.database)?;
		let admin = connect(config.maintenance_url()).await?;
		let exists = admin
			.query_one(Statement::from_sql_and_values(
				sea_orm::DatabaseBackend::Postgres,
				"SELECT 1 FROM pg_database WHERE datname = $1",
				[config.database.clone().into()],
			))
			.await?;
		if exists.is_none() {
			return Err(SetupError::NotFound);
		}
		drop(admin);

		let conn = connect(config.url()).await?;
		info!(database = %config.database, host = %config.host, "opened case database");
		Ok(Self { conn })
	}

	/// Run the initial migration and stamp `db_info`.
	async fn create_schema(&self) -> Result<(), DbErr> {
		migration::Migrator::up(&self.conn, None).await?;
		let stamp = entities::db_info::ActiveModel {
			schema_version: Set(migration::SCHEMA_VERSION),
			engine_version: Set(env!("CARGO_PKG_VERSION").to_string()),
		};
		entities::db_info::Entity::insert(stamp)
			.exec_without_returning(&self.conn)
			.await?;
		info!(schema_version = migration::SCHEMA_VERSION, "schema created");
		Ok(())
	}

	pub fn into_backend(self) -> SeaOrmBackend {
		SeaOrmBackend::new(self.conn)
	}

	pub fn conn(&self) -> &DatabaseConnection {
		&self.conn
	}
}

async fn connect(url: String) -> Result<DatabaseConnection, DbErr> {
	let mut opt = ConnectOptions::new(url);
	// Savepoints are per-session state: the whole engine must observe one
	// connection, so the pool is pinned to a single slot.
	opt.max_connections(1)
		.min_connections(1)
		.connect_timeout(Duration::from_secs(8))
		.idle_timeout(Duration::from_secs(3600))
		.max_lifetime(Duration::from_secs(3600))
		.sqlx_logging(false);
	SeaDatabase::connect(opt).await
}

async fn apply_sqlite_pragmas(conn: &DatabaseConnection) {
	for pragma in [
		"PRAGMA foreign_keys=ON",
		"PRAGMA journal_mode=WAL",
		"PRAGMA synchronous=NORMAL",
		"PRAGMA temp_store=MEMORY",
		"PRAGMA cache_size=-20000",
	] {
		let _ = conn
			.execute(Statement::from_string(
				sea_orm::DatabaseBackend::Sqlite,
				pragma,
			))
			.await;
	}
}

fn check_pg_identifier(name: &str) -> Result<(), SetupError> {
	let ok = !name.is_empty()
		&& name
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_');
	if ok {
		Ok(())
	} else {
		Err(SetupError::BadLocation(format!(
			"database name {name:?} must be alphanumeric"
		)))
	}
}
