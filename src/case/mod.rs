//! Case lifecycle
//!
//! A [`Case`] owns the persistence backend, the optional known-file oracles,
//! and the source resolver used to open images. Ingests run through drivers
//! handed out by [`Case::begin_ingest`]; each driver snapshots the oracles at
//! creation, so attaching or detaching only affects later ingests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::infrastructure::database::{
	CaseDatabase, CatalogSummary, Database, DbError, PostgresConfig, SetupError, SCHEMA_VERSION,
};
use crate::ingest::IngestDriver;
use crate::known::{KnownFileOracle, OracleError, TextIndexOracle};
use crate::readers::raw::RawResolver;
use crate::readers::SourceResolver;

/// Where a case database lives. The dialect set is closed: single-user cases
/// are SQLite files, multi-user cases are PostgreSQL databases.
#[derive(Clone, Debug)]
pub enum CaseLocation {
	Sqlite(PathBuf),
	Postgres(PostgresConfig),
}

#[derive(Debug, Error)]
pub enum CaseError {
	#[error("a case already exists at this location")]
	AlreadyExists,

	#[error("no case found at this location")]
	NotFound,

	#[error("case schema version {found} does not match expected {expected}")]
	SchemaMismatch { found: i32, expected: i32 },

	#[error("invalid case location: {0}")]
	BadLocation(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("hash index error: {0}")]
	Oracle(#[from] OracleError),

	#[error("database error: {0}")]
	Database(String),
}

impl From<SetupError> for CaseError {
	fn from(err: SetupError) -> Self {
		match err {
			SetupError::AlreadyExists => CaseError::AlreadyExists,
			SetupError::NotFound => CaseError::NotFound,
			SetupError::BadLocation(msg) => CaseError::BadLocation(msg),
			SetupError::Io(err) => CaseError::Io(err),
			SetupError::Db(err) => CaseError::Database(err.to_string()),
		}
	}
}

/// An open case: the catalogue database plus everything ingests need.
pub struct Case {
	db: Arc<dyn CaseDatabase>,
	resolver: Arc<dyn SourceResolver>,
	known: Option<Arc<dyn KnownFileOracle>>,
	known_bad: Option<Arc<dyn KnownFileOracle>>,
}

impl Case {
	/// Create a new case. Fails if one already exists at the location.
	pub async fn create(location: &CaseLocation) -> Result<Self, CaseError> {
		let db = match location {
			CaseLocation::Sqlite(path) => Database::create_sqlite(path).await?,
			CaseLocation::Postgres(config) => Database::create_postgres(config).await?,
		};
		info!("case created");
		Ok(Self::from_backend(db))
	}

	/// Open an existing case. The recorded schema version must match this
	/// engine's; drift is fatal.
	pub async fn open(location: &CaseLocation) -> Result<Self, CaseError> {
		let db = match location {
			CaseLocation::Sqlite(path) => Database::open_sqlite(path).await?,
			CaseLocation::Postgres(config) => Database::open_postgres(config).await?,
		};
		let case = Self::from_backend(db);
		let found = match case.db.schema_version().await {
			Ok(version) => version,
			Err(DbError::NotFound(_)) => {
				// A database without the version row was not created by this
				// engine at all.
				return Err(CaseError::SchemaMismatch {
					found: 0,
					expected: SCHEMA_VERSION,
				});
			}
			Err(err) => return Err(CaseError::Database(err.to_string())),
		};
		if found != SCHEMA_VERSION {
			return Err(CaseError::SchemaMismatch {
				found,
				expected: SCHEMA_VERSION,
			});
		}
		info!(schema_version = found, "case opened");
		Ok(case)
	}

	fn from_backend(db: Database) -> Self {
		Self {
			db: Arc::new(db.into_backend()),
			resolver: Arc::new(RawResolver),
			known: None,
			known_bad: None,
		}
	}

	/// Replace the source resolver, plugging in external image and
	/// file-system decoders.
	pub fn set_resolver(&mut self, resolver: Arc<dyn SourceResolver>) {
		self.resolver = resolver;
	}

	/// Attach the known-files oracle consulted during file processing.
	pub fn attach_known_files(&mut self, path: &Path) -> Result<(), CaseError> {
		self.known = Some(Arc::new(TextIndexOracle::load(path)?));
		Ok(())
	}

	/// Attach the known-bad oracle. A hit here overrides a known-files hit.
	pub fn attach_known_bad(&mut self, path: &Path) -> Result<(), CaseError> {
		self.known_bad = Some(Arc::new(TextIndexOracle::load(path)?));
		Ok(())
	}

	pub fn detach_known_files(&mut self) {
		self.known = None;
	}

	pub fn detach_known_bad(&mut self) {
		self.known_bad = None;
	}

	/// Open a new ingest driver bound to this case. The caller configures and
	/// runs it, then commits or reverts.
	pub fn begin_ingest(&self) -> IngestDriver {
		IngestDriver::new(
			self.db.clone(),
			self.resolver.clone(),
			self.known.clone(),
			self.known_bad.clone(),
		)
	}

	/// Row counts over the whole catalogue.
	pub async fn summary(&self) -> Result<CatalogSummary, CaseError> {
		self.db
			.summary()
			.await
			.map_err(|err| CaseError::Database(err.to_string()))
	}

	/// Direct access to the persistence surface, for read-back queries.
	pub fn database(&self) -> Arc<dyn CaseDatabase> {
		self.db.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn create_then_open_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let location = CaseLocation::Sqlite(dir.path().join("case.db"));

		let case = Case::create(&location).await.unwrap();
		let summary = case.summary().await.unwrap();
		assert_eq!(summary, CatalogSummary::default());
		drop(case);

		let reopened = Case::open(&location).await.unwrap();
		assert_eq!(reopened.summary().await.unwrap().images, 0);
	}

	#[tokio::test]
	async fn create_refuses_existing_file() {
		let dir = tempfile::tempdir().unwrap();
		let location = CaseLocation::Sqlite(dir.path().join("case.db"));

		Case::create(&location).await.unwrap();
		assert!(matches!(
			Case::create(&location).await,
			Err(CaseError::AlreadyExists)
		));
	}

	#[tokio::test]
	async fn open_refuses_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let location = CaseLocation::Sqlite(dir.path().join("nope.db"));
		assert!(matches!(
			Case::open(&location).await,
			Err(CaseError::NotFound)
		));
	}

	#[tokio::test]
	async fn open_refuses_foreign_database() {
		// A bare SQLite file without the engine schema must not open.
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("foreign.db");
		std::fs::write(&path, b"").unwrap();
		let location = CaseLocation::Sqlite(path);
		assert!(matches!(
			Case::open(&location).await,
			Err(CaseError::SchemaMismatch { found: 0, .. }) | Err(CaseError::Database(_))
		));
	}
}
