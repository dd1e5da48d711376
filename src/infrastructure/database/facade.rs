//! Typed persistence surface
//!
//! The engine talks to the case database exclusively through [`CaseDatabase`].
//! The trait is dialect-neutral: identifiers come back as backend-assigned
//! 64-bit ids, text is UTF-8 (undecodable input is substituted before it gets
//! here), and savepoints follow the create / release / revert discipline the
//! ingest driver relies on.

use async_trait::async_trait;

use crate::domain::{
	DirEntryType, FileCategory, FileOwnership, FileTimes, FsInfo, ImageFormat, KnownStatus,
	LayoutRange, MetaFlags, MetaType, NameFlags, ObjectType, VolumeInfo, VolumeSystemInfo,
};

/// Errors at the persistence seam.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
	/// Unique-key violation. Always an engine invariant violation, treated as
	/// fatal by the driver.
	#[error("duplicate key: {0}")]
	Duplicate(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("unsupported by this backend: {0}")]
	Unsupported(String),

	/// Savepoint or commit problem.
	#[error("transaction: {0}")]
	Transaction(String),

	#[error(transparent)]
	Backend(sea_orm::DbErr),
}

impl From<sea_orm::DbErr> for DbError {
	fn from(err: sea_orm::DbErr) -> Self {
		match err.sql_err() {
			Some(sea_orm::SqlErr::UniqueConstraintViolation(msg)) => DbError::Duplicate(msg),
			_ => DbError::Backend(err),
		}
	}
}

/// Image row, as written at the start of an ingest.
#[derive(Clone, Debug)]
pub struct ImageRowData {
	pub format: ImageFormat,
	pub sector_size: i64,
	pub size: i64,
	pub timezone: String,
	pub md5: Option<String>,
	pub device_id: Option<String>,
}

/// One file row with its parent already resolved.
#[derive(Clone, Debug)]
pub struct FileRowData {
	pub parent_obj_id: i64,
	pub fs_obj_id: Option<i64>,
	pub category: FileCategory,
	pub attr_type: Option<i32>,
	pub attr_id: Option<i32>,
	pub name: String,
	pub meta_addr: i64,
	pub meta_seq: i64,
	pub dir_type: DirEntryType,
	pub meta_type: MetaType,
	pub dir_flags: NameFlags,
	pub meta_flags: MetaFlags,
	pub size: i64,
	pub times: FileTimes,
	pub ownership: FileOwnership,
	pub md5: Option<String>,
	pub known: KnownStatus,
	/// True when layout ranges will be appended for this row.
	pub has_layout: bool,
	/// Normalised containing-directory path; `None` for virtual rows without
	/// a path.
	pub parent_path: Option<String>,
}

/// A row in the `objects` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
	pub obj_id: i64,
	pub parent_id: Option<i64>,
	pub obj_type: ObjectType,
}

/// A file system as read back from the catalogue.
#[derive(Clone, Debug)]
pub struct FsCatalogRow {
	pub obj_id: i64,
	pub info: FsInfo,
}

/// A volume as read back from the catalogue.
#[derive(Clone, Debug)]
pub struct VolumeCatalogRow {
	pub obj_id: i64,
	pub info: VolumeInfo,
}

/// A volume system as read back from the catalogue.
#[derive(Clone, Debug)]
pub struct VolumeSystemCatalogRow {
	pub obj_id: i64,
	pub info: VolumeSystemInfo,
}

/// Row counts over the whole case, for reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CatalogSummary {
	pub images: u64,
	pub volume_systems: u64,
	pub volumes: u64,
	pub file_systems: u64,
	pub files: u64,
	pub layout_ranges: u64,
}

/// Abstract persistence surface for the ingest pipeline.
///
/// Ordering contract: callers insert the `objects` row and the kind-specific
/// row through one method call; both land inside the ingest savepoint, so the
/// pair is atomic from any outside reader's view.
#[async_trait]
pub trait CaseDatabase: Send + Sync {
	/// Insert a bare object row and return its id.
	async fn add_object(&self, obj_type: ObjectType, parent: Option<i64>) -> Result<i64, DbError>;

	async fn add_image(&self, row: &ImageRowData) -> Result<i64, DbError>;

	async fn add_image_name(&self, image_id: i64, path: &str, sequence: i64)
		-> Result<(), DbError>;

	async fn add_volume_system(
		&self,
		info: &VolumeSystemInfo,
		parent_id: i64,
	) -> Result<i64, DbError>;

	async fn add_volume(&self, info: &VolumeInfo, parent_id: i64) -> Result<i64, DbError>;

	async fn add_file_system(&self, info: &FsInfo, parent_id: i64) -> Result<i64, DbError>;

	/// Insert one file row (object + files) with its parent already resolved.
	async fn add_file(&self, row: &FileRowData) -> Result<i64, DbError>;

	/// Insert a virtual directory under `parent_obj_id`.
	async fn add_virtual_dir(
		&self,
		fs_obj_id: Option<i64>,
		parent_obj_id: i64,
		name: &str,
	) -> Result<i64, DbError>;

	/// Insert the `$Unalloc` virtual directory under the root directory of
	/// the given file system.
	async fn add_unalloc_parent(&self, fs_obj_id: i64) -> Result<i64, DbError>;

	/// Insert one unallocated-blocks virtual file with its layout ranges.
	async fn add_unalloc_block_file(
		&self,
		parent_obj_id: i64,
		fs_obj_id: Option<i64>,
		size: i64,
		ranges: &[LayoutRange],
	) -> Result<i64, DbError>;

	async fn add_layout_range(&self, file_obj_id: i64, range: &LayoutRange)
		-> Result<(), DbError>;

	/// Object id of the file with the given metadata address inside a file
	/// system. Used by parent resolution on cache misses.
	async fn find_file_object(
		&self,
		fs_obj_id: i64,
		meta_addr: i64,
	) -> Result<Option<i64>, DbError>;

	/// File systems belonging to an image, in catalogue order.
	async fn get_fs_infos(&self, image_id: i64) -> Result<Vec<FsCatalogRow>, DbError>;

	/// Volumes belonging to an image, in catalogue order.
	async fn get_volumes(&self, image_id: i64) -> Result<Vec<VolumeCatalogRow>, DbError>;

	async fn get_volume_system(&self, object_id: i64) -> Result<VolumeSystemCatalogRow, DbError>;

	async fn get_object(&self, object_id: i64) -> Result<ObjectInfo, DbError>;

	/// Walk parents until the owning image is reached.
	async fn get_parent_image(&self, object_id: i64) -> Result<i64, DbError>;

	/// The root directory row of a file system (its parent is the file-system
	/// object itself).
	async fn get_fs_root_dir(&self, fs_obj_id: i64) -> Result<ObjectInfo, DbError>;

	async fn savepoint_create(&self, name: &str) -> Result<(), DbError>;

	async fn savepoint_release(&self, name: &str) -> Result<(), DbError>;

	/// Roll back to the savepoint and discard it.
	async fn savepoint_revert(&self, name: &str) -> Result<(), DbError>;

	fn in_transaction(&self) -> bool;

	async fn schema_version(&self) -> Result<i32, DbError>;

	async fn summary(&self) -> Result<CatalogSummary, DbError>;
}
