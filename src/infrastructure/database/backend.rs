//! sea-orm backend for the persistence surface
//!
//! One implementation serves both dialects; the connection decides whether
//! SQLite or PostgreSQL is underneath. Statements that differ between the two
//! (transaction bracketing around savepoints) branch on the connection's
//! backend. Everything else goes through sea-orm's dialect-neutral layer.

use std::sync::Mutex;

use async_trait::async_trait;
use sea_orm::{
	ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection,
	EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Statement,
};
use tracing::debug;

use crate::domain::{
	DirEntryType, FileCategory, FsFamily, FsInfo, KnownStatus, LayoutRange, MetaFlags, MetaType,
	NameFlags, ObjectType, UNALLOC_DIR_NAME, VolumeFlags, VolumeInfo, VolumeSystemInfo, VsType,
};

use super::entities;
use super::facade::{
	CaseDatabase, CatalogSummary, DbError, FileRowData, FsCatalogRow, ImageRowData, ObjectInfo,
	VolumeCatalogRow, VolumeSystemCatalogRow,
};

/// Longest parent chain [`get_parent_image`] will follow before declaring the
/// object graph corrupt.
const MAX_PARENT_DEPTH: usize = 128;

pub struct SeaOrmBackend {
	conn: DatabaseConnection,
	dialect: DatabaseBackend,
	/// Open savepoints, innermost last. This is the authoritative transaction
	/// state; the driver holds no parallel flag.
	savepoints: Mutex<Vec<String>>,
}

impl SeaOrmBackend {
	pub fn new(conn: DatabaseConnection) -> Self {
		let dialect = conn.get_database_backend();
		Self {
			conn,
			dialect,
			savepoints: Mutex::new(Vec::new()),
		}
	}

	pub fn connection(&self) -> &DatabaseConnection {
		&self.conn
	}

	async fn exec_raw(&self, sql: String) -> Result<(), DbError> {
		self.conn
			.execute(Statement::from_string(self.dialect, sql))
			.await
			.map_err(DbError::from)?;
		Ok(())
	}

	fn check_savepoint_name(name: &str) -> Result<(), DbError> {
		let ok = !name.is_empty()
			&& name
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '_');
		if ok {
			Ok(())
		} else {
			Err(DbError::Transaction(format!(
				"invalid savepoint name {name:?}"
			)))
		}
	}

	async fn insert_file_model(&self, model: entities::file::ActiveModel) -> Result<(), DbError> {
		entities::file::Entity::insert(model)
			.exec_without_returning(&self.conn)
			.await
			.map_err(DbError::from)?;
		Ok(())
	}
}

#[async_trait]
impl CaseDatabase for SeaOrmBackend {
	async fn add_object(&self, obj_type: ObjectType, parent: Option<i64>) -> Result<i64, DbError> {
		let model = entities::object::ActiveModel {
			par_obj_id: Set(parent),
			obj_type: Set(i32::from(obj_type)),
			..Default::default()
		};
		let res = entities::object::Entity::insert(model)
			.exec(&self.conn)
			.await
			.map_err(DbError::from)?;
		Ok(res.last_insert_id)
	}

	async fn add_image(&self, row: &ImageRowData) -> Result<i64, DbError> {
		let obj_id = self.add_object(ObjectType::Image, None).await?;
		let model = entities::image_info::ActiveModel {
			obj_id: Set(obj_id),
			img_type: Set(i32::from(row.format)),
			sector_size: Set(row.sector_size),
			timezone: Set(row.timezone.clone()),
			size: Set(row.size),
			hash: Set(row.md5.clone()),
			device_id: Set(row.device_id.clone()),
		};
		entities::image_info::Entity::insert(model)
			.exec_without_returning(&self.conn)
			.await
			.map_err(DbError::from)?;
		debug!(obj_id, "image row added");
		Ok(obj_id)
	}

	async fn add_image_name(
		&self,
		image_id: i64,
		path: &str,
		sequence: i64,
	) -> Result<(), DbError> {
		let model = entities::image_name::ActiveModel {
			obj_id: Set(image_id),
			name: Set(path.to_string()),
			sequence: Set(sequence),
		};
		entities::image_name::Entity::insert(model)
			.exec_without_returning(&self.conn)
			.await
			.map_err(DbError::from)?;
		Ok(())
	}

	async fn add_volume_system(
		&self,
		info: &VolumeSystemInfo,
		parent_id: i64,
	) -> Result<i64, DbError> {
		let obj_id = self
			.add_object(ObjectType::VolumeSystem, Some(parent_id))
			.await?;
		let model = entities::vs_info::ActiveModel {
			obj_id: Set(obj_id),
			vs_type: Set(i32::from(info.vs_type)),
			byte_offset: Set(info.byte_offset),
			block_size: Set(info.block_size),
		};
		entities::vs_info::Entity::insert(model)
			.exec_without_returning(&self.conn)
			.await
			.map_err(DbError::from)?;
		Ok(obj_id)
	}

	async fn add_volume(&self, info: &VolumeInfo, parent_id: i64) -> Result<i64, DbError> {
		let obj_id = self.add_object(ObjectType::Volume, Some(parent_id)).await?;
		let model = entities::vs_part::ActiveModel {
			obj_id: Set(obj_id),
			slot_addr: Set(info.slot_addr),
			start_block: Set(info.start_block),
			length_blocks: Set(info.length_blocks),
			description: Set(info.description.clone()),
			flags: Set(info.flags.0),
		};
		entities::vs_part::Entity::insert(model)
			.exec_without_returning(&self.conn)
			.await
			.map_err(DbError::from)?;
		Ok(obj_id)
	}

	async fn add_file_system(&self, info: &FsInfo, parent_id: i64) -> Result<i64, DbError> {
		let obj_id = self
			.add_object(ObjectType::FileSystem, Some(parent_id))
			.await?;
		let model = entities::fs_info::ActiveModel {
			obj_id: Set(obj_id),
			byte_offset: Set(info.byte_offset),
			fs_type: Set(i32::from(info.fs_type)),
			block_size: Set(info.block_size),
			block_count: Set(info.block_count),
			root_inum: Set(info.root_inum),
			first_inum: Set(info.first_inum),
			last_inum: Set(info.last_inum),
		};
		entities::fs_info::Entity::insert(model)
			.exec_without_returning(&self.conn)
			.await
			.map_err(DbError::from)?;
		Ok(obj_id)
	}

	async fn add_file(&self, row: &FileRowData) -> Result<i64, DbError> {
		let obj_id = self
			.add_object(ObjectType::File, Some(row.parent_obj_id))
			.await?;
		let model = entities::file::ActiveModel {
			obj_id: Set(obj_id),
			fs_obj_id: Set(row.fs_obj_id),
			category: Set(i32::from(row.category)),
			attr_type: Set(row.attr_type),
			attr_id: Set(row.attr_id),
			name: Set(row.name.clone()),
			meta_addr: Set(row.meta_addr),
			meta_seq: Set(row.meta_seq),
			dir_type: Set(i32::from(row.dir_type)),
			meta_type: Set(i32::from(row.meta_type)),
			dir_flags: Set(row.dir_flags.0),
			meta_flags: Set(row.meta_flags.0),
			size: Set(row.size),
			ctime: Set(row.times.ctime),
			crtime: Set(row.times.crtime),
			atime: Set(row.times.atime),
			mtime: Set(row.times.mtime),
			mode: Set(row.ownership.mode),
			uid: Set(row.ownership.uid),
			gid: Set(row.ownership.gid),
			hash: Set(row.md5.clone()),
			known: Set(i32::from(row.known)),
			has_layout: Set(row.has_layout),
			has_path: Set(row.parent_path.is_some()),
			parent_path: Set(row.parent_path.clone()),
		};
		self.insert_file_model(model).await?;
		Ok(obj_id)
	}

	async fn add_virtual_dir(
		&self,
		fs_obj_id: Option<i64>,
		parent_obj_id: i64,
		name: &str,
	) -> Result<i64, DbError> {
		let obj_id = self
			.add_object(ObjectType::File, Some(parent_obj_id))
			.await?;
		let model = entities::file::ActiveModel {
			obj_id: Set(obj_id),
			fs_obj_id: Set(fs_obj_id),
			category: Set(i32::from(FileCategory::VirtualDir)),
			attr_type: Set(None),
			attr_id: Set(None),
			name: Set(name.to_string()),
			meta_addr: Set(0),
			meta_seq: Set(0),
			dir_type: Set(i32::from(DirEntryType::Virtual)),
			meta_type: Set(i32::from(MetaType::Virtual)),
			dir_flags: Set(NameFlags::ALLOCATED.0),
			meta_flags: Set(MetaFlags::ALLOCATED.union(MetaFlags::USED).0),
			size: Set(0),
			ctime: Set(0),
			crtime: Set(0),
			atime: Set(0),
			mtime: Set(0),
			mode: Set(0),
			uid: Set(0),
			gid: Set(0),
			hash: Set(None),
			known: Set(i32::from(KnownStatus::Unknown)),
			has_layout: Set(false),
			has_path: Set(fs_obj_id.is_some()),
			parent_path: Set(fs_obj_id.map(|_| "/".to_string())),
		};
		self.insert_file_model(model).await?;
		Ok(obj_id)
	}

	async fn add_unalloc_parent(&self, fs_obj_id: i64) -> Result<i64, DbError> {
		let root = self.get_fs_root_dir(fs_obj_id).await?;
		self.add_virtual_dir(Some(fs_obj_id), root.obj_id, UNALLOC_DIR_NAME)
			.await
	}

	async fn add_unalloc_block_file(
		&self,
		parent_obj_id: i64,
		fs_obj_id: Option<i64>,
		size: i64,
		ranges: &[LayoutRange],
	) -> Result<i64, DbError> {
		let first = ranges.first().ok_or_else(|| {
			DbError::Transaction("unallocated file must cover at least one range".into())
		})?;
		let last = ranges.last().expect("non-empty checked above");
		let name = format!(
			"Unalloc_{}_{}_{}",
			parent_obj_id,
			first.byte_start,
			last.byte_start + last.byte_len
		);

		let obj_id = self
			.add_object(ObjectType::File, Some(parent_obj_id))
			.await?;
		let parent_path = fs_obj_id.map(|_| format!("/{UNALLOC_DIR_NAME}/"));
		let model = entities::file::ActiveModel {
			obj_id: Set(obj_id),
			fs_obj_id: Set(fs_obj_id),
			category: Set(i32::from(FileCategory::UnallocBlocks)),
			attr_type: Set(None),
			attr_id: Set(None),
			name: Set(name),
			meta_addr: Set(0),
			meta_seq: Set(0),
			dir_type: Set(i32::from(DirEntryType::Virtual)),
			meta_type: Set(i32::from(MetaType::Virtual)),
			dir_flags: Set(NameFlags::UNALLOCATED.0),
			meta_flags: Set(MetaFlags::UNALLOCATED.0),
			size: Set(size),
			ctime: Set(0),
			crtime: Set(0),
			atime: Set(0),
			mtime: Set(0),
			mode: Set(0),
			uid: Set(0),
			gid: Set(0),
			hash: Set(None),
			known: Set(i32::from(KnownStatus::Unknown)),
			has_layout: Set(true),
			has_path: Set(parent_path.is_some()),
			parent_path: Set(parent_path),
		};
		self.insert_file_model(model).await?;

		for range in ranges {
			self.add_layout_range(obj_id, range).await?;
		}
		Ok(obj_id)
	}

	async fn add_layout_range(
		&self,
		file_obj_id: i64,
		range: &LayoutRange,
	) -> Result<(), DbError> {
		let model = entities::file_layout::ActiveModel {
			obj_id: Set(file_obj_id),
			byte_start: Set(range.byte_start),
			byte_len: Set(range.byte_len),
			sequence: Set(range.sequence),
		};
		entities::file_layout::Entity::insert(model)
			.exec_without_returning(&self.conn)
			.await
			.map_err(DbError::from)?;
		Ok(())
	}

	async fn find_file_object(
		&self,
		fs_obj_id: i64,
		meta_addr: i64,
	) -> Result<Option<i64>, DbError> {
		let found = entities::file::Entity::find()
			.filter(entities::file::Column::FsObjId.eq(fs_obj_id))
			.filter(entities::file::Column::MetaAddr.eq(meta_addr))
			.order_by_asc(entities::file::Column::ObjId)
			.one(&self.conn)
			.await
			.map_err(DbError::from)?;
		Ok(found.map(|m| m.obj_id))
	}

	async fn get_fs_infos(&self, image_id: i64) -> Result<Vec<FsCatalogRow>, DbError> {
		let rows = entities::fs_info::Entity::find()
			.order_by_asc(entities::fs_info::Column::ObjId)
			.all(&self.conn)
			.await
			.map_err(DbError::from)?;
		let mut out = Vec::new();
		for row in rows {
			if self.get_parent_image(row.obj_id).await? != image_id {
				continue;
			}
			out.push(FsCatalogRow {
				obj_id: row.obj_id,
				info: FsInfo {
					fs_type: FsFamily::try_from(row.fs_type).unwrap_or(FsFamily::Unknown),
					byte_offset: row.byte_offset,
					block_size: row.block_size,
					block_count: row.block_count,
					root_inum: row.root_inum,
					first_inum: row.first_inum,
					last_inum: row.last_inum,
				},
			});
		}
		Ok(out)
	}

	async fn get_volumes(&self, image_id: i64) -> Result<Vec<VolumeCatalogRow>, DbError> {
		let rows = entities::vs_part::Entity::find()
			.order_by_asc(entities::vs_part::Column::ObjId)
			.all(&self.conn)
			.await
			.map_err(DbError::from)?;
		let mut out = Vec::new();
		for row in rows {
			if self.get_parent_image(row.obj_id).await? != image_id {
				continue;
			}
			out.push(VolumeCatalogRow {
				obj_id: row.obj_id,
				info: VolumeInfo {
					slot_addr: row.slot_addr,
					start_block: row.start_block,
					length_blocks: row.length_blocks,
					description: row.description,
					flags: VolumeFlags(row.flags),
				},
			});
		}
		Ok(out)
	}

	async fn get_volume_system(&self, object_id: i64) -> Result<VolumeSystemCatalogRow, DbError> {
		let row = entities::vs_info::Entity::find_by_id(object_id)
			.one(&self.conn)
			.await
			.map_err(DbError::from)?
			.ok_or_else(|| DbError::NotFound(format!("volume system {object_id}")))?;
		Ok(VolumeSystemCatalogRow {
			obj_id: row.obj_id,
			info: VolumeSystemInfo {
				vs_type: VsType::try_from(row.vs_type).unwrap_or(VsType::Unknown),
				byte_offset: row.byte_offset,
				block_size: row.block_size,
			},
		})
	}

	async fn get_object(&self, object_id: i64) -> Result<ObjectInfo, DbError> {
		let row = entities::object::Entity::find_by_id(object_id)
			.one(&self.conn)
			.await
			.map_err(DbError::from)?
			.ok_or_else(|| DbError::NotFound(format!("object {object_id}")))?;
		let obj_type = ObjectType::try_from(row.obj_type)
			.map_err(|_| DbError::NotFound(format!("object {object_id} has bad type")))?;
		Ok(ObjectInfo {
			obj_id: row.obj_id,
			parent_id: row.par_obj_id,
			obj_type,
		})
	}

	async fn get_parent_image(&self, object_id: i64) -> Result<i64, DbError> {
		let mut current = self.get_object(object_id).await?;
		for _ in 0..MAX_PARENT_DEPTH {
			if current.obj_type == ObjectType::Image {
				return Ok(current.obj_id);
			}
			match current.parent_id {
				Some(parent) => current = self.get_object(parent).await?,
				None => {
					return Err(DbError::NotFound(format!(
						"object {object_id} has no image ancestor"
					)))
				}
			}
		}
		Err(DbError::NotFound(format!(
			"parent chain of object {object_id} exceeds {MAX_PARENT_DEPTH} levels"
		)))
	}

	async fn get_fs_root_dir(&self, fs_obj_id: i64) -> Result<ObjectInfo, DbError> {
		let row = entities::object::Entity::find()
			.filter(entities::object::Column::ParObjId.eq(fs_obj_id))
			.filter(entities::object::Column::ObjType.eq(i32::from(ObjectType::File)))
			.order_by_asc(entities::object::Column::ObjId)
			.one(&self.conn)
			.await
			.map_err(DbError::from)?
			.ok_or_else(|| {
				DbError::NotFound(format!("file system {fs_obj_id} has no root directory"))
			})?;
		Ok(ObjectInfo {
			obj_id: row.obj_id,
			parent_id: row.par_obj_id,
			obj_type: ObjectType::File,
		})
	}

	async fn savepoint_create(&self, name: &str) -> Result<(), DbError> {
		Self::check_savepoint_name(name)?;
		let begin_needed = {
			let stack = self.savepoints.lock().expect("savepoint lock poisoned");
			if stack.iter().any(|s| s == name) {
				return Err(DbError::Transaction(format!(
					"savepoint {name} already open"
				)));
			}
			self.dialect == DatabaseBackend::Postgres && stack.is_empty()
		};
		// PostgreSQL only accepts SAVEPOINT inside an explicit block.
		if begin_needed {
			self.exec_raw("BEGIN".to_string()).await?;
		}
		self.exec_raw(format!("SAVEPOINT {name}")).await?;
		self.savepoints
			.lock()
			.expect("savepoint lock poisoned")
			.push(name.to_string());
		debug!(name, "savepoint created");
		Ok(())
	}

	async fn savepoint_release(&self, name: &str) -> Result<(), DbError> {
		Self::check_savepoint_name(name)?;
		let is_last = {
			let stack = self.savepoints.lock().expect("savepoint lock poisoned");
			match stack.last() {
				Some(top) if top == name => stack.len() == 1,
				_ => {
					return Err(DbError::Transaction(format!(
						"savepoint {name} is not the innermost open savepoint"
					)))
				}
			}
		};
		self.exec_raw(format!("RELEASE SAVEPOINT {name}")).await?;
		if self.dialect == DatabaseBackend::Postgres && is_last {
			self.exec_raw("COMMIT".to_string()).await?;
		}
		self.savepoints
			.lock()
			.expect("savepoint lock poisoned")
			.pop();
		debug!(name, "savepoint released");
		Ok(())
	}

	async fn savepoint_revert(&self, name: &str) -> Result<(), DbError> {
		Self::check_savepoint_name(name)?;
		let is_last = {
			let stack = self.savepoints.lock().expect("savepoint lock poisoned");
			match stack.last() {
				Some(top) if top == name => stack.len() == 1,
				_ => {
					return Err(DbError::Transaction(format!(
						"savepoint {name} is not the innermost open savepoint"
					)))
				}
			}
		};
		self.exec_raw(format!("ROLLBACK TO SAVEPOINT {name}")).await?;
		self.exec_raw(format!("RELEASE SAVEPOINT {name}")).await?;
		if self.dialect == DatabaseBackend::Postgres && is_last {
			self.exec_raw("ROLLBACK".to_string()).await?;
		}
		self.savepoints
			.lock()
			.expect("savepoint lock poisoned")
			.pop();
		debug!(name, "savepoint reverted");
		Ok(())
	}

	fn in_transaction(&self) -> bool {
		!self
			.savepoints
			.lock()
			.expect("savepoint lock poisoned")
			.is_empty()
	}

	async fn schema_version(&self) -> Result<i32, DbError> {
		let row = entities::db_info::Entity::find()
			.one(&self.conn)
			.await
			.map_err(DbError::from)?
			.ok_or_else(|| DbError::NotFound("db_info row missing".into()))?;
		Ok(row.schema_version)
	}

	async fn summary(&self) -> Result<CatalogSummary, DbError> {
		let count_objects = |obj_type: ObjectType| {
			entities::object::Entity::find()
				.filter(entities::object::Column::ObjType.eq(i32::from(obj_type)))
				.count(&self.conn)
		};
		Ok(CatalogSummary {
			images: count_objects(ObjectType::Image).await.map_err(DbError::from)?,
			volume_systems: count_objects(ObjectType::VolumeSystem)
				.await
				.map_err(DbError::from)?,
			volumes: count_objects(ObjectType::Volume).await.map_err(DbError::from)?,
			file_systems: count_objects(ObjectType::FileSystem)
				.await
				.map_err(DbError::from)?,
			files: entities::file::Entity::find()
				.count(&self.conn)
				.await
				.map_err(DbError::from)?,
			layout_ranges: entities::file_layout::Entity::find()
				.count(&self.conn)
				.await
				.map_err(DbError::from)?,
		})
	}
}
