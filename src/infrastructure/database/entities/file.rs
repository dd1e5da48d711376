//! File entity
//!
//! One row per (file, attribute) pair for on-disk files, plus virtual rows
//! for unallocated-block files and virtual directories.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "files")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub obj_id: i64,
	/// Owning file system; NULL for image- or volume-parented virtual files.
	pub fs_obj_id: Option<i64>,
	/// Category, see `domain::FileCategory`.
	#[sea_orm(column_name = "type")]
	pub category: i32,
	pub attr_type: Option<i32>,
	pub attr_id: Option<i32>,
	pub name: String,
	/// Metadata address within the file system; 0 for virtual rows.
	pub meta_addr: i64,
	/// On-disk reuse sequence of the metadata record, where the family has one.
	pub meta_seq: i64,
	pub dir_type: i32,
	pub meta_type: i32,
	pub dir_flags: i32,
	pub meta_flags: i32,
	pub size: i64,
	pub ctime: i64,
	pub crtime: i64,
	pub atime: i64,
	pub mtime: i64,
	pub mode: i64,
	pub uid: i64,
	pub gid: i64,
	/// 32-char lowercase hex MD5, NULL when hashing was off or not applicable.
	pub hash: Option<String>,
	/// Known-file classification, see `domain::KnownStatus`.
	pub known: i32,
	pub has_layout: bool,
	pub has_path: bool,
	/// Normalised path of the containing directory; NULL when `has_path` is
	/// false.
	pub parent_path: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::object::Entity",
		from = "Column::ObjId",
		to = "super::object::Column::ObjId"
	)]
	Object,
	#[sea_orm(
		belongs_to = "super::fs_info::Entity",
		from = "Column::FsObjId",
		to = "super::fs_info::Column::ObjId"
	)]
	FileSystem,
}

impl Related<super::object::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Object.def()
	}
}

impl Related<super::fs_info::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::FileSystem.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
