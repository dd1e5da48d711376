//! Volume-system entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "vs_info")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub obj_id: i64,
	/// Partition-table family, see `domain::VsType`.
	pub vs_type: i32,
	/// Byte offset of the volume system inside the image.
	pub byte_offset: i64,
	/// Sector size partition addresses are expressed in.
	pub block_size: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::object::Entity",
		from = "Column::ObjId",
		to = "super::object::Column::ObjId"
	)]
	Object,
}

impl Related<super::object::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Object.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
