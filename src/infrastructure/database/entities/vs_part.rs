//! Volume (partition) entity
//!
//! The description column is deliberately named `description`: `desc` is a
//! reserved word in SQL and must not appear in either dialect's DDL.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "vs_parts")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub obj_id: i64,
	/// Slot (entry) address in the partition table.
	pub slot_addr: i64,
	/// First sector of the volume, in volume-system block units.
	pub start_block: i64,
	pub length_blocks: i64,
	pub description: String,
	/// Allocation flags, see `domain::VolumeFlags`.
	pub flags: i32,
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
