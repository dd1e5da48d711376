//! Image entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "image_info")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub obj_id: i64,
	/// Container format, see `domain::ImageFormat`.
	#[sea_orm(column_name = "type")]
	pub img_type: i32,
	pub sector_size: i64,
	/// Timezone name used when interpreting on-disk timestamps; empty means
	/// device local.
	pub timezone: String,
	pub size: i64,
	/// 32-char lowercase hex MD5 of the full image, when acquired with one.
	pub hash: Option<String>,
	/// Opaque device identifier, unique across cases.
	pub device_id: Option<String>,
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
