//! Image part-name entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "image_names")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub obj_id: i64,
	/// Path of this image part.
	pub name: String,
	/// Order of the part within the image.
	#[sea_orm(primary_key, auto_increment = false)]
	pub sequence: i64,
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
