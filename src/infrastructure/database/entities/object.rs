//! Object union-identity entity
//!
//! Every catalogued entity (image, volume system, volume, file system, file)
//! has exactly one row here; kind-specific tables share the same id.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "objects")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub obj_id: i64,
	/// Parent object; NULL only for images.
	pub par_obj_id: Option<i64>,
	/// Discriminant, see `domain::ObjectType`.
	#[sea_orm(column_name = "type")]
	pub obj_type: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
