//! Schema / engine version entity, a single row written at case creation

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "db_info")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub schema_version: i32,
	pub engine_version: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
