//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sea_orm::{DatabaseConnection, EntityTrait};
use tempfile::TempDir;

use casevault_core::infrastructure::database::entities;
use casevault_core::{Case, CaseLocation};

/// Create a fresh case in `dir`, returning it with the database path.
pub async fn sqlite_case(dir: &TempDir) -> (Case, PathBuf) {
	let path = dir.path().join("case.db");
	let case = Case::create(&CaseLocation::Sqlite(path.clone()))
		.await
		.expect("case creation");
	(case, path)
}

/// Open a second, read-only style connection onto the case database for
/// assertions independent of the engine's own pool.
pub async fn raw_conn(path: &Path) -> DatabaseConnection {
	sea_orm::Database::connect(format!("sqlite://{}", path.display()))
		.await
		.expect("raw connection")
}

/// All `objects` rows keyed by id.
pub async fn objects_by_id(conn: &DatabaseConnection) -> HashMap<i64, entities::object::Model> {
	entities::object::Entity::find()
		.all(conn)
		.await
		.expect("objects query")
		.into_iter()
		.map(|row| (row.obj_id, row))
		.collect()
}

/// Follow `par_obj_id` until an image-typed object is reached. Panics after
/// `max_steps` to catch parent cycles.
pub fn parent_image(
	objects: &HashMap<i64, entities::object::Model>,
	mut obj_id: i64,
	max_steps: usize,
) -> i64 {
	for _ in 0..max_steps {
		let row = objects.get(&obj_id).expect("object row exists");
		if row.obj_type == 0 {
			return row.obj_id;
		}
		obj_id = row.par_obj_id.expect("non-image objects have parents");
	}
	panic!("no image ancestor within {max_steps} steps");
}
