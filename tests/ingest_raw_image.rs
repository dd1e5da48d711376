//! End-to-end ingest of real raw image files through the default resolver

mod helpers;

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use casevault_core::domain::ImageFormat;
use casevault_core::infrastructure::database::entities;
use casevault_core::{IngestOptions, IngestStatus};

const MIB: usize = 1024 * 1024;

/// A zeroed raw image with no volume system and no file system becomes one
/// image row plus a single image-wide unallocated file.
#[tokio::test]
async fn empty_raw_image_becomes_single_unalloc_file() {
	let dir = tempfile::tempdir().unwrap();
	let image_path = dir.path().join("blank.raw");
	std::fs::write(&image_path, vec![0u8; MIB]).unwrap();

	let (case, db_path) = helpers::sqlite_case(&dir).await;
	let mut driver = case.begin_ingest();
	driver
		.configure(IngestOptions {
			record_unallocated: true,
			min_chunk_bytes: 0,
			max_chunk_bytes: -1,
			..Default::default()
		})
		.unwrap();

	let status = driver
		.start(&[image_path.clone()], ImageFormat::Detect, 512)
		.await
		.unwrap();
	assert_eq!(status, IngestStatus::Ok);
	let image_id = driver.commit().await.unwrap();

	let conn = helpers::raw_conn(&db_path).await;
	assert_eq!(
		entities::vs_info::Entity::find().count(&conn).await.unwrap(),
		0
	);
	assert_eq!(
		entities::fs_info::Entity::find().count(&conn).await.unwrap(),
		0
	);

	let image = entities::image_info::Entity::find_by_id(image_id)
		.one(&conn)
		.await
		.unwrap()
		.expect("image row");
	assert_eq!(image.size, MIB as i64);
	assert_eq!(image.sector_size, 512);
	assert!(image.device_id.is_some());

	let names = entities::image_name::Entity::find()
		.filter(entities::image_name::Column::ObjId.eq(image_id))
		.all(&conn)
		.await
		.unwrap();
	assert_eq!(names.len(), 1);
	assert_eq!(names[0].sequence, 0);
	assert!(names[0].name.ends_with("blank.raw"));

	let files = entities::file::Entity::find().all(&conn).await.unwrap();
	assert_eq!(files.len(), 1);
	let unalloc = &files[0];
	assert_eq!(unalloc.category, 4); // unallocated blocks
	assert_eq!(unalloc.size, MIB as i64);
	assert!(unalloc.has_layout);
	assert_eq!(
		unalloc.name,
		format!("Unalloc_{image_id}_0_{MIB}")
	);

	// Parented directly to the image.
	let objects = helpers::objects_by_id(&conn).await;
	assert_eq!(objects[&unalloc.obj_id].par_obj_id, Some(image_id));

	let layout = entities::file_layout::Entity::find()
		.filter(entities::file_layout::Column::ObjId.eq(unalloc.obj_id))
		.all(&conn)
		.await
		.unwrap();
	assert_eq!(layout.len(), 1);
	assert_eq!(layout[0].byte_start, 0);
	assert_eq!(layout[0].byte_len, MIB as i64);
	assert_eq!(layout[0].sequence, 0);
}

/// Reverting after a full walk leaves nothing behind except the schema stamp.
#[tokio::test]
async fn revert_leaves_no_rows() {
	let dir = tempfile::tempdir().unwrap();
	let image_path = dir.path().join("blank.raw");
	std::fs::write(&image_path, vec![0u8; MIB]).unwrap();

	let (case, db_path) = helpers::sqlite_case(&dir).await;
	let mut driver = case.begin_ingest();
	driver
		.configure(IngestOptions {
			record_unallocated: true,
			min_chunk_bytes: 0,
			..Default::default()
		})
		.unwrap();

	let status = driver
		.start(&[image_path], ImageFormat::Detect, 512)
		.await
		.unwrap();
	assert_eq!(status, IngestStatus::Ok);
	driver.revert().await.unwrap();
	drop(driver);
	drop(case);

	let conn = helpers::raw_conn(&db_path).await;
	assert_eq!(
		entities::object::Entity::find().count(&conn).await.unwrap(),
		0
	);
	assert_eq!(
		entities::image_info::Entity::find().count(&conn).await.unwrap(),
		0
	);
	assert_eq!(
		entities::image_name::Entity::find().count(&conn).await.unwrap(),
		0
	);
	assert_eq!(
		entities::file::Entity::find().count(&conn).await.unwrap(),
		0
	);
	assert_eq!(
		entities::file_layout::Entity::find().count(&conn).await.unwrap(),
		0
	);
	assert_eq!(
		entities::db_info::Entity::find().count(&conn).await.unwrap(),
		1
	);
}

/// Committing twice or starting twice without closing is rejected.
#[tokio::test]
async fn savepoint_discipline_is_enforced() {
	let dir = tempfile::tempdir().unwrap();
	let image_path = dir.path().join("blank.raw");
	std::fs::write(&image_path, vec![0u8; 4096]).unwrap();

	let (case, _db_path) = helpers::sqlite_case(&dir).await;
	let mut driver = case.begin_ingest();
	driver
		.start(&[image_path.clone()], ImageFormat::Detect, 512)
		.await
		.unwrap();

	// A second start on the same driver must fail while the savepoint is open.
	let second = driver.start(&[image_path], ImageFormat::Detect, 512).await;
	assert!(second.is_err());

	driver.commit().await.unwrap();
	// Nothing left to commit.
	assert!(driver.commit().await.is_err());
}
