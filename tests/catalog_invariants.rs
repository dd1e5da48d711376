//! Cross-cutting catalogue invariants over a fully layered ingest:
//! volume system, three volumes, one file system, block maps, and the
//! unallocated sweep all at once.

mod helpers;

use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use casevault_core::domain::{
	FsFamily, FsInfo, ImageFormat, VolumeFlags, VolumeInfo, VolumeSystemInfo, VsType,
};
use casevault_core::infrastructure::database::entities;
use casevault_core::readers::memory::{
	MemoryFs, MemoryImage, MemoryVolumeSystem, ScriptedResolver,
};
use casevault_core::readers::BlockRun;
use casevault_core::{Case, CaseLocation, IngestOptions, IngestStatus};

const SECTOR: i64 = 512;
const FS_OFFSET: i64 = 64 * SECTOR;

fn layered_resolver() -> ScriptedResolver {
	let vs = MemoryVolumeSystem::new(
		VolumeSystemInfo {
			vs_type: VsType::Dos,
			byte_offset: 0,
			block_size: SECTOR,
		},
		vec![
			VolumeInfo {
				slot_addr: 0,
				start_block: 64,
				length_blocks: 2048,
				description: "Linux (0x83)".into(),
				flags: VolumeFlags::ALLOCATED,
			},
			VolumeInfo {
				slot_addr: 1,
				start_block: 2112,
				length_blocks: 1024,
				description: "Unallocated".into(),
				flags: VolumeFlags::UNALLOCATED,
			},
			VolumeInfo {
				slot_addr: 2,
				start_block: 0,
				length_blocks: 1,
				description: "Primary Table (#0)".into(),
				flags: VolumeFlags::META,
			},
		],
	);

	let info = FsInfo {
		fs_type: FsFamily::Ext4,
		byte_offset: FS_OFFSET,
		block_size: 1024,
		block_count: 1024,
		root_inum: 2,
		first_inum: 2,
		last_inum: 4096,
	};
	let fs = MemoryFs::builder(info)
		.root()
		.dir(2, 11, "etc")
		.dir(11, 12, "nested")
		.file(2, 20, "kernel.img", b"kernel bytes")
		.file(11, 21, "hosts", b"127.0.0.1 localhost\n")
		.file(12, 22, "deep.cfg", b"key=value\n")
		.file_nonresident(
			2,
			25,
			"big.bin",
			&[0xCC; 3000],
			&[
				BlockRun {
					start_block: 100,
					block_count: 2,
					sparse: false,
				},
				BlockRun {
					start_block: 200,
					block_count: 1,
					sparse: false,
				},
			],
		)
		.unallocated(&[(500, 2), (600, 3)])
		.build();

	ScriptedResolver::new(MemoryImage::zeroed(4 * 1024 * 1024, 512))
		.with_volume_system(vs)
		.with_file_system(FS_OFFSET, fs)
}

async fn ingest_layered(dir: &tempfile::TempDir) -> (std::path::PathBuf, i64) {
	let (mut case, db_path) = helpers::sqlite_case(dir).await;
	case.set_resolver(Arc::new(layered_resolver()));

	let mut driver = case.begin_ingest();
	driver.set_volume_mask(
		VolumeFlags::ALLOCATED
			.union(VolumeFlags::UNALLOCATED)
			.union(VolumeFlags::META),
	);
	driver
		.configure(IngestOptions {
			record_block_map: true,
			record_unallocated: true,
			min_chunk_bytes: -1,
			..Default::default()
		})
		.unwrap();
	let status = driver
		.start(&["memory.raw".into()], ImageFormat::Detect, 512)
		.await
		.unwrap();
	assert_eq!(status, IngestStatus::Ok);
	let image_id = driver.commit().await.unwrap();
	(db_path, image_id)
}

/// Every kind-specific row has exactly one objects row with the matching
/// type tag, and parent chains all reach the image.
#[tokio::test]
async fn every_row_has_one_matching_object() {
	let dir = tempfile::tempdir().unwrap();
	let (db_path, image_id) = ingest_layered(&dir).await;
	let conn = helpers::raw_conn(&db_path).await;
	let objects = helpers::objects_by_id(&conn).await;

	let images = entities::image_info::Entity::find().all(&conn).await.unwrap();
	let vss = entities::vs_info::Entity::find().all(&conn).await.unwrap();
	let volumes = entities::vs_part::Entity::find().all(&conn).await.unwrap();
	let fss = entities::fs_info::Entity::find().all(&conn).await.unwrap();
	let files = entities::file::Entity::find().all(&conn).await.unwrap();

	assert_eq!(images.len(), 1);
	assert_eq!(vss.len(), 1);
	assert_eq!(volumes.len(), 3);
	assert_eq!(fss.len(), 1);

	let mut expected_types: HashMap<i64, i32> = HashMap::new();
	for row in &images {
		expected_types.insert(row.obj_id, 0);
	}
	for row in &vss {
		expected_types.insert(row.obj_id, 1);
	}
	for row in &volumes {
		expected_types.insert(row.obj_id, 2);
	}
	for row in &fss {
		expected_types.insert(row.obj_id, 3);
	}
	for row in &files {
		expected_types.insert(row.obj_id, 4);
	}

	// One object per kind row, types matching, nothing dangling.
	assert_eq!(expected_types.len(), objects.len());
	for (obj_id, expected) in &expected_types {
		assert_eq!(objects[obj_id].obj_type, *expected, "object {obj_id}");
	}

	for obj_id in objects.keys() {
		assert_eq!(helpers::parent_image(&objects, *obj_id, 16), image_id);
	}
}

/// Layout ranges sum to the owning file's size, with contiguous zero-based
/// sequences and no byte overlap.
#[tokio::test]
async fn layout_ranges_are_ordered_and_cover_the_size() {
	let dir = tempfile::tempdir().unwrap();
	let (db_path, _image_id) = ingest_layered(&dir).await;
	let conn = helpers::raw_conn(&db_path).await;

	let layout_files = entities::file::Entity::find()
		.filter(entities::file::Column::HasLayout.eq(true))
		.all(&conn)
		.await
		.unwrap();
	assert!(!layout_files.is_empty());

	for file in &layout_files {
		let ranges = entities::file_layout::Entity::find()
			.filter(entities::file_layout::Column::ObjId.eq(file.obj_id))
			.order_by_asc(entities::file_layout::Column::Sequence)
			.all(&conn)
			.await
			.unwrap();
		assert!(!ranges.is_empty(), "file {} has no ranges", file.obj_id);

		for (idx, range) in ranges.iter().enumerate() {
			assert_eq!(range.sequence, idx as i64);
			assert!(range.byte_len > 0);
		}
		let total: i64 = ranges.iter().map(|r| r.byte_len).sum();
		assert_eq!(total, file.size, "file {}", file.obj_id);

		let mut sorted = ranges.clone();
		sorted.sort_by_key(|r| r.byte_start);
		for pair in sorted.windows(2) {
			assert!(
				pair[0].byte_start + pair[0].byte_len <= pair[1].byte_start,
				"overlap in file {}",
				file.obj_id
			);
		}
	}

	// The block-mapped regular file is among them, clipped to its size.
	let big = layout_files
		.iter()
		.find(|f| f.name == "big.bin")
		.expect("block-mapped file");
	assert_eq!(big.size, 3000);
}

/// Unallocated and meta volumes, and the in-fs runs, all produced virtual
/// files parented where the contract says.
#[tokio::test]
async fn unallocated_coverage_spans_volumes_and_file_system() {
	let dir = tempfile::tempdir().unwrap();
	let (db_path, _image_id) = ingest_layered(&dir).await;
	let conn = helpers::raw_conn(&db_path).await;
	let objects = helpers::objects_by_id(&conn).await;

	let volumes = entities::vs_part::Entity::find()
		.order_by_asc(entities::vs_part::Column::SlotAddr)
		.all(&conn)
		.await
		.unwrap();
	let unalloc_files = entities::file::Entity::find()
		.filter(entities::file::Column::Category.eq(4))
		.all(&conn)
		.await
		.unwrap();

	// Two per-run chunks inside the fs, one per bare volume (slots 1 and 2).
	assert_eq!(unalloc_files.len(), 4);

	let volume_parented: Vec<_> = unalloc_files
		.iter()
		.filter(|f| f.fs_obj_id.is_none())
		.collect();
	assert_eq!(volume_parented.len(), 2);
	for file in &volume_parented {
		let parent = objects[&file.obj_id].par_obj_id.unwrap();
		assert!(volumes.iter().any(|v| v.obj_id == parent));
		// Volume-wide cover: size equals the volume's sector range.
		let volume = volumes.iter().find(|v| v.obj_id == parent).unwrap();
		assert_eq!(file.size, volume.length_blocks * SECTOR);
	}

	let fs_parented: Vec<_> = unalloc_files
		.iter()
		.filter(|f| f.fs_obj_id.is_some())
		.collect();
	assert_eq!(fs_parented.len(), 2);
	let sizes: Vec<i64> = {
		let mut s: Vec<i64> = fs_parented.iter().map(|f| f.size).collect();
		s.sort_unstable();
		s
	};
	assert_eq!(sizes, vec![2 * 1024, 3 * 1024]);
}

/// A committed case reopens with the same rows, and an unhashed ingest
/// stores NULL hashes and unknown status everywhere.
#[tokio::test]
async fn reopen_sees_committed_rows_and_no_hashes() {
	let dir = tempfile::tempdir().unwrap();
	let (db_path, _image_id) = ingest_layered(&dir).await;

	let reopened = Case::open(&CaseLocation::Sqlite(db_path.clone()))
		.await
		.unwrap();
	let summary = reopened.summary().await.unwrap();
	assert_eq!(summary.images, 1);
	assert_eq!(summary.volume_systems, 1);
	assert_eq!(summary.volumes, 3);
	assert_eq!(summary.file_systems, 1);
	assert!(summary.files > 0);
	assert!(summary.layout_ranges > 0);

	// hash_files was off for this ingest.
	let conn = helpers::raw_conn(&db_path).await;
	let files = entities::file::Entity::find().all(&conn).await.unwrap();
	for file in &files {
		assert!(file.hash.is_none(), "file {} has a hash", file.obj_id);
		assert_eq!(file.known, 0, "file {} has known status", file.obj_id);
	}
}

/// Children resolve to the same parent object id whether the processor
/// answered from its cache (siblings after the first) or from a catalogue
/// query.
#[tokio::test]
async fn children_share_their_directory_object() {
	let dir = tempfile::tempdir().unwrap();
	let (db_path, _image_id) = ingest_layered(&dir).await;
	let conn = helpers::raw_conn(&db_path).await;
	let objects = helpers::objects_by_id(&conn).await;

	let files = entities::file::Entity::find().all(&conn).await.unwrap();
	let by_name: HashMap<&str, &entities::file::Model> =
		files.iter().map(|f| (f.name.as_str(), f)).collect();

	let etc = by_name["etc"];
	let nested = by_name["nested"];
	assert_eq!(
		objects[&by_name["hosts"].obj_id].par_obj_id,
		Some(etc.obj_id)
	);
	assert_eq!(objects[&nested.obj_id].par_obj_id, Some(etc.obj_id));
	assert_eq!(
		objects[&by_name["deep.cfg"].obj_id].par_obj_id,
		Some(nested.obj_id)
	);
	assert_eq!(by_name["deep.cfg"].parent_path.as_deref(), Some("/etc/nested/"));
}
