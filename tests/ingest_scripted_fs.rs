//! Ingest over scripted in-memory file systems

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use casevault_core::domain::{FsFamily, FsInfo, ImageFormat};
use casevault_core::infrastructure::database::entities;
use casevault_core::ingest::{CancelHandle, IssueKind};
use casevault_core::readers::memory::{MemoryFs, MemoryImage, ScriptedResolver};
use casevault_core::readers::{FileSystemSource, FsAttribute, FsEntry, ReaderError};
use casevault_core::{IngestOptions, IngestStatus};

fn fat16_info() -> FsInfo {
	FsInfo {
		fs_type: FsFamily::Fat16,
		byte_offset: 0,
		block_size: 512,
		block_count: 8192,
		root_inum: 2,
		first_inum: 2,
		last_inum: 65536,
	}
}

/// Two files in a FAT16-style layout: names, paths, hashes, and the root's
/// parentage all come out as the catalogue contract promises.
#[tokio::test]
async fn fat_tree_is_catalogued_with_hashes() {
	let fs = MemoryFs::builder(fat16_info())
		.root()
		.dir(2, 10, "dir")
		.dot_entries(10, 2)
		.file(2, 20, "readme.txt", b"hello world\n")
		.file(
			10,
			21,
			"nested.bin",
			&[0xDE, 0xAD, 0xBE, 0xEF, 0xDE, 0xAD, 0xBE, 0xEF],
		)
		.build();
	let resolver =
		ScriptedResolver::new(MemoryImage::zeroed(4 * 1024 * 1024, 512)).with_file_system(0, fs);

	let dir = tempfile::tempdir().unwrap();
	let (mut case, db_path) = helpers::sqlite_case(&dir).await;
	case.set_resolver(Arc::new(resolver));

	let mut driver = case.begin_ingest();
	driver
		.configure(IngestOptions {
			hash_files: true,
			..Default::default()
		})
		.unwrap();
	let status = driver
		.start(&["memory.raw".into()], ImageFormat::Detect, 512)
		.await
		.unwrap();
	assert_eq!(status, IngestStatus::Ok);
	driver.commit().await.unwrap();

	let conn = helpers::raw_conn(&db_path).await;
	let files = entities::file::Entity::find().all(&conn).await.unwrap();
	assert_eq!(files.len(), 6); // root, dir, its dot entries, and the two files

	let by_name = |name: &str| {
		files
			.iter()
			.find(|f| f.name == name)
			.unwrap_or_else(|| panic!("no file row named {name:?}"))
	};

	let root = by_name("");
	let subdir = by_name("dir");
	let readme = by_name("readme.txt");
	let nested = by_name("nested.bin");

	assert_eq!(root.parent_path.as_deref(), Some("/"));
	assert_eq!(subdir.parent_path.as_deref(), Some("/"));
	assert_eq!(readme.parent_path.as_deref(), Some("/"));
	assert_eq!(nested.parent_path.as_deref(), Some("/dir/"));

	assert_eq!(
		readme.hash.as_deref(),
		Some("6f5902ac237024bdd0c176cb93063dc4")
	);
	assert!(nested.hash.is_some());
	// Directories are never hashed.
	assert!(subdir.hash.is_none());

	// Dot entries point at their logical targets and are never hashed.
	let dot = by_name(".");
	let dotdot = by_name("..");
	assert_eq!(dot.parent_path.as_deref(), Some("/dir/"));
	assert_eq!(dot.meta_addr, 10);
	assert_eq!(dotdot.meta_addr, 2);
	assert!(dot.hash.is_none() && dotdot.hash.is_none());

	// The root's parent is the file-system object; files resolve to their
	// directory's object whether served from cache or query.
	let fs_row = entities::fs_info::Entity::find()
		.one(&conn)
		.await
		.unwrap()
		.expect("fs row");
	let objects = helpers::objects_by_id(&conn).await;
	assert_eq!(objects[&root.obj_id].par_obj_id, Some(fs_row.obj_id));
	assert_eq!(objects[&readme.obj_id].par_obj_id, Some(root.obj_id));
	assert_eq!(objects[&nested.obj_id].par_obj_id, Some(subdir.obj_id));
}

/// NTFS alternate data streams: one row per default-type attribute, stream
/// name appended after a colon, only the anonymous stream hashed.
#[tokio::test]
async fn alternate_stream_gets_its_own_row() {
	let info = FsInfo {
		fs_type: FsFamily::Ntfs,
		byte_offset: 0,
		block_size: 4096,
		block_count: 4096,
		root_inum: 5,
		first_inum: 0,
		last_inum: 1 << 16,
	};
	let fs = MemoryFs::builder(info)
		.root()
		.file(5, 30, "notes.txt", &[0xAA; 100])
		.stream(30, 1, "secret", &[0xBB; 40])
		.build();
	let resolver =
		ScriptedResolver::new(MemoryImage::zeroed(16 * 1024 * 1024, 512)).with_file_system(0, fs);

	let dir = tempfile::tempdir().unwrap();
	let (mut case, db_path) = helpers::sqlite_case(&dir).await;
	case.set_resolver(Arc::new(resolver));

	let mut driver = case.begin_ingest();
	driver
		.configure(IngestOptions {
			hash_files: true,
			..Default::default()
		})
		.unwrap();
	let status = driver
		.start(&["memory.raw".into()], ImageFormat::Detect, 512)
		.await
		.unwrap();
	assert_eq!(status, IngestStatus::Ok);
	driver.commit().await.unwrap();

	let conn = helpers::raw_conn(&db_path).await;
	let rows = entities::file::Entity::find()
		.filter(entities::file::Column::Name.like("notes.txt%"))
		.all(&conn)
		.await
		.unwrap();
	assert_eq!(rows.len(), 2);

	let default = rows.iter().find(|r| r.name == "notes.txt").unwrap();
	let stream = rows.iter().find(|r| r.name == "notes.txt:secret").unwrap();

	assert_eq!(default.size, 100);
	assert_eq!(stream.size, 40);
	assert_ne!(default.attr_id, stream.attr_id);
	assert!(default.hash.is_some());
	assert!(stream.hash.is_none());

	// Both parented to the same directory.
	let objects = helpers::objects_by_id(&conn).await;
	assert_eq!(
		objects[&default.obj_id].par_obj_id,
		objects[&stream.obj_id].par_obj_id
	);
}

/// Entries with no attributes still get a generic row, and undecodable name
/// bytes are substituted with `^` while the error is registered.
#[tokio::test]
async fn bare_and_undecodable_entries_are_still_catalogued() {
	let fs = MemoryFs::builder(fat16_info())
		.root()
		.bare_entry(2, 40, "ghost.dat")
		.file_raw_name(2, 41, b"bad\xffname.txt", b"x")
		.build();
	let resolver =
		ScriptedResolver::new(MemoryImage::zeroed(1024 * 1024, 512)).with_file_system(0, fs);

	let dir = tempfile::tempdir().unwrap();
	let (mut case, db_path) = helpers::sqlite_case(&dir).await;
	case.set_resolver(Arc::new(resolver));

	let mut driver = case.begin_ingest();
	let status = driver
		.start(&["memory.raw".into()], ImageFormat::Detect, 512)
		.await
		.unwrap();
	// The substitution is registered as a recoverable error.
	assert_eq!(status, IngestStatus::RecoverableErrors);
	assert!(driver
		.error_list()
		.iter()
		.any(|issue| issue.kind == IssueKind::Unicode));
	driver.commit().await.unwrap();

	let conn = helpers::raw_conn(&db_path).await;
	let files = entities::file::Entity::find().all(&conn).await.unwrap();

	let ghost = files.iter().find(|f| f.name == "ghost.dat").unwrap();
	assert_eq!(ghost.attr_type, None);
	assert_eq!(ghost.attr_id, None);
	assert!(ghost.hash.is_none());

	assert!(files.iter().any(|f| f.name == "bad^name.txt"));
}

/// Delegating source that requests cancellation after a fixed number of
/// attribute fetches, i.e. after that many files have been processed.
struct CancelAfter {
	inner: Arc<MemoryFs>,
	remaining: AtomicUsize,
	handle: Mutex<Option<CancelHandle>>,
}

impl CancelAfter {
	fn new(inner: Arc<MemoryFs>, after: usize) -> Self {
		Self {
			inner,
			remaining: AtomicUsize::new(after),
			handle: Mutex::new(None),
		}
	}

	fn arm(&self, handle: CancelHandle) {
		*self.handle.lock().unwrap() = Some(handle);
	}
}

impl FileSystemSource for CancelAfter {
	fn info(&self) -> FsInfo {
		self.inner.info()
	}

	fn root_entry(&self) -> Result<FsEntry, ReaderError> {
		self.inner.root_entry()
	}

	fn read_dir(&self, meta_addr: u64) -> Result<Vec<FsEntry>, ReaderError> {
		self.inner.read_dir(meta_addr)
	}

	fn attributes(&self, meta_addr: u64) -> Result<Vec<FsAttribute>, ReaderError> {
		if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
			if let Some(handle) = self.handle.lock().unwrap().as_ref() {
				handle.cancel();
			}
		}
		self.inner.attributes(meta_addr)
	}

	fn default_attr_type(&self) -> i32 {
		self.inner.default_attr_type()
	}

	fn read_attr(
		&self,
		meta_addr: u64,
		attr_id: i32,
		offset: i64,
		buf: &mut [u8],
	) -> Result<usize, ReaderError> {
		self.inner.read_attr(meta_addr, attr_id, offset, buf)
	}

	fn unallocated_blocks(&self) -> Result<Box<dyn Iterator<Item = i64> + Send + '_>, ReaderError> {
		self.inner.unallocated_blocks()
	}
}

/// Cancelling mid-walk then committing keeps a consistent partial catalogue:
/// the image row exists, some files exist, and every file still reaches the
/// image through its parent chain.
#[tokio::test]
async fn cancel_mid_walk_commits_consistent_partial_catalogue() {
	let mut builder = MemoryFs::builder(fat16_info()).root();
	for d in 0..3i64 {
		let dir_addr = 100 + d as u64;
		builder = builder.dir(2, dir_addr, &format!("dir{d}"));
		for f in 0..15i64 {
			let addr = 1000 + (d * 100 + f) as u64;
			builder = builder.file(dir_addr, addr, &format!("file{d}_{f}.dat"), b"payload");
		}
	}
	let fs = builder.build();
	let counting = Arc::new(CancelAfter::new(fs, 10));
	let resolver = ScriptedResolver::new(MemoryImage::zeroed(4 * 1024 * 1024, 512))
		.with_file_system(0, counting.clone());

	let dir = tempfile::tempdir().unwrap();
	let (mut case, db_path) = helpers::sqlite_case(&dir).await;
	case.set_resolver(Arc::new(resolver));

	let mut driver = case.begin_ingest();
	counting.arm(driver.cancel_handle());

	let status = driver
		.start(&["memory.raw".into()], ImageFormat::Detect, 512)
		.await
		.unwrap();
	// Cancellation is a control outcome, not an error.
	assert_eq!(status, IngestStatus::Ok);
	let image_id = driver.commit().await.unwrap();

	let conn = helpers::raw_conn(&db_path).await;
	let files = entities::file::Entity::find().all(&conn).await.unwrap();
	assert!(!files.is_empty());
	assert!(files.len() < 49); // walk stopped early: 1 root + 3 dirs + 45 files

	let objects = helpers::objects_by_id(&conn).await;
	for file in &files {
		let object = &objects[&file.obj_id];
		assert_eq!(object.obj_type, 4);
		assert_eq!(helpers::parent_image(&objects, file.obj_id, 16), image_id);
	}
	// Exactly one objects row per files row.
	assert_eq!(
		entities::object::Entity::find()
			.filter(entities::object::Column::ObjType.eq(4))
			.count(&conn)
			.await
			.unwrap(),
		files.len() as u64
	);
}
