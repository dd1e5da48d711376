//! Per-file persistence
//!
//! Turns one directory entry (with its attributes) into catalogue rows:
//! resolves the parent object through the in-memory cache, hashes content
//! when enabled, consults the known-file oracles, and records the block map
//! of non-resident attributes.

use std::collections::HashMap;

use md5::{Digest, Md5};
use tracing::trace;

use crate::domain::{FileCategory, KnownStatus, LayoutRange, MetaType};
use crate::infrastructure::database::FileRowData;
use crate::known::LookupOutcome;
use crate::readers::{FsAttribute, FsEntry};
use crate::shared::path::{path_discriminator, sanitize_name, MAX_PARENT_PATH};

use super::context::{FsRun, IngestShared};
use super::error::{IngestError, IssueKind};

/// NTFS directory-index attribute name, persisted as if anonymous.
const NTFS_INDEX_ROOT_NAME: &str = "$I30";

/// Read granularity while hashing attribute content.
const HASH_CHUNK: usize = 64 * 1024;

/// The containing directory of the entry currently being processed.
#[derive(Clone, Debug)]
pub(crate) struct DirContext {
	/// Metadata address of the containing directory.
	pub meta_addr: u64,
	/// Metadata address of the containing directory's own parent.
	pub parent_meta_addr: u64,
	/// On-disk reuse sequence of the containing directory, for families that
	/// carry one.
	pub sequence: u32,
	/// Normalised path of the containing directory, e.g. `/dir/`.
	pub path: String,
}

pub(crate) struct FileProcessor {
	/// (fs object id, directory meta address, sequence discriminator) →
	/// directory object id. Single-writer, same thread as the walker.
	parent_cache: HashMap<(i64, u64, u64), i64>,
}

impl FileProcessor {
	pub fn new() -> Self {
		Self {
			parent_cache: HashMap::new(),
		}
	}

	/// Persist the root directory of a file system. Its parent is the
	/// file-system object itself, and its path is the bare separator.
	pub async fn process_root(
		&mut self,
		shared: &IngestShared,
		fs: &FsRun,
	) -> Result<i64, IngestError> {
		let mut root = fs.source.root_entry()?;
		// Root is recognised by its address; normalise dot-literal names away.
		if root.name == b"." || root.name == b".." {
			root.name = Vec::new();
		}
		let obj_id = self
			.persist_entry(shared, fs, &root, fs.obj_id, "/", None)
			.await?;
		self.remember_directory(fs, &root, "/", obj_id);
		trace!(fs = fs.obj_id, obj_id, "root directory catalogued");
		Ok(obj_id)
	}

	/// Persist one directory entry. Returns the entry's object id, or `None`
	/// when the entry was skipped with a registered issue.
	pub async fn process_entry(
		&mut self,
		shared: &IngestShared,
		fs: &FsRun,
		entry: &FsEntry,
		dir: &DirContext,
	) -> Result<Option<i64>, IngestError> {
		if dir.path.len() > MAX_PARENT_PATH {
			shared.register_str(
				IssueKind::General,
				format!("path exceeds {MAX_PARENT_PATH} characters"),
				&dir.path,
			);
			return Ok(None);
		}

		let Some(parent_obj_id) = self.resolve_parent(shared, fs, dir).await? else {
			let name = sanitize_name(&entry.name);
			shared.register_str(
				IssueKind::CorruptFs,
				format!(
					"parent directory (meta {}) not catalogued",
					dir.meta_addr
				),
				&format!("{}{}", dir.path, name),
			);
			return Ok(None);
		};

		// Dot entries only restate the directory linkage: rewrite the
		// metadata address to the logical target, never hash or map blocks.
		let rewrite = if entry.name == b"." {
			Some(dir.meta_addr)
		} else if entry.name == b".." {
			Some(dir.parent_meta_addr)
		} else {
			None
		};

		let obj_id = self
			.persist_entry(shared, fs, entry, parent_obj_id, &dir.path, rewrite)
			.await?;

		if rewrite.is_none() && entry.is_dir() {
			let name = sanitize_name(&entry.name);
			let dir_path = crate::shared::path::push_dir(&dir.path, &name);
			self.remember_directory(fs, entry, &dir_path, obj_id);
		}
		Ok(Some(obj_id))
	}

	/// Parent object id for entries inside `dir`, served from the cache or
	/// the catalogue. `None` when the directory has no row yet.
	async fn resolve_parent(
		&mut self,
		shared: &IngestShared,
		fs: &FsRun,
		dir: &DirContext,
	) -> Result<Option<i64>, IngestError> {
		let disc = if fs.info.fs_type.has_sequence_numbers() {
			u64::from(dir.sequence)
		} else {
			path_discriminator(&dir.path)
		};
		let key = (fs.obj_id, dir.meta_addr, disc);
		if let Some(&obj_id) = self.parent_cache.get(&key) {
			return Ok(Some(obj_id));
		}
		let found = shared
			.db
			.find_file_object(fs.obj_id, dir.meta_addr as i64)
			.await?;
		if let Some(obj_id) = found {
			self.parent_cache.insert(key, obj_id);
		}
		Ok(found)
	}

	/// Record a directory in the cache so its children resolve their parent
	/// without a catalogue query.
	fn remember_directory(&mut self, fs: &FsRun, entry: &FsEntry, dir_path: &str, obj_id: i64) {
		let disc = if fs.info.fs_type.has_sequence_numbers() {
			u64::from(entry.sequence)
		} else {
			path_discriminator(dir_path)
		};
		self.parent_cache
			.insert((fs.obj_id, entry.meta_addr, disc), obj_id);
	}

	/// Write the rows for one entry: one per default-type attribute, or one
	/// generic row when no attribute row was produced. Returns the first
	/// row's object id.
	async fn persist_entry(
		&mut self,
		shared: &IngestShared,
		fs: &FsRun,
		entry: &FsEntry,
		parent_obj_id: i64,
		containing_path: &str,
		rewrite_meta: Option<u64>,
	) -> Result<i64, IngestError> {
		let name = sanitize_name(&entry.name);
		if std::str::from_utf8(&entry.name).is_err() {
			shared.register_str(
				IssueKind::Unicode,
				"file name contained undecodable bytes",
				&format!("{containing_path}{name}"),
			);
		}
		let meta_addr = rewrite_meta.unwrap_or(entry.meta_addr) as i64;
		let is_dot = rewrite_meta.is_some();

		let attrs = if is_dot {
			Vec::new()
		} else {
			match fs.source.attributes(entry.meta_addr) {
				Ok(attrs) => attrs,
				Err(err) => {
					shared.register_str(
						IssueKind::CorruptFs,
						format!("cannot read attributes: {err}"),
						&format!("{containing_path}{name}"),
					);
					Vec::new()
				}
			}
		};

		let default_type = fs.source.default_attr_type();
		let mut first_obj_id: Option<i64> = None;

		for attr in attrs.iter().filter(|a| a.attr_type == default_type) {
			let row_name = match attr.name.as_deref() {
				None => name.clone(),
				Some(NTFS_INDEX_ROOT_NAME) => name.clone(),
				Some(stream) => format!("{name}:{stream}"),
			};

			// Only the anonymous default stream is hashed.
			let md5 = if shared.options.hash_files
				&& entry.meta_type == MetaType::Regular
				&& attr.name.is_none()
			{
				self.hash_attr(shared, fs, entry.meta_addr, attr, containing_path, &name)
			} else {
				None
			};
			let known = self.classify(shared, md5.as_ref().map(|(_, raw)| raw));

			let ranges = if shared.options.record_block_map && attr.non_resident {
				attr_layout(fs, attr)
			} else {
				Vec::new()
			};

			let row = FileRowData {
				parent_obj_id,
				fs_obj_id: Some(fs.obj_id),
				category: FileCategory::FsFile,
				attr_type: Some(attr.attr_type),
				attr_id: Some(attr.attr_id),
				name: row_name,
				meta_addr,
				meta_seq: i64::from(entry.sequence),
				dir_type: entry.name_type,
				meta_type: entry.meta_type,
				dir_flags: entry.name_flags,
				meta_flags: entry.meta_flags,
				size: attr.size,
				times: entry.times,
				ownership: entry.ownership,
				md5: md5.map(|(hex, _)| hex),
				known,
				has_layout: !ranges.is_empty(),
				parent_path: Some(containing_path.to_string()),
			};
			let obj_id = shared.db.add_file(&row).await?;
			for range in &ranges {
				shared.db.add_layout_range(obj_id, range).await?;
			}
			first_obj_id.get_or_insert(obj_id);
		}

		// Every file gets a presence in the catalogue, even with no usable
		// attribute (virtual, sparse, HFS directory cases).
		if let Some(obj_id) = first_obj_id {
			Ok(obj_id)
		} else {
			let row = FileRowData {
				parent_obj_id,
				fs_obj_id: Some(fs.obj_id),
				category: FileCategory::FsFile,
				attr_type: None,
				attr_id: None,
				name,
				meta_addr,
				meta_seq: i64::from(entry.sequence),
				dir_type: entry.name_type,
				meta_type: entry.meta_type,
				dir_flags: entry.name_flags,
				meta_flags: entry.meta_flags,
				size: entry.size,
				times: entry.times,
				ownership: entry.ownership,
				md5: None,
				known: KnownStatus::Unknown,
				has_layout: false,
				parent_path: Some(containing_path.to_string()),
			};
			Ok(shared.db.add_file(&row).await?)
		}
	}

	/// Stream an attribute's content through MD5. Read failures register an
	/// issue and leave the row unhashed.
	fn hash_attr(
		&self,
		shared: &IngestShared,
		fs: &FsRun,
		meta_addr: u64,
		attr: &FsAttribute,
		containing_path: &str,
		name: &str,
	) -> Option<(String, [u8; 16])> {
		let mut hasher = Md5::new();
		let mut buf = vec![0u8; HASH_CHUNK];
		let mut offset: i64 = 0;
		while offset < attr.size {
			let want = HASH_CHUNK.min((attr.size - offset) as usize);
			match fs
				.source
				.read_attr(meta_addr, attr.attr_id, offset, &mut buf[..want])
			{
				Ok(0) => break,
				Ok(n) => {
					hasher.update(&buf[..n]);
					offset += n as i64;
				}
				Err(err) => {
					shared.register_str(
						IssueKind::ReadIo,
						format!("content read failed while hashing: {err}"),
						&format!("{containing_path}{name}"),
					);
					return None;
				}
			}
		}
		let digest: [u8; 16] = hasher.finalize().into();
		Some((hex::encode(digest), digest))
	}

	/// Known-bad overrides known; no oracle or no hash means unknown.
	fn classify(&self, shared: &IngestShared, md5: Option<&[u8; 16]>) -> KnownStatus {
		let Some(digest) = md5 else {
			return KnownStatus::Unknown;
		};
		if let Some(oracle) = &shared.known_bad {
			if oracle.quick_lookup(digest) == LookupOutcome::Hit {
				return KnownStatus::KnownBad;
			}
		}
		if let Some(oracle) = &shared.known {
			if oracle.quick_lookup(digest) == LookupOutcome::Hit {
				return KnownStatus::Known;
			}
		}
		KnownStatus::Unknown
	}
}

/// Byte ranges of a non-resident attribute, clipped to its logical extent.
///
/// Sparse runs consume logical extent but are not recorded, and they do not
/// perturb the sequence numbering of the ranges that follow them.
fn attr_layout(fs: &FsRun, attr: &FsAttribute) -> Vec<LayoutRange> {
	let block_size = fs.info.block_size;
	let mut ranges = Vec::new();
	let mut logical_left = attr.size;
	let mut sequence: i64 = 0;
	for run in &attr.runs {
		if logical_left <= 0 {
			break;
		}
		let run_bytes = run.block_count * block_size;
		let take = run_bytes.min(logical_left);
		logical_left -= take;
		if run.sparse || take <= 0 {
			continue;
		}
		ranges.push(LayoutRange {
			byte_start: fs.info.block_to_byte(run.start_block),
			byte_len: take,
			sequence,
		});
		sequence += 1;
	}
	ranges
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::{FsFamily, FsInfo};
	use crate::readers::BlockRun;
	use std::sync::Arc;

	fn fs_run(block_size: i64, byte_offset: i64) -> FsRun {
		let info = FsInfo {
			fs_type: FsFamily::Ntfs,
			byte_offset,
			block_size,
			block_count: 1 << 20,
			root_inum: 5,
			first_inum: 0,
			last_inum: 1 << 20,
		};
		let source = crate::readers::memory::MemoryFs::builder(info.clone())
			.root()
			.build();
		FsRun {
			obj_id: 42,
			info,
			source: source as Arc<dyn crate::readers::FileSystemSource>,
		}
	}

	fn attr(size: i64, runs: &[BlockRun]) -> FsAttribute {
		FsAttribute {
			attr_type: 128,
			attr_id: 0,
			name: None,
			non_resident: true,
			size,
			runs: runs.to_vec(),
		}
	}

	#[test]
	fn layout_clips_last_run_to_size() {
		let fs = fs_run(512, 1000);
		let a = attr(
			1500,
			&[
				BlockRun { start_block: 10, block_count: 2, sparse: false },
				BlockRun { start_block: 20, block_count: 2, sparse: false },
			],
		);
		let ranges = attr_layout(&fs, &a);
		assert_eq!(ranges.len(), 2);
		assert_eq!(ranges[0], LayoutRange { byte_start: 1000 + 5120, byte_len: 1024, sequence: 0 });
		assert_eq!(ranges[1], LayoutRange { byte_start: 1000 + 10240, byte_len: 476, sequence: 1 });
		assert_eq!(ranges.iter().map(|r| r.byte_len).sum::<i64>(), 1500);
	}

	#[test]
	fn layout_skips_sparse_without_sequence_gap() {
		let fs = fs_run(512, 0);
		let a = attr(
			512 * 6,
			&[
				BlockRun { start_block: 1, block_count: 2, sparse: false },
				BlockRun { start_block: 0, block_count: 2, sparse: true },
				BlockRun { start_block: 9, block_count: 2, sparse: false },
			],
		);
		let ranges = attr_layout(&fs, &a);
		assert_eq!(ranges.len(), 2);
		assert_eq!(ranges[0].sequence, 0);
		assert_eq!(ranges[1].sequence, 1);
		assert_eq!(ranges[1].byte_start, 9 * 512);
		// The sparse hole consumed logical extent between the two.
		assert_eq!(ranges.iter().map(|r| r.byte_len).sum::<i64>(), 512 * 4);
	}
}
