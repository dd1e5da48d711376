//! Scripted in-memory sources
//!
//! Deterministic [`ImageSource`] / [`VolumeSystemSource`] / [`FileSystemSource`]
//! implementations driven entirely by data supplied at build time. The test
//! suite scripts whole volume layouts with these instead of shipping real
//! on-disk decoders; they also serve as the reference for plugging in one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::{
	DirEntryType, FileOwnership, FileTimes, FsFamily, FsInfo, ImageFormat, MetaFlags, MetaType,
	NameFlags, VolumeInfo, VolumeSystemInfo,
};

use super::{
	BlockRun, FileSystemSource, FsAttribute, FsEntry, ImageSource, ReaderError, SourceResolver,
	VolumeSystemSource,
};

/// Default attribute type used by scripted non-NTFS file systems.
pub const GENERIC_DATA_ATTR: i32 = 1;

/// NTFS `$DATA` attribute type.
pub const NTFS_DATA_ATTR: i32 = 128;

/// An image held fully in memory.
pub struct MemoryImage {
	data: Vec<u8>,
	sector_size: u32,
	parts: Vec<PathBuf>,
}

impl MemoryImage {
	pub fn zeroed(size: usize, sector_size: u32) -> Self {
		Self {
			data: vec![0; size],
			sector_size,
			parts: vec![PathBuf::from("memory.raw")],
		}
	}

	pub fn from_bytes(data: Vec<u8>, sector_size: u32) -> Self {
		Self {
			data,
			sector_size,
			parts: vec![PathBuf::from("memory.raw")],
		}
	}

	pub fn with_parts(mut self, parts: Vec<PathBuf>) -> Self {
		self.parts = parts;
		self
	}
}

impl ImageSource for MemoryImage {
	fn format(&self) -> ImageFormat {
		ImageFormat::Raw
	}

	fn sector_size(&self) -> u32 {
		self.sector_size
	}

	fn size(&self) -> i64 {
		self.data.len() as i64
	}

	fn parts(&self) -> Vec<PathBuf> {
		self.parts.clone()
	}

	fn read_at(&self, offset: i64, buf: &mut [u8]) -> Result<usize, ReaderError> {
		if offset < 0 || offset as usize > self.data.len() {
			return Err(ReaderError::OutOfBounds {
				offset,
				len: buf.len(),
				size: self.data.len() as i64,
			});
		}
		let start = offset as usize;
		let n = buf.len().min(self.data.len() - start);
		buf[..n].copy_from_slice(&self.data[start..start + n]);
		Ok(n)
	}
}

/// A scripted volume system.
pub struct MemoryVolumeSystem {
	info: VolumeSystemInfo,
	volumes: Vec<VolumeInfo>,
}

impl MemoryVolumeSystem {
	pub fn new(info: VolumeSystemInfo, volumes: Vec<VolumeInfo>) -> Self {
		Self { info, volumes }
	}
}

impl VolumeSystemSource for MemoryVolumeSystem {
	fn info(&self) -> VolumeSystemInfo {
		self.info.clone()
	}

	fn volumes(&self) -> Vec<VolumeInfo> {
		self.volumes.clone()
	}
}

/// A scripted file system, populated through [`MemoryFsBuilder`].
pub struct MemoryFs {
	info: FsInfo,
	default_attr_type: i32,
	/// Entries by metadata address, for root and directory lookups.
	entries: HashMap<u64, FsEntry>,
	/// Directory listings in insertion order. Dot entries appear only here.
	children: HashMap<u64, Vec<FsEntry>>,
	attrs: HashMap<u64, Vec<FsAttribute>>,
	content: HashMap<(u64, i32), Vec<u8>>,
	unalloc_runs: Vec<(i64, i64)>,
}

impl MemoryFs {
	pub fn builder(info: FsInfo) -> MemoryFsBuilder {
		let default_attr_type = if info.fs_type == FsFamily::Ntfs {
			NTFS_DATA_ATTR
		} else {
			GENERIC_DATA_ATTR
		};
		MemoryFsBuilder {
			fs: MemoryFs {
				info,
				default_attr_type,
				entries: HashMap::new(),
				children: HashMap::new(),
				attrs: HashMap::new(),
				content: HashMap::new(),
				unalloc_runs: Vec::new(),
			},
		}
	}
}

impl FileSystemSource for MemoryFs {
	fn info(&self) -> FsInfo {
		self.info.clone()
	}

	fn root_entry(&self) -> Result<FsEntry, ReaderError> {
		let root_addr = self.info.root_inum as u64;
		self.entries
			.get(&root_addr)
			.cloned()
			.ok_or_else(|| ReaderError::Corrupt("scripted fs has no root entry".into()))
	}

	fn read_dir(&self, meta_addr: u64) -> Result<Vec<FsEntry>, ReaderError> {
		self.children
			.get(&meta_addr)
			.cloned()
			.ok_or_else(|| ReaderError::Corrupt(format!("no directory at {meta_addr}")))
	}

	fn attributes(&self, meta_addr: u64) -> Result<Vec<FsAttribute>, ReaderError> {
		Ok(self.attrs.get(&meta_addr).cloned().unwrap_or_default())
	}

	fn default_attr_type(&self) -> i32 {
		self.default_attr_type
	}

	fn read_attr(
		&self,
		meta_addr: u64,
		attr_id: i32,
		offset: i64,
		buf: &mut [u8],
	) -> Result<usize, ReaderError> {
		let content = self
			.content
			.get(&(meta_addr, attr_id))
			.ok_or_else(|| ReaderError::Corrupt(format!("no content at {meta_addr}:{attr_id}")))?;
		if offset < 0 || offset as usize > content.len() {
			return Err(ReaderError::OutOfBounds {
				offset,
				len: buf.len(),
				size: content.len() as i64,
			});
		}
		let start = offset as usize;
		let n = buf.len().min(content.len() - start);
		buf[..n].copy_from_slice(&content[start..start + n]);
		Ok(n)
	}

	fn unallocated_blocks(&self) -> Result<Box<dyn Iterator<Item = i64> + Send + '_>, ReaderError> {
		let mut blocks: Vec<i64> = self
			.unalloc_runs
			.iter()
			.flat_map(|&(start, count)| start..start + count)
			.collect();
		blocks.sort_unstable();
		Ok(Box::new(blocks.into_iter()))
	}
}

/// Builds a [`MemoryFs`] one entry at a time.
pub struct MemoryFsBuilder {
	fs: MemoryFs,
}

impl MemoryFsBuilder {
	/// Install the root directory entry. Must be called before adding children.
	pub fn root(mut self) -> Self {
		let root_addr = self.fs.info.root_inum as u64;
		let entry = FsEntry {
			name: Vec::new(),
			meta_addr: root_addr,
			parent_meta_addr: root_addr,
			sequence: 0,
			name_type: DirEntryType::Directory,
			meta_type: MetaType::Directory,
			name_flags: NameFlags::ALLOCATED,
			meta_flags: MetaFlags::ALLOCATED.union(MetaFlags::USED),
			size: 0,
			times: FileTimes::default(),
			ownership: FileOwnership::default(),
		};
		self.fs.entries.insert(root_addr, entry);
		self.fs.children.insert(root_addr, Vec::new());
		self
	}

	/// Add a subdirectory under `parent_addr`.
	pub fn dir(mut self, parent_addr: u64, meta_addr: u64, name: &str) -> Self {
		let entry = FsEntry {
			name: name.as_bytes().to_vec(),
			meta_addr,
			parent_meta_addr: parent_addr,
			sequence: 0,
			name_type: DirEntryType::Directory,
			meta_type: MetaType::Directory,
			name_flags: NameFlags::ALLOCATED,
			meta_flags: MetaFlags::ALLOCATED.union(MetaFlags::USED),
			size: 0,
			times: FileTimes::default(),
			ownership: FileOwnership::default(),
		};
		self.push_entry(parent_addr, entry);
		self.fs.children.insert(meta_addr, Vec::new());
		self
	}

	/// Add a regular file with resident content under `parent_addr`.
	pub fn file(self, parent_addr: u64, meta_addr: u64, name: &str, content: &[u8]) -> Self {
		self.file_with(parent_addr, meta_addr, name.as_bytes(), content, None, &[])
	}

	/// Add a regular file whose raw name bytes may be invalid UTF-8.
	pub fn file_raw_name(
		self,
		parent_addr: u64,
		meta_addr: u64,
		name: &[u8],
		content: &[u8],
	) -> Self {
		self.file_with(parent_addr, meta_addr, name, content, None, &[])
	}

	/// Add a regular file with a non-resident default attribute covering the
	/// given runs.
	pub fn file_nonresident(
		self,
		parent_addr: u64,
		meta_addr: u64,
		name: &str,
		content: &[u8],
		runs: &[BlockRun],
	) -> Self {
		self.file_with(parent_addr, meta_addr, name.as_bytes(), content, None, runs)
	}

	/// Add a named alternate stream to an existing file.
	pub fn stream(mut self, meta_addr: u64, attr_id: i32, name: &str, content: &[u8]) -> Self {
		let attr = FsAttribute {
			attr_type: self.fs.default_attr_type,
			attr_id,
			name: Some(name.to_string()),
			non_resident: false,
			size: content.len() as i64,
			runs: Vec::new(),
		};
		self.fs.attrs.entry(meta_addr).or_default().push(attr);
		self.fs
			.content
			.insert((meta_addr, attr_id), content.to_vec());
		self
	}

	/// Add a file entry that has no attributes at all.
	pub fn bare_entry(mut self, parent_addr: u64, meta_addr: u64, name: &str) -> Self {
		let entry = FsEntry {
			name: name.as_bytes().to_vec(),
			meta_addr,
			parent_meta_addr: parent_addr,
			sequence: 0,
			name_type: DirEntryType::Regular,
			meta_type: MetaType::Regular,
			name_flags: NameFlags::ALLOCATED,
			meta_flags: MetaFlags::ALLOCATED.union(MetaFlags::USED),
			size: 0,
			times: FileTimes::default(),
			ownership: FileOwnership::default(),
		};
		self.push_entry(parent_addr, entry);
		self
	}

	fn file_with(
		mut self,
		parent_addr: u64,
		meta_addr: u64,
		name: &[u8],
		content: &[u8],
		times: Option<FileTimes>,
		runs: &[BlockRun],
	) -> Self {
		let entry = FsEntry {
			name: name.to_vec(),
			meta_addr,
			parent_meta_addr: parent_addr,
			sequence: 0,
			name_type: DirEntryType::Regular,
			meta_type: MetaType::Regular,
			name_flags: NameFlags::ALLOCATED,
			meta_flags: MetaFlags::ALLOCATED.union(MetaFlags::USED),
			size: content.len() as i64,
			times: times.unwrap_or_default(),
			ownership: FileOwnership::default(),
		};
		self.push_entry(parent_addr, entry);
		let attr = FsAttribute {
			attr_type: self.fs.default_attr_type,
			attr_id: 0,
			name: None,
			non_resident: !runs.is_empty(),
			size: content.len() as i64,
			runs: runs.to_vec(),
		};
		self.fs.attrs.entry(meta_addr).or_default().push(attr);
		self.fs.content.insert((meta_addr, 0), content.to_vec());
		self
	}

	fn push_entry(&mut self, parent_addr: u64, entry: FsEntry) {
		self.fs.entries.insert(entry.meta_addr, entry.clone());
		self.fs.children.entry(parent_addr).or_default().push(entry);
	}

	/// Add the `.` and `..` entries to a directory's listing, the way FAT and
	/// ExtX decoders yield them.
	pub fn dot_entries(mut self, dir_addr: u64, parent_addr: u64) -> Self {
		for (name, target) in [(&b"."[..], dir_addr), (&b".."[..], parent_addr)] {
			let entry = FsEntry {
				name: name.to_vec(),
				meta_addr: target,
				parent_meta_addr: dir_addr,
				sequence: 0,
				name_type: DirEntryType::Directory,
				meta_type: MetaType::Directory,
				name_flags: NameFlags::ALLOCATED,
				meta_flags: MetaFlags::ALLOCATED.union(MetaFlags::USED),
				size: 0,
				times: FileTimes::default(),
				ownership: FileOwnership::default(),
			};
			self.fs.children.entry(dir_addr).or_default().push(entry);
		}
		self
	}

	/// Declare unallocated block runs `(start_block, block_count)`.
	pub fn unallocated(mut self, runs: &[(i64, i64)]) -> Self {
		self.fs.unalloc_runs = runs.to_vec();
		self
	}

	pub fn build(self) -> Arc<MemoryFs> {
		Arc::new(self.fs)
	}
}

/// A resolver wired to scripted sources.
pub struct ScriptedResolver {
	image: Arc<MemoryImage>,
	volume_system: Option<Arc<MemoryVolumeSystem>>,
	file_systems: HashMap<i64, Arc<dyn FileSystemSource>>,
}

impl ScriptedResolver {
	pub fn new(image: MemoryImage) -> Self {
		Self {
			image: Arc::new(image),
			volume_system: None,
			file_systems: HashMap::new(),
		}
	}

	pub fn with_volume_system(mut self, vs: MemoryVolumeSystem) -> Self {
		self.volume_system = Some(Arc::new(vs));
		self
	}

	/// Register a file system answering at `byte_offset`.
	pub fn with_file_system(mut self, byte_offset: i64, fs: Arc<dyn FileSystemSource>) -> Self {
		self.file_systems.insert(byte_offset, fs);
		self
	}
}

impl SourceResolver for ScriptedResolver {
	fn open_image(
		&self,
		_parts: &[PathBuf],
		_format: ImageFormat,
		_sector_size: u32,
	) -> Result<Arc<dyn ImageSource>, ReaderError> {
		Ok(self.image.clone())
	}

	fn detect_volume_system(
		&self,
		_image: &Arc<dyn ImageSource>,
	) -> Result<Option<Arc<dyn VolumeSystemSource>>, ReaderError> {
		Ok(self
			.volume_system
			.clone()
			.map(|vs| vs as Arc<dyn VolumeSystemSource>))
	}

	fn open_file_system(
		&self,
		_image: &Arc<dyn ImageSource>,
		byte_offset: i64,
	) -> Result<Arc<dyn FileSystemSource>, ReaderError> {
		self.file_systems
			.get(&byte_offset)
			.cloned()
			.ok_or_else(|| {
				ReaderError::Unsupported(format!("no scripted file system at offset {byte_offset}"))
			})
	}
}
