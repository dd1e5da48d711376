//! Consumed reader capabilities
//!
//! The engine never decodes on-disk structures itself. Image containers,
//! volume systems, and file systems are reached through the traits in this
//! module; concrete decoders plug in behind a [`SourceResolver`]. The crate
//! ships two implementations: [`raw::RawResolver`] for plain and split raw
//! images, and [`memory::ScriptedResolver`] for scripted in-memory layouts.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{
	DirEntryType, FileOwnership, FileTimes, FsInfo, ImageFormat, MetaFlags, MetaType, NameFlags,
	VolumeInfo, VolumeSystemInfo,
};

pub mod memory;
pub mod raw;

/// Errors surfaced by the reader capabilities.
#[derive(Debug, Error)]
pub enum ReaderError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("read past end of image: offset {offset}, len {len}, size {size}")]
	OutOfBounds { offset: i64, len: usize, size: i64 },

	/// An on-disk structure failed an invariant inside the decoder.
	#[error("corrupt structure: {0}")]
	Corrupt(String),

	#[error("unsupported: {0}")]
	Unsupported(String),
}

/// Random-access view of a disk image, possibly split across several files.
pub trait ImageSource: Send + Sync {
	fn format(&self) -> ImageFormat;

	/// Sector size in bytes the image was acquired with.
	fn sector_size(&self) -> u32;

	/// Total size in bytes.
	fn size(&self) -> i64;

	/// Ordered paths of the image parts.
	fn parts(&self) -> Vec<PathBuf>;

	/// Bit-exact, offset-stable read. Returns the number of bytes read, which
	/// is shorter than `buf` only at end of image.
	fn read_at(&self, offset: i64, buf: &mut [u8]) -> Result<usize, ReaderError>;
}

/// A decoded volume system (partition table) and its volumes.
pub trait VolumeSystemSource: Send + Sync {
	fn info(&self) -> VolumeSystemInfo;

	/// Volumes in slot order, flags included.
	fn volumes(&self) -> Vec<VolumeInfo>;
}

/// One directory entry as yielded by a file-system decoder.
#[derive(Clone, Debug)]
pub struct FsEntry {
	/// Raw on-disk name bytes; may not be valid UTF-8.
	pub name: Vec<u8>,
	pub meta_addr: u64,
	pub parent_meta_addr: u64,
	/// On-disk reuse sequence of the metadata record, for families that have
	/// one; zero elsewhere.
	pub sequence: u32,
	pub name_type: DirEntryType,
	pub meta_type: MetaType,
	pub name_flags: NameFlags,
	pub meta_flags: MetaFlags,
	pub size: i64,
	pub times: FileTimes,
	pub ownership: FileOwnership,
}

impl FsEntry {
	pub fn is_dir(&self) -> bool {
		self.meta_type == MetaType::Directory || self.name_type == DirEntryType::Directory
	}

	/// `.` or `..`
	pub fn is_dot(&self) -> bool {
		self.name == b"." || self.name == b".."
	}
}

/// One contiguous allocation of a non-resident attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRun {
	pub start_block: i64,
	pub block_count: i64,
	/// Sparse runs occupy address space but no disk blocks.
	pub sparse: bool,
}

/// A named byte stream belonging to a file.
#[derive(Clone, Debug)]
pub struct FsAttribute {
	pub attr_type: i32,
	pub attr_id: i32,
	/// Stream name; `None` for the anonymous default stream.
	pub name: Option<String>,
	pub non_resident: bool,
	pub size: i64,
	/// Run list in file order; empty for resident attributes.
	pub runs: Vec<BlockRun>,
}

/// A decoded file system.
pub trait FileSystemSource: Send + Sync {
	fn info(&self) -> FsInfo;

	/// The root directory's own entry.
	fn root_entry(&self) -> Result<FsEntry, ReaderError>;

	/// Entries of the directory at `meta_addr`, in decoder order. The order is
	/// stable across runs on the same image.
	fn read_dir(&self, meta_addr: u64) -> Result<Vec<FsEntry>, ReaderError>;

	/// Attributes of the file at `meta_addr`.
	fn attributes(&self, meta_addr: u64) -> Result<Vec<FsAttribute>, ReaderError>;

	/// The default attribute type for this family (e.g. `$DATA` on NTFS).
	fn default_attr_type(&self) -> i32;

	/// Read attribute content. Returns bytes read; shorter than `buf` only at
	/// end of the attribute.
	fn read_attr(
		&self,
		meta_addr: u64,
		attr_id: i32,
		offset: i64,
		buf: &mut [u8],
	) -> Result<usize, ReaderError>;

	/// Unallocated block addresses in ascending order.
	fn unallocated_blocks(&self) -> Result<Box<dyn Iterator<Item = i64> + Send + '_>, ReaderError>;
}

/// Entry point the engine uses to open images and descend into them.
pub trait SourceResolver: Send + Sync {
	fn open_image(
		&self,
		parts: &[PathBuf],
		format: ImageFormat,
		sector_size: u32,
	) -> Result<Arc<dyn ImageSource>, ReaderError>;

	/// Detect a volume system at the start of the image. `Ok(None)` means the
	/// image has no recognisable partition table.
	fn detect_volume_system(
		&self,
		image: &Arc<dyn ImageSource>,
	) -> Result<Option<Arc<dyn VolumeSystemSource>>, ReaderError>;

	/// Open a file system at the given byte offset. `Unsupported` or `Corrupt`
	/// when no decoder recognises the bytes there.
	fn open_file_system(
		&self,
		image: &Arc<dyn ImageSource>,
		byte_offset: i64,
	) -> Result<Arc<dyn FileSystemSource>, ReaderError>;
}
