//! Domain model for the catalogue
//!
//! These are the engine-side shapes of what gets persisted: the object-graph
//! type tags, the per-kind info structs, and the flag sets carried by volumes
//! and file entries. Database rows mirror these one-to-one.

use int_enum::IntEnum;
use serde::{Deserialize, Serialize};

/// Type tag in the `objects` union-identity table.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Serialize, Deserialize)]
pub enum ObjectType {
	Image = 0,
	VolumeSystem = 1,
	Volume = 2,
	FileSystem = 3,
	File = 4,
}

/// Broad category of a `files` row.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Serialize, Deserialize)]
pub enum FileCategory {
	/// Backed by a real file-system metadata record.
	FsFile = 0,
	Carved = 1,
	Derived = 2,
	Local = 3,
	/// Virtual file grouping unallocated blocks.
	UnallocBlocks = 4,
	UnusedBlocks = 5,
	/// Virtual directory with no on-disk record.
	VirtualDir = 6,
	Slack = 7,
}

/// Directory-entry type as reported by the name structure.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Serialize, Deserialize)]
pub enum DirEntryType {
	Unknown = 0,
	Fifo = 1,
	CharDevice = 2,
	Directory = 3,
	BlockDevice = 4,
	Regular = 5,
	Symlink = 6,
	Socket = 7,
	Shadow = 8,
	Whiteout = 9,
	Virtual = 10,
}

/// File type as reported by the metadata record.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Serialize, Deserialize)]
pub enum MetaType {
	Unknown = 0,
	Regular = 1,
	Directory = 2,
	Fifo = 3,
	CharDevice = 4,
	BlockDevice = 5,
	Symlink = 6,
	Shadow = 7,
	Socket = 8,
	Whiteout = 9,
	Virtual = 10,
}

/// Allocation state of a directory entry (name structure).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFlags(pub i32);

impl NameFlags {
	pub const ALLOCATED: NameFlags = NameFlags(0x01);
	pub const UNALLOCATED: NameFlags = NameFlags(0x02);

	pub fn is_allocated(self) -> bool {
		self.0 & Self::ALLOCATED.0 != 0
	}

	pub fn is_unallocated(self) -> bool {
		self.0 & Self::UNALLOCATED.0 != 0
	}
}

/// Allocation / use state of a metadata record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFlags(pub i32);

impl MetaFlags {
	pub const ALLOCATED: MetaFlags = MetaFlags(0x01);
	pub const UNALLOCATED: MetaFlags = MetaFlags(0x02);
	pub const USED: MetaFlags = MetaFlags(0x04);
	pub const UNUSED: MetaFlags = MetaFlags(0x08);
	pub const COMPRESSED: MetaFlags = MetaFlags(0x10);
	pub const ORPHAN: MetaFlags = MetaFlags(0x20);

	pub fn union(self, other: MetaFlags) -> MetaFlags {
		MetaFlags(self.0 | other.0)
	}

	pub fn is_allocated(self) -> bool {
		self.0 & Self::ALLOCATED.0 != 0
	}
}

/// Flags on a volume inside a volume system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeFlags(pub i32);

impl VolumeFlags {
	pub const ALLOCATED: VolumeFlags = VolumeFlags(0x01);
	pub const UNALLOCATED: VolumeFlags = VolumeFlags(0x02);
	pub const META: VolumeFlags = VolumeFlags(0x04);

	pub fn contains(self, other: VolumeFlags) -> bool {
		self.0 & other.0 != 0
	}

	pub fn union(self, other: VolumeFlags) -> VolumeFlags {
		VolumeFlags(self.0 | other.0)
	}

	pub fn is_allocated(self) -> bool {
		self.contains(Self::ALLOCATED)
	}
}

/// Classification returned by the known-file oracles.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Serialize, Deserialize)]
pub enum KnownStatus {
	Unknown = 0,
	Known = 1,
	KnownBad = 2,
}

/// Image container format.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Serialize, Deserialize)]
pub enum ImageFormat {
	/// Autodetect from the first part.
	Detect = 0,
	Raw = 1,
	SplitRaw = 2,
	Ewf = 3,
	Aff = 4,
	Pool = 5,
}

/// Volume-system (partition table) family.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Serialize, Deserialize)]
pub enum VsType {
	Unknown = 0,
	Dos = 1,
	Bsd = 2,
	Sun = 3,
	Mac = 4,
	Gpt = 5,
	Apfs = 6,
}

/// File-system family. The engine only branches on a few of these; the code is
/// otherwise passed through to the catalogue.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Serialize, Deserialize)]
pub enum FsFamily {
	Unknown = 0,
	Ntfs = 1,
	Fat12 = 2,
	Fat16 = 3,
	Fat32 = 4,
	ExFat = 5,
	Ext2 = 6,
	Ext3 = 7,
	Ext4 = 8,
	HfsPlus = 9,
	Apfs = 10,
	Iso9660 = 11,
	Yaffs2 = 12,
	Btrfs = 13,
	Raw = 14,
}

impl FsFamily {
	/// Families whose metadata records carry a reuse sequence number.
	pub fn has_sequence_numbers(self) -> bool {
		matches!(self, FsFamily::Ntfs | FsFamily::ExFat)
	}

	/// FAT variants grow a synthetic orphan directory during the walk.
	pub fn is_fat(self) -> bool {
		matches!(
			self,
			FsFamily::Fat12 | FsFamily::Fat16 | FsFamily::Fat32 | FsFamily::ExFat
		)
	}
}

/// Name of the virtual directory that groups unallocated-block files.
pub const UNALLOC_DIR_NAME: &str = "$Unalloc";

/// Name of the virtual directory reserved for carved files.
pub const CARVED_DIR_NAME: &str = "$CarvedFiles";

/// Name of the synthetic directory FAT decoders use for orphaned records.
pub const ORPHAN_DIR_NAME: &str = "$OrphanFiles";

/// Describes a volume system found in an image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSystemInfo {
	pub vs_type: VsType,
	/// Byte offset of the volume system inside the image.
	pub byte_offset: i64,
	/// Sector size the partition addresses are expressed in.
	pub block_size: i64,
}

/// Describes one volume (partition) inside a volume system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
	pub slot_addr: i64,
	pub start_block: i64,
	pub length_blocks: i64,
	pub description: String,
	pub flags: VolumeFlags,
}

/// Describes a file system found in an image or volume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsInfo {
	pub fs_type: FsFamily,
	/// Byte offset of the file system inside the image.
	pub byte_offset: i64,
	pub block_size: i64,
	pub block_count: i64,
	pub root_inum: i64,
	pub first_inum: i64,
	pub last_inum: i64,
}

impl FsInfo {
	/// Byte address of block `b` inside the image.
	pub fn block_to_byte(&self, block: i64) -> i64 {
		self.byte_offset + block * self.block_size
	}
}

/// Timestamps of a file entry, epoch seconds. Zero means "not recorded".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTimes {
	pub mtime: i64,
	pub atime: i64,
	pub ctime: i64,
	pub crtime: i64,
}

/// Ownership and permission bits of a file entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwnership {
	pub uid: i64,
	pub gid: i64,
	pub mode: i64,
}

/// One byte-granular run recorded for a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRange {
	/// Byte offset inside the image.
	pub byte_start: i64,
	pub byte_len: i64,
	/// Position of this range in the file, starting at zero.
	pub sequence: i64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn volume_flags_combine() {
		let flags = VolumeFlags::ALLOCATED.union(VolumeFlags::META);
		assert!(flags.contains(VolumeFlags::ALLOCATED));
		assert!(flags.contains(VolumeFlags::META));
		assert!(!flags.contains(VolumeFlags::UNALLOCATED));
	}

	#[test]
	fn fs_family_branches() {
		assert!(FsFamily::Ntfs.has_sequence_numbers());
		assert!(!FsFamily::Ext4.has_sequence_numbers());
		assert!(FsFamily::Fat16.is_fat());
		assert!(!FsFamily::Ntfs.is_fat());
	}

	#[test]
	fn block_addressing() {
		let fs = FsInfo {
			fs_type: FsFamily::Fat16,
			byte_offset: 32256,
			block_size: 512,
			block_count: 8192,
			root_inum: 2,
			first_inum: 2,
			last_inum: 65536,
		};
		assert_eq!(fs.block_to_byte(0), 32256);
		assert_eq!(fs.block_to_byte(10), 32256 + 5120);
	}
}
