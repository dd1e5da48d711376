//! Ingest configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options recognised by [`super::IngestDriver::configure`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestOptions {
	/// Write layout ranges for non-resident regular-file attributes.
	pub record_block_map: bool,

	/// Compute MD5 per regular file and consult the attached oracles. Forced
	/// on when either oracle is attached.
	pub hash_files: bool,

	/// Skip the synthetic orphan directory on FAT volumes. Large speedup,
	/// loses deleted-file coverage.
	pub skip_fat_orphans: bool,

	/// Run the unallocated-space sweep after the tree walk.
	pub record_unallocated: bool,

	/// Minimum bytes per emitted unallocated file. Positive: accumulate runs
	/// until the total reaches this. Zero: one file per file system / volume.
	/// Negative (default): one file per contiguous run.
	pub min_chunk_bytes: i64,

	/// Maximum bytes per emitted unallocated file; negative (default) means
	/// unbounded.
	pub max_chunk_bytes: i64,

	/// Opaque device identifier, unique across cases. A fresh UUID is used
	/// when absent.
	pub device_id: Option<String>,

	/// Timezone used when interpreting on-disk timestamps; empty means device
	/// local.
	pub timezone: String,

	/// Descend into file systems. When false only the image row is written.
	pub add_file_systems: bool,

	/// Also write a cache copy of the image as it is read.
	pub image_writer_path: Option<PathBuf>,
}

impl Default for IngestOptions {
	fn default() -> Self {
		Self {
			record_block_map: false,
			hash_files: false,
			skip_fat_orphans: false,
			record_unallocated: false,
			min_chunk_bytes: -1,
			max_chunk_bytes: -1,
			device_id: None,
			timezone: String::new(),
			add_file_systems: true,
			image_writer_path: None,
		}
	}
}
