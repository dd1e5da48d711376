//! Recursive descent through the volume and file-system layers
//!
//! Drives image → volume system → volumes → file systems, recording each
//! level and handing every found file system to the directory walker. Filter
//! hooks run at each level; the volume-flag mask decides which volumes are
//! visited at all.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{FsInfo, VolumeFlags, VolumeInfo, VolumeSystemInfo};
use crate::readers::{ImageSource, ReaderError, SourceResolver};

use super::context::{FsRun, IngestShared};
use super::error::{IngestError, IssueKind};
use super::file_processor::FileProcessor;
use super::fs_walker::{FsWalker, WalkFlags, WalkOutcome};

/// Verdict of a per-level filter hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterVerdict {
	/// Record the node and descend into it.
	Continue,
	/// Record the node but descend no further.
	Skip,
	/// Abort the entire walk.
	Stop,
}

/// Per-level hooks consulted during the descent. The default implementation
/// continues everywhere.
pub trait WalkFilter: Send + Sync {
	fn volume_system(&self, _info: &VolumeSystemInfo) -> FilterVerdict {
		FilterVerdict::Continue
	}

	fn volume(&self, _info: &VolumeInfo) -> FilterVerdict {
		FilterVerdict::Continue
	}

	fn file_system(&self, _info: &FsInfo) -> FilterVerdict {
		FilterVerdict::Continue
	}
}

/// The always-continue filter.
pub(crate) struct NoFilter;

impl WalkFilter for NoFilter {}

/// How the image-level walk ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ImageWalkOutcome {
	Completed,
	Cancelled,
	/// A filter hook returned [`FilterVerdict::Stop`].
	Stopped,
}

pub(crate) struct ImageWalker<'a> {
	shared: &'a IngestShared,
	resolver: &'a Arc<dyn SourceResolver>,
	image: &'a Arc<dyn ImageSource>,
	image_obj_id: i64,
	/// Volumes whose flags intersect this mask are visited; the rest are
	/// invisible to the catalogue.
	volume_mask: VolumeFlags,
	filter: &'a dyn WalkFilter,
	processor: &'a mut FileProcessor,
}

impl<'a> ImageWalker<'a> {
	pub fn new(
		shared: &'a IngestShared,
		resolver: &'a Arc<dyn SourceResolver>,
		image: &'a Arc<dyn ImageSource>,
		image_obj_id: i64,
		volume_mask: VolumeFlags,
		filter: &'a dyn WalkFilter,
		processor: &'a mut FileProcessor,
	) -> Self {
		Self {
			shared,
			resolver,
			image,
			image_obj_id,
			volume_mask,
			filter,
			processor,
		}
	}

	pub async fn walk(&mut self) -> Result<ImageWalkOutcome, IngestError> {
		let volume_system = match self.resolver.detect_volume_system(self.image) {
			Ok(vs) => vs,
			Err(err) => {
				// A broken partition table is not fatal; the image may still
				// carry a file system at offset zero.
				self.shared.register_str(
					issue_kind(&err),
					format!("volume-system detection failed: {err}"),
					"image",
				);
				None
			}
		};

		match volume_system {
			Some(vs) => self.walk_volume_system(vs.as_ref()).await,
			None => self.walk_bare_image().await,
		}
	}

	async fn walk_volume_system(
		&mut self,
		vs: &dyn crate::readers::VolumeSystemSource,
	) -> Result<ImageWalkOutcome, IngestError> {
		let vs_info = vs.info();
		let verdict = self.filter.volume_system(&vs_info);
		if verdict == FilterVerdict::Stop {
			return Ok(ImageWalkOutcome::Stopped);
		}
		let vs_obj_id = self
			.shared
			.db
			.add_volume_system(&vs_info, self.image_obj_id)
			.await?;
		info!(vs_obj_id, vs_type = ?vs_info.vs_type, "volume system catalogued");
		if verdict == FilterVerdict::Skip {
			return Ok(ImageWalkOutcome::Completed);
		}

		for volume in vs.volumes() {
			if self.shared.cancelled() {
				return Ok(ImageWalkOutcome::Cancelled);
			}
			if !volume.flags.contains(self.volume_mask) {
				continue;
			}
			let verdict = self.filter.volume(&volume);
			if verdict == FilterVerdict::Stop {
				return Ok(ImageWalkOutcome::Stopped);
			}
			let vol_obj_id = self.shared.db.add_volume(&volume, vs_obj_id).await?;
			debug!(vol_obj_id, slot = volume.slot_addr, "volume catalogued");
			if verdict == FilterVerdict::Skip {
				continue;
			}

			let byte_offset = volume.start_block * vs_info.block_size;
			match self.resolver.open_file_system(self.image, byte_offset) {
				Ok(source) => {
					let outcome = self.walk_file_system(source, vol_obj_id).await?;
					if outcome != ImageWalkOutcome::Completed {
						return Ok(outcome);
					}
				}
				Err(err) => {
					// Unallocated and meta volumes usually hold no file
					// system; only allocated volumes get an issue.
					if volume.flags.is_allocated() {
						self.shared.register_str(
							issue_kind(&err),
							format!("cannot open file system: {err}"),
							&format!("volume slot {}", volume.slot_addr),
						);
					} else {
						debug!(slot = volume.slot_addr, "no file system: {err}");
					}
				}
			}
		}
		Ok(ImageWalkOutcome::Completed)
	}

	async fn walk_bare_image(&mut self) -> Result<ImageWalkOutcome, IngestError> {
		match self.resolver.open_file_system(self.image, 0) {
			Ok(source) => self.walk_file_system(source, self.image_obj_id).await,
			Err(err) => {
				// Images with neither partition table nor file system are
				// legitimate; the unallocated sweep covers them wholesale.
				debug!("no file system on bare image: {err}");
				Ok(ImageWalkOutcome::Completed)
			}
		}
	}

	async fn walk_file_system(
		&mut self,
		source: Arc<dyn crate::readers::FileSystemSource>,
		parent_obj_id: i64,
	) -> Result<ImageWalkOutcome, IngestError> {
		let info = source.info();
		let verdict = self.filter.file_system(&info);
		if verdict == FilterVerdict::Stop {
			return Ok(ImageWalkOutcome::Stopped);
		}
		let fs_obj_id = self
			.shared
			.db
			.add_file_system(&info, parent_obj_id)
			.await?;
		info!(fs_obj_id, fs_type = ?info.fs_type, byte_offset = info.byte_offset, "file system catalogued");
		if verdict == FilterVerdict::Skip {
			return Ok(ImageWalkOutcome::Completed);
		}

		let fs = FsRun {
			obj_id: fs_obj_id,
			info,
			source,
		};

		// The root gets its row before the tree walk so that every later
		// entry can resolve a parent.
		self.processor.process_root(self.shared, &fs).await?;

		let flags = WalkFlags {
			no_orphan: fs.info.fs_type.is_fat() && self.shared.options.skip_fat_orphans,
			..WalkFlags::default()
		};
		let outcome = FsWalker::new(self.shared, &fs, self.processor, flags)
			.walk()
			.await?;
		Ok(match outcome {
			WalkOutcome::Completed => ImageWalkOutcome::Completed,
			WalkOutcome::Cancelled => ImageWalkOutcome::Cancelled,
		})
	}
}

fn issue_kind(err: &ReaderError) -> IssueKind {
	match err {
		ReaderError::Corrupt(_) => IssueKind::CorruptFs,
		ReaderError::Unsupported(_) => IssueKind::Unsupported,
		_ => IssueKind::ReadIo,
	}
}
