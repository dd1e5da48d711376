//! Unallocated-space sweep
//!
//! After the tree walk, unallocated blocks of every file system are grouped
//! into virtual files under a `$Unalloc` directory, volumes without a file
//! system become one virtual file each, and an image with neither volume
//! system nor file system is covered wholesale. Chunk sizes follow the
//! min/max policy from the ingest options.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::LayoutRange;
use crate::readers::{ImageSource, SourceResolver};

use super::context::IngestShared;
use super::error::{IngestError, IssueKind};
use super::fs_walker::WalkOutcome;

/// Accumulation bounds for one sweep. Negative `min_bytes` emits one file per
/// contiguous run; zero accumulates everything into a single file; positive
/// keeps accumulating until the total reaches the bound. Negative `max_bytes`
/// means unbounded.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChunkPolicy {
	pub min_bytes: i64,
	pub max_bytes: i64,
}

/// Groups ascending block addresses into chunks of contiguous runs.
///
/// Pure accumulator: `push` every unallocated block in address order, then
/// `finish`. Each returned chunk is a list of `(start_block, block_count)`
/// runs that one virtual file will cover.
pub(crate) struct RunCoalescer {
	policy: ChunkPolicy,
	block_size: i64,
	run_start: Option<i64>,
	run_len: i64,
	prev_block: i64,
	pending: Vec<(i64, i64)>,
	acc_bytes: i64,
	chunks: Vec<Vec<(i64, i64)>>,
}

impl RunCoalescer {
	pub fn new(policy: ChunkPolicy, block_size: i64) -> Self {
		Self {
			policy,
			block_size,
			run_start: None,
			run_len: 0,
			prev_block: -1,
			pending: Vec::new(),
			acc_bytes: 0,
			chunks: Vec::new(),
		}
	}

	pub fn push(&mut self, block: i64) {
		match self.run_start {
			None => self.open_run(block),
			Some(_) => {
				let consecutive = block == self.prev_block + 1;
				let below_max =
					self.policy.max_bytes < 0 || self.acc_bytes < self.policy.max_bytes;
				if consecutive && below_max {
					self.run_len += 1;
					self.acc_bytes += self.block_size;
					self.prev_block = block;
				} else {
					self.close_run();
					self.maybe_emit();
					self.open_run(block);
				}
			}
		}
	}

	pub fn finish(mut self) -> Vec<Vec<(i64, i64)>> {
		if self.run_start.is_some() {
			self.close_run();
		}
		if !self.pending.is_empty() {
			self.emit();
		}
		self.chunks
	}

	fn open_run(&mut self, block: i64) {
		self.run_start = Some(block);
		self.run_len = 1;
		self.acc_bytes += self.block_size;
		self.prev_block = block;
	}

	fn close_run(&mut self) {
		if let Some(start) = self.run_start.take() {
			self.pending.push((start, self.run_len));
			self.run_len = 0;
		}
	}

	fn maybe_emit(&mut self) {
		let ChunkPolicy {
			min_bytes,
			max_bytes,
		} = self.policy;
		let reached_max = max_bytes >= 0 && self.acc_bytes >= max_bytes;
		let reached_min = min_bytes < 0 || (min_bytes > 0 && self.acc_bytes >= min_bytes);
		if reached_max || (min_bytes != 0 && reached_min) {
			self.emit();
		}
	}

	fn emit(&mut self) {
		self.chunks.push(std::mem::take(&mut self.pending));
		self.acc_bytes = 0;
	}
}

/// Ranges within one pending set must never overlap; an overlap means the
/// block iterator lied and the emit is rejected.
fn ranges_overlap(ranges: &[LayoutRange]) -> bool {
	let mut sorted: Vec<_> = ranges.iter().collect();
	sorted.sort_by_key(|r| r.byte_start);
	sorted
		.windows(2)
		.any(|w| w[0].byte_start + w[0].byte_len > w[1].byte_start)
}

pub(crate) struct UnallocCoalescer<'a> {
	shared: &'a IngestShared,
	resolver: &'a Arc<dyn SourceResolver>,
	image: &'a Arc<dyn ImageSource>,
	image_obj_id: i64,
}

impl<'a> UnallocCoalescer<'a> {
	pub fn new(
		shared: &'a IngestShared,
		resolver: &'a Arc<dyn SourceResolver>,
		image: &'a Arc<dyn ImageSource>,
		image_obj_id: i64,
	) -> Self {
		Self {
			shared,
			resolver,
			image,
			image_obj_id,
		}
	}

	fn policy(&self) -> ChunkPolicy {
		ChunkPolicy {
			min_bytes: self.shared.options.min_chunk_bytes,
			max_bytes: self.shared.options.max_chunk_bytes,
		}
	}

	pub async fn run(&self) -> Result<WalkOutcome, IngestError> {
		let fs_rows = self.shared.db.get_fs_infos(self.image_obj_id).await?;
		let mut fs_parents: HashSet<i64> = HashSet::new();

		for fs_row in &fs_rows {
			if self.shared.cancelled() {
				return Ok(WalkOutcome::Cancelled);
			}
			let obj = self.shared.db.get_object(fs_row.obj_id).await?;
			if let Some(parent) = obj.parent_id {
				fs_parents.insert(parent);
			}
			self.sweep_file_system(fs_row).await?;
		}

		let volumes = self.shared.db.get_volumes(self.image_obj_id).await?;
		for volume in &volumes {
			if self.shared.cancelled() {
				return Ok(WalkOutcome::Cancelled);
			}
			self.sweep_volume(volume, &fs_parents).await?;
		}

		if fs_rows.is_empty() && volumes.is_empty() {
			let size = self.image.size();
			if size > 0 {
				let ranges = [LayoutRange {
					byte_start: 0,
					byte_len: size,
					sequence: 0,
				}];
				self.shared
					.db
					.add_unalloc_block_file(self.image_obj_id, None, size, &ranges)
					.await?;
				info!(size, "image-wide unallocated file catalogued");
			}
		}

		Ok(WalkOutcome::Completed)
	}

	async fn sweep_file_system(
		&self,
		fs_row: &crate::infrastructure::database::FsCatalogRow,
	) -> Result<(), IngestError> {
		let source = match self
			.resolver
			.open_file_system(self.image, fs_row.info.byte_offset)
		{
			Ok(source) => source,
			Err(err) => {
				self.shared.register_str(
					IssueKind::General,
					format!("cannot reopen file system for unallocated sweep: {err}"),
					&format!("fs {}", fs_row.obj_id),
				);
				return Ok(());
			}
		};

		// A file system catalogued without its tree (filter skip) has no root
		// directory to hang $Unalloc off; skip it rather than fail the ingest.
		let unalloc_parent = match self.shared.db.add_unalloc_parent(fs_row.obj_id).await {
			Ok(id) => id,
			Err(crate::infrastructure::database::DbError::NotFound(_)) => {
				self.shared.register_str(
					IssueKind::General,
					"file system has no root directory, unallocated sweep skipped",
					&format!("fs {}", fs_row.obj_id),
				);
				return Ok(());
			}
			Err(err) => return Err(err.into()),
		};

		let mut coalescer = RunCoalescer::new(self.policy(), fs_row.info.block_size);
		match source.unallocated_blocks() {
			Ok(blocks) => {
				for block in blocks {
					coalescer.push(block);
				}
			}
			Err(err) => {
				self.shared.register_str(
					IssueKind::ReadIo,
					format!("cannot walk unallocated blocks: {err}"),
					&format!("fs {}", fs_row.obj_id),
				);
				return Ok(());
			}
		}

		let mut emitted = 0usize;
		for chunk in coalescer.finish() {
			let ranges: Vec<LayoutRange> = chunk
				.iter()
				.enumerate()
				.map(|(idx, &(start, len))| LayoutRange {
					byte_start: fs_row.info.block_to_byte(start),
					byte_len: len * fs_row.info.block_size,
					sequence: idx as i64,
				})
				.collect();
			if ranges_overlap(&ranges) {
				self.shared.register_str(
					IssueKind::General,
					"overlapping unallocated ranges, chunk rejected",
					&format!("fs {}", fs_row.obj_id),
				);
				continue;
			}
			let size: i64 = ranges.iter().map(|r| r.byte_len).sum();
			self.shared
				.db
				.add_unalloc_block_file(unalloc_parent, Some(fs_row.obj_id), size, &ranges)
				.await?;
			emitted += 1;
		}
		debug!(fs = fs_row.obj_id, files = emitted, "unallocated sweep done");
		Ok(())
	}

	/// Volumes flagged unallocated or meta, and allocated volumes that hold
	/// no file system, become one virtual file each.
	async fn sweep_volume(
		&self,
		volume: &crate::infrastructure::database::VolumeCatalogRow,
		fs_parents: &HashSet<i64>,
	) -> Result<(), IngestError> {
		use crate::domain::VolumeFlags;

		let flags = volume.info.flags;
		let bare_allocated = flags.is_allocated() && !fs_parents.contains(&volume.obj_id);
		let covered = flags.contains(VolumeFlags::UNALLOCATED)
			|| flags.contains(VolumeFlags::META)
			|| bare_allocated;
		if !covered {
			return Ok(());
		}

		let obj = self.shared.db.get_object(volume.obj_id).await?;
		let vs_obj_id = obj.parent_id.ok_or_else(|| {
			IngestError::CorruptFs(format!("volume {} has no parent", volume.obj_id))
		})?;
		let vs = self.shared.db.get_volume_system(vs_obj_id).await?;

		let byte_start = volume.info.start_block * vs.info.block_size;
		let byte_len = volume.info.length_blocks * vs.info.block_size;
		if byte_len <= 0 {
			return Ok(());
		}
		let ranges = [LayoutRange {
			byte_start,
			byte_len,
			sequence: 0,
		}];
		self.shared
			.db
			.add_unalloc_block_file(volume.obj_id, None, byte_len, &ranges)
			.await?;
		debug!(volume = volume.obj_id, byte_len, "volume unallocated file catalogued");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const KIB: i64 = 1024;

	/// Feed runs of `(start_block, len)` with gaps between them.
	fn feed(coalescer: &mut RunCoalescer, runs: &[(i64, i64)]) {
		for &(start, len) in runs {
			for block in start..start + len {
				coalescer.push(block);
			}
		}
	}

	#[test]
	fn min_zero_accumulates_everything() {
		let mut c = RunCoalescer::new(
			ChunkPolicy { min_bytes: 0, max_bytes: -1 },
			4 * KIB,
		);
		feed(&mut c, &[(0, 1), (10, 2), (20, 1)]);
		let chunks = c.finish();
		assert_eq!(chunks, vec![vec![(0, 1), (10, 2), (20, 1)]]);
	}

	#[test]
	fn negative_min_emits_per_run() {
		let mut c = RunCoalescer::new(
			ChunkPolicy { min_bytes: -1, max_bytes: -1 },
			4 * KIB,
		);
		feed(&mut c, &[(0, 1), (10, 2), (20, 1)]);
		let chunks = c.finish();
		assert_eq!(chunks.len(), 3);
		assert_eq!(chunks[1], vec![(10, 2)]);
	}

	#[test]
	fn greedy_accumulation_matches_chunking_scenario() {
		// Ten runs of 4, 8, 4, 16, 4, 4, 32, 4, 4, 4 KiB with 16 KiB minimum:
		// runs 1-3 reach the minimum, run 4 alone reaches it, runs 5-7 pass it
		// at run 7, and the 12 KiB tail flushes at the end. Four files.
		let mut c = RunCoalescer::new(
			ChunkPolicy { min_bytes: 16 * KIB, max_bytes: -1 },
			4 * KIB,
		);
		let runs: Vec<(i64, i64)> = [1i64, 2, 1, 4, 1, 1, 8, 1, 1, 1]
			.iter()
			.scan(0i64, |next_start, &len| {
				let run = (*next_start, len);
				*next_start += len + 5;
				Some(run)
			})
			.collect();
		feed(&mut c, &runs);
		let chunks = c.finish();
		assert_eq!(chunks.len(), 4);
		assert_eq!(chunks[0], vec![runs[0], runs[1], runs[2]]);
		assert_eq!(chunks[1], vec![runs[3]]);
		assert_eq!(chunks[2], vec![runs[4], runs[5], runs[6]]);
		assert_eq!(chunks[3], vec![runs[7], runs[8], runs[9]]);
	}

	#[test]
	fn max_bound_splits_contiguous_run() {
		let mut c = RunCoalescer::new(
			ChunkPolicy { min_bytes: 0, max_bytes: 8 * KIB },
			4 * KIB,
		);
		feed(&mut c, &[(0, 5)]);
		let chunks = c.finish();
		// 5 consecutive blocks under an 8 KiB cap: 2 + 2 + 1.
		assert_eq!(chunks, vec![vec![(0, 2)], vec![(2, 2)], vec![(4, 1)]]);
	}

	#[test]
	fn overlap_detection() {
		let a = LayoutRange { byte_start: 0, byte_len: 100, sequence: 0 };
		let b = LayoutRange { byte_start: 50, byte_len: 10, sequence: 1 };
		let c = LayoutRange { byte_start: 100, byte_len: 10, sequence: 1 };
		assert!(ranges_overlap(&[a, b]));
		assert!(!ranges_overlap(&[a, c]));
	}
}
