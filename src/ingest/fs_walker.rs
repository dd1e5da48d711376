//! Depth-first directory-tree walk
//!
//! Walks one file system with an explicit frame stack, handing every entry to
//! the [`FileProcessor`] with its containing directory's context. The
//! breadcrumb always names the directory of the entry currently being
//! processed: it is updated both when a directory is entered and when the
//! walk returns to its parent.

use std::collections::HashSet;

use tracing::debug;

use crate::domain::ORPHAN_DIR_NAME;
use crate::shared::path::{push_dir, sanitize_name, MAX_PARENT_PATH};

use super::context::{FsRun, IngestShared};
use super::error::{IngestError, IssueKind};
use super::file_processor::{DirContext, FileProcessor};

/// Deepest directory nesting the walker will follow.
const MAX_WALK_DEPTH: usize = 128;

/// Entry selection and traversal controls for one file-system walk.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WalkFlags {
	pub allocated: bool,
	pub unallocated: bool,
	pub recurse: bool,
	/// Skip the synthetic orphan directory (FAT).
	pub no_orphan: bool,
}

impl Default for WalkFlags {
	fn default() -> Self {
		Self {
			allocated: true,
			unallocated: true,
			recurse: true,
			no_orphan: false,
		}
	}
}

/// How a walk ended. Cancellation is control flow, not an error: nothing is
/// rolled back here, the driver decides commit versus revert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WalkOutcome {
	Completed,
	Cancelled,
}

struct Frame {
	entries: Vec<crate::readers::FsEntry>,
	next: usize,
	dir: DirContext,
}

pub(crate) struct FsWalker<'a> {
	shared: &'a IngestShared,
	fs: &'a FsRun,
	processor: &'a mut FileProcessor,
	flags: WalkFlags,
}

impl<'a> FsWalker<'a> {
	pub fn new(
		shared: &'a IngestShared,
		fs: &'a FsRun,
		processor: &'a mut FileProcessor,
		flags: WalkFlags,
	) -> Self {
		Self {
			shared,
			fs,
			processor,
			flags,
		}
	}

	/// Walk the whole tree. The root directory's own row must already exist
	/// (see [`FileProcessor::process_root`]).
	pub async fn walk(&mut self) -> Result<WalkOutcome, IngestError> {
		let root = self.fs.source.root_entry()?;
		let root_addr = root.meta_addr;

		let root_entries = match self.fs.source.read_dir(root_addr) {
			Ok(entries) => entries,
			Err(err) => {
				self.shared.register_str(
					IssueKind::CorruptFs,
					format!("cannot read root directory: {err}"),
					"/",
				);
				return Ok(WalkOutcome::Completed);
			}
		};

		let mut visited: HashSet<u64> = HashSet::from([root_addr]);
		let mut stack = vec![Frame {
			entries: root_entries,
			next: 0,
			dir: DirContext {
				meta_addr: root_addr,
				parent_meta_addr: root_addr,
				sequence: root.sequence,
				path: "/".to_string(),
			},
		}];
		self.shared.set_current_dir("/");

		while !stack.is_empty() {
			let frame_done = {
				let frame = stack.last().expect("stack checked non-empty");
				frame.next >= frame.entries.len()
			};
			if frame_done {
				stack.pop();
				// Returning to the parent: the breadcrumb follows.
				if let Some(parent) = stack.last() {
					self.shared.set_current_dir(&parent.dir.path);
				}
				continue;
			}
			let (entry, dir) = {
				let frame = stack.last_mut().expect("stack checked non-empty");
				let entry = frame.entries[frame.next].clone();
				frame.next += 1;
				(entry, frame.dir.clone())
			};

			if self.shared.cancelled() {
				debug!(fs = self.fs.obj_id, "walk cancelled");
				return Ok(WalkOutcome::Cancelled);
			}

			if entry.name_flags.is_allocated() && !self.flags.allocated {
				continue;
			}
			if entry.name_flags.is_unallocated() && !self.flags.unallocated {
				continue;
			}

			let obj_id = self
				.processor
				.process_entry(self.shared, self.fs, &entry, &dir)
				.await?;

			if obj_id.is_none() || entry.is_dot() || !entry.is_dir() || !self.flags.recurse {
				continue;
			}

			let name = sanitize_name(&entry.name);
			if self.flags.no_orphan && dir.meta_addr == root_addr && name == ORPHAN_DIR_NAME {
				debug!(fs = self.fs.obj_id, "orphan directory skipped");
				continue;
			}

			let path = push_dir(&dir.path, &name);
			if path.len() > MAX_PARENT_PATH {
				self.shared.register_str(
					IssueKind::General,
					format!("path exceeds {MAX_PARENT_PATH} characters, subtree skipped"),
					&path,
				);
				continue;
			}
			if !visited.insert(entry.meta_addr) {
				self.shared.register_str(
					IssueKind::CorruptFs,
					format!("directory loop at meta {}", entry.meta_addr),
					&path,
				);
				continue;
			}
			if stack.len() >= MAX_WALK_DEPTH {
				self.shared.register_str(
					IssueKind::CorruptFs,
					format!("directory nesting exceeds {MAX_WALK_DEPTH} levels"),
					&path,
				);
				continue;
			}

			match self.fs.source.read_dir(entry.meta_addr) {
				Ok(entries) => {
					self.shared.set_current_dir(&path);
					stack.push(Frame {
						entries,
						next: 0,
						dir: DirContext {
							meta_addr: entry.meta_addr,
							parent_meta_addr: dir.meta_addr,
							sequence: entry.sequence,
							path,
						},
					});
				}
				Err(err) => {
					self.shared.register_str(
						IssueKind::CorruptFs,
						format!("cannot read directory: {err}"),
						&path,
					);
				}
			}
		}

		Ok(WalkOutcome::Completed)
	}
}
