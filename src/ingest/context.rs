//! State shared across one ingest run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::domain::FsInfo;
use crate::infrastructure::database::CaseDatabase;
use crate::known::KnownFileOracle;
use crate::readers::FileSystemSource;

use super::error::{IngestIssue, IssueKind};
use super::options::IngestOptions;

/// Everything the walkers, processor, and coalescer need from the driver.
///
/// Mutable pieces follow the engine's concurrency model: the issue list and
/// breadcrumb are guarded by locks never held across database calls; the
/// cancel flag is an atomic read from any thread.
pub(crate) struct IngestShared {
	pub db: Arc<dyn CaseDatabase>,
	pub options: IngestOptions,
	pub known: Option<Arc<dyn KnownFileOracle>>,
	pub known_bad: Option<Arc<dyn KnownFileOracle>>,
	pub cancel: Arc<AtomicBool>,
	pub issues: Mutex<Vec<IngestIssue>>,
	/// Human-readable breadcrumb of the directory currently being processed.
	pub current_dir: Arc<Mutex<String>>,
}

impl IngestShared {
	pub fn cancelled(&self) -> bool {
		self.cancel.load(Ordering::Relaxed)
	}

	pub fn register(&self, issue: IngestIssue) {
		warn!(
			kind = ?issue.kind,
			context = issue.context.as_deref().unwrap_or(""),
			"{}",
			issue.message
		);
		self.issues
			.lock()
			.expect("issue list lock poisoned")
			.push(issue);
	}

	pub fn register_str(&self, kind: IssueKind, message: impl Into<String>, context: &str) {
		self.register(IngestIssue::new(kind, message).with_context(context));
	}

	pub fn has_issues(&self) -> bool {
		!self
			.issues
			.lock()
			.expect("issue list lock poisoned")
			.is_empty()
	}

	pub fn issues_snapshot(&self) -> Vec<IngestIssue> {
		self.issues
			.lock()
			.expect("issue list lock poisoned")
			.clone()
	}

	pub fn set_current_dir(&self, path: &str) {
		let mut dir = self
			.current_dir
			.lock()
			.expect("current dir lock poisoned");
		dir.clear();
		dir.push_str(path);
	}
}

/// One file system as it is being walked: its catalogue id, decoded info, and
/// the decoder handle.
pub(crate) struct FsRun {
	pub obj_id: i64,
	pub info: FsInfo,
	pub source: Arc<dyn FileSystemSource>,
}
