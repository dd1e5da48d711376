//! Ingest driver
//!
//! Runs one image ingest inside a savepoint named [`SAVEPOINT_NAME`]. The
//! driver opens the image, writes the image row, runs the walkers and the
//! unallocated sweep, and leaves the commit-or-revert decision to the caller.
//! Fatal failures register an issue and revert internally; the driver object
//! stays usable so the caller can inspect the issue list.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ImageFormat, VolumeFlags};
use crate::infrastructure::database::{CaseDatabase, ImageRowData};
use crate::known::KnownFileOracle;
use crate::readers::{ImageSource, ReaderError, SourceResolver};

use super::context::IngestShared;
use super::error::{IngestError, IngestIssue, IssueKind};
use super::file_processor::FileProcessor;
use super::fs_walker::WalkOutcome;
use super::image_walker::{ImageWalkOutcome, ImageWalker, NoFilter, WalkFilter};
use super::options::IngestOptions;
use super::unalloc::UnallocCoalescer;
use super::IngestStatus;

/// Name of the one savepoint an ingest runs under.
pub const SAVEPOINT_NAME: &str = "ADDIMAGE";

/// Clonable handle for requesting cancellation from an observer thread.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

pub struct IngestDriver {
	db: Arc<dyn CaseDatabase>,
	resolver: Arc<dyn SourceResolver>,
	known: Option<Arc<dyn KnownFileOracle>>,
	known_bad: Option<Arc<dyn KnownFileOracle>>,
	options: IngestOptions,
	filter: Arc<dyn WalkFilter>,
	volume_mask: VolumeFlags,
	cancel: Arc<AtomicBool>,
	current_dir: Arc<Mutex<String>>,
	shared: Option<Arc<IngestShared>>,
	/// Name of the open savepoint; the backend holds the authoritative
	/// transaction state.
	active_savepoint: Option<&'static str>,
	image_obj_id: Option<i64>,
}

impl IngestDriver {
	pub(crate) fn new(
		db: Arc<dyn CaseDatabase>,
		resolver: Arc<dyn SourceResolver>,
		known: Option<Arc<dyn KnownFileOracle>>,
		known_bad: Option<Arc<dyn KnownFileOracle>>,
	) -> Self {
		Self {
			db,
			resolver,
			known,
			known_bad,
			options: IngestOptions::default(),
			filter: Arc::new(NoFilter),
			// Unallocated volumes stay visible so the sweep can cover them.
			volume_mask: VolumeFlags::ALLOCATED.union(VolumeFlags::UNALLOCATED),
			cancel: Arc::new(AtomicBool::new(false)),
			current_dir: Arc::new(Mutex::new(String::new())),
			shared: None,
			active_savepoint: None,
			image_obj_id: None,
		}
	}

	/// Set the options for the next `start`. Rejected while an ingest is
	/// open.
	pub fn configure(&mut self, options: IngestOptions) -> Result<(), IngestError> {
		if self.active_savepoint.is_some() {
			return Err(IngestError::Argument(
				"cannot reconfigure while an ingest is open".into(),
			));
		}
		self.options = options;
		Ok(())
	}

	/// Install custom per-level filter hooks.
	pub fn set_walk_filter(&mut self, filter: Arc<dyn WalkFilter>) {
		self.filter = filter;
	}

	/// Restrict which volumes are visited. Defaults to allocated plus
	/// unallocated.
	pub fn set_volume_mask(&mut self, mask: VolumeFlags) {
		self.volume_mask = mask;
	}

	/// Request a cooperative stop. Checked before each file and at the sweep
	/// boundaries; not immediate.
	pub fn cancel(&self) {
		self.cancel.store(true, Ordering::Relaxed);
	}

	/// Handle for requesting cancellation while `start` is running.
	pub fn cancel_handle(&self) -> CancelHandle {
		CancelHandle(self.cancel.clone())
	}

	/// Breadcrumb of the directory currently being processed. Safe to read
	/// from an observer thread.
	pub fn current_directory(&self) -> String {
		self.current_dir
			.lock()
			.expect("current dir lock poisoned")
			.clone()
	}

	/// Stable-order copy of the registered recoverable errors.
	pub fn error_list(&self) -> Vec<IngestIssue> {
		self.shared
			.as_ref()
			.map(|s| s.issues_snapshot())
			.unwrap_or_default()
	}

	/// Object id of the ingested image; present once `start` has written the
	/// image row.
	pub fn image_id(&self) -> Option<i64> {
		self.image_obj_id
	}

	/// Catalogue one image. See the module docs for the envelope protocol.
	pub async fn start(
		&mut self,
		parts: &[PathBuf],
		format: ImageFormat,
		sector_size: u32,
	) -> Result<IngestStatus, IngestError> {
		if self.active_savepoint.is_some() {
			return Err(IngestError::Argument(
				"an ingest is already open; commit or revert first".into(),
			));
		}
		if self.db.in_transaction() {
			return Err(IngestError::Transaction(
				"an outer transaction is already open".into(),
			));
		}
		if parts.is_empty() {
			return Err(IngestError::Argument("no image parts given".into()));
		}

		let mut options = self.options.clone();
		// Attached oracles are useless without hashes.
		if self.known.is_some() || self.known_bad.is_some() {
			options.hash_files = true;
		}

		let shared = Arc::new(IngestShared {
			db: self.db.clone(),
			options,
			known: self.known.clone(),
			known_bad: self.known_bad.clone(),
			cancel: self.cancel.clone(),
			issues: Mutex::new(Vec::new()),
			current_dir: self.current_dir.clone(),
		});
		self.shared = Some(shared.clone());

		self.db.savepoint_create(SAVEPOINT_NAME).await?;
		self.active_savepoint = Some(SAVEPOINT_NAME);
		info!(savepoint = SAVEPOINT_NAME, "ingest transaction opened");

		let image = match self.resolver.open_image(parts, format, sector_size) {
			Ok(image) => image,
			Err(err) => {
				let kind = match err {
					ReaderError::Unsupported(_) => IssueKind::Unsupported,
					_ => IssueKind::ReadIo,
				};
				return self
					.fail_critical(&shared, kind, format!("cannot open image: {err}"))
					.await;
			}
		};
		let image: Arc<dyn ImageSource> = match &shared.options.image_writer_path {
			Some(path) => match TeeImageSource::new(image, path, shared.clone()) {
				Ok(tee) => Arc::new(tee),
				Err(err) => {
					return self
						.fail_critical(
							&shared,
							IssueKind::ReadIo,
							format!("cannot open image writer target: {err}"),
						)
						.await;
				}
			},
			None => image,
		};

		let row = ImageRowData {
			format: image.format(),
			sector_size: i64::from(image.sector_size()),
			size: image.size(),
			timezone: shared.options.timezone.clone(),
			md5: None,
			device_id: Some(
				shared
					.options
					.device_id
					.clone()
					.unwrap_or_else(|| Uuid::new_v4().to_string()),
			),
		};
		let image_obj_id = match self.db.add_image(&row).await {
			Ok(id) => id,
			Err(err) => {
				return self
					.fail_critical(
						&shared,
						IssueKind::General,
						format!("cannot write image row: {err}"),
					)
					.await;
			}
		};
		for (sequence, part) in image.parts().iter().enumerate() {
			let written = self
				.db
				.add_image_name(image_obj_id, &part.display().to_string(), sequence as i64)
				.await;
			if let Err(err) = written {
				return self
					.fail_critical(
						&shared,
						IssueKind::General,
						format!("cannot write image part name: {err}"),
					)
					.await;
			}
		}
		self.image_obj_id = Some(image_obj_id);
		info!(image_obj_id, size = image.size(), "image row catalogued");

		let mut cancelled = false;
		if shared.options.add_file_systems {
			let resolver = self.resolver.clone();
			let filter = self.filter.clone();
			let volume_mask = self.volume_mask;
			let outcome = {
				let mut processor = FileProcessor::new();
				let mut walker = ImageWalker::new(
					&shared,
					&resolver,
					&image,
					image_obj_id,
					volume_mask,
					filter.as_ref(),
					&mut processor,
				);
				walker.walk().await
			};
			match outcome {
				Ok(ImageWalkOutcome::Completed) | Ok(ImageWalkOutcome::Stopped) => {}
				Ok(ImageWalkOutcome::Cancelled) => cancelled = true,
				Err(err) => {
					return self
						.fail_critical(&shared, IssueKind::General, err.to_string())
						.await;
				}
			}
		}

		if shared.options.record_unallocated && !cancelled {
			let resolver = self.resolver.clone();
			let outcome = {
				let coalescer =
					UnallocCoalescer::new(&shared, &resolver, &image, image_obj_id);
				coalescer.run().await
			};
			match outcome {
				Ok(WalkOutcome::Completed) => {}
				Ok(WalkOutcome::Cancelled) => cancelled = true,
				Err(err) => {
					return self
						.fail_critical(&shared, IssueKind::General, err.to_string())
						.await;
				}
			}
		}

		if cancelled {
			info!(image_obj_id, "ingest stopped on cancellation request");
		}
		Ok(if shared.has_issues() {
			IngestStatus::RecoverableErrors
		} else {
			IngestStatus::Ok
		})
	}

	/// Release the savepoint; the image and everything under it becomes
	/// permanent. Returns the image object id.
	pub async fn commit(&mut self) -> Result<i64, IngestError> {
		let Some(name) = self.active_savepoint else {
			return Err(IngestError::NotOpen("no ingest transaction open".into()));
		};
		let image_obj_id = self
			.image_obj_id
			.ok_or_else(|| IngestError::NotOpen("no image was catalogued".into()))?;
		self.db.savepoint_release(name).await?;
		self.active_savepoint = None;
		info!(image_obj_id, "ingest committed");
		Ok(image_obj_id)
	}

	/// Roll the savepoint back; the image row and everything under it
	/// disappear.
	pub async fn revert(&mut self) -> Result<(), IngestError> {
		let Some(name) = self.active_savepoint else {
			return Err(IngestError::NotOpen("no ingest transaction open".into()));
		};
		self.db.savepoint_revert(name).await?;
		self.active_savepoint = None;
		self.image_obj_id = None;
		info!("ingest reverted");
		Ok(())
	}

	/// Register the fatal condition, revert internally, and report a critical
	/// status. The driver stays open so the caller can read the issue list.
	async fn fail_critical(
		&mut self,
		shared: &IngestShared,
		kind: IssueKind,
		message: String,
	) -> Result<IngestStatus, IngestError> {
		shared.register(IngestIssue::new(kind, message));
		if let Some(name) = self.active_savepoint.take() {
			if let Err(err) = self.db.savepoint_revert(name).await {
				warn!("revert after critical failure also failed: {err}");
			}
		}
		self.image_obj_id = None;
		Ok(IngestStatus::CriticalError)
	}
}

impl Drop for IngestDriver {
	fn drop(&mut self) {
		// A dropped driver with an open transaction implicitly reverts.
		if let Some(name) = self.active_savepoint.take() {
			let db = self.db.clone();
			match tokio::runtime::Handle::try_current() {
				Ok(handle) => {
					handle.spawn(async move {
						if let Err(err) = db.savepoint_revert(name).await {
							warn!("implicit revert on drop failed: {err}");
						}
					});
				}
				Err(_) => {
					warn!("ingest driver dropped with open savepoint outside a runtime");
				}
			}
		}
	}
}

/// Image source that duplicates every read into a cache copy on disk.
///
/// Write failures are registered once and disable the copy; they never fail
/// the ingest.
struct TeeImageSource {
	inner: Arc<dyn ImageSource>,
	writer: Mutex<Option<File>>,
	shared: Arc<IngestShared>,
	target: PathBuf,
}

impl TeeImageSource {
	fn new(
		inner: Arc<dyn ImageSource>,
		path: &std::path::Path,
		shared: Arc<IngestShared>,
	) -> std::io::Result<Self> {
		let file = OpenOptions::new()
			.create(true)
			.write(true)
			.truncate(true)
			.open(path)?;
		file.set_len(inner.size().max(0) as u64)?;
		Ok(Self {
			inner,
			writer: Mutex::new(Some(file)),
			shared,
			target: path.to_path_buf(),
		})
	}
}

impl ImageSource for TeeImageSource {
	fn format(&self) -> ImageFormat {
		self.inner.format()
	}

	fn sector_size(&self) -> u32 {
		self.inner.sector_size()
	}

	fn size(&self) -> i64 {
		self.inner.size()
	}

	fn parts(&self) -> Vec<PathBuf> {
		self.inner.parts()
	}

	fn read_at(&self, offset: i64, buf: &mut [u8]) -> Result<usize, ReaderError> {
		let n = self.inner.read_at(offset, buf)?;
		let mut guard = self.writer.lock().expect("image writer lock poisoned");
		if let Some(file) = guard.as_mut() {
			let written = file
				.seek(SeekFrom::Start(offset as u64))
				.and_then(|_| file.write_all(&buf[..n]));
			if let Err(err) = written {
				self.shared.register_str(
					IssueKind::ReadIo,
					format!("image cache copy failed, copy disabled: {err}"),
					&self.target.display().to_string(),
				);
				*guard = None;
			}
		}
		Ok(n)
	}
}
