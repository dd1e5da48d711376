//! Ingest error taxonomy
//!
//! Fatal conditions travel as [`IngestError`]; per-file conditions are
//! registered as [`IngestIssue`]s on the driver and the walk continues.
//! Cancellation is a control outcome and deliberately not represented here.

use thiserror::Error;

use crate::infrastructure::database::DbError;
use crate::readers::ReaderError;

#[derive(Debug, Error)]
pub enum IngestError {
	#[error("invalid argument: {0}")]
	Argument(String),

	#[error("not open: {0}")]
	NotOpen(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("image read failed: {0}")]
	ReadIo(String),

	#[error("schema version {found} does not match expected {expected}")]
	SchemaMismatch { found: i32, expected: i32 },

	#[error("undecodable byte sequence: {0}")]
	Unicode(String),

	#[error("corrupt file-system structure: {0}")]
	CorruptFs(String),

	/// Savepoint or commit problem; always fatal.
	#[error("transaction failure: {0}")]
	Transaction(String),

	#[error("unsupported: {0}")]
	Unsupported(String),

	#[error("database error: {0}")]
	Database(DbError),
}

impl From<DbError> for IngestError {
	fn from(err: DbError) -> Self {
		match err {
			DbError::Unsupported(msg) => IngestError::Unsupported(msg),
			DbError::Transaction(msg) => IngestError::Transaction(msg),
			other => IngestError::Database(other),
		}
	}
}

impl From<ReaderError> for IngestError {
	fn from(err: ReaderError) -> Self {
		match err {
			ReaderError::Unsupported(msg) => IngestError::Unsupported(msg),
			ReaderError::Corrupt(msg) => IngestError::CorruptFs(msg),
			other => IngestError::ReadIo(other.to_string()),
		}
	}
}

/// Kind tag on a registered per-file issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueKind {
	ReadIo,
	Unicode,
	CorruptFs,
	Unsupported,
	General,
}

/// One recoverable error registered during an ingest.
#[derive(Clone, Debug)]
pub struct IngestIssue {
	pub kind: IssueKind,
	pub message: String,
	/// Usually the path or object the error applies to.
	pub context: Option<String>,
}

impl IngestIssue {
	pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			context: None,
		}
	}

	pub fn with_context(mut self, context: impl Into<String>) -> Self {
		self.context = Some(context.into());
		self
	}
}
