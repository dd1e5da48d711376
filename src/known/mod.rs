//! Known-file oracles
//!
//! An oracle maps a content hash to a known / known-bad classification. The
//! engine only consults oracles through [`KnownFileOracle`]; the bundled
//! implementation reads a plain text index of lowercase hex MD5 digests, one
//! per line, as produced by the usual hash-set export tools.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

/// Outcome of a quick oracle lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupOutcome {
	Unknown,
	Hit,
}

/// Read-only hash lookup service. Implementations must be safe to share
/// across concurrent ingests.
pub trait KnownFileOracle: Send + Sync {
	/// Membership test for an MD5 digest.
	fn quick_lookup(&self, md5: &[u8; 16]) -> LookupOutcome;

	/// Where this oracle was loaded from, for diagnostics.
	fn source(&self) -> &Path;
}

#[derive(Debug, Error)]
pub enum OracleError {
	#[error("I/O error reading hash index: {0}")]
	Io(#[from] std::io::Error),

	#[error("line {line}: not a 32-char hex MD5: {text:?}")]
	BadDigest { line: usize, text: String },
}

/// In-memory oracle backed by a text file of hex digests.
pub struct TextIndexOracle {
	path: PathBuf,
	digests: HashSet<[u8; 16]>,
}

impl TextIndexOracle {
	pub fn load(path: &Path) -> Result<Self, OracleError> {
		let reader = BufReader::new(File::open(path)?);
		let mut digests = HashSet::new();
		for (idx, line) in reader.lines().enumerate() {
			let line = line?;
			let text = line.trim();
			// Tolerate comments and blank lines; some exports carry headers.
			if text.is_empty() || text.starts_with('#') {
				continue;
			}
			// Only the first field matters when the export is columnar.
			let field = text.split([',', '\t', ' ']).next().unwrap_or(text);
			let mut digest = [0u8; 16];
			hex::decode_to_slice(field.to_ascii_lowercase(), &mut digest).map_err(|_| {
				OracleError::BadDigest {
					line: idx + 1,
					text: field.to_string(),
				}
			})?;
			digests.insert(digest);
		}
		info!(path = %path.display(), entries = digests.len(), "loaded hash index");
		Ok(Self {
			path: path.to_path_buf(),
			digests,
		})
	}

	pub fn len(&self) -> usize {
		self.digests.len()
	}

	pub fn is_empty(&self) -> bool {
		self.digests.is_empty()
	}
}

impl KnownFileOracle for TextIndexOracle {
	fn quick_lookup(&self, md5: &[u8; 16]) -> LookupOutcome {
		if self.digests.contains(md5) {
			LookupOutcome::Hit
		} else {
			LookupOutcome::Unknown
		}
	}

	fn source(&self) -> &Path {
		&self.path
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn loads_and_looks_up() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("known.idx");
		let mut f = std::fs::File::create(&path).unwrap();
		writeln!(f, "# header").unwrap();
		writeln!(f, "6f5902ac237024bdd0c176cb93063dc4").unwrap();
		writeln!(f, "D41D8CD98F00B204E9800998ECF8427E,empty").unwrap();
		writeln!(f).unwrap();

		let oracle = TextIndexOracle::load(&path).unwrap();
		assert_eq!(oracle.len(), 2);

		let mut hit = [0u8; 16];
		hex::decode_to_slice("6f5902ac237024bdd0c176cb93063dc4", &mut hit).unwrap();
		assert_eq!(oracle.quick_lookup(&hit), LookupOutcome::Hit);

		let miss = [0u8; 16];
		assert_eq!(oracle.quick_lookup(&miss), LookupOutcome::Unknown);
	}

	#[test]
	fn rejects_malformed_digests() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bad.idx");
		std::fs::write(&path, "nothex\n").unwrap();
		assert!(matches!(
			TextIndexOracle::load(&path),
			Err(OracleError::BadDigest { line: 1, .. })
		));
	}
}
