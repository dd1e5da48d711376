//! Raw and split-raw image sources
//!
//! The only image decoder bundled with the engine. Expert-witness and other
//! evidence containers plug in through [`SourceResolver`] implementations of
//! their own.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::domain::ImageFormat;

use super::{ImageSource, ReaderError, SourceResolver, VolumeSystemSource};

struct Part {
	path: PathBuf,
	file: Mutex<File>,
	len: i64,
	/// Byte offset of this part inside the logical image.
	start: i64,
}

/// A raw image, possibly split across several files read in order.
pub struct RawImageSource {
	parts: Vec<Part>,
	sector_size: u32,
	size: i64,
	format: ImageFormat,
}

impl RawImageSource {
	pub fn open(paths: &[PathBuf], sector_size: u32) -> Result<Self, ReaderError> {
		if paths.is_empty() {
			return Err(ReaderError::Unsupported("no image parts given".into()));
		}
		let mut parts = Vec::with_capacity(paths.len());
		let mut total: i64 = 0;
		for path in paths {
			let file = File::open(path)?;
			let len = file.metadata()?.len() as i64;
			parts.push(Part {
				path: path.clone(),
				file: Mutex::new(file),
				len,
				start: total,
			});
			total += len;
		}
		debug!(parts = parts.len(), size = total, "opened raw image");
		Ok(Self {
			parts,
			sector_size,
			size: total,
			format: if paths.len() > 1 {
				ImageFormat::SplitRaw
			} else {
				ImageFormat::Raw
			},
		})
	}
}

impl ImageSource for RawImageSource {
	fn format(&self) -> ImageFormat {
		self.format
	}

	fn sector_size(&self) -> u32 {
		self.sector_size
	}

	fn size(&self) -> i64 {
		self.size
	}

	fn parts(&self) -> Vec<PathBuf> {
		self.parts.iter().map(|p| p.path.clone()).collect()
	}

	fn read_at(&self, offset: i64, buf: &mut [u8]) -> Result<usize, ReaderError> {
		if offset < 0 || offset > self.size {
			return Err(ReaderError::OutOfBounds {
				offset,
				len: buf.len(),
				size: self.size,
			});
		}
		let mut filled = 0usize;
		let mut pos = offset;
		while filled < buf.len() && pos < self.size {
			// Find the part containing `pos`; parts are ordered by start.
			let part = self
				.parts
				.iter()
				.rev()
				.find(|p| p.start <= pos)
				.expect("offset within image bounds");
			let within = pos - part.start;
			let avail = (part.len - within) as usize;
			let want = (buf.len() - filled).min(avail);
			if want == 0 {
				break;
			}
			let mut file = part.file.lock().expect("image part lock poisoned");
			file.seek(SeekFrom::Start(within as u64))?;
			file.read_exact(&mut buf[filled..filled + want])?;
			filled += want;
			pos += want as i64;
		}
		Ok(filled)
	}
}

/// Resolver for deployments without any file-system decoders: raw images open,
/// volume-system detection finds nothing, file-system opens are unsupported.
/// An image ingested through this resolver is catalogued as a single
/// unallocated region when `record_unallocated` is on.
#[derive(Default)]
pub struct RawResolver;

impl SourceResolver for RawResolver {
	fn open_image(
		&self,
		parts: &[PathBuf],
		format: ImageFormat,
		sector_size: u32,
	) -> Result<Arc<dyn ImageSource>, ReaderError> {
		match format {
			ImageFormat::Detect | ImageFormat::Raw | ImageFormat::SplitRaw => Ok(Arc::new(
				RawImageSource::open(parts, sector_size)?,
			)),
			other => Err(ReaderError::Unsupported(format!(
				"image format {other:?} requires an external decoder"
			))),
		}
	}

	fn detect_volume_system(
		&self,
		_image: &Arc<dyn ImageSource>,
	) -> Result<Option<Arc<dyn VolumeSystemSource>>, ReaderError> {
		Ok(None)
	}

	fn open_file_system(
		&self,
		_image: &Arc<dyn ImageSource>,
		byte_offset: i64,
	) -> Result<Arc<dyn super::FileSystemSource>, ReaderError> {
		Err(ReaderError::Unsupported(format!(
			"no file-system decoders registered (offset {byte_offset})"
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn reads_across_split_parts() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("img.001");
		let b = dir.path().join("img.002");
		std::fs::File::create(&a)
			.unwrap()
			.write_all(&[1u8; 1000])
			.unwrap();
		std::fs::File::create(&b)
			.unwrap()
			.write_all(&[2u8; 1000])
			.unwrap();

		let img = RawImageSource::open(&[a, b], 512).unwrap();
		assert_eq!(img.size(), 2000);
		assert_eq!(img.format(), ImageFormat::SplitRaw);

		let mut buf = [0u8; 100];
		let n = img.read_at(950, &mut buf).unwrap();
		assert_eq!(n, 100);
		assert_eq!(&buf[..50], &[1u8; 50]);
		assert_eq!(&buf[50..], &[2u8; 50]);
	}

	#[test]
	fn short_read_at_end() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("img.raw");
		std::fs::File::create(&a)
			.unwrap()
			.write_all(&[7u8; 100])
			.unwrap();

		let img = RawImageSource::open(&[a], 512).unwrap();
		let mut buf = [0u8; 64];
		assert_eq!(img.read_at(80, &mut buf).unwrap(), 20);
		assert!(matches!(
			img.read_at(101, &mut buf),
			Err(ReaderError::OutOfBounds { .. })
		));
	}
}
