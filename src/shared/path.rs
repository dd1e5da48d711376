//! Catalogue path handling
//!
//! Every `parent_path` stored in the case database goes through this module:
//! names are sanitised to UTF-8 with `^` standing in for undecodable bytes,
//! paths are normalised to a single canonical shape, and directory identity
//! hashing ignores separators so that `a/b`, `/a/b` and `a//b` agree.

/// Separator used in stored parent paths.
pub const PATH_SEP: char = '/';

/// Replacement for bytes that do not decode as UTF-8.
pub const NON_UTF8_REPLACEMENT: char = '^';

/// Longest parent path the catalogue will store. Entries deeper than this are
/// skipped with a registered issue.
pub const MAX_PARENT_PATH: usize = 2048;

/// Decode a raw on-disk name, substituting `^` for every byte that is not part
/// of a valid UTF-8 sequence.
pub fn sanitize_name(raw: &[u8]) -> String {
	let mut out = String::with_capacity(raw.len());
	let mut rest = raw;
	loop {
		match std::str::from_utf8(rest) {
			Ok(valid) => {
				out.push_str(valid);
				break;
			}
			Err(err) => {
				let (valid, invalid) = rest.split_at(err.valid_up_to());
				out.push_str(std::str::from_utf8(valid).unwrap_or_default());
				let skip = err.error_len().unwrap_or(invalid.len()).max(1);
				for _ in 0..skip.min(invalid.len()) {
					out.push(NON_UTF8_REPLACEMENT);
				}
				if skip >= invalid.len() {
					break;
				}
				rest = &invalid[skip..];
			}
		}
	}
	out
}

/// Normalise a stored parent path: leading and trailing separator, duplicate
/// separators collapsed. Normalising twice equals normalising once.
pub fn normalize_parent_path(path: &str) -> String {
	let mut out = String::with_capacity(path.len() + 2);
	out.push(PATH_SEP);
	for segment in path.split(PATH_SEP).filter(|s| !s.is_empty()) {
		out.push_str(segment);
		out.push(PATH_SEP);
	}
	out
}

/// Append one directory name to an already-normalised parent path.
pub fn push_dir(parent_path: &str, name: &str) -> String {
	if name.is_empty() {
		return parent_path.to_string();
	}
	let mut out = String::with_capacity(parent_path.len() + name.len() + 1);
	out.push_str(parent_path);
	out.push_str(name);
	out.push(PATH_SEP);
	out
}

/// Directory-identity hash: djb2 over the path bytes with separators skipped.
///
/// Used as the sequence discriminator for file-system families that do not
/// carry an on-disk sequence number. Ignoring `/` makes the hash invariant
/// under leading, trailing, and doubled separators.
pub fn path_discriminator(path: &str) -> u64 {
	let mut hash: u64 = 5381;
	for &b in path.as_bytes() {
		if b == PATH_SEP as u8 {
			continue;
		}
		hash = hash.wrapping_mul(33).wrapping_add(u64::from(b));
	}
	hash
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn sanitize_passes_valid_utf8_through() {
		assert_eq!(sanitize_name(b"readme.txt"), "readme.txt");
		assert_eq!(sanitize_name("déjà.bin".as_bytes()), "déjà.bin");
	}

	#[test]
	fn sanitize_replaces_invalid_bytes() {
		assert_eq!(sanitize_name(b"bad\xff\xfename"), "bad^^name");
		// Truncated multi-byte sequence at the end.
		assert_eq!(sanitize_name(b"tail\xe2\x82"), "tail^^");
	}

	#[test]
	fn normalize_is_idempotent() {
		for raw in ["a/b", "/a/b", "a//b", "/a/b/", "", "/", "///"] {
			let once = normalize_parent_path(raw);
			assert_eq!(normalize_parent_path(&once), once, "input {raw:?}");
		}
		assert_eq!(normalize_parent_path("a//b"), "/a/b/");
		assert_eq!(normalize_parent_path(""), "/");
	}

	#[test]
	fn push_dir_keeps_shape() {
		assert_eq!(push_dir("/", "dir"), "/dir/");
		assert_eq!(push_dir("/dir/", "sub"), "/dir/sub/");
		assert_eq!(push_dir("/dir/", ""), "/dir/");
	}

	#[test]
	fn discriminator_ignores_separators() {
		let base = path_discriminator("a/b");
		assert_eq!(path_discriminator("/a/b"), base);
		assert_eq!(path_discriminator("a//b"), base);
		assert_eq!(path_discriminator("/a/b/"), base);
		assert_ne!(path_discriminator("a/c"), base);
	}

	#[test]
	fn discriminator_matches_reference_djb2() {
		// djb2("ab") = ((5381 * 33) + 'a') * 33 + 'b'
		let expected = (5381u64 * 33 + u64::from(b'a')) * 33 + u64::from(b'b');
		assert_eq!(path_discriminator("a/b"), expected);
	}
}
