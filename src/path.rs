//! Path resolution: walking a slash-separated path down from the root inode.

use crate::dir;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::geometry::VolumeGeometry;
use crate::inode::{FileKind, Inode};
use crate::io_source::ReadAt;

/// Maximum number of path segments walked before giving up on a pathological path.
const MAX_DEPTH: usize = 256;

/// Splits an absolute path on `/`, collapsing repeats and dropping empty
/// leading/trailing segments.
fn split_segments(path: &str) -> Vec<&str> {
	path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Resolves `path` to an inode number, starting from `geometry.root_inode_number`.
pub fn resolve<R: ReadAt + ?Sized>(source: &R, geometry: &VolumeGeometry, path: &str) -> Result<u64> {
	let segments = split_segments(path);
	if segments.len() > MAX_DEPTH {
		return Error::err(ErrorKind::InvalidData, "path exceeds maximum segment depth");
	}

	let mut current_inode_number = geometry.root_inode_number;
	for segment in segments {
		let inode = Inode::read(source, geometry, current_inode_number).context("resolve_path")?;
		if inode.file_kind != FileKind::Directory {
			return Error::err(ErrorKind::NotFound, format!("path component is not a directory: {segment:?}"));
		}
		let entries = dir::list(source, geometry, &inode).context("resolve_path")?;
		let found = entries
			.into_iter()
			.find(|e| e.name == segment.as_bytes())
			.ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no such entry: {segment:?}")))?;
		current_inode_number = found.inode_number;
	}
	Ok(current_inode_number)
}
