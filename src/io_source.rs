//! The pluggable byte-oriented I/O contract the volume reads through.
//!
//! The production driver (disk image mounter, block-device shim, partition
//! offset translator) lives outside this crate; [`ReadAt`] is the minimal
//! contract it must satisfy. [`SliceSource`] and [`FileSource`] are thin
//! reference adapters used by this crate's own tests and by simple callers
//! that just want to point at a flat image file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use crate::error::{Error, ErrorKind, Result};

/// A byte-oriented, offset-addressed read source.
///
/// Offsets are relative to the start of the image as the volume sees it
/// (i.e. already adjusted for any partition offset by the caller).
/// Implementations may be called concurrently from multiple threads if and
/// only if they document that as safe; this crate never assumes it.
pub trait ReadAt {
	/// Reads `buf.len()` bytes starting at `offset`, filling `buf`.
	///
	/// Returns `ErrorKind::Io` if the underlying source fails or cannot
	/// supply the full length requested (a short read past the end of the
	/// source is treated as an I/O error, not an empty region — callers
	/// that want zero-filled holes clamp their own lengths first).
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// An in-memory, byte-slice-backed source.
///
/// Useful for tests and for images that have already been loaded wholesale
/// into memory.
#[derive(Debug)]
pub struct SliceSource {
	data: Vec<u8>,
}

impl SliceSource {
	/// Wraps an owned byte buffer as a read source.
	pub fn new(data: Vec<u8>) -> Self {
		Self { data }
	}

	/// Returns the number of bytes backing this source.
	pub fn len(&self) -> u64 {
		self.data.len() as u64
	}

	/// Returns whether the backing buffer is empty.
	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}

impl ReadAt for SliceSource {
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
		let start = usize::try_from(offset)
			.map_err(|_| Error::new(ErrorKind::OutOfBounds, "offset exceeds addressable range"))?;
		let end = start
			.checked_add(buf.len())
			.ok_or_else(|| Error::new(ErrorKind::OutOfBounds, "read range overflows"))?;
		let slice = self
			.data
			.get(start..end)
			.ok_or_else(|| Error::new(ErrorKind::Io, "read past end of source"))?;
		buf.copy_from_slice(slice);
		Ok(())
	}
}

/// A `File`-backed source, for pointing the library directly at a flat
/// image file on disk.
///
/// Wraps the file in a [`Mutex`] since `Read + Seek` requires `&mut self`
/// but [`ReadAt::read_at`] takes `&self`; the library itself never holds
/// the lock across another read, so contention only happens under genuine
/// concurrent access from the caller.
pub struct FileSource {
	file: Mutex<File>,
}

impl FileSource {
	/// Opens the file at `path` for reading.
	pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
		let file = File::open(path)?;
		Ok(Self {
			file: Mutex::new(file),
		})
	}

	/// Wraps an already-open file.
	pub fn from_file(file: File) -> Self {
		Self {
			file: Mutex::new(file),
		}
	}
}

impl ReadAt for FileSource {
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
		let mut file = self
			.file
			.lock()
			.map_err(|_| Error::new(ErrorKind::Io, "file source lock poisoned"))?;
		file.seek(SeekFrom::Start(offset))?;
		file.read_exact(buf)?;
		Ok(())
	}
}
