//! Public handle surface: [`Volume`], [`FileEntry`], and the attribute/extent
//! views reachable from it.
//!
//! This is the only module application code is expected to use directly;
//! everything else in the crate exists to make these few operations
//! possible. A handle borrows the volume it came from and owns a
//! freshly-decoded inode record — nothing here is mutable once constructed.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::dir::{self, DirectoryEntry};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::extent::ExtentRun;
use crate::file_data;
use crate::geometry::VolumeGeometry;
use crate::inode::{FileKind, Inode};
use crate::io_source::ReadAt;
use crate::path;
use crate::xattr::{self, ExtendedAttribute as RawExtendedAttribute};

/// Caller-supplied options controlling a volume's walk behavior.
///
/// `max_walk_depth` bounds path resolution and B+tree descents beyond this
/// crate's own hard caps; leave it at the default unless a caller needs a
/// tighter bound for a specific image.
#[derive(Debug, Clone)]
pub struct VolumeOptions {
	pub max_walk_depth: usize,
}

impl Default for VolumeOptions {
	fn default() -> Self {
		Self { max_walk_depth: 256 }
	}
}

/// A mounted, read-only XFS volume.
///
/// Exclusively owns the I/O source for its lifetime. Every handle obtained
/// from it (`FileEntry`, attribute and extent views) borrows back into this
/// struct and is only valid for as long as it lives.
#[derive(Debug)]
pub struct Volume<R: ReadAt> {
	source: R,
	geometry: VolumeGeometry,
	options: VolumeOptions,
	abort_requested: AtomicBool,
}

impl<R: ReadAt> Volume<R> {
	/// Opens a volume by parsing its superblock from `source`.
	pub fn open(source: R, options: VolumeOptions) -> Result<Self> {
		let mut buf = [0u8; 512];
		source.read_at(0, &mut buf).context("open_volume")?;
		let geometry = VolumeGeometry::parse(&buf).context("open_volume")?;
		log::debug!(
			"opened volume: format v{}, block_size={}, ag_count={}, root_inode={}",
			geometry.format_version,
			geometry.block_size,
			geometry.ag_count,
			geometry.root_inode_number
		);
		Ok(Self {
			source,
			geometry,
			options,
			abort_requested: AtomicBool::new(false),
		})
	}

	/// The geometry parsed from this volume's superblock.
	pub fn geometry(&self) -> &VolumeGeometry {
		&self.geometry
	}

	/// Requests that any in-progress walk abort at its next checkpoint.
	pub fn request_abort(&self) {
		self.abort_requested.store(true, Ordering::Relaxed);
	}

	fn check_abort(&self) -> Result<()> {
		if self.abort_requested.load(Ordering::Relaxed) {
			Error::err(ErrorKind::AbortRequested, "volume walk aborted by caller")
		} else {
			Ok(())
		}
	}

	/// Opens the root directory's entry handle.
	pub fn root(&self) -> Result<FileEntry<'_, R>> {
		self.open_inode(self.geometry.root_inode_number)
	}

	/// Opens the entry at `inode_number` directly, without a path walk.
	pub fn open_inode(&self, inode_number: u64) -> Result<FileEntry<'_, R>> {
		let inode = Inode::read(&self.source, &self.geometry, inode_number).context("open_inode")?;
		Ok(FileEntry { volume: self, inode })
	}

	/// Resolves an absolute `/`-separated path to its entry handle.
	pub fn open_path(&self, path: &str) -> Result<FileEntry<'_, R>> {
		self.check_abort()?;
		if path.matches('/').count() > self.options.max_walk_depth {
			return Error::err(ErrorKind::InvalidData, "path exceeds configured maximum walk depth");
		}
		let inode_number = path::resolve(&self.source, &self.geometry, path).context("open_path")?;
		self.open_inode(inode_number)
	}
}

/// A handle to one inode, reached either directly or through a path walk.
#[derive(Debug)]
pub struct FileEntry<'a, R: ReadAt> {
	volume: &'a Volume<R>,
	inode: Inode,
}

impl<'a, R: ReadAt> FileEntry<'a, R> {
	/// The inode's absolute number.
	pub fn inode_number(&self) -> u64 {
		self.inode.inode_number
	}

	/// The entry's file type.
	pub fn file_kind(&self) -> FileKind {
		self.inode.file_kind
	}

	/// Unix permission bits (12 bits: rwx for owner/group/other plus setuid/setgid/sticky).
	pub fn permissions(&self) -> u16 {
		self.inode.permissions
	}

	pub fn link_count(&self) -> u32 {
		self.inode.link_count
	}

	pub fn owner_uid(&self) -> u32 {
		self.inode.owner_uid
	}

	pub fn owner_gid(&self) -> u32 {
		self.inode.owner_gid
	}

	pub fn size_in_bytes(&self) -> u64 {
		self.inode.size_in_bytes
	}

	pub fn access_time(&self) -> crate::inode::Timestamp {
		self.inode.access_time
	}

	pub fn modification_time(&self) -> crate::inode::Timestamp {
		self.inode.modification_time
	}

	pub fn change_time(&self) -> crate::inode::Timestamp {
		self.inode.change_time
	}

	/// Creation time, available only on v5 (CRC-enabled) volumes.
	pub fn creation_time(&self) -> Option<crate::inode::Timestamp> {
		self.inode.creation_time
	}

	/// Reads up to `length` bytes of this entry's data starting at `offset`.
	///
	/// Valid for regular files and, for targets longer than the inline
	/// threshold, symlinks; directories return `InvalidArgument`.
	pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		if self.inode.file_kind == FileKind::Directory {
			return Error::err(ErrorKind::InvalidArgument, "cannot read data from a directory entry");
		}
		file_data::read(&self.volume.source, &self.volume.geometry, &self.inode, offset, length).context("file_entry_read")
	}

	/// Lists this directory's entries. Fails with `InvalidArgument` if this
	/// entry is not a directory.
	pub fn list_directory(&self) -> Result<Vec<DirectoryEntry>> {
		if self.inode.file_kind != FileKind::Directory {
			return Error::err(ErrorKind::InvalidArgument, "entry is not a directory");
		}
		dir::list(&self.volume.source, &self.volume.geometry, &self.inode).context("list_directory")
	}

	/// Looks up a single child by name within this directory.
	pub fn lookup(&self, name: &[u8]) -> Result<FileEntry<'a, R>> {
		let entries = self.list_directory()?;
		let found = entries
			.into_iter()
			.find(|e| e.name == name)
			.ok_or_else(|| Error::new(ErrorKind::NotFound, "no such directory entry"))?;
		self.volume.open_inode(found.inode_number)
	}

	/// Lists this entry's extended attributes.
	pub fn list_attributes(&self) -> Result<Vec<ExtendedAttribute<'a, R>>> {
		let raw = xattr::list(&self.volume.source, &self.volume.geometry, &self.inode).context("list_attributes")?;
		Ok(raw
			.into_iter()
			.map(|attribute| ExtendedAttribute { volume: self.volume, attribute })
			.collect())
	}

	/// Returns this file's resolved extent runs, for regular files with an
	/// extent-mapped data fork.
	pub fn extents(&self) -> Result<Vec<ExtentRun>> {
		match self.inode.data_fork_format {
			crate::inode::ForkFormat::Extents => crate::extent::decode_extent_list(self.inode.data_fork_bytes()),
			crate::inode::ForkFormat::Btree => {
				let header_level = crate::decode::read_u16(self.inode.data_fork_bytes(), 2)?;
				let root_ptrs = self.inode.data_fork_bytes().get(4..).unwrap_or(&[]);
				crate::extent::resolve_btree_fork(&self.volume.source, &self.volume.geometry, root_ptrs, header_level)
			}
			_ => Ok(Vec::new()),
		}
		.context("extents")
	}
}

/// A handle to one extended attribute, able to resolve a remote value's bytes.
pub struct ExtendedAttribute<'a, R: ReadAt> {
	volume: &'a Volume<R>,
	attribute: RawExtendedAttribute,
}

impl<'a, R: ReadAt> ExtendedAttribute<'a, R> {
	/// The namespace-qualified name, e.g. `b"user.comment"`.
	pub fn name(&self) -> Vec<u8> {
		self.attribute.qualified_name()
	}

	/// Reads this attribute's value bytes, resolving a remote value through
	/// the attribute fork's extent map if necessary.
	pub fn value(&self) -> Result<Vec<u8>> {
		match &self.attribute.value {
			xattr::AttributeValue::Local(bytes) => Ok(bytes.clone()),
			xattr::AttributeValue::Remote { block_number, length } => {
				xattr::read_remote_value(&self.volume.source, &self.volume.geometry, *block_number, *length).context("attribute_value")
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::io_source::SliceSource;

	fn build_minimal_image() -> Vec<u8> {
		// One AG, block size == sector size, so each AG header lives in its
		// own block: block 0 superblock, block 1 AGF, block 2 AGI, block 3
		// AGFL, block 4 the (single-record, one-level) inode B+tree, block 5
		// the root inode's chunk. With inode_size == block_size there is
		// exactly one inode per block, so AG-relative block == AG-relative
		// inode number and the root inode number is simply 5.
		let block_size = 512u32;
		let sector_size = 512u16;
		let ag_block_count = 64u32;
		let inode_size = 512u16;
		let root_inode_number = 5u64;

		let mut full = vec![0u8; ag_block_count as usize * block_size as usize];

		full[0..4].copy_from_slice(b"XFSB");
		full[4..8].copy_from_slice(&block_size.to_be_bytes());
		full[56..64].copy_from_slice(&root_inode_number.to_be_bytes());
		full[84..88].copy_from_slice(&ag_block_count.to_be_bytes());
		full[88..92].copy_from_slice(&1u32.to_be_bytes()); // ag_count
		full[100..102].copy_from_slice(&5u16.to_be_bytes()); // v5
		full[102..104].copy_from_slice(&sector_size.to_be_bytes());
		full[104..106].copy_from_slice(&inode_size.to_be_bytes());
		full[106..108].copy_from_slice(&1u16.to_be_bytes()); // inodes per block

		let agi_offset = 2 * block_size as usize;
		full[agi_offset..agi_offset + 4].copy_from_slice(b"XAGI");
		full[agi_offset + 8..agi_offset + 12].copy_from_slice(&0u32.to_be_bytes()); // seqno
		full[agi_offset + 20..agi_offset + 24].copy_from_slice(&4u32.to_be_bytes()); // inobt root block
		full[agi_offset + 24..agi_offset + 28].copy_from_slice(&0u32.to_be_bytes()); // level 0

		let inobt_offset = 4 * block_size as usize;
		full[inobt_offset..inobt_offset + 4].copy_from_slice(b"IAB3");
		full[inobt_offset + 6..inobt_offset + 8].copy_from_slice(&1u16.to_be_bytes()); // 1 record
		let rec_offset = inobt_offset + 4 + 2 + 2 + 4 + 4 + 40;
		full[rec_offset..rec_offset + 4].copy_from_slice(&0u32.to_be_bytes()); // chunk startino 0
		full[rec_offset + 4..rec_offset + 6].copy_from_slice(&0u16.to_be_bytes()); // holemask: nothing free

		let inode_offset = 5 * block_size as usize;
		{
			let inode = &mut full[inode_offset..inode_offset + inode_size as usize];
			inode[0..2].copy_from_slice(b"IN");
			inode[2..4].copy_from_slice(&0x41edu16.to_be_bytes()); // directory, 0755
			inode[4] = 3; // v3
			inode[5] = 1; // data format: inline (short-form dir)
			inode[16..20].copy_from_slice(&2u32.to_be_bytes()); // nlink
			inode[56..64].copy_from_slice(&6u64.to_be_bytes()); // size: short-form header+parent
			inode[152..160].copy_from_slice(&root_inode_number.to_be_bytes());

			let header_size = 176usize;
			let shortform = &mut inode[header_size..header_size + 10];
			shortform[0] = 0; // count
			shortform[1] = 0; // count8 (narrow inode numbers)
			shortform[2..6].copy_from_slice(&0u32.to_be_bytes()); // parent ino (4 bytes, narrow)
		}

		full
	}

	#[test]
	fn opens_volume_and_lists_empty_root() {
		let image = build_minimal_image();
		let src = SliceSource::new(image);
		let volume = Volume::open(src, VolumeOptions::default()).unwrap();
		let root = volume.root().unwrap();
		assert_eq!(root.file_kind(), FileKind::Directory);
		let entries = root.list_directory().unwrap();
		assert!(entries.is_empty());
	}

	#[test]
	fn open_path_with_empty_path_returns_root() {
		let image = build_minimal_image();
		let src = SliceSource::new(image);
		let volume = Volume::open(src, VolumeOptions::default()).unwrap();
		let entry = volume.open_path("/").unwrap();
		assert_eq!(entry.inode_number(), 5);
	}

	#[test]
	fn abort_request_is_observed() {
		let image = build_minimal_image();
		let src = SliceSource::new(image);
		let volume = Volume::open(src, VolumeOptions::default()).unwrap();
		volume.request_abort();
		let err = volume.open_path("/foo").unwrap_err();
		assert_eq!(err.kind(), ErrorKind::AbortRequested);
	}
}
